use std::fmt;

use bytes::Bytes;

use crate::packet::MediaKind;

/// Codec families the engine can depacketize and forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    Vp8,
    Av1,
    Opus,
    Aac,
}

impl Codec {
    pub fn kind(&self) -> MediaKind {
        match self {
            Codec::H264 | Codec::Vp8 | Codec::Av1 => MediaKind::Video,
            Codec::Opus | Codec::Aac => MediaKind::Audio,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Codec::H264 => "video/H264",
            Codec::Vp8 => "video/VP8",
            Codec::Av1 => "video/AV1",
            Codec::Opus => "audio/opus",
            Codec::Aac => "audio/aac",
        }
    }

    /// Look up a codec family by negotiated mime type (case insensitive).
    pub fn from_mime(mime: &str) -> Option<Codec> {
        let m = mime.to_ascii_lowercase();
        match m.as_str() {
            "video/h264" => Some(Codec::H264),
            "video/vp8" => Some(Codec::Vp8),
            "video/av1" => Some(Codec::Av1),
            "audio/opus" => Some(Codec::Opus),
            "audio/aac" | "audio/mp4a-latm" => Some(Codec::Aac),
            _ => None,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime_type())
    }
}

/// A negotiated codec instance.
///
/// Equality is structural: two descriptors of the same family with different
/// parameters (two simulcast resolutions, say) are different descriptors and
/// resolve to different tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecDescriptor {
    H264 {
        sps: Bytes,
        pps: Bytes,
        profile: u8,
        level: u8,
        width: u32,
        height: u32,
    },
    Vp8 {
        width: u32,
        height: u32,
    },
    Av1 {
        seq_header: Bytes,
        width: u32,
        height: u32,
    },
    Opus {
        sample_rate: u32,
        channels: u8,
    },
    Aac {
        sample_rate: u32,
        channels: u8,
        sample_format: u8,
    },
}

impl CodecDescriptor {
    /// Default descriptor for passthrough Opus before in-band parameters
    /// are known. RTP Opus is always 48kHz stereo on the wire.
    pub fn opus_default() -> CodecDescriptor {
        CodecDescriptor::Opus {
            sample_rate: 48_000,
            channels: 2,
        }
    }

    pub fn codec(&self) -> Codec {
        match self {
            CodecDescriptor::H264 { .. } => Codec::H264,
            CodecDescriptor::Vp8 { .. } => Codec::Vp8,
            CodecDescriptor::Av1 { .. } => Codec::Av1,
            CodecDescriptor::Opus { .. } => Codec::Opus,
            CodecDescriptor::Aac { .. } => Codec::Aac,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.codec().kind()
    }

    /// RTP clock rate for this codec instance.
    pub fn clock_rate(&self) -> u32 {
        match self {
            CodecDescriptor::H264 { .. }
            | CodecDescriptor::Vp8 { .. }
            | CodecDescriptor::Av1 { .. } => 90_000,
            CodecDescriptor::Opus { .. } => 48_000,
            CodecDescriptor::Aac { sample_rate, .. } => *sample_rate,
        }
    }

    /// Canonical string form. Tracks are keyed by this, which is what makes
    /// simulcast layers of one codec family distinct tracks.
    pub fn descriptor_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CodecDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecDescriptor::H264 {
                profile,
                level,
                width,
                height,
                ..
            } => write!(
                f,
                "h264 {}x{} profile:{:#04x} level:{}",
                width, height, profile, level
            ),
            CodecDescriptor::Vp8 { width, height } => write!(f, "vp8 {}x{}", width, height),
            CodecDescriptor::Av1 { width, height, .. } => write!(f, "av1 {}x{}", width, height),
            CodecDescriptor::Opus {
                sample_rate,
                channels,
            } => write!(f, "opus {}hz/{}ch", sample_rate, channels),
            CodecDescriptor::Aac {
                sample_rate,
                channels,
                sample_format,
            } => write!(f, "aac {}hz/{}ch fmt:{}", sample_rate, channels, sample_format),
        }
    }
}
