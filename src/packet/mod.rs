//! RTP payload handling for the supported codecs.
//!
//! Each codec gets a depacketizer that turns a sequence of RTP packets into
//! access units, and a packetizer that splits an access unit back into
//! MTU-sized payloads. Depacketizers also watch the bitstream for in-band
//! parameter changes and report them as [`Depacketized::codec_change`].

use std::fmt;

use bytes::Bytes;

use crate::codec::{Codec, CodecDescriptor};
use crate::rtp::RtpPacket;
use crate::unit::FrameInfo;

mod bitstream;
pub(crate) use bitstream::BitStream;

mod error;
pub use error::PacketError;

pub mod h264;
pub use h264::{H264Depacketizer, H264Packetizer};

mod h264_sps;
pub use h264_sps::Sps;

mod vp8;
pub use vp8::{Vp8Depacketizer, Vp8Packetizer};

mod av1;
pub use av1::{Av1Depacketizer, Av1Packetizer, ObuHeader};

mod passthrough;
pub use passthrough::{PassthroughDepacketizer, PassthroughPacketizer};

/// Audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn is_audio(&self) -> bool {
        *self == MediaKind::Audio
    }

    pub fn is_video(&self) -> bool {
        *self == MediaKind::Video
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// One reconstructed access unit, before timing is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub payload: Bytes,
    pub frame: FrameInfo,
}

/// Result of feeding one RTP packet to a depacketizer.
///
/// Zero units is normal (a fragment in the middle of a frame). A codec
/// change, when present, applies to the units in the same result and all
/// units after it.
#[derive(Debug, Default, PartialEq)]
pub struct Depacketized {
    pub units: Vec<AccessUnit>,
    pub codec_change: Option<CodecDescriptor>,
}

impl Depacketized {
    pub(crate) fn unit(payload: Bytes, frame: FrameInfo) -> Depacketized {
        Depacketized {
            units: vec![AccessUnit { payload, frame }],
            codec_change: None,
        }
    }
}

/// Turn RTP payloads back into access units.
pub trait Depacketizer {
    fn depacketize(&mut self, packet: &RtpPacket) -> Result<Depacketized, PacketError>;
}

/// Split an access unit into RTP payloads no larger than `mtu`.
pub trait Packetizer {
    fn packetize(&mut self, mtu: usize, payload: &[u8]) -> Result<Vec<Vec<u8>>, PacketError>;
}

/// Depacketizer for some supported codec.
pub enum CodecDepacketizer {
    H264(H264Depacketizer),
    Vp8(Vp8Depacketizer),
    Av1(Av1Depacketizer),
    Passthrough(PassthroughDepacketizer),
}

impl CodecDepacketizer {
    pub fn new(codec: Codec) -> CodecDepacketizer {
        match codec {
            Codec::H264 => CodecDepacketizer::H264(H264Depacketizer::default()),
            Codec::Vp8 => CodecDepacketizer::Vp8(Vp8Depacketizer::default()),
            Codec::Av1 => CodecDepacketizer::Av1(Av1Depacketizer::default()),
            Codec::Opus => CodecDepacketizer::Passthrough(PassthroughDepacketizer::new(
                CodecDescriptor::opus_default(),
            )),
            Codec::Aac => CodecDepacketizer::Passthrough(PassthroughDepacketizer::new(
                CodecDescriptor::Aac {
                    sample_rate: 48_000,
                    channels: 2,
                    sample_format: 0,
                },
            )),
        }
    }
}

impl Depacketizer for CodecDepacketizer {
    fn depacketize(&mut self, packet: &RtpPacket) -> Result<Depacketized, PacketError> {
        match self {
            CodecDepacketizer::H264(v) => v.depacketize(packet),
            CodecDepacketizer::Vp8(v) => v.depacketize(packet),
            CodecDepacketizer::Av1(v) => v.depacketize(packet),
            CodecDepacketizer::Passthrough(v) => v.depacketize(packet),
        }
    }
}

/// Packetizer for some supported codec.
pub enum CodecPacketizer {
    H264(H264Packetizer),
    Vp8(Vp8Packetizer),
    Av1(Av1Packetizer),
    Passthrough(PassthroughPacketizer),
}

impl CodecPacketizer {
    pub fn new(codec: Codec) -> CodecPacketizer {
        match codec {
            Codec::H264 => CodecPacketizer::H264(H264Packetizer::default()),
            Codec::Vp8 => CodecPacketizer::Vp8(Vp8Packetizer::default()),
            Codec::Av1 => CodecPacketizer::Av1(Av1Packetizer::default()),
            Codec::Opus | Codec::Aac => {
                CodecPacketizer::Passthrough(PassthroughPacketizer::default())
            }
        }
    }
}

impl Packetizer for CodecPacketizer {
    fn packetize(&mut self, mtu: usize, payload: &[u8]) -> Result<Vec<Vec<u8>>, PacketError> {
        match self {
            CodecPacketizer::H264(v) => v.packetize(mtu, payload),
            CodecPacketizer::Vp8(v) => v.packetize(mtu, payload),
            CodecPacketizer::Av1(v) => v.packetize(mtu, payload),
            CodecPacketizer::Passthrough(v) => v.packetize(mtu, payload),
        }
    }
}

/// Cursor over an RTP payload.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn get_u8(&mut self) -> Result<u8, PacketError> {
        if self.remaining() < 1 {
            return Err(PacketError::ErrShortPacket);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8], PacketError> {
        if self.remaining() < len {
            return Err(PacketError::ErrShortPacket);
        }
        let v = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(v)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let v = &self.buf[self.pos..];
        self.pos = self.buf.len();
        v
    }

    /// Unsigned LEB128 as used by the AV1 aggregation format.
    pub fn read_leb128(&mut self) -> Result<usize, PacketError> {
        let mut value: u64 = 0;
        for i in 0..8 {
            let b = self.get_u8()?;
            value |= u64::from(b & 0x7f) << (i * 7);
            if b & 0x80 == 0 {
                return Ok(value as usize);
            }
        }
        Err(PacketError::ErrAv1CorruptedPacket)
    }
}
