use bytes::Bytes;

/// Codec-level facts about an access unit that survive depacketization.
///
/// The RTP payload descriptor is stripped when a unit is reconstructed, so
/// anything the egress gates need from it travels here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// The unit starts a decodable point (H264 IDR, VP8 keyframe, AV1 new
    /// coded video sequence).
    pub keyframe: bool,

    /// Temporal layer index from the payload descriptor, where the codec
    /// carries one (VP8 TID). `None` means "not signalled".
    pub temporal_id: Option<u8>,
}

/// One access unit, independent of how it arrived on the wire.
///
/// Units are immutable once produced. The payload is refcounted so fanning a
/// unit out to many consumers does not copy media bytes.
#[derive(Debug, Clone)]
pub struct MediaUnit {
    /// Codec bitstream bytes for one access unit.
    pub payload: Bytes,
    /// Presentation time in `time_base` ticks.
    pub pts: i64,
    /// Decode time in `time_base` ticks.
    pub dts: i64,
    /// Duration in `time_base` ticks. 0 when unknown (first unit of a stream).
    pub duration: i64,
    /// Clock rate the timing fields are expressed against (90000 for video,
    /// the sample rate for audio).
    pub time_base: u32,
    /// Codec-level metadata for egress gating.
    pub frame: FrameInfo,
}

impl MediaUnit {
    pub fn is_keyframe(&self) -> bool {
        self.frame.keyframe
    }
}
