use thiserror::Error;

/// Errors arising from depacketizing or packetizing RTP payloads.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PacketError {
    #[error("packet is too short")]
    ErrShortPacket,

    #[error("STAP-A declared size {0} is larger than buffer {1}")]
    StapASizeLargerThanBuffer(usize, usize),

    #[error("NALU type {0} is unhandled")]
    NaluTypeIsNotHandled(u8),

    #[error("SPS does not parse")]
    ErrInvalidSps,

    #[error("AV1 aggregation header is corrupted")]
    ErrAv1CorruptedPacket,

    #[error("AV1 sequence header does not parse")]
    ErrInvalidSequenceHeader,

    #[error("payload is empty")]
    ErrEmptyPayload,
}

impl PacketError {
    /// Whether the source stream is unusable after this error.
    ///
    /// Most payload errors describe one damaged packet and the caller should
    /// keep reading. An unhandled NALU type means the sender negotiated a
    /// packetization mode we do not speak, and every following packet will
    /// fail the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PacketError::NaluTypeIsNotHandled(_))
    }
}
