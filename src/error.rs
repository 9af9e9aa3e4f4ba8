use thiserror::Error;

use crate::packet::{MediaKind, PacketError};

/// Errors for the whole relay engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HubError {
    /// Codec negotiation did not complete within the latch timeout.
    #[error("codec not ready")]
    CodecNotReady,

    /// A codec of the wrong media kind was resolved.
    #[error("codec is not {0}")]
    WrongKind(MediaKind),

    /// RTP payload parse/packetize errors.
    #[error("{0}")]
    Packet(#[from] PacketError),

    /// IO errors from the transport collaborators.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
