//! Media-plane relay engine for an SFU.
//!
//! Publishers feed RTP into a [`RtpIngest`], which depacketizes it into
//! codec access units, latches the negotiated codec onto its
//! [`hub::Source`] and fans the units out through per-codec
//! [`hub::Track`]s. Subscribers attach an [`egress::EgressForwarder`],
//! which gates simulcast and temporal layers, repacketizes onto a
//! transport of the caller's choosing and keeps the RTCP feedback loop
//! running.
//!
//! The crate is transport-agnostic: it deals in parsed RTP/RTCP and the
//! caller owns sockets, DTLS and signaling.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediahub::{hub::Stream, ingest::RtpIngest, Codec, MediaKind, RelayConfig};
//!
//! # async fn publish(packets: Vec<mediahub::rtp::RtpPacket>) -> Result<(), mediahub::HubError> {
//! let stream = Arc::new(Stream::new(RelayConfig::default()));
//! let source = stream.new_source(MediaKind::Video);
//!
//! let mut ingest = RtpIngest::new(source, Codec::H264);
//! for packet in &packets {
//!     ingest.handle_rtp(packet)?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

mod codec;
mod config;
mod error;
mod unit;

pub mod egress;
pub mod hub;
pub mod ingest;
pub mod packet;
pub mod rtp;

pub use codec::{Codec, CodecDescriptor};
pub use config::RelayConfig;
pub use error::HubError;
pub use ingest::RtpIngest;
pub use packet::MediaKind;
pub use unit::{FrameInfo, MediaUnit};
