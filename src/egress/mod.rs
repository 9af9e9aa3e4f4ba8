//! Subscriber side of the relay: layer selection, repacketization and the
//! RTCP feedback loop.

mod abs;
mod feedback;
mod forwarder;
mod packetizer;
mod stats;

pub use abs::{rid_layer, AbsController, EvalWindow};
pub use feedback::{run_rtcp_ingest, run_sender_reports};
pub use forwarder::{EgressForwarder, RtpSink, RtxEncoder, PLAYOUT_DELAY_EXT_ID};
pub use packetizer::RtpPacketizer;
pub use stats::{ntp_now, EgressStats};
