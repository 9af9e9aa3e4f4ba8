//! RTCP halves of an egress leg: periodic sender reports out, receiver
//! feedback in.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::RelayConfig;
use crate::rtp::rtcp::{parse_compound, RtcpFeedback, SenderReport};
use crate::rtp::Ssrc;

use super::forwarder::RtpSink;
use super::stats::EgressStats;

/// Consume receiver RTCP for one subscriber.
///
/// NACKs feed the loss counters the adaptive-bitrate loop reads, a PLI
/// pings `keyframe_request` so the ingest side can ask the publisher for
/// an IDR.
pub async fn run_rtcp_ingest(
    mut rtcp: mpsc::Receiver<Bytes>,
    stats: Arc<EgressStats>,
    keyframe_request: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let buf = tokio::select! {
            _ = cancel.cancelled() => return,
            buf = rtcp.recv() => match buf {
                Some(buf) => buf,
                None => return,
            },
        };

        for feedback in parse_compound(&buf) {
            match feedback {
                RtcpFeedback::Nack { lost_seqs, .. } => {
                    debug!(lost = lost_seqs.len(), "nack from receiver");
                    stats.record_nack(lost_seqs.len());
                }
                RtcpFeedback::Pli { .. } => {
                    debug!("pli from receiver");
                    keyframe_request.notify_one();
                }
                RtcpFeedback::Remb { bitrate, .. } => {
                    trace!(bitrate, "remb from receiver");
                }
                other => trace!(?other, "unhandled rtcp"),
            }
        }
    }
}

/// Send sender reports for one outbound stream on a fixed cadence.
///
/// Reports describe the last packet actually sent, so a stream that is
/// gated off simply repeats its previous anchor. Ends when the transport
/// fails or the leg is cancelled.
pub async fn run_sender_reports<S: RtpSink>(
    sink: Arc<S>,
    stats: Arc<EgressStats>,
    ssrc: Ssrc,
    config: RelayConfig,
    cancel: CancellationToken,
) {
    let mut ticker = interval(config.sender_report_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if stats.send_count() == 0 {
            // nothing sent yet, an SR would anchor to a zero timestamp
            continue;
        }

        let sr = SenderReport {
            ssrc,
            ntp_time: stats.last_ntp_time(),
            rtp_time: stats.last_rtp_time(),
            packet_count: stats.send_count() as u32,
            octet_count: stats.send_bytes() as u32,
        };

        if let Err(e) = sink.send_rtcp(&sr.marshal()) {
            warn!(error = %e, "transport failed, stopping sender reports");
            return;
        }
    }
}
