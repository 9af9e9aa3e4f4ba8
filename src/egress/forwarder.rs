use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{Codec, CodecDescriptor};
use crate::config::RelayConfig;
use crate::error::HubError;
use crate::hub::TrackConsumer;
use crate::rtp::{PlayoutDelay, Pt, RtpPacket, Ssrc};
use crate::unit::MediaUnit;

use super::abs::AbsController;
use super::packetizer::RtpPacketizer;
use super::stats::EgressStats;

/// Header extension id the relay signals for playout delay.
pub const PLAYOUT_DELAY_EXT_ID: u8 = 4;

/// Outbound transport for one subscriber. Implementations marshal and ship
/// the packets; errors tear the forwarder down.
pub trait RtpSink: Send + Sync {
    fn send_rtp(&self, packet: &RtpPacket) -> io::Result<()>;
    fn send_rtcp(&self, payload: &[u8]) -> io::Result<()>;
}

/// Wraps an original packet in RTX framing (RFC 4588): the original
/// sequence number leads the payload, and the RTX stream runs its own
/// sequence space on its own SSRC.
pub struct RtxEncoder {
    pt: Pt,
    ssrc: Ssrc,
    sequence: u16,
}

impl RtxEncoder {
    pub fn new(pt: Pt, ssrc: Ssrc) -> RtxEncoder {
        RtxEncoder {
            pt,
            ssrc,
            sequence: fastrand::u16(..),
        }
    }

    pub fn encode(&mut self, original: &RtpPacket) -> RtpPacket {
        let mut payload = Vec::with_capacity(2 + original.payload.len());
        payload.extend_from_slice(&original.header.sequence_number.to_be_bytes());
        payload.extend_from_slice(&original.payload);

        let mut header = original.header.clone();
        header.payload_type = self.pt;
        header.ssrc = self.ssrc;
        header.sequence_number = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        RtpPacket {
            header,
            payload: Bytes::from(payload),
        }
    }
}

/// Repacketizes units from hub tracks onto a subscriber transport.
///
/// Video goes through the spatial and temporal gates of the subscriber's
/// [`AbsController`]; withheld units still advance the RTP clock so the
/// receiver does not perceive them as loss of time. For H264 the latched
/// SPS/PPS are replayed ahead of every IDR, so a subscriber joining
/// mid-stream can decode from the first keyframe it sees.
pub struct EgressForwarder<S: RtpSink> {
    sink: Arc<S>,
    codec: Codec,
    packetizer: RtpPacketizer,
    abs: Arc<AbsController>,
    stats: Arc<EgressStats>,
    playout: Option<PlayoutDelay>,
    parameter_sets: Option<(Bytes, Bytes)>,
    default_samples: u32,
    queue_depth: usize,
    cancel: CancellationToken,
}

impl<S: RtpSink + 'static> EgressForwarder<S> {
    pub fn new(
        descriptor: &CodecDescriptor,
        pt: Pt,
        config: &RelayConfig,
        abs: Arc<AbsController>,
        stats: Arc<EgressStats>,
        sink: Arc<S>,
        cancel: CancellationToken,
    ) -> EgressForwarder<S> {
        let codec = descriptor.codec();
        let is_video = descriptor.kind().is_video();

        let parameter_sets = match descriptor {
            CodecDescriptor::H264 { sps, pps, .. } => Some((sps.clone(), pps.clone())),
            _ => None,
        };

        EgressForwarder {
            sink,
            codec,
            packetizer: RtpPacketizer::new(codec, pt, Ssrc::new(), config.mtu),
            abs,
            stats,
            playout: is_video.then(|| {
                PlayoutDelay::new(
                    PLAYOUT_DELAY_EXT_ID,
                    config.playout_delay_target_min,
                    config.playout_delay_update_interval,
                )
            }),
            parameter_sets,
            default_samples: if is_video {
                config.video_frame_samples
            } else {
                config.audio_frame_samples
            },
            queue_depth: config.queue_depth,
            cancel,
        }
    }

    pub fn ssrc(&self) -> Ssrc {
        self.packetizer.ssrc()
    }

    /// Gate, repacketize and send one unit.
    pub fn forward_unit(&mut self, rid: &str, unit: &MediaUnit, now: Instant) -> io::Result<()> {
        let samples = if unit.duration > 0 {
            unit.duration as u32
        } else {
            self.default_samples
        };

        if self.playout.is_some() {
            if !self.abs.can_send_spatial(rid, unit) {
                // a layer this subscriber is not on, no clock movement
                return Ok(());
            }
            if !self.abs.can_send_temporal(self.codec, unit) {
                self.packetizer.skip_samples(samples);
                return Ok(());
            }
        }

        if unit.is_keyframe() {
            if let Some((sps, pps)) = self.parameter_sets.clone() {
                // the payloader folds these into a STAP-A ahead of the IDR
                self.queue_parameter_set(&sps);
                self.queue_parameter_set(&pps);
            }
        }

        let packets = match self.packetizer.packetize(&unit.payload, samples) {
            Ok(packets) => packets,
            Err(e) => {
                debug!(error = %e, "unit failed to packetize, dropping");
                return Ok(());
            }
        };

        for mut packet in packets {
            if let Some(playout) = &mut self.playout {
                packet
                    .header
                    .set_extension(playout.id(), playout.poll(now).to_vec());
            }
            self.sink.send_rtp(&packet)?;
            self.stats
                .record_send(packet.header.timestamp, packet.payload.len());
        }

        Ok(())
    }

    fn queue_parameter_set(&mut self, nalu: &[u8]) {
        // produces no packets, only primes the payloader
        if let Err(e) = self.packetizer.packetize(nalu, 0) {
            debug!(error = %e, "parameter set rejected by payloader");
        }
    }

    /// Drive the forwarder from hub track consumers until the transport
    /// fails, every input ends, or the forwarder is cancelled.
    pub async fn run(mut self, inputs: Vec<(String, TrackConsumer)>) -> Result<(), HubError> {
        let (tx, mut rx) = mpsc::channel::<(String, MediaUnit)>(self.queue_depth);

        for (rid, consumer) in inputs {
            self.abs.observe_rid(&rid);
            let tx = tx.clone();
            tokio::spawn(pump(rid, consumer, tx));
        }
        drop(tx);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                input = rx.recv() => {
                    let Some((rid, unit)) = input else { break };
                    if let Err(e) = self.forward_unit(&rid, &unit, Instant::now()) {
                        warn!(error = %e, "transport failed, stopping forwarder");
                        return Err(e.into());
                    }
                }
            }
        }

        Ok(())
    }
}

async fn pump(rid: String, mut consumer: TrackConsumer, tx: mpsc::Sender<(String, MediaUnit)>) {
    while let Some(unit) = consumer.recv().await {
        if tx.send((rid.clone(), unit)).await.is_err() {
            return;
        }
    }
}
