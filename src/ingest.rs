//! Publisher-side RTP handling: depacketize, timestamp extension, codec
//! latching.

use std::sync::Arc;

use tracing::debug;

use crate::codec::{Codec, CodecDescriptor};
use crate::error::HubError;
use crate::hub::Source;
use crate::packet::{CodecDepacketizer, Depacketizer, PassthroughDepacketizer};
use crate::rtp::RtpPacket;
use crate::unit::MediaUnit;

/// Feeds one publisher leg (one SSRC) into its [`Source`].
///
/// The 32-bit RTP timestamp is extended to a monotonic 64-bit clock that
/// survives wraparound; unit durations come from the timestamp deltas
/// between consecutive units.
pub struct RtpIngest {
    source: Arc<Source>,
    depacketizer: CodecDepacketizer,
    clock_rate: u32,
    last_rtp_time: Option<u32>,
    extended_time: i64,
    prev_pts: Option<i64>,
}

impl RtpIngest {
    pub fn new(source: Arc<Source>, codec: Codec) -> RtpIngest {
        RtpIngest {
            source,
            depacketizer: CodecDepacketizer::new(codec),
            clock_rate: match codec.kind() {
                crate::packet::MediaKind::Video => 90_000,
                crate::packet::MediaKind::Audio => 48_000,
            },
            last_rtp_time: None,
            extended_time: 0,
            prev_pts: None,
        }
    }

    /// Ingest with negotiated parameters, for codecs whose clock rate is
    /// not fixed by the RTP mapping (AAC at 44.1kHz, say).
    pub fn with_descriptor(source: Arc<Source>, descriptor: CodecDescriptor) -> RtpIngest {
        let clock_rate = descriptor.clock_rate();
        let depacketizer = match descriptor.codec() {
            Codec::Opus | Codec::Aac => {
                CodecDepacketizer::Passthrough(PassthroughDepacketizer::new(descriptor))
            }
            codec => CodecDepacketizer::new(codec),
        };

        RtpIngest {
            source,
            depacketizer,
            clock_rate,
            last_rtp_time: None,
            extended_time: 0,
            prev_pts: None,
        }
    }

    /// Handle one inbound RTP packet.
    ///
    /// Damaged packets are logged and skipped. An error is returned only
    /// when the stream is unusable and the caller should stop feeding it.
    pub fn handle_rtp(&mut self, packet: &RtpPacket) -> Result<(), HubError> {
        let depacketized = match self.depacketizer.depacketize(packet) {
            Ok(d) => d,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                debug!(error = %e, seq = packet.header.sequence_number, "bad payload, skipping");
                return Ok(());
            }
        };

        if let Some(descriptor) = depacketized.codec_change {
            debug!(codec = %descriptor, "codec negotiated");
            self.clock_rate = descriptor.clock_rate();
            self.source.set_codec(descriptor);
        }

        if depacketized.units.is_empty() {
            return Ok(());
        }

        let pts = self.extend_timestamp(packet.header.timestamp);
        let duration = match self.prev_pts {
            Some(prev) => (pts - prev).max(0),
            None => 0,
        };
        self.prev_pts = Some(pts);

        for unit in depacketized.units {
            self.source.write(MediaUnit {
                payload: unit.payload,
                pts,
                dts: pts,
                duration,
                time_base: self.clock_rate,
                frame: unit.frame,
            });
        }

        Ok(())
    }

    fn extend_timestamp(&mut self, rtp_time: u32) -> i64 {
        match self.last_rtp_time {
            None => {
                self.last_rtp_time = Some(rtp_time);
                self.extended_time = 0;
            }
            Some(last) => {
                // wrapping difference handles the 32-bit rollover and
                // moderate reordering
                let delta = rtp_time.wrapping_sub(last) as i32;
                self.extended_time += i64::from(delta);
                self.last_rtp_time = Some(rtp_time);
            }
        }
        self.extended_time
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::CodecDescriptor;
    use crate::config::RelayConfig;
    use crate::packet::MediaKind;
    use crate::rtp::{Pt, RtpHeader, Ssrc};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn source(kind: MediaKind) -> Arc<Source> {
        let config = RelayConfig {
            codec_latch_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        Source::new(kind, config, &CancellationToken::new())
    }

    fn opus_packet(timestamp: u32, payload: &[u8]) -> RtpPacket {
        let mut header = RtpHeader::new(Pt::from(111), Ssrc::from(1));
        header.timestamp = timestamp;
        RtpPacket {
            header,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[tokio::test]
    async fn first_packet_latches_codec_and_flows() {
        let source = source(MediaKind::Audio);
        let mut ingest = RtpIngest::new(Arc::clone(&source), Codec::Opus);

        ingest.handle_rtp(&opus_packet(1000, &[0xf8])).unwrap();
        // let the track's fan-out worker drain the pre-attach unit
        tokio::task::yield_now().await;

        assert_eq!(
            source.codec().await.unwrap(),
            CodecDescriptor::opus_default()
        );

        let track = &source.tracks()[0];
        let mut consumer = track.add_consumer();
        ingest.handle_rtp(&opus_packet(1960, &[0xf9])).unwrap();

        let unit = consumer.recv().await.unwrap();
        assert_eq!(unit.payload.as_ref(), &[0xf9]);
        assert_eq!(unit.pts, 960);
        assert_eq!(unit.duration, 960);
        assert_eq!(unit.time_base, 48_000);
    }

    #[tokio::test]
    async fn timestamp_extension_survives_wraparound() {
        let source = source(MediaKind::Audio);
        let mut ingest = RtpIngest::new(Arc::clone(&source), Codec::Opus);

        ingest.handle_rtp(&opus_packet(u32::MAX - 479, &[1])).unwrap();
        tokio::task::yield_now().await;
        let track = &source.tracks()[0];
        let mut consumer = track.add_consumer();

        ingest.handle_rtp(&opus_packet(480, &[2])).unwrap();
        let unit = consumer.recv().await.unwrap();
        assert_eq!(unit.pts, 960);
    }

    #[tokio::test]
    async fn negotiated_aac_rate_sets_the_time_base() {
        let source = source(MediaKind::Audio);
        let descriptor = CodecDescriptor::Aac {
            sample_rate: 44_100,
            channels: 2,
            sample_format: 0,
        };
        let mut ingest = RtpIngest::with_descriptor(Arc::clone(&source), descriptor.clone());

        ingest.handle_rtp(&opus_packet(0, &[0x21])).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(source.codec().await.unwrap(), descriptor);

        let track = &source.tracks()[0];
        let mut consumer = track.add_consumer();
        ingest.handle_rtp(&opus_packet(441, &[0x22])).unwrap();

        let unit = consumer.recv().await.unwrap();
        assert_eq!(unit.time_base, 44_100);
        assert_eq!(unit.pts, 441);
    }

    #[tokio::test]
    async fn damaged_packet_is_skipped_not_fatal() {
        let source = source(MediaKind::Video);
        let mut ingest = RtpIngest::new(Arc::clone(&source), Codec::H264);

        // one-byte payload: too short for any H264 packetization
        let mut p = opus_packet(0, &[0x41]);
        p.header.payload_type = Pt::from(102);
        ingest.handle_rtp(&p).unwrap();
    }

    #[tokio::test]
    async fn unusable_stream_is_fatal() {
        let source = source(MediaKind::Video);
        let mut ingest = RtpIngest::new(Arc::clone(&source), Codec::H264);

        // FU-B framing, a packetization mode the relay does not speak
        let mut p = opus_packet(0, &[0x1d, 0x85, 0x01]);
        p.header.payload_type = Pt::from(102);
        let err = ingest.handle_rtp(&p).unwrap_err();
        assert!(matches!(err, HubError::Packet(_)));
    }
}
