use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the relay engine.
///
/// A config is handed to each component on construction. There is no
/// process-wide state; two [`Stream`][crate::hub::Stream] instances can run
/// with different settings in the same process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// How long `Source::codec()` waits for codec negotiation before failing
    /// with [`HubError::CodecNotReady`][crate::HubError::CodecNotReady].
    pub codec_latch_timeout: Duration,

    /// Depth of the per-track inbound queue and of each consumer queue.
    ///
    /// When a queue is full, new units are dropped (never blocking the
    /// producer). Drops are counted in the track statistics.
    pub queue_depth: usize,

    /// MTU used when repacketizing outbound RTP.
    pub mtu: usize,

    /// Cadence of the adaptive-bitrate evaluation loop.
    pub abs_interval: Duration,

    /// Number of consecutive loss-free evaluation intervals required before
    /// a layer upgrade is attempted.
    pub abs_clean_intervals: u32,

    /// Cadence of outbound RTCP sender reports.
    pub sender_report_interval: Duration,

    /// Target minimum playout delay signalled to receivers, in the 10ms
    /// granularity of the playout-delay header extension.
    pub playout_delay_target_min: u32,

    /// Minimum time between single-step increments of the signalled
    /// playout delay.
    pub playout_delay_update_interval: Duration,

    /// Timestamp advance per video frame when the unit carries no duration
    /// (90kHz clock, 3000 = 30fps).
    pub video_frame_samples: u32,

    /// Timestamp advance per audio frame when the unit carries no duration
    /// (48kHz clock, 960 = 20ms).
    pub audio_frame_samples: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            codec_latch_timeout: Duration::from_millis(500),
            queue_depth: 100,
            mtu: 1200,
            abs_interval: Duration::from_secs(1),
            abs_clean_intervals: 5,
            sender_report_interval: Duration::from_millis(500),
            playout_delay_target_min: 60,
            playout_delay_update_interval: Duration::from_millis(300),
            video_frame_samples: 3000,
            audio_frame_samples: 960,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_roundtrips_through_serde() {
        let c = RelayConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let back: RelayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.queue_depth, c.queue_depth);
        assert_eq!(back.codec_latch_timeout, c.codec_latch_timeout);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let c: RelayConfig = serde_json::from_str(r#"{"queue_depth": 16}"#).unwrap();
        assert_eq!(c.queue_depth, 16);
        assert_eq!(c.abs_clean_intervals, 5);
    }
}
