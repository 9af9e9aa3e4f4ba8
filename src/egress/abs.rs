//! Adaptive bitrate and simulcast layer selection.
//!
//! One controller sits between a subscriber's forwarder and its feedback
//! loop. Every evaluation interval it inspects the send and NACK counters;
//! after enough consecutive intervals that carried traffic without loss it
//! upgrades one step, temporal layers first, then the next spatial layer. Spatial switches only take
//! effect on a keyframe of the new layer.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::Codec;
use crate::config::RelayConfig;
use crate::packet::ObuHeader;
use crate::unit::MediaUnit;

use super::stats::EgressStats;

/// Spatial layer index for a simulcast RID. The base layer publishes with
/// an empty or "0" RID.
pub fn rid_layer(rid: &str) -> i32 {
    match rid {
        "" | "0" => 0,
        "1" => 1,
        "2" => 2,
        _ => 0,
    }
}

/// Per-interval snapshot used by [`AbsController::tick`].
#[derive(Debug, Default)]
pub struct EvalWindow {
    prev_sends: u64,
    prev_nacks: u64,
    clean: u32,
}

pub struct AbsController {
    stats: Arc<EgressStats>,
    clean_threshold: u32,

    max_spatial: AtomicI32,
    target_spatial: AtomicI32,
    current_spatial: AtomicI32,
    max_temporal: AtomicI32,
    target_temporal: AtomicI32,
}

impl AbsController {
    pub fn new(config: &RelayConfig, stats: Arc<EgressStats>) -> Arc<AbsController> {
        Arc::new(AbsController {
            stats,
            clean_threshold: config.abs_clean_intervals,
            max_spatial: AtomicI32::new(0),
            target_spatial: AtomicI32::new(0),
            current_spatial: AtomicI32::new(0),
            max_temporal: AtomicI32::new(0),
            target_temporal: AtomicI32::new(0),
        })
    }

    /// Note a RID seen from the publisher, raising the spatial ceiling.
    pub fn observe_rid(&self, rid: &str) {
        self.max_spatial.fetch_max(rid_layer(rid), Ordering::Relaxed);
    }

    pub fn current_spatial(&self) -> i32 {
        self.current_spatial.load(Ordering::Relaxed)
    }

    pub fn target_temporal(&self) -> i32 {
        self.target_temporal.load(Ordering::Relaxed)
    }

    /// A spatial switch is pending and needs a keyframe to land.
    pub fn needs_keyframe(&self) -> bool {
        self.target_spatial.load(Ordering::Relaxed) != self.current_spatial.load(Ordering::Relaxed)
    }

    /// One evaluation step. Counts loss-free intervals and upgrades after
    /// `clean_threshold` consecutive ones.
    pub fn tick(&self, window: &mut EvalWindow) {
        let sends = self.stats.send_count();
        let nacks = self.stats.nack_count();
        let sent = sends - window.prev_sends;
        let lost = nacks - window.prev_nacks;
        window.prev_sends = sends;
        window.prev_nacks = nacks;

        // only intervals that actually moved packets without loss count
        if lost > 0 || sent == 0 {
            if lost > 0 {
                debug!(lost, "interval saw loss, holding layer");
            }
            window.clean = 0;
            return;
        }

        window.clean += 1;
        if window.clean >= self.clean_threshold {
            window.clean = 0;
            self.upgrade_layer();
        }
    }

    fn upgrade_layer(&self) {
        let target_temporal = self.target_temporal.load(Ordering::Relaxed);
        if target_temporal < self.max_temporal.load(Ordering::Relaxed) {
            self.target_temporal.store(target_temporal + 1, Ordering::Relaxed);
            info!(temporal = target_temporal + 1, "upgrading temporal layer");
            return;
        }

        let target_spatial = self.target_spatial.load(Ordering::Relaxed);
        if target_spatial < self.max_spatial.load(Ordering::Relaxed) {
            self.target_spatial.store(target_spatial + 1, Ordering::Relaxed);
            // the new layer starts from its base temporal layer
            self.max_temporal.store(0, Ordering::Relaxed);
            self.target_temporal.store(0, Ordering::Relaxed);
            info!(spatial = target_spatial + 1, "upgrading spatial layer");
        }
    }

    /// Whether a unit arriving on `rid` may be forwarded, promoting the
    /// current spatial layer when a keyframe of the target layer shows up.
    pub fn can_send_spatial(&self, rid: &str, unit: &MediaUnit) -> bool {
        let layer = rid_layer(rid);

        if layer == self.current_spatial.load(Ordering::Relaxed) {
            // until a pending switch lands, the old layer keeps flowing
            return true;
        }

        if layer == self.target_spatial.load(Ordering::Relaxed) && unit.is_keyframe() {
            info!(spatial = layer, "spatial switch on keyframe");
            self.current_spatial.store(layer, Ordering::Relaxed);
            self.target_temporal.store(0, Ordering::Relaxed);
            return true;
        }

        false
    }

    /// Whether a unit passes the temporal gate for its codec.
    ///
    /// The temporal ceiling is learned from the ids seen in the stream, so
    /// the first pass over each id raises `max_temporal` for later
    /// upgrades. Units without temporal signalling always pass.
    pub fn can_send_temporal(&self, codec: Codec, unit: &MediaUnit) -> bool {
        let temporal_id = match codec {
            Codec::Vp8 => match unit.frame.temporal_id {
                Some(tid) => i32::from(tid),
                None => return true,
            },
            Codec::Av1 => match ObuHeader::parse(&unit.payload) {
                Ok(header) if header.has_extension => i32::from(header.temporal_id),
                Ok(_) => return true,
                Err(_) => return false,
            },
            _ => return true,
        };

        self.max_temporal.fetch_max(temporal_id, Ordering::Relaxed);
        temporal_id <= self.target_temporal.load(Ordering::Relaxed)
    }

    /// Evaluation loop, one [`AbsController::tick`] per interval.
    pub async fn run(self: Arc<Self>, config: RelayConfig, cancel: CancellationToken) {
        let mut ticker = interval(config.abs_interval);
        let mut window = EvalWindow::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick(&mut window),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::unit::FrameInfo;
    use bytes::Bytes;

    fn unit(keyframe: bool, temporal_id: Option<u8>) -> MediaUnit {
        MediaUnit {
            payload: Bytes::from_static(&[0x32, 0x01, 0x00]),
            pts: 0,
            dts: 0,
            duration: 0,
            time_base: 90_000,
            frame: FrameInfo {
                keyframe,
                temporal_id,
            },
        }
    }

    fn controller() -> (Arc<AbsController>, Arc<EgressStats>) {
        let stats = Arc::new(EgressStats::default());
        let abs = AbsController::new(&RelayConfig::default(), Arc::clone(&stats));
        (abs, stats)
    }

    /// Tick with traffic flowing during the interval.
    fn active_tick(abs: &AbsController, stats: &EgressStats, w: &mut EvalWindow) {
        stats.record_send(0, 100);
        abs.tick(w);
    }

    #[test]
    fn five_clean_ticks_upgrade_exactly_once() {
        let (abs, stats) = controller();
        abs.observe_rid("1");
        let mut w = EvalWindow::default();

        for _ in 0..4 {
            active_tick(&abs, &stats, &mut w);
            assert!(!abs.needs_keyframe());
        }
        active_tick(&abs, &stats, &mut w);
        assert_eq!(abs.target_spatial.load(Ordering::Relaxed), 1);
        assert!(abs.needs_keyframe());

        // counter restarted, next tick does not upgrade again
        active_tick(&abs, &stats, &mut w);
        assert_eq!(abs.target_spatial.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn loss_resets_the_clean_counter() {
        let (abs, stats) = controller();
        abs.observe_rid("1");
        let mut w = EvalWindow::default();

        for _ in 0..4 {
            active_tick(&abs, &stats, &mut w);
        }
        stats.record_nack(2);
        active_tick(&abs, &stats, &mut w); // sees the loss, resets

        for _ in 0..4 {
            active_tick(&abs, &stats, &mut w);
        }
        assert_eq!(abs.target_spatial.load(Ordering::Relaxed), 0);
        active_tick(&abs, &stats, &mut w);
        assert_eq!(abs.target_spatial.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn idle_intervals_do_not_count_as_clean() {
        let (abs, stats) = controller();
        abs.observe_rid("1");
        let mut w = EvalWindow::default();

        for _ in 0..4 {
            active_tick(&abs, &stats, &mut w);
        }
        abs.tick(&mut w); // nothing sent this interval, counter resets

        active_tick(&abs, &stats, &mut w);
        assert_eq!(abs.target_spatial.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn temporal_upgrades_before_spatial() {
        let (abs, stats) = controller();
        abs.observe_rid("1");
        // learn that the stream has temporal layers up to 2
        assert!(abs.can_send_temporal(Codec::Vp8, &unit(false, Some(0))));
        assert!(!abs.can_send_temporal(Codec::Vp8, &unit(false, Some(2))));

        let mut w = EvalWindow::default();
        for _ in 0..5 {
            active_tick(&abs, &stats, &mut w);
        }
        assert_eq!(abs.target_temporal(), 1);
        assert_eq!(abs.target_spatial.load(Ordering::Relaxed), 0);

        for _ in 0..5 {
            active_tick(&abs, &stats, &mut w);
        }
        assert_eq!(abs.target_temporal(), 2);

        // temporal maxed out, next upgrade is spatial and resets temporal
        for _ in 0..5 {
            active_tick(&abs, &stats, &mut w);
        }
        assert_eq!(abs.target_spatial.load(Ordering::Relaxed), 1);
        assert_eq!(abs.target_temporal(), 0);
    }

    #[test]
    fn temporal_gate_follows_target() {
        let (abs, _) = controller();

        // tid pattern 0 1 2 1 0 at target 0: only the tid-0 frames pass
        let pattern = [0u8, 1, 2, 1, 0];
        let passed: Vec<bool> = pattern
            .iter()
            .map(|tid| abs.can_send_temporal(Codec::Vp8, &unit(false, Some(*tid))))
            .collect();
        assert_eq!(passed, vec![true, false, false, false, true]);

        abs.target_temporal.store(1, Ordering::Relaxed);
        let passed: Vec<bool> = pattern
            .iter()
            .map(|tid| abs.can_send_temporal(Codec::Vp8, &unit(false, Some(*tid))))
            .collect();
        assert_eq!(passed, vec![true, true, false, true, true]);
    }

    #[test]
    fn unsignalled_temporal_always_passes() {
        let (abs, _) = controller();
        assert!(abs.can_send_temporal(Codec::Vp8, &unit(false, None)));
        assert!(abs.can_send_temporal(Codec::H264, &unit(false, None)));
    }

    #[test]
    fn av1_temporal_comes_from_obu_extension() {
        let (abs, _) = controller();

        // frame OBU with extension header, tid 2
        let mut u = unit(false, None);
        u.payload = Bytes::from_static(&[0b0_0110_110, 0b010_00_000, 0x01, 0xaa]);
        assert!(!abs.can_send_temporal(Codec::Av1, &u));

        abs.target_temporal.store(2, Ordering::Relaxed);
        assert!(abs.can_send_temporal(Codec::Av1, &u));

        // no extension header: no gating
        u.payload = Bytes::from_static(&[0b0_0110_010, 0x01, 0xaa]);
        abs.target_temporal.store(0, Ordering::Relaxed);
        assert!(abs.can_send_temporal(Codec::Av1, &u));
    }

    #[test]
    fn spatial_switch_waits_for_keyframe() {
        let (abs, _) = controller();
        abs.observe_rid("1");
        abs.target_spatial.store(1, Ordering::Relaxed);

        // base layer keeps flowing while the switch is pending
        assert!(abs.can_send_spatial("0", &unit(false, None)));
        // target layer delta frames are held back
        assert!(!abs.can_send_spatial("1", &unit(false, None)));

        // keyframe on the target lands the switch
        assert!(abs.can_send_spatial("1", &unit(true, None)));
        assert_eq!(abs.current_spatial(), 1);

        // from now on the base layer is gated off
        assert!(!abs.can_send_spatial("0", &unit(false, None)));
        assert!(abs.can_send_spatial("1", &unit(false, None)));
    }

    #[test]
    fn rid_layer_mapping() {
        assert_eq!(rid_layer(""), 0);
        assert_eq!(rid_layer("0"), 0);
        assert_eq!(rid_layer("1"), 1);
        assert_eq!(rid_layer("2"), 2);
        assert_eq!(rid_layer("q"), 0);
    }
}
