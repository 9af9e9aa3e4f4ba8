use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::codec::CodecDescriptor;
use crate::config::RelayConfig;
use crate::unit::MediaUnit;

/// Counters for one track. All monotonically increasing.
#[derive(Debug, Default)]
pub struct TrackStats {
    received: AtomicU64,
    dropped: AtomicU64,
    bytes: AtomicU64,
}

impl TrackStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Units lost to full queues, inbound and per-consumer combined.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

struct TrackState {
    consumers: HashMap<u64, mpsc::Sender<MediaUnit>>,
    next_id: u64,
    closed: bool,
}

/// One elementary stream of access units for a single codec instance.
///
/// Producers never block: when the inbound queue or a consumer queue is
/// full, the newest unit is dropped and counted. Slow consumers only lose
/// their own units.
pub struct Track {
    codec: CodecDescriptor,
    queue_depth: usize,
    tx: mpsc::Sender<MediaUnit>,
    state: Mutex<TrackState>,
    stats: TrackStats,
    cancel: CancellationToken,
}

impl Track {
    /// Create the track and spawn its fan-out worker. Must be called from
    /// within a tokio runtime.
    pub fn new(
        codec: CodecDescriptor,
        config: &RelayConfig,
        parent: &CancellationToken,
    ) -> Arc<Track> {
        let (tx, rx) = mpsc::channel(config.queue_depth);

        let track = Arc::new(Track {
            codec,
            queue_depth: config.queue_depth,
            tx,
            state: Mutex::new(TrackState {
                consumers: HashMap::new(),
                next_id: 0,
                closed: false,
            }),
            stats: TrackStats::default(),
            cancel: parent.child_token(),
        });

        tokio::spawn(Track::run(Arc::clone(&track), rx));

        track
    }

    async fn run(track: Arc<Track>, mut rx: mpsc::Receiver<MediaUnit>) {
        loop {
            tokio::select! {
                _ = track.cancel.cancelled() => break,
                unit = rx.recv() => {
                    match unit {
                        Some(unit) => track.fan_out(unit),
                        None => break,
                    }
                }
            }
        }
    }

    pub fn codec(&self) -> &CodecDescriptor {
        &self.codec
    }

    pub fn stats(&self) -> &TrackStats {
        &self.stats
    }

    /// Queue a unit for fan-out. Never blocks; drops when the queue is full
    /// or the track is closed.
    pub fn publish(&self, unit: MediaUnit) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes
            .fetch_add(unit.payload.len() as u64, Ordering::Relaxed);

        if self.tx.try_send(unit).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn fan_out(&self, unit: MediaUnit) {
        let mut state = self.state.lock();

        let mut gone = Vec::new();
        for (id, tx) in &state.consumers {
            match tx.try_send(unit.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        for id in gone {
            trace!(consumer = id, "removing closed consumer");
            state.consumers.remove(&id);
        }
    }

    /// Attach a consumer. A consumer on a closed track sees end-of-stream
    /// immediately.
    pub fn add_consumer(self: &Arc<Self>) -> TrackConsumer {
        let (tx, rx) = mpsc::channel(self.queue_depth);

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        if !state.closed {
            state.consumers.insert(id, tx);
        }
        // when closed, tx drops here and recv() returns None right away

        TrackConsumer {
            id,
            rx,
            track: Arc::downgrade(self),
        }
    }

    fn remove_consumer(&self, id: u64) {
        self.state.lock().consumers.remove(&id);
    }

    /// Close the track. Idempotent. Consumers see end-of-stream right away;
    /// units still queued for them are discarded.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.consumers.clear();
        drop(state);

        self.cancel.cancel();
    }
}

/// Receiving side of a track subscription. Dropping it detaches from the
/// track.
pub struct TrackConsumer {
    id: u64,
    rx: mpsc::Receiver<MediaUnit>,
    track: Weak<Track>,
}

impl TrackConsumer {
    /// Next unit, or `None` when the track is closed.
    pub async fn recv(&mut self) -> Option<MediaUnit> {
        self.rx.recv().await
    }

    pub fn codec(&self) -> Option<CodecDescriptor> {
        self.track.upgrade().map(|t| t.codec.clone())
    }
}

impl Drop for TrackConsumer {
    fn drop(&mut self) {
        if let Some(track) = self.track.upgrade() {
            track.remove_consumer(self.id);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::unit::FrameInfo;
    use bytes::Bytes;

    fn unit(n: u8) -> MediaUnit {
        MediaUnit {
            payload: Bytes::copy_from_slice(&[n]),
            pts: i64::from(n),
            dts: i64::from(n),
            duration: 0,
            time_base: 90_000,
            frame: FrameInfo::default(),
        }
    }

    fn config(depth: usize) -> RelayConfig {
        RelayConfig {
            queue_depth: depth,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn units_reach_consumer_in_order() {
        let cancel = CancellationToken::new();
        let track = Track::new(CodecDescriptor::opus_default(), &config(8), &cancel);

        let mut consumer = track.add_consumer();
        for n in 0..4 {
            track.publish(unit(n));
        }

        for n in 0..4 {
            let u = consumer.recv().await.unwrap();
            assert_eq!(u.payload.as_ref(), &[n]);
        }
        assert_eq!(track.stats().received(), 4);
        assert_eq!(track.stats().dropped(), 0);
    }

    #[tokio::test]
    async fn slow_consumer_drops_newest_without_blocking() {
        let cancel = CancellationToken::new();
        let track = Track::new(CodecDescriptor::opus_default(), &config(2), &cancel);

        let mut consumer = track.add_consumer();

        // fan out synchronously so the consumer queue (depth 2) overflows
        for n in 0..5 {
            track.fan_out(unit(n));
        }

        assert_eq!(track.stats().dropped(), 3);
        assert_eq!(consumer.recv().await.unwrap().payload.as_ref(), &[0]);
        assert_eq!(consumer.recv().await.unwrap().payload.as_ref(), &[1]);
    }

    #[tokio::test]
    async fn saturated_consumer_does_not_affect_peers() {
        let cancel = CancellationToken::new();
        let track = Track::new(CodecDescriptor::opus_default(), &config(2), &cancel);

        let mut slow = track.add_consumer();
        for n in 0..5 {
            track.fan_out(unit(n));
        }
        assert_eq!(track.stats().dropped(), 3);

        // a consumer attached after the overflow receives every later unit
        let mut fresh = track.add_consumer();
        track.fan_out(unit(10));
        track.fan_out(unit(11));

        assert_eq!(fresh.recv().await.unwrap().payload.as_ref(), &[10]);
        assert_eq!(fresh.recv().await.unwrap().payload.as_ref(), &[11]);

        // the slow consumer kept only its pre-overflow backlog
        assert_eq!(track.stats().dropped(), 5);
        assert_eq!(slow.recv().await.unwrap().payload.as_ref(), &[0]);
        assert_eq!(slow.recv().await.unwrap().payload.as_ref(), &[1]);
    }

    #[tokio::test]
    async fn close_ends_consumers_and_is_idempotent() {
        let cancel = CancellationToken::new();
        let track = Track::new(CodecDescriptor::opus_default(), &config(4), &cancel);

        let mut consumer = track.add_consumer();
        track.close();
        track.close();

        assert!(consumer.recv().await.is_none());

        // consumers attached after close see end-of-stream immediately
        let mut late = track.add_consumer();
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_consumer_detaches_it() {
        let cancel = CancellationToken::new();
        let track = Track::new(CodecDescriptor::opus_default(), &config(4), &cancel);

        let consumer = track.add_consumer();
        assert_eq!(track.state.lock().consumers.len(), 1);
        drop(consumer);
        assert_eq!(track.state.lock().consumers.len(), 0);
    }
}
