use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::CodecDescriptor;
use crate::config::RelayConfig;
use crate::error::HubError;
use crate::packet::MediaKind;
use crate::unit::MediaUnit;

use super::track::Track;

struct SourceInner {
    current: Option<CodecDescriptor>,
    tracks: HashMap<String, Arc<Track>>,
    watchers: Vec<mpsc::UnboundedSender<Arc<Track>>>,
}

/// One publisher of one media kind (one simulcast layer is one source).
///
/// The codec is not known until the first in-band parameters arrive, so
/// readers of [`Source::codec`] wait on a latch: the first `set_codec`
/// releases every waiter, later ones only swap the current descriptor.
/// Waiting is bounded by `codec_latch_timeout`.
pub struct Source {
    kind: MediaKind,
    config: RelayConfig,
    cancel: CancellationToken,
    inner: RwLock<SourceInner>,
    latch_tx: watch::Sender<bool>,
    latch_rx: watch::Receiver<bool>,
    closed: AtomicBool,
}

impl Source {
    pub fn new(kind: MediaKind, config: RelayConfig, parent: &CancellationToken) -> Arc<Source> {
        let (latch_tx, latch_rx) = watch::channel(false);

        Arc::new(Source {
            kind,
            config,
            cancel: parent.child_token(),
            inner: RwLock::new(SourceInner {
                current: None,
                tracks: HashMap::new(),
                watchers: Vec::new(),
            }),
            latch_tx,
            latch_rx,
            closed: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Record a (possibly new) negotiated codec and resolve its track.
    ///
    /// The first call releases the codec latch. A descriptor seen before
    /// reuses its existing track, so flapping between two descriptors does
    /// not spawn new tracks.
    pub fn set_codec(&self, descriptor: CodecDescriptor) -> Arc<Track> {
        let track = self.resolve_track(descriptor.clone());

        let mut inner = self.inner.write();
        let first = inner.current.is_none();
        inner.current = Some(descriptor);
        drop(inner);

        if first {
            // release everyone waiting in codec()
            self.latch_tx.send_replace(true);
        }

        track
    }

    /// The current codec, waiting up to the latch timeout for negotiation.
    pub async fn codec(&self) -> Result<CodecDescriptor, HubError> {
        if let Some(current) = self.inner.read().current.clone() {
            return Ok(current);
        }

        let mut latch = self.latch_rx.clone();
        let wait = latch.wait_for(|set| *set);
        if timeout(self.config.codec_latch_timeout, wait).await.is_err() {
            return Err(HubError::CodecNotReady);
        }

        self.inner
            .read()
            .current
            .clone()
            .ok_or(HubError::CodecNotReady)
    }

    /// Like [`Source::codec`], failing when this is not a video source.
    pub async fn video_codec(&self) -> Result<CodecDescriptor, HubError> {
        if !self.kind.is_video() {
            return Err(HubError::WrongKind(MediaKind::Video));
        }
        self.codec().await
    }

    /// Like [`Source::codec`], failing when this is not an audio source.
    pub async fn audio_codec(&self) -> Result<CodecDescriptor, HubError> {
        if !self.kind.is_audio() {
            return Err(HubError::WrongKind(MediaKind::Audio));
        }
        self.codec().await
    }

    /// Track for a descriptor, created on first use.
    pub fn resolve_track(&self, descriptor: CodecDescriptor) -> Arc<Track> {
        let key = descriptor.descriptor_key();

        if let Some(track) = self.inner.read().tracks.get(&key) {
            return Arc::clone(track);
        }

        let mut inner = self.inner.write();
        // racing resolver may have created it between the locks
        if let Some(track) = inner.tracks.get(&key) {
            return Arc::clone(track);
        }

        debug!(codec = %descriptor, "new track");
        let track = Track::new(descriptor, &self.config, &self.cancel);
        inner.tracks.insert(key, Arc::clone(&track));

        inner
            .watchers
            .retain(|w| w.send(Arc::clone(&track)).is_ok());

        track
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.inner.read().tracks.values().cloned().collect()
    }

    /// Register for track announcements. Existing tracks are delivered
    /// before any new ones.
    pub(super) fn add_watcher(&self, watcher: mpsc::UnboundedSender<Arc<Track>>) {
        let mut inner = self.inner.write();
        for track in inner.tracks.values() {
            if watcher.send(Arc::clone(track)).is_err() {
                return;
            }
        }
        inner.watchers.push(watcher);
    }

    /// Hand a unit to every track of this source.
    pub fn write(&self, unit: MediaUnit) {
        if self.is_closed() {
            return;
        }
        let inner = self.inner.read();
        for track in inner.tracks.values() {
            track.publish(unit.clone());
        }
    }

    /// Close the source and all of its tracks. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut inner = self.inner.write();
        for track in inner.tracks.values() {
            track.close();
        }
        inner.watchers.clear();
        drop(inner);

        // unblock codec() waiters; they find current == None and fail
        self.latch_tx.send_replace(true);
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::unit::FrameInfo;
    use bytes::Bytes;
    use std::time::Duration;

    fn config() -> RelayConfig {
        RelayConfig {
            codec_latch_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn vp8() -> CodecDescriptor {
        CodecDescriptor::Vp8 {
            width: 640,
            height: 480,
        }
    }

    #[tokio::test]
    async fn codec_waits_for_latch() {
        let cancel = CancellationToken::new();
        let source = Source::new(MediaKind::Video, config(), &cancel);

        let waiter = {
            let source = Arc::clone(&source);
            tokio::spawn(async move { source.codec().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        source.set_codec(vp8());

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got, vp8());
    }

    #[tokio::test]
    async fn codec_times_out_without_negotiation() {
        let cancel = CancellationToken::new();
        let source = Source::new(MediaKind::Video, config(), &cancel);

        let err = source.codec().await.unwrap_err();
        assert!(matches!(err, HubError::CodecNotReady));
    }

    #[tokio::test]
    async fn later_set_codec_only_swaps_current() {
        let cancel = CancellationToken::new();
        let source = Source::new(MediaKind::Video, config(), &cancel);

        source.set_codec(vp8());
        let hd = CodecDescriptor::Vp8 {
            width: 1280,
            height: 720,
        };
        source.set_codec(hd.clone());

        assert_eq!(source.codec().await.unwrap(), hd);
        assert_eq!(source.tracks().len(), 2);

        // same descriptor again does not mint a third track
        source.set_codec(hd.clone());
        assert_eq!(source.tracks().len(), 2);
    }

    #[tokio::test]
    async fn kind_mismatch_is_an_error() {
        let cancel = CancellationToken::new();
        let source = Source::new(MediaKind::Audio, config(), &cancel);
        source.set_codec(CodecDescriptor::opus_default());

        assert!(source.audio_codec().await.is_ok());
        assert!(matches!(
            source.video_codec().await.unwrap_err(),
            HubError::WrongKind(MediaKind::Video)
        ));
    }

    #[tokio::test]
    async fn write_fans_to_tracks() {
        let cancel = CancellationToken::new();
        let source = Source::new(MediaKind::Video, config(), &cancel);
        let track = source.set_codec(vp8());
        let mut consumer = track.add_consumer();

        source.write(MediaUnit {
            payload: Bytes::from_static(&[1, 2, 3]),
            pts: 0,
            dts: 0,
            duration: 0,
            time_base: 90_000,
            frame: FrameInfo::default(),
        });

        let unit = consumer.recv().await.unwrap();
        assert_eq!(unit.payload.as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn close_releases_waiters_with_error() {
        let cancel = CancellationToken::new();
        let source = Source::new(MediaKind::Video, config(), &cancel);

        let waiter = {
            let source = Arc::clone(&source);
            tokio::spawn(async move { source.codec().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        source.close();

        assert!(matches!(
            waiter.await.unwrap().unwrap_err(),
            HubError::CodecNotReady
        ));
    }
}
