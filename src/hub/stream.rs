use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::codec::CodecDescriptor;
use crate::config::RelayConfig;
use crate::packet::MediaKind;

use super::source::Source;
use super::track::Track;

struct StreamInner {
    sources: Vec<Arc<Source>>,
    subscribers: Vec<mpsc::UnboundedSender<Arc<Track>>>,
    closed: bool,
}

/// A named published session: one source per media kind and simulcast
/// layer, any number of subscribers.
pub struct Stream {
    config: RelayConfig,
    cancel: CancellationToken,
    inner: RwLock<StreamInner>,
}

impl Stream {
    pub fn new(config: RelayConfig) -> Stream {
        Stream {
            config,
            cancel: CancellationToken::new(),
            inner: RwLock::new(StreamInner {
                sources: Vec::new(),
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Add a publisher source. Subscribers already attached will be told
    /// about its tracks as they appear.
    pub fn new_source(&self, kind: MediaKind) -> Arc<Source> {
        let source = Source::new(kind, self.config.clone(), &self.cancel);

        let mut inner = self.inner.write();
        if inner.closed {
            source.close();
            return source;
        }
        for subscriber in &inner.subscribers {
            source.add_watcher(subscriber.clone());
        }
        inner.sources.push(Arc::clone(&source));
        source
    }

    pub fn sources(&self) -> Vec<Arc<Source>> {
        self.inner.read().sources.clone()
    }

    /// Receive every track of this stream, existing ones first, then new
    /// ones as publishers negotiate codecs. The channel ends when the
    /// stream closes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<Track>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.inner.write();
        if inner.closed {
            return rx;
        }
        for source in &inner.sources {
            source.add_watcher(tx.clone());
        }
        inner.subscribers.push(tx);
        rx
    }

    /// Codecs negotiated so far, waiting for each source's latch.
    pub async fn codecs(&self) -> Vec<CodecDescriptor> {
        let sources = self.sources();

        let mut out = Vec::with_capacity(sources.len());
        for source in sources {
            if let Ok(codec) = source.codec().await {
                out.push(codec);
            }
        }
        out
    }

    /// Close the stream and everything under it. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        if inner.closed {
            return;
        }
        inner.closed = true;

        info!(sources = inner.sources.len(), "closing stream");
        for source in &inner.sources {
            source.close();
        }
        inner.subscribers.clear();
        drop(inner);

        self.cancel.cancel();
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
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
    async fn subscriber_sees_existing_and_new_tracks() {
        let stream = Stream::new(config());

        let video = stream.new_source(MediaKind::Video);
        video.set_codec(vp8());

        let mut tracks = stream.subscribe();
        let first = tracks.recv().await.unwrap();
        assert_eq!(first.codec(), &vp8());

        let audio = stream.new_source(MediaKind::Audio);
        audio.set_codec(CodecDescriptor::opus_default());

        let second = tracks.recv().await.unwrap();
        assert_eq!(second.codec(), &CodecDescriptor::opus_default());
    }

    #[tokio::test]
    async fn codecs_lists_latched_sources_only() {
        let stream = Stream::new(config());

        stream.new_source(MediaKind::Video).set_codec(vp8());
        stream.new_source(MediaKind::Audio); // never negotiates

        let codecs = stream.codecs().await;
        assert_eq!(codecs, vec![vp8()]);
    }

    #[tokio::test]
    async fn close_cascades_to_sources_and_subscribers() {
        let stream = Stream::new(config());
        let source = stream.new_source(MediaKind::Video);
        let track = source.set_codec(vp8());
        let mut consumer = track.add_consumer();
        let mut tracks = stream.subscribe();

        stream.close();
        stream.close();

        assert!(source.is_closed());
        assert!(consumer.recv().await.is_none());
        // drain the pre-filled announcement, then the channel ends
        assert!(tracks.recv().await.is_some());
        assert!(tracks.recv().await.is_none());
    }

    #[tokio::test]
    async fn sources_on_closed_stream_are_closed() {
        let stream = Stream::new(config());
        stream.close();
        let source = stream.new_source(MediaKind::Video);
        assert!(source.is_closed());
    }
}
