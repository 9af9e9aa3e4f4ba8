//! Publish side of the relay: streams, sources and tracks.
//!
//! A [`Stream`] is one published session. Each publisher leg (media kind
//! and simulcast layer) is a [`Source`], whose codec is latched from the
//! first in-band parameters. Access units flow through per-codec
//! [`Track`]s to any number of consumers.

mod source;
mod stream;
mod track;

pub use source::Source;
pub use stream::Stream;
pub use track::{Track, TrackConsumer, TrackStats};
