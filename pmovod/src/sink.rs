//! Buffer sink abstraction.
//!
//! The sink is the buffered append target plus the local playback engine
//! reading from it (a MediaSource attached to a media element, an appsrc
//! feeding a decoder, ...). Times reported by the sink are *local*: they
//! start at 0 for every channel session and run at the session's speed.
//!
//! Sinks report asynchronous completions through the [`SessionNotifier`]
//! handed to [`MediaSink::attach`]; notifications from a previous attachment
//! are discarded by the session.

use bytes::Bytes;

use crate::error::SinkError;
use crate::events::SessionNotifier;

/// Readiness of the sink's media source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    Closed,
    Open,
    Ended,
}

/// A contiguous buffered interval, in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

/// Asynchronous notifications emitted by the sink.
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    /// The media source is attached and accepts an append target
    SourceOpen,
    SourceClose,
    /// The pending append finished
    UpdateEnd,
    Error(String),
}

/// Buffered media sink driven by the session.
///
/// At most one append may be pending at a time; the session never calls
/// [`append`](MediaSink::append) while [`is_updating`](MediaSink::is_updating)
/// is true.
pub trait MediaSink: Send {
    /// Creates a fresh media source and binds it to the playback engine.
    /// The sink must post [`SinkEvent::SourceOpen`] once it is ready.
    fn attach(&mut self, notifier: SessionNotifier);

    /// Drops the current media source and its append target.
    fn detach(&mut self);

    /// Clears the playback engine's source.
    fn clear_source(&mut self);

    /// Opens the append target for the given codec profile.
    fn add_append_target(&mut self, codec: &str) -> Result<(), SinkError>;

    fn has_append_target(&self) -> bool;

    /// Submits one chunk. Completion is reported by [`SinkEvent::UpdateEnd`].
    fn append(&mut self, payload: Bytes) -> Result<(), SinkError>;

    fn is_updating(&self) -> bool;

    fn ready_state(&self) -> ReadyState;

    /// Declares that no further chunk will be appended.
    fn end_of_stream(&mut self) -> Result<(), SinkError>;

    /// Local playback position.
    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, seconds: f64);

    /// Buffered ranges in local time, sorted.
    fn buffered(&self) -> Vec<TimeRange>;

    fn play(&mut self);

    fn pause(&mut self);
}
