//! SinkAppender - sérialise l'ajout des segments dans le sink
//!
//! Machine à états `Idle → AppendPending → Idle … → EosPending` :
//!
//! ```text
//!            drive() + segment accepté
//!   Idle ───────────────────────────────▶ AppendPending
//!    ▲                                         │
//!    │      UpdateEnd (file non vide ou        │
//!    └──────── fin de flux non signalée) ◀─────┘
//!                                              │ UpdateEnd, file vide,
//!                                              ▼ fin de flux signalée
//!                                          EosPending
//! ```
//!
//! L'appender ne programme aucun timer lui-même : il rend un
//! [`AppendOutcome`] et la session décide (backoff, re-vérification,
//! finalisation).

use bytes::Bytes;
use tracing::trace;

use crate::error::SinkError;
use crate::queue::{Segment, SegmentQueue};
use crate::sink::MediaSink;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AppendState {
    #[default]
    Idle,
    AppendPending,
    EosPending,
}

/// Result of one [`SinkAppender::drive`] attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum AppendOutcome {
    /// A segment is now in flight
    Submitted { seq: u64 },
    /// An append is already in flight, or the sink has no append target yet
    Busy,
    /// The sink refused the head segment; it is back at the head of the queue
    Rejected { seq: u64, error: SinkError },
    /// The flow controller vetoed the append
    Deferred,
    /// Nothing left to append
    Drained,
    /// Nothing left to append and the source signalled end of stream
    EndOfStream,
}

/// What to do after the sink reported the pending append as complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateEndOutcome {
    /// Segments are waiting: attempt the next submission
    Continue,
    Idle,
    /// Queue empty and end of stream signalled: finalize
    Finalize,
}

#[derive(Debug, Default)]
pub struct SinkAppender {
    queue: SegmentQueue,
    state: AppendState,
}

impl SinkAppender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AppendState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == AppendState::Idle
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn enqueue(&mut self, segment: Segment) {
        trace!(seq = segment.seq, depth = self.queue.len() + 1, "Segment queued");
        self.queue.push(segment);
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    /// Back to `Idle` with an empty queue.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.state = AppendState::Idle;
    }

    /// Whether [`drive`](Self::drive) could submit something right now,
    /// before consulting the flow controller.
    pub fn ready_to_submit(&self, sink: &dyn MediaSink) -> bool {
        self.state != AppendState::AppendPending
            && sink.has_append_target()
            && !sink.is_updating()
            && !self.queue.is_empty()
    }

    /// Attempts to move the head segment into the sink.
    ///
    /// `gate` is the flow controller's decision; it may drop the queue.
    pub fn drive<F>(&mut self, sink: &mut dyn MediaSink, gate: F, eos_signaled: bool) -> AppendOutcome
    where
        F: FnOnce(&mut SegmentQueue) -> bool,
    {
        if self.state == AppendState::AppendPending
            || !sink.has_append_target()
            || sink.is_updating()
        {
            return AppendOutcome::Busy;
        }

        if self.queue.is_empty() {
            return self.drained(eos_signaled);
        }

        if !gate(&mut self.queue) {
            return AppendOutcome::Deferred;
        }

        let Some(segment) = self.queue.pop() else {
            return self.drained(eos_signaled);
        };

        let seq = segment.seq;
        let payload: Bytes = segment.payload.clone();
        match sink.append(payload) {
            Ok(()) => {
                self.state = AppendState::AppendPending;
                trace!(seq, depth = self.queue.len(), "Segment submitted to sink");
                AppendOutcome::Submitted { seq }
            }
            Err(error) => {
                self.queue.requeue(segment);
                AppendOutcome::Rejected { seq, error }
            }
        }
    }

    /// Handles the sink's "append complete" notification.
    pub fn on_update_end(&mut self, eos_signaled: bool) -> UpdateEndOutcome {
        if self.state == AppendState::EosPending {
            return UpdateEndOutcome::Finalize;
        }
        self.state = AppendState::Idle;
        if !self.queue.is_empty() {
            UpdateEndOutcome::Continue
        } else if eos_signaled {
            self.state = AppendState::EosPending;
            UpdateEndOutcome::Finalize
        } else {
            UpdateEndOutcome::Idle
        }
    }

    fn drained(&mut self, eos_signaled: bool) -> AppendOutcome {
        if eos_signaled {
            self.state = AppendState::EosPending;
            AppendOutcome::EndOfStream
        } else {
            AppendOutcome::Drained
        }
    }
}
