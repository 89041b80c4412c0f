//! Session event plumbing and player-level notifications.
//!
//! Channels, sinks and timers never call into the session directly: they
//! post a [`SessionEvent`] stamped with the [`Generation`] that created them.
//! The owner of the session drains the queue one event at a time, so every
//! callback runs to completion before the next one starts, and anything
//! stamped with a stale generation is dropped after a reset.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::mpsc;

use crate::channel::ChannelEvent;
use crate::scheduler::TimerKind;
use crate::sink::SinkEvent;

/// Identifies one channel session; bumped on every reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEventKind {
    Channel(ChannelEvent),
    Sink(SinkEvent),
    Timer(TimerKind),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionEvent {
    pub generation: Generation,
    pub kind: SessionEventKind,
}

pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Creates the session event queue.
pub fn session_channel() -> (EventSender, SessionEventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

/// Producer side of the session event queue.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    /// Returns a notifier bound to `generation`.
    pub fn notifier(&self, generation: Generation) -> SessionNotifier {
        SessionNotifier {
            generation,
            tx: self.tx.clone(),
        }
    }
}

/// Handle given to channels, sinks and timers to post events back.
///
/// Every `post_*` method returns `false` once the session is gone, so
/// background tasks can stop.
#[derive(Clone, Debug)]
pub struct SessionNotifier {
    generation: Generation,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionNotifier {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn post_channel(&self, event: ChannelEvent) -> bool {
        self.post(SessionEventKind::Channel(event))
    }

    pub fn post_sink(&self, event: SinkEvent) -> bool {
        self.post(SessionEventKind::Sink(event))
    }

    pub fn post_timer(&self, kind: TimerKind) -> bool {
        self.post(SessionEventKind::Timer(kind))
    }

    fn post(&self, kind: SessionEventKind) -> bool {
        self.tx
            .send(SessionEvent {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Événements exposés à l'hôte
// ═══════════════════════════════════════════════════════════════════════════

/// Notifications a host adapter can forward as media element events.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    SourceChanged(String),
    DurationChanged(f64),
    RateChanged(f64),
    Seeked { position: f64, in_buffer: bool },
    ConnectionLost,
    Retrying { offset: f64 },
    EndOfStream,
}

#[derive(Clone, Default)]
pub struct PlayerEventBus {
    subscribers: Arc<Mutex<Vec<Sender<PlayerEvent>>>>,
}

impl PlayerEventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded::<PlayerEvent>();
        {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subscribers.push(tx);
        }
        rx
    }

    pub fn broadcast(&self, event: PlayerEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
