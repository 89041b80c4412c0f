//! Timers coopératifs.
//!
//! Tous les délais du contrôleur (backoff d'ajout, re-vérification du
//! contrôle de flux, relance de fin de flux, contrôle de santé du buffer,
//! reconnexion) passent par ce module. Un timer ne fait jamais rien par
//! lui-même : il poste un [`TimerKind`] dans la file d'événements de la
//! session, estampillé avec la génération courante.

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::events::SessionNotifier;

/// What a timer re-triggers when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Retry the appender (sink rejection backoff or deferred append)
    Append,
    /// Retry end-of-stream finalization
    EndOfStream,
    /// Post-disconnect buffer-health poll
    BufferHealth,
    /// Rebuild the channel after a failed connection attempt
    Reconnect,
}

/// Delayed delivery of timer events.
pub trait Scheduler: Send {
    fn schedule(&mut self, delay: Duration, notifier: SessionNotifier, kind: TimerKind);

    /// Drops every timer not fired yet.
    fn cancel_all(&mut self);
}

/// [`Scheduler`] backed by tokio sleeps.
///
/// Must be used from within a tokio runtime.
pub struct TokioScheduler {
    token: CancellationToken,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, notifier: SessionNotifier, kind: TimerKind) {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    trace!("Timer {:?} cancelled (generation {})", kind, notifier.generation());
                }
                _ = tokio::time::sleep(delay) => {
                    notifier.post_timer(kind);
                }
            }
        });
    }

    fn cancel_all(&mut self) {
        self.token.cancel();
        self.token = CancellationToken::new();
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Tracks which timer kinds are pending for the current generation, so a
/// kind is never armed twice.
#[derive(Debug, Default)]
pub(crate) struct ArmedTimers {
    pending: HashSet<TimerKind>,
}

impl ArmedTimers {
    /// Returns `true` if the kind was not armed yet.
    pub(crate) fn arm(&mut self, kind: TimerKind) -> bool {
        self.pending.insert(kind)
    }

    /// Returns `true` if the kind was armed.
    pub(crate) fn fire(&mut self, kind: TimerKind) -> bool {
        self.pending.remove(&kind)
    }

    pub(crate) fn is_armed(&self, kind: TimerKind) -> bool {
        self.pending.contains(&kind)
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}
