//! Channel session: one duplex connection, never reused.
//!
//! A [`ChannelConnector`] dials the stream source and reports the
//! connection lifecycle through the [`SessionNotifier`] it is given. The
//! [`ChannelSession`] wraps the resulting [`ChannelHandle`] for exactly one
//! generation and is torn down, not recycled, on every reset.

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::events::{Generation, SessionNotifier};
use crate::protocol::{ClientMessage, DisconnectReason, ServerMessage};

/// Connection lifecycle and inbound traffic.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// Connection established (again, after a transport-level reconnect)
    Connected,
    /// The initial connection attempt failed
    ConnectFailed(String),
    Message(ServerMessage),
    Disconnected(DisconnectReason),
}

/// Opens duplex connections. Injected into the session so tests can fake
/// the transport.
pub trait ChannelConnector: Send {
    /// Starts connecting and returns immediately. Lifecycle events and
    /// inbound messages must be posted through `notifier`.
    fn connect(&mut self, notifier: SessionNotifier) -> Box<dyn ChannelHandle>;
}

/// Outbound half of an open (or opening) connection.
pub trait ChannelHandle: Send {
    fn send(&mut self, message: ClientMessage) -> Result<()>;

    /// Closes the connection. Must be idempotent.
    fn close(&mut self);
}

pub struct ChannelSession {
    generation: Generation,
    handle: Option<Box<dyn ChannelHandle>>,
    /// Message listeners are active once the sink is open and `start` is sent
    subscribed: bool,
}

impl ChannelSession {
    pub fn open(connector: &mut dyn ChannelConnector, notifier: SessionNotifier) -> Self {
        let generation = notifier.generation();
        debug!(%generation, "Opening channel session");
        Self {
            generation,
            handle: Some(connector.connect(notifier)),
            subscribed: false,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn subscribe(&mut self) {
        self.subscribed = true;
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Sends a message, logging instead of failing: a dead channel is
    /// reported separately through a disconnect event.
    pub fn send(&mut self, message: ClientMessage) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            trace!(generation = %self.generation, "Dropping {} on closed channel", message.name());
            return false;
        };
        let name = message.name();
        match handle.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(generation = %self.generation, "Failed to send {}: {}", name, e);
                false
            }
        }
    }

    /// Unsubscribes and closes the transport. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.subscribed = false;
        if let Some(mut handle) = self.handle.take() {
            debug!(generation = %self.generation, "Closing channel session");
            handle.close();
        }
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
