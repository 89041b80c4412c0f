//! WebSocket transport for the duplex channel.
//!
//! Each [`ChannelConnector::connect`] spawns one connection task. The task
//! dials the server, pumps frames in both directions and reports the
//! lifecycle through the session notifier. When the connection drops for a
//! reason other than a local close, it re-dials a bounded number of times
//! and reports `Connected` again on success.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::channel::{ChannelConnector, ChannelEvent, ChannelHandle};
use crate::config::VodConfig;
use crate::error::{Result, VodError};
use crate::events::SessionNotifier;
use crate::protocol::{ClientMessage, DisconnectReason, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Debug)]
struct DialSettings {
    url: Url,
    reconnect: bool,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
}

/// Opens WebSocket channels to the stream server.
#[derive(Clone, Debug)]
pub struct WsConnector {
    settings: DialSettings,
}

impl WsConnector {
    /// Creates a connector for a `ws://` or `wss://` endpoint, without
    /// transport-level reconnection.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| VodError::InvalidConfig(format!("invalid server url '{}': {}", url, e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(VodError::InvalidConfig(format!(
                "server url must use ws:// or wss://, got '{}'",
                url
            )));
        }
        Ok(Self {
            settings: DialSettings {
                url,
                reconnect: false,
                reconnect_delay: Duration::from_secs(1),
                max_reconnect_attempts: 0,
            },
        })
    }

    pub fn from_config(config: &VodConfig) -> Result<Self> {
        Ok(Self::new(&config.server_url)?.with_reconnect(
            config.reconnect,
            config.reconnect_delay(),
            config.max_reconnect_attempts,
        ))
    }

    pub fn with_reconnect(mut self, enabled: bool, delay: Duration, max_attempts: u32) -> Self {
        self.settings.reconnect = enabled;
        self.settings.reconnect_delay = delay;
        self.settings.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn url(&self) -> &Url {
        &self.settings.url
    }
}

impl ChannelConnector for WsConnector {
    fn connect(&mut self, notifier: SessionNotifier) -> Box<dyn ChannelHandle> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        tokio::spawn(run_connection(
            self.settings.clone(),
            notifier,
            outbound_rx,
            token.clone(),
        ));
        Box::new(WsChannel { outbound, token })
    }
}

/// Outbound half handed to the session. Messages sent before the connection
/// is up are queued.
struct WsChannel {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    token: CancellationToken,
}

impl ChannelHandle for WsChannel {
    fn send(&mut self, message: ClientMessage) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(VodError::ChannelClosed);
        }
        self.outbound
            .send(message)
            .map_err(|_| VodError::ChannelClosed)
    }

    fn close(&mut self) {
        self.token.cancel();
    }
}

async fn run_connection(
    settings: DialSettings,
    notifier: SessionNotifier,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    token: CancellationToken,
) {
    let generation = notifier.generation();
    debug!(%generation, "Dialing {}", settings.url);

    let result = tokio::select! {
        _ = token.cancelled() => return,
        result = connect_async(settings.url.as_str()) => result,
    };
    let mut stream = match result {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!(%generation, "Cannot connect to {}: {}", settings.url, e);
            notifier.post_channel(ChannelEvent::ConnectFailed(e.to_string()));
            return;
        }
    };
    info!(%generation, "Connected to {}", settings.url);
    notifier.post_channel(ChannelEvent::Connected);

    loop {
        let reason = pump(stream, &notifier, &mut outbound, &token).await;
        let local = reason.is_local();
        if local {
            debug!(%generation, "Channel closed locally");
        } else {
            warn!(%generation, "Channel dropped: {}", reason.as_str());
        }
        if !notifier.post_channel(ChannelEvent::Disconnected(reason)) || local || !settings.reconnect
        {
            return;
        }

        match redial(&settings, &token).await {
            Some(next) => {
                info!(%generation, "Reconnected to {}", settings.url);
                notifier.post_channel(ChannelEvent::Connected);
                stream = next;
            }
            None => return,
        }
    }
}

async fn redial(settings: &DialSettings, token: &CancellationToken) -> Option<WsStream> {
    for attempt in 1..=settings.max_reconnect_attempts {
        tokio::select! {
            _ = token.cancelled() => return None,
            _ = tokio::time::sleep(settings.reconnect_delay) => {}
        }
        let result = tokio::select! {
            _ = token.cancelled() => return None,
            result = connect_async(settings.url.as_str()) => result,
        };
        match result {
            Ok((stream, _)) => return Some(stream),
            Err(e) => debug!(
                attempt,
                max = settings.max_reconnect_attempts,
                "Reconnect failed: {}",
                e
            ),
        }
    }
    warn!(
        "Giving up on {} after {} attempts",
        settings.url, settings.max_reconnect_attempts
    );
    None
}

/// Moves frames until the connection ends, and says why it ended.
async fn pump(
    stream: WsStream,
    notifier: &SessionNotifier,
    outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
    token: &CancellationToken,
) -> DisconnectReason {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return DisconnectReason::ClientDisconnect;
            }
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = write.send(Message::Close(None)).await;
                    return DisconnectReason::ClientDisconnect;
                };
                match message.encode() {
                    Ok(text) => {
                        trace!("→ {}", text);
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            return DisconnectReason::TransportError(e.to_string());
                        }
                    }
                    Err(e) => warn!("Cannot encode {}: {}", message.name(), e),
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Binary(data))) => match ServerMessage::decode_binary(&data) {
                    Ok(message) => {
                        notifier.post_channel(ChannelEvent::Message(message));
                    }
                    Err(e) => warn!("Dropping data frame: {}", e),
                },
                Some(Ok(Message::Text(text))) => match ServerMessage::decode_text(text.as_str()) {
                    Ok(Some(message)) => {
                        notifier.post_channel(ChannelEvent::Message(message));
                    }
                    Ok(None) => debug!("Ignoring unknown server event: {}", text.as_str()),
                    Err(e) => warn!("Dropping malformed server frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server closed the channel: {:?}", frame);
                    return DisconnectReason::ServerDisconnect;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return DisconnectReason::TransportError(e.to_string()),
                None => return DisconnectReason::TransportClose,
            },
        }
    }
}
