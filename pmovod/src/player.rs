//! VodPlayer - pilote asynchrone d'une [`StreamSession`]
//!
//! Une tâche tokio possède la session et sert, sur une seule boucle
//! `select!`, les commandes de l'hôte et les événements postés par le canal,
//! le sink et les timers. Chaque callback s'exécute donc jusqu'au bout avant
//! le suivant, sans verrou autour de la session.
//!
//! ```no_run
//! # async fn demo(sink: Box<dyn pmovod::MediaSink>) -> pmovod::Result<()> {
//! use pmovod::{VodConfig, VodPlayer};
//!
//! let player = VodPlayer::spawn(VodConfig::default(), sink)?;
//! player.set_source("http://vod.local/movies/a.mp4").await?;
//! player.play().await?;
//! player.seek(120.0).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Mutex;

use crossbeam_channel::Receiver;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::ChannelConnector;
use crate::config::VodConfig;
use crate::error::{Result, VodError};
use crate::events::{session_channel, PlayerEvent, PlayerEventBus};
use crate::flow::BufferedRange;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::session::StreamSession;
use crate::sink::MediaSink;
use crate::ws::WsConnector;

type Command = Box<dyn FnOnce(&mut StreamSession) + Send>;

/// Handle on a running player task. Cheap to share behind an `Arc`.
pub struct VodPlayer {
    commands: mpsc::UnboundedSender<Command>,
    bus: PlayerEventBus,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VodPlayer {
    /// Spawns a player streaming over WebSocket from `config.server_url`.
    pub fn spawn(config: VodConfig, sink: Box<dyn MediaSink>) -> Result<Self> {
        let connector = WsConnector::from_config(&config)?;
        Self::spawn_with(
            config,
            Box::new(connector),
            sink,
            Box::new(TokioScheduler::new()),
        )
    }

    /// Spawns a player with injected transport and timers.
    pub fn spawn_with(
        config: VodConfig,
        connector: Box<dyn ChannelConnector>,
        sink: Box<dyn MediaSink>,
        scheduler: Box<dyn Scheduler>,
    ) -> Result<Self> {
        config.validate()?;

        let (events, mut event_rx) = session_channel();
        let bus = PlayerEventBus::new();
        let mut session =
            StreamSession::new(config, connector, sink, scheduler, events).with_event_bus(bus.clone());

        let (commands, mut command_rx) = mpsc::unbounded_channel::<Command>();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();

        let task = tokio::spawn(async move {
            info!(session = %session.id(), "🎬 VOD player started");
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    command = command_rx.recv() => match command {
                        Some(command) => command(&mut session),
                        None => break,
                    },
                    Some(event) = event_rx.recv() => session.handle_event(event),
                }
            }
            session.reset();
            info!(session = %session.id(), "VOD player stopped");
        });

        Ok(Self {
            commands,
            bus,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Runs `f` on the session inside the player task.
    async fn call<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut StreamSession) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Box::new(move |session| {
                let _ = reply.send(f(session));
            }))
            .map_err(|_| VodError::PlayerStopped)?;
        response.await.map_err(|_| VodError::PlayerStopped)
    }

    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.bus.subscribe()
    }

    pub async fn source(&self) -> Result<Option<String>> {
        self.call(|s| s.source().map(str::to_string)).await
    }

    pub async fn set_source(&self, locator: impl Into<String>) -> Result<()> {
        let locator = locator.into();
        self.call(move |s| s.set_source(locator)).await
    }

    pub async fn play(&self) -> Result<()> {
        self.call(|s| s.play()).await?
    }

    pub async fn playback_rate(&self) -> Result<f64> {
        self.call(|s| s.playback_rate()).await
    }

    pub async fn set_playback_rate(&self, speed: f64) -> Result<()> {
        self.call(move |s| s.set_playback_rate(speed)).await?
    }

    pub async fn duration(&self) -> Result<f64> {
        self.call(|s| s.duration()).await
    }

    pub async fn current_time(&self) -> Result<f64> {
        self.call(|s| s.current_time()).await
    }

    /// Seeks to an absolute position.
    pub async fn seek(&self, seconds: f64) -> Result<()> {
        self.call(move |s| s.set_current_time(seconds)).await?
    }

    pub async fn buffered(&self) -> Result<BufferedRange> {
        self.call(|s| s.buffered()).await
    }

    pub async fn thumbnail(&self, seconds: f64) -> Result<Option<String>> {
        self.call(move |s| s.thumbnail(seconds)).await
    }

    pub async fn retry(&self) -> Result<()> {
        self.call(|s| s.retry()).await
    }

    /// Stops the player task after resetting the session. Later calls fail
    /// with [`VodError::PlayerStopped`].
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("VOD player task ended abnormally: {}", e);
                return Err(VodError::PlayerStopped);
            }
            debug!("VOD player joined");
        }
        Ok(())
    }
}

impl Drop for VodPlayer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
