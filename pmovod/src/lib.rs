//! # pmovod - lecture VOD incrémentale sur canal duplex
//!
//! `pmovod` pilote la lecture d'une vidéo à la demande dont les segments
//! arrivent un par un sur un canal duplex (WebSocket) et sont ajoutés dans
//! un sink bufferisé (MediaSource, appsrc, ...) qui alimente le moteur de
//! lecture local.
//!
//! ## Architecture
//!
//! ```text
//!   hôte ──commandes──▶ VodPlayer ──▶ StreamSession ──▶ MediaSink
//!                                       │   ▲
//!                        ChannelSession │   │ SessionEvent (génération)
//!                                       ▼   │
//!                         WsConnector ◀──▶ serveur de flux
//! ```
//!
//! - [`SegmentQueue`] : FIFO des segments reçus mais pas encore ajoutés
//! - [`FlowController`] : décide si le segment de tête peut partir, et
//!   envoie `pause` / `continue` au serveur autour du seuil haut
//! - [`SinkAppender`] : un seul ajout en vol, backoff sur refus du sink
//! - [`StreamSession`] : timeline (offset, vitesse, durée), seek, reprise,
//!   finalisation de fin de flux, contrôle de santé du buffer
//! - [`VodPlayer`] : tâche tokio qui sérialise commandes et événements
//!
//! ## Exemple
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmovod::{MediaSink, VodConfigExt, VodPlayer};
//!
//! # async fn demo(sink: Box<dyn MediaSink>) -> anyhow::Result<()> {
//! let config = get_config().get_vod_config()?;
//! let player = VodPlayer::spawn(config, sink)?;
//! let events = player.subscribe();
//!
//! player.set_source("http://vod.local/movies/a.mp4").await?;
//! player.play().await?;
//!
//! while let Ok(event) = events.recv() {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod appender;
pub mod channel;
pub mod config;
pub mod config_ext;
pub mod error;
pub mod events;
pub mod flow;
pub mod player;
pub mod protocol;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod ws;

#[cfg(test)]
mod testing;

pub use appender::{AppendOutcome, AppendState, SinkAppender, UpdateEndOutcome};
pub use channel::{ChannelConnector, ChannelEvent, ChannelHandle, ChannelSession};
pub use config::{SinkErrorPolicy, SpeedEncoding, StartPolicy, VodConfig};
pub use config_ext::VodConfigExt;
pub use error::{Result, SinkError, VodError};
pub use events::{
    session_channel, EventSender, Generation, PlayerEvent, PlayerEventBus, SessionEvent,
    SessionEventKind, SessionEventReceiver, SessionNotifier,
};
pub use flow::{BufferedRange, FlowController, PlaybackWindow};
pub use player::VodPlayer;
pub use protocol::{
    ClientMessage, DisconnectReason, MediaInfo, ServerMessage, StartRequest, WireFrame,
};
pub use queue::{Segment, SegmentQueue};
pub use scheduler::{Scheduler, TimerKind, TokioScheduler};
pub use session::{SessionFlags, StreamSession};
pub use sink::{MediaSink, ReadyState, SinkEvent, TimeRange};
pub use ws::WsConnector;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
