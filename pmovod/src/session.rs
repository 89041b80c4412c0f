//! StreamSession - orchestrateur d'une lecture VOD
//!
//! Une session par média joué. Elle possède l'état de la timeline (offset,
//! vitesse, durée), le canal courant, l'appender et le contrôle de flux, et
//! expose les opérations de l'hôte (source, lecture, seek, vitesse,
//! position, buffer, miniature, reprise).
//!
//! # Temps absolu et temps local
//!
//! Le sink compte en temps *local* : il repart de 0 à chaque canal et
//! avance à la vitesse de la session. L'hôte ne voit que le temps absolu :
//!
//! ```text
//! absolu = offset + local × speed
//! local  = (absolu − offset) / speed
//! ```
//!
//! # Générations
//!
//! Chaque `reset()` incrémente la génération, annule les timers et détache
//! le sink ; tout événement estampillé avec une génération antérieure est
//! ignoré par [`StreamSession::handle_event`].

use std::time::Duration;

use tracing::{debug, error, info, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::appender::{AppendOutcome, AppendState, SinkAppender, UpdateEndOutcome};
use crate::channel::{ChannelConnector, ChannelEvent, ChannelSession};
use crate::config::{SinkErrorPolicy, StartPolicy, VodConfig};
use crate::error::{Result, VodError};
use crate::events::{
    EventSender, Generation, PlayerEvent, PlayerEventBus, SessionEvent, SessionEventKind,
};
use crate::flow::{BufferedRange, FlowController, PlaybackWindow};
use crate::protocol::{ClientMessage, DisconnectReason, MediaInfo, ServerMessage, StartRequest};
use crate::scheduler::{ArmedTimers, Scheduler, TimerKind};
use crate::sink::{MediaSink, ReadyState, SinkEvent};

/// Named booleans of a channel session, cleared on every reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionFlags {
    /// The source reported that no more data will come
    pub eos_signaled: bool,
    /// The sink has been told end of stream
    pub eos_finalized: bool,
    /// The transport dropped unexpectedly
    pub connection_lost: bool,
    /// The sink was attached to this channel session
    pub sink_attached: bool,
}

pub struct StreamSession {
    id: Uuid,
    config: VodConfig,
    connector: Box<dyn ChannelConnector>,
    sink: Box<dyn MediaSink>,
    scheduler: Box<dyn Scheduler>,
    events: EventSender,
    bus: PlayerEventBus,

    generation: Generation,
    channel: Option<ChannelSession>,
    appender: SinkAppender,
    flow: FlowController,
    timers: ArmedTimers,
    flags: SessionFlags,

    source: Option<String>,
    offset: f64,
    cached_position: f64,
    speed: f64,
    duration: f64,
    thumbnail_template: Option<String>,
}

impl StreamSession {
    pub fn new(
        config: VodConfig,
        connector: Box<dyn ChannelConnector>,
        sink: Box<dyn MediaSink>,
        scheduler: Box<dyn Scheduler>,
        events: EventSender,
    ) -> Self {
        let flow = FlowController::new(config.high_water_mark);
        Self {
            id: Uuid::new_v4(),
            config,
            connector,
            sink,
            scheduler,
            events,
            bus: PlayerEventBus::new(),
            generation: Generation::default(),
            channel: None,
            appender: SinkAppender::new(),
            flow,
            timers: ArmedTimers::default(),
            flags: SessionFlags::default(),
            source: None,
            offset: 0.0,
            cached_position: 0.0,
            speed: 1.0,
            duration: 0.0,
            thumbnail_template: None,
        }
    }

    /// Replaces the event bus, to share it with a player handle.
    pub fn with_event_bus(mut self, bus: PlayerEventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub fn append_state(&self) -> AppendState {
        self.appender.state()
    }

    pub fn queue_len(&self) -> usize {
        self.appender.len()
    }

    pub fn is_flow_paused(&self) -> bool {
        self.flow.is_paused()
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn subscribe(&self) -> crossbeam_channel::Receiver<PlayerEvent> {
        self.bus.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Opérations exposées à l'hôte
    // ═══════════════════════════════════════════════════════════════════════

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Loads a new asset. Starts delivery right away only with
    /// [`StartPolicy::Eager`]; otherwise waits for [`play`](Self::play).
    pub fn set_source(&mut self, locator: impl Into<String>) {
        let locator = locator.into();
        info!(session = %self.id, "Source set to {}", locator);
        self.reset();
        self.source = Some(locator.clone());
        self.offset = 0.0;
        self.cached_position = 0.0;
        self.speed = 1.0;
        self.duration = 0.0;
        self.thumbnail_template = None;
        self.sink.clear_source();
        self.bus.broadcast(PlayerEvent::SourceChanged(locator));

        if self.config.start_policy == StartPolicy::Eager {
            self.start();
        }
    }

    pub fn play(&mut self) -> Result<()> {
        if self.channel.is_some() {
            self.sink.play();
            return Ok(());
        }
        if self.source.is_none() {
            return Err(VodError::NoSource);
        }
        self.start();
        Ok(())
    }

    pub fn playback_rate(&self) -> f64 {
        self.speed
    }

    /// Changes the playback rate. The server delivers at the new rate from
    /// the current absolute position.
    pub fn set_playback_rate(&mut self, speed: f64) -> Result<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(VodError::InvalidRate(speed));
        }
        if speed == self.speed {
            return Ok(());
        }
        let position = self.current_time();
        info!(session = %self.id, "Playback rate {} -> {} at {:.3}s", self.speed, speed, position);
        self.offset = position;
        self.cached_position = position;
        self.speed = speed;
        self.reset();
        self.start();
        self.bus.broadcast(PlayerEvent::RateChanged(speed));
        Ok(())
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Absolute playback position.
    ///
    /// When local playback is within one second (at the current speed) of
    /// the known duration and the sink is open, this also finalizes the
    /// stream.
    pub fn current_time(&mut self) -> f64 {
        let local = self.sink.current_time();
        self.cached_position = self.offset + local * self.speed;
        if self.duration > 0.0
            && self.duration - self.cached_position < self.speed
            && self.sink.ready_state() == ReadyState::Open
        {
            self.finalize_end_of_stream();
        }
        self.cached_position
    }

    /// Seeks to an absolute position. Inside the buffered window the sink is
    /// moved locally; anywhere else the channel restarts from `target`.
    pub fn set_current_time(&mut self, target: f64) -> Result<()> {
        if !target.is_finite() {
            return Err(VodError::InvalidPosition(target));
        }
        let target = target.max(0.0);
        let buffered = self.buffered();

        if buffered.contains(target) {
            let local = (target - self.offset) / self.speed;
            debug!(session = %self.id, "Seek to {:.3}s inside buffer (local {:.3}s)", target, local);
            self.sink.set_current_time(local);
            self.cached_position = target;
            self.bus.broadcast(PlayerEvent::Seeked {
                position: target,
                in_buffer: true,
            });
        } else {
            info!(
                session = %self.id,
                "Seek to {:.3}s outside buffer [{:.3}, {:.3}], restarting channel",
                target, buffered.start, buffered.end
            );
            self.offset = target;
            self.cached_position = target;
            self.reset();
            self.start();
            self.bus.broadcast(PlayerEvent::Seeked {
                position: target,
                in_buffer: false,
            });
        }
        Ok(())
    }

    /// Buffered window in absolute-timeline seconds.
    pub fn buffered(&self) -> BufferedRange {
        let ranges = self.sink.buffered();
        match ranges.first() {
            Some(first) => BufferedRange {
                start: self.offset + first.start * self.speed,
                end: self.offset + first.end * self.speed,
                segment_count: ranges.len(),
            },
            None => BufferedRange::default(),
        }
    }

    pub fn thumbnail(&self, seconds: f64) -> Option<String> {
        self.thumbnail_template
            .as_ref()
            .map(|template| format!("{}{}", template, seconds))
    }

    /// Rebuilds the channel from the last known absolute position.
    pub fn retry(&mut self) {
        self.offset = self.cached_position;
        info!(session = %self.id, offset = self.offset, "Retrying channel");
        self.bus.broadcast(PlayerEvent::Retrying {
            offset: self.offset,
        });
        self.reset();
        self.start();
    }

    /// Tears the current channel session down: listeners, transport, queue,
    /// sink attachment and pending timers. Safe to call at any time.
    pub fn reset(&mut self) {
        debug!(session = %self.id, generation = %self.generation, "Reset");
        self.sink.pause();
        if let Some(mut channel) = self.channel.take() {
            channel.teardown();
        }
        self.appender.reset();
        self.flow.reset();
        self.flags = SessionFlags::default();
        self.sink.detach();
        self.scheduler.cancel_all();
        self.timers.clear();
        self.generation = self.generation.next();
    }

    fn start(&mut self) {
        if self.source.is_none() {
            warn!(session = %self.id, "start() without source, ignoring");
            return;
        }
        if self.channel.is_some() {
            warn!(session = %self.id, "start() with a live channel, resetting it first");
            self.reset();
        }
        info!(
            session = %self.id,
            generation = %self.generation,
            offset = self.offset,
            speed = self.speed,
            "Opening channel"
        );
        let notifier = self.events.notifier(self.generation);
        self.channel = Some(ChannelSession::open(self.connector.as_mut(), notifier));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Dispatch des événements
    // ═══════════════════════════════════════════════════════════════════════

    /// Runs one callback to completion.
    pub fn handle_event(&mut self, event: SessionEvent) {
        if event.generation != self.generation {
            trace!(
                "Dropping stale event {:?} (generation {}, current {})",
                event.kind,
                event.generation,
                self.generation
            );
            return;
        }
        match event.kind {
            SessionEventKind::Channel(event) => self.on_channel_event(event),
            SessionEventKind::Sink(event) => self.on_sink_event(event),
            SessionEventKind::Timer(kind) => self.on_timer(kind),
        }
    }

    fn is_streaming(&self) -> bool {
        self.channel
            .as_ref()
            .map(ChannelSession::is_subscribed)
            .unwrap_or(false)
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.on_connected(),
            ChannelEvent::ConnectFailed(reason) => {
                warn!(session = %self.id, "Connection failed: {}", reason);
                self.arm_timer(TimerKind::Reconnect, self.config.reconnect_delay());
            }
            ChannelEvent::Message(message) => {
                if self.is_streaming() {
                    self.on_message(message);
                } else {
                    trace!("Ignoring message before subscription: {:?}", message);
                }
            }
            ChannelEvent::Disconnected(reason) => self.on_disconnect(reason),
        }
    }

    fn on_connected(&mut self) {
        if self.flags.connection_lost {
            debug!(session = %self.id, "Reconnected after loss, checking buffer health");
            self.check_buffer();
        } else if self.flags.sink_attached {
            debug!(session = %self.id, "Transport re-dialled, sink already attached");
        } else {
            debug!(session = %self.id, "Connected, attaching sink");
            let notifier = self.events.notifier(self.generation);
            self.flags.sink_attached = true;
            self.sink.attach(notifier);
        }
    }

    fn on_source_open(&mut self) {
        // One `start` per channel session
        if self.is_streaming() {
            debug!(session = %self.id, "Sink reopened, delivery already requested");
            return;
        }
        if let Err(e) = self.sink.add_append_target(&self.config.codec) {
            error!(session = %self.id, "Cannot open append target: {}", e);
            self.arm_timer(TimerKind::Reconnect, self.config.reconnect_delay());
            return;
        }
        self.appender.clear_queue();

        let request = StartRequest {
            file: resource_path(self.source.as_deref().unwrap_or_default()),
            offset: self.offset,
            speed: self.config.speed_encoding.encode(self.speed),
        };
        if let Some(channel) = self.channel.as_mut() {
            info!(
                file = %request.file,
                offset = request.offset,
                speed = request.speed,
                "Requesting delivery"
            );
            channel.subscribe();
            channel.send(ClientMessage::Start(request));
        }
        self.sink.play();
    }

    fn on_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Data(segment) => {
                if let Some(channel) = self.channel.as_mut() {
                    channel.send(ClientMessage::Ack(segment.seq));
                }
                self.appender.enqueue(segment);
                self.update_flow();
                if self.appender.is_idle() && !self.timers.is_armed(TimerKind::Append) {
                    self.do_append();
                }
            }
            ServerMessage::MediaInfo(info) => self.on_media_info(info),
            ServerMessage::Eos => {
                debug!(session = %self.id, depth = self.appender.len(), "Source signalled end of stream");
                self.flags.eos_signaled = true;
                if self.appender.is_idle()
                    && self.appender.is_empty()
                    && !self.timers.is_armed(TimerKind::Append)
                {
                    self.do_append();
                }
            }
            ServerMessage::Error(detail) => {
                error!(
                    session = %self.id,
                    "Server error: {}",
                    detail.as_deref().unwrap_or("unspecified")
                );
                self.retry();
            }
            ServerMessage::Verbose(text) => info!("[server] {}", text),
        }
    }

    fn on_media_info(&mut self, info: MediaInfo) {
        debug!(session = %self.id, "Media info: duration {}s", info.duration);
        self.duration = info.duration;
        self.thumbnail_template = info.thumbnail_template;
        self.bus.broadcast(PlayerEvent::DurationChanged(info.duration));
    }

    fn on_disconnect(&mut self, reason: DisconnectReason) {
        let lost = match &reason {
            r if r.is_local() => false,
            DisconnectReason::ServerDisconnect | DisconnectReason::TransportClose => true,
            _ => !self.flags.eos_signaled,
        };
        if !lost {
            debug!(session = %self.id, "Disconnected ({}), no action", reason.as_str());
            return;
        }

        if !self.is_streaming() {
            warn!(session = %self.id, "Disconnected ({}) before delivery started", reason.as_str());
            self.arm_timer(TimerKind::Reconnect, self.config.reconnect_delay());
            return;
        }

        warn!(session = %self.id, "Connection lost ({})", reason.as_str());
        self.flags.connection_lost = true;
        self.bus.broadcast(PlayerEvent::ConnectionLost);
        self.check_buffer();
    }

    fn on_sink_event(&mut self, event: SinkEvent) {
        match event {
            SinkEvent::SourceOpen => self.on_source_open(),
            SinkEvent::SourceClose => debug!(session = %self.id, "Sink source closed"),
            SinkEvent::UpdateEnd => self.on_update_end(),
            SinkEvent::Error(message) => {
                warn!(session = %self.id, "Sink error: {}", message);
                if self.config.sink_error_policy == SinkErrorPolicy::Retry {
                    self.retry();
                }
            }
        }
    }

    fn on_timer(&mut self, kind: TimerKind) {
        if !self.timers.fire(kind) {
            trace!("Timer {:?} no longer armed", kind);
            return;
        }
        match kind {
            TimerKind::Append => self.do_append(),
            TimerKind::EndOfStream => self.finalize_end_of_stream(),
            TimerKind::BufferHealth => self.check_buffer(),
            TimerKind::Reconnect => self.retry(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Ajout dans le sink, fin de flux, santé du buffer
    // ═══════════════════════════════════════════════════════════════════════

    fn do_append(&mut self) {
        let eos_signaled = self.flags.eos_signaled;
        let outcome = if self.appender.ready_to_submit(self.sink.as_ref()) {
            let window = self.playback_window();
            let flow = &self.flow;
            self.appender.drive(
                self.sink.as_mut(),
                |queue| flow.should_append_next(&window, queue),
                eos_signaled,
            )
        } else {
            // Busy or empty queue: the gate is never consulted
            self.appender.drive(self.sink.as_mut(), |_| true, eos_signaled)
        };

        match outcome {
            AppendOutcome::Submitted { .. } | AppendOutcome::Busy | AppendOutcome::Drained => {}
            AppendOutcome::Rejected { seq, error } => {
                if error.is_transient() {
                    debug!(seq, "Sink rejected segment ({}), backing off", error);
                } else {
                    warn!(seq, "Sink rejected segment ({}), backing off", error);
                }
                self.arm_timer(TimerKind::Append, self.config.append_backoff());
            }
            AppendOutcome::Deferred => {
                if !self.appender.is_empty() {
                    self.arm_timer(TimerKind::Append, self.config.append_poll());
                } else if eos_signaled {
                    self.finalize_end_of_stream();
                }
            }
            AppendOutcome::EndOfStream => self.finalize_end_of_stream(),
        }
        self.update_flow();
    }

    fn on_update_end(&mut self) {
        match self.appender.on_update_end(self.flags.eos_signaled) {
            UpdateEndOutcome::Continue => {
                if !self.timers.is_armed(TimerKind::Append) {
                    self.do_append();
                }
            }
            UpdateEndOutcome::Idle => {}
            UpdateEndOutcome::Finalize => self.finalize_end_of_stream(),
        }
    }

    fn update_flow(&mut self) {
        if let Some(message) = self.flow.update(self.appender.len()) {
            if let Some(channel) = self.channel.as_mut() {
                channel.send(message);
            }
        }
    }

    /// Tells the sink no more data will come, once it is open and idle.
    /// Reschedules itself until it succeeds or the session is reset.
    fn finalize_end_of_stream(&mut self) {
        if self.flags.eos_finalized {
            return;
        }
        if self.sink.ready_state() == ReadyState::Open && !self.sink.is_updating() {
            match self.sink.end_of_stream() {
                Ok(()) => {
                    info!(session = %self.id, generation = %self.generation, "End of stream finalized");
                    self.flags.eos_finalized = true;
                    self.bus.broadcast(PlayerEvent::EndOfStream);
                    return;
                }
                Err(e) => debug!(session = %self.id, "endOfStream refused: {}", e),
            }
        }
        self.arm_timer(TimerKind::EndOfStream, self.config.eos_retry());
    }

    /// Post-disconnect poll: keep playing from the buffer while more than one
    /// second (at the current speed) remains ahead, then rebuild the channel.
    fn check_buffer(&mut self) {
        if !self.flags.connection_lost {
            return;
        }
        let buffered = self.buffered();
        let position = self.current_time();
        if position + self.speed < buffered.end {
            trace!(
                "Buffer healthy: position {:.3}, buffered until {:.3}",
                position,
                buffered.end
            );
            self.arm_timer(TimerKind::BufferHealth, self.config.health_poll());
        } else {
            info!(
                session = %self.id,
                "Buffer exhausted at {:.3}s (until {:.3}s), rebuilding channel",
                position, buffered.end
            );
            self.retry();
        }
    }

    fn playback_window(&mut self) -> PlaybackWindow {
        let position = self.current_time();
        PlaybackWindow {
            offset: self.offset,
            speed: self.speed,
            duration: self.duration,
            position,
            buffered: self.buffered(),
        }
    }

    fn arm_timer(&mut self, kind: TimerKind, delay: Duration) {
        if !self.timers.arm(kind) {
            return;
        }
        trace!("Arming {:?} in {:?}", kind, delay);
        let notifier = self.events.notifier(self.generation);
        self.scheduler.schedule(delay, notifier, kind);
    }
}

/// Path component of the locator, as sent in the `start` request.
pub fn resource_path(locator: &str) -> String {
    match Url::parse(locator) {
        Ok(url) if url.has_host() || url.scheme() == "file" => url.path().to_string(),
        _ => locator
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}
