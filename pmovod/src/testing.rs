//! In-memory fakes used by the unit tests: a recording channel, a scripted
//! sink, a manual scheduler and a harness wiring them to a session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::Receiver;

use crate::channel::{ChannelConnector, ChannelEvent, ChannelHandle};
use crate::config::VodConfig;
use crate::error::{Result, SinkError};
use crate::events::{
    session_channel, Generation, PlayerEvent, SessionEventReceiver, SessionNotifier,
};
use crate::protocol::{ClientMessage, ServerMessage, StartRequest};
use crate::queue::Segment;
use crate::scheduler::{Scheduler, TimerKind};
use crate::session::StreamSession;
use crate::sink::{MediaSink, ReadyState, SinkEvent, TimeRange};

fn lock<T>(state: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ═══════════════════════════════════════════════════════════════════════════
// Canal
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct NetState {
    pub notifiers: Vec<SessionNotifier>,
    pub sent: Vec<ClientMessage>,
    pub closed: Vec<Generation>,
}

#[derive(Clone, Default)]
pub struct NetProbe(Arc<Mutex<NetState>>);

impl NetProbe {
    pub fn with<R>(&self, f: impl FnOnce(&mut NetState) -> R) -> R {
        f(&mut lock(&self.0))
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.with(|s| s.sent.clone())
    }

    pub fn closed(&self) -> Vec<Generation> {
        self.with(|s| s.closed.clone())
    }

    pub fn connects(&self) -> usize {
        self.with(|s| s.notifiers.len())
    }

    /// Notifier of the most recent connection.
    pub fn last_notifier(&self) -> SessionNotifier {
        self.with(|s| s.notifiers.last().cloned())
            .expect("no connection opened")
    }

    pub fn starts(&self) -> Vec<StartRequest> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Start(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn acks(&self) -> Vec<u64> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Ack(seq) => Some(seq),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.sent().iter().filter(|m| m.name() == name).count()
    }
}

pub struct FakeConnector {
    probe: NetProbe,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            probe: NetProbe::default(),
        }
    }

    pub fn probe(&self) -> NetProbe {
        self.probe.clone()
    }
}

impl ChannelConnector for FakeConnector {
    fn connect(&mut self, notifier: SessionNotifier) -> Box<dyn ChannelHandle> {
        let generation = notifier.generation();
        self.probe.with(|s| s.notifiers.push(notifier));
        Box::new(FakeChannel {
            generation,
            probe: self.probe.clone(),
            closed: false,
        })
    }
}

struct FakeChannel {
    generation: Generation,
    probe: NetProbe,
    closed: bool,
}

impl ChannelHandle for FakeChannel {
    fn send(&mut self, message: ClientMessage) -> Result<()> {
        if self.closed {
            return Err(crate::error::VodError::ChannelClosed);
        }
        self.probe.with(|s| s.sent.push(message));
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let generation = self.generation;
            self.probe.with(|s| s.closed.push(generation));
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Sink
// ═══════════════════════════════════════════════════════════════════════════

pub struct SinkState {
    pub notifier: Option<SessionNotifier>,
    pub attach_count: usize,
    pub detach_count: usize,
    pub cleared: usize,
    pub ready: ReadyState,
    pub has_target: bool,
    pub fail_target: bool,
    pub codec: Option<String>,
    pub appended: Vec<Bytes>,
    pub updating: bool,
    /// Number of upcoming appends refused with `QuotaExceeded`
    pub reject_next: usize,
    /// Appends attempted while another one was pending
    pub overlaps: usize,
    pub eos_calls: usize,
    pub eos_fail_next: usize,
    pub current_time: f64,
    pub buffered: Vec<TimeRange>,
    pub seeks: Vec<f64>,
    pub playing: bool,
}

impl Default for SinkState {
    fn default() -> Self {
        Self {
            notifier: None,
            attach_count: 0,
            detach_count: 0,
            cleared: 0,
            ready: ReadyState::Closed,
            has_target: false,
            fail_target: false,
            codec: None,
            appended: Vec::new(),
            updating: false,
            reject_next: 0,
            overlaps: 0,
            eos_calls: 0,
            eos_fail_next: 0,
            current_time: 0.0,
            buffered: Vec::new(),
            seeks: Vec::new(),
            playing: false,
        }
    }
}

#[derive(Clone, Default)]
pub struct SinkProbe(Arc<Mutex<SinkState>>);

impl SinkProbe {
    pub fn with<R>(&self, f: impl FnOnce(&mut SinkState) -> R) -> R {
        f(&mut lock(&self.0))
    }

    /// First byte of every appended payload, as written by [`Harness::data`].
    pub fn appended_seqs(&self) -> Vec<u8> {
        self.with(|s| s.appended.iter().map(|p| p[0]).collect())
    }

    pub fn notifier(&self) -> SessionNotifier {
        self.with(|s| s.notifier.clone()).expect("sink not attached")
    }
}

pub struct FakeSink {
    probe: SinkProbe,
}

impl FakeSink {
    pub fn new() -> Self {
        Self {
            probe: SinkProbe::default(),
        }
    }

    pub fn probe(&self) -> SinkProbe {
        self.probe.clone()
    }
}

impl MediaSink for FakeSink {
    fn attach(&mut self, notifier: SessionNotifier) {
        self.probe.with(|s| {
            s.notifier = Some(notifier);
            s.attach_count += 1;
            s.ready = ReadyState::Open;
        });
    }

    fn detach(&mut self) {
        self.probe.with(|s| {
            s.notifier = None;
            s.detach_count += 1;
            s.ready = ReadyState::Closed;
            s.has_target = false;
            s.updating = false;
            s.current_time = 0.0;
            s.buffered.clear();
        });
    }

    fn clear_source(&mut self) {
        self.probe.with(|s| s.cleared += 1);
    }

    fn add_append_target(&mut self, codec: &str) -> std::result::Result<(), SinkError> {
        self.probe.with(|s| {
            if s.fail_target || s.ready != ReadyState::Open {
                return Err(SinkError::InvalidState("source not open".to_string()));
            }
            s.has_target = true;
            s.codec = Some(codec.to_string());
            Ok(())
        })
    }

    fn has_append_target(&self) -> bool {
        self.probe.with(|s| s.has_target)
    }

    fn append(&mut self, payload: Bytes) -> std::result::Result<(), SinkError> {
        self.probe.with(|s| {
            if s.updating {
                s.overlaps += 1;
                return Err(SinkError::InvalidState("updating".to_string()));
            }
            if s.reject_next > 0 {
                s.reject_next -= 1;
                return Err(SinkError::QuotaExceeded);
            }
            s.appended.push(payload);
            s.updating = true;
            Ok(())
        })
    }

    fn is_updating(&self) -> bool {
        self.probe.with(|s| s.updating)
    }

    fn ready_state(&self) -> ReadyState {
        self.probe.with(|s| s.ready)
    }

    fn end_of_stream(&mut self) -> std::result::Result<(), SinkError> {
        self.probe.with(|s| {
            s.eos_calls += 1;
            if s.eos_fail_next > 0 {
                s.eos_fail_next -= 1;
                return Err(SinkError::InvalidState("not appendable".to_string()));
            }
            if s.ready != ReadyState::Open || s.updating {
                return Err(SinkError::InvalidState("not appendable".to_string()));
            }
            s.ready = ReadyState::Ended;
            Ok(())
        })
    }

    fn current_time(&self) -> f64 {
        self.probe.with(|s| s.current_time)
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.probe.with(|s| {
            s.seeks.push(seconds);
            s.current_time = seconds;
        });
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.probe.with(|s| s.buffered.clone())
    }

    fn play(&mut self) {
        self.probe.with(|s| s.playing = true);
    }

    fn pause(&mut self) {
        self.probe.with(|s| s.playing = false);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════════════════════════════════════

pub struct ScheduledTimer {
    pub delay: Duration,
    pub kind: TimerKind,
    pub notifier: SessionNotifier,
}

#[derive(Default)]
pub struct TimerState {
    pub pending: Vec<ScheduledTimer>,
    pub cancellations: usize,
}

#[derive(Clone, Default)]
pub struct TimerProbe(Arc<Mutex<TimerState>>);

impl TimerProbe {
    pub fn with<R>(&self, f: impl FnOnce(&mut TimerState) -> R) -> R {
        f(&mut lock(&self.0))
    }

    pub fn pending(&self) -> Vec<(Duration, TimerKind)> {
        self.with(|s| s.pending.iter().map(|t| (t.delay, t.kind)).collect())
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.with(|s| s.pending.iter().any(|t| t.kind == kind))
    }

    /// Removes the oldest pending timer of `kind`.
    pub fn take(&self, kind: TimerKind) -> Option<ScheduledTimer> {
        self.with(|s| {
            let index = s.pending.iter().position(|t| t.kind == kind)?;
            Some(s.pending.remove(index))
        })
    }
}

/// Records timers instead of sleeping; tests fire them explicitly.
pub struct ManualScheduler {
    probe: TimerProbe,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            probe: TimerProbe::default(),
        }
    }

    pub fn probe(&self) -> TimerProbe {
        self.probe.clone()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration, notifier: SessionNotifier, kind: TimerKind) {
        self.probe.with(|s| {
            s.pending.push(ScheduledTimer {
                delay,
                kind,
                notifier,
            })
        });
    }

    fn cancel_all(&mut self) {
        self.probe.with(|s| {
            s.pending.clear();
            s.cancellations += 1;
        });
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════════

pub const SOURCE: &str = "http://media.local/movies/a.mp4?token=abc";

/// A session wired to fakes, with helpers playing the network and the sink.
pub struct Harness {
    pub session: StreamSession,
    pub net: NetProbe,
    pub sink: SinkProbe,
    pub timers: TimerProbe,
    pub events: Receiver<PlayerEvent>,
    rx: SessionEventReceiver,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(VodConfig::default())
    }

    pub fn with_config(config: VodConfig) -> Self {
        let connector = FakeConnector::new();
        let sink = FakeSink::new();
        let scheduler = ManualScheduler::new();
        let (net, sink_probe, timers) = (connector.probe(), sink.probe(), scheduler.probe());
        let (sender, rx) = session_channel();
        let session = StreamSession::new(
            config,
            Box::new(connector),
            Box::new(sink),
            Box::new(scheduler),
            sender,
        );
        let events = session.subscribe();
        Self {
            session,
            net,
            sink: sink_probe,
            timers,
            events,
            rx,
        }
    }

    /// Dispatches every queued event, as the player loop would.
    pub fn pump(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.session.handle_event(event);
        }
    }

    pub fn channel(&mut self, event: ChannelEvent) {
        self.net.last_notifier().post_channel(event);
        self.pump();
    }

    pub fn sink_event(&mut self, event: SinkEvent) {
        self.sink.notifier().post_sink(event);
        self.pump();
    }

    pub fn connect(&mut self) {
        self.channel(ChannelEvent::Connected);
    }

    pub fn open_sink(&mut self) {
        self.sink_event(SinkEvent::SourceOpen);
    }

    /// set_source + play + connection + sink ready: `start` is sent.
    pub fn start_streaming(&mut self) {
        self.session.set_source(SOURCE);
        self.session.play().expect("play");
        self.connect();
        self.open_sink();
    }

    pub fn message(&mut self, message: ServerMessage) {
        self.channel(ChannelEvent::Message(message));
    }

    /// Delivers a chunk whose payload starts with the low byte of `seq`.
    pub fn data(&mut self, seq: u64) {
        self.message(ServerMessage::Data(Segment::new(seq, vec![seq as u8, 0xFF])));
    }

    /// Completes the pending append.
    pub fn update_end(&mut self) {
        self.sink.with(|s| s.updating = false);
        self.sink_event(SinkEvent::UpdateEnd);
    }

    /// Fires the oldest pending timer of `kind`. Returns false if none was
    /// pending.
    pub fn fire(&mut self, kind: TimerKind) -> bool {
        let Some(timer) = self.timers.take(kind) else {
            return false;
        };
        timer.notifier.post_timer(kind);
        self.pump();
        true
    }

    pub fn player_events(&self) -> Vec<PlayerEvent> {
        self.events.try_iter().collect()
    }
}
