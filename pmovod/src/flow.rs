//! Flow control: when to append the next segment, when to throttle the server.

use tracing::debug;

use crate::protocol::ClientMessage;
use crate::queue::SegmentQueue;

/// Buffered bounds in absolute-timeline seconds.
///
/// Only the first buffered range of the sink is mapped; `segment_count` is
/// the number of ranges the sink reports.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
    pub segment_count: usize,
}

impl BufferedRange {
    pub fn is_empty(&self) -> bool {
        self.segment_count == 0
    }

    /// Strictly inside `(start, end)`.
    pub fn contains(&self, position: f64) -> bool {
        !self.is_empty() && position > self.start && position < self.end
    }
}

/// Snapshot of the session timeline used for append decisions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackWindow {
    pub offset: f64,
    pub speed: f64,
    /// 0 while unknown
    pub duration: f64,
    pub position: f64,
    pub buffered: BufferedRange,
}

impl PlaybackWindow {
    /// One second of media at the current speed.
    pub fn margin(&self) -> f64 {
        self.speed
    }
}

/// Gate in front of the sink plus the edge-triggered `pause`/`continue`
/// signalling towards the server.
#[derive(Debug)]
pub struct FlowController {
    high_water_mark: usize,
    paused: bool,
}

impl FlowController {
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            high_water_mark,
            paused: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn reset(&mut self) {
        self.paused = false;
    }

    /// Décide si le segment de tête peut être ajouté maintenant.
    ///
    /// Refuse quand le buffer commence après l'offset de la session et que la
    /// lecture n'a pas encore atteint le milieu de la fenêtre bufferisée, ou
    /// quand la fin du buffer est à moins d'une seconde (à la vitesse
    /// courante) de la durée totale. Dans ce dernier cas, si la position de
    /// lecture est elle aussi dans cette marge, la file est vidée : la fin
    /// du flux est imminente.
    pub fn should_append_next(&self, window: &PlaybackWindow, queue: &mut SegmentQueue) -> bool {
        let mut approve = true;
        let buffered = &window.buffered;
        let margin = window.margin();

        if buffered.start > window.offset && window.position < (buffered.start + buffered.end) / 2.0
        {
            debug!(
                "Append deferred: position {:.3} before buffered midpoint [{:.3}, {:.3}]",
                window.position, buffered.start, buffered.end
            );
            approve = false;
        }

        if window.duration > 0.0 && window.duration - buffered.end <= margin {
            debug!("Buffer full (duration {:.3})", window.duration);
            approve = false;
            if window.duration - window.position <= margin {
                debug!(
                    depth = queue.len(),
                    "End of stream imminent, dropping pending segments"
                );
                queue.clear();
            }
        }

        approve
    }

    /// Returns the message to send upstream when the queue depth crosses the
    /// high-water mark, in either direction.
    pub fn update(&mut self, depth: usize) -> Option<ClientMessage> {
        if depth > self.high_water_mark {
            if !self.paused {
                self.paused = true;
                debug!(depth, hwm = self.high_water_mark, "Queue above high-water mark, pausing");
                return Some(ClientMessage::Pause);
            }
        } else if self.paused {
            self.paused = false;
            debug!(depth, hwm = self.high_water_mark, "Queue drained, continuing");
            return Some(ClientMessage::Continue);
        }
        None
    }
}
