//! Cancellable timers for the controller
//!
//! At most one timer per kind is armed. A fire is posted to the inbox with
//! the generation it was armed with; once the timer is cancelled or
//! re-armed that generation is forgotten, so a fire already sitting in the
//! inbox is recognized as stale.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::events::{Event, EventSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Settle time between the intro ending and the recognizer starting
    ListenDelay,
    /// Gap between the countdown notice and the shutter
    CaptureCountdown,
    /// "Please wait" notice while an upload is outstanding
    WaitNotice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

pub struct Timers {
    sink: EventSink,
    next_generation: u64,
    armed: HashMap<TimerKind, (u64, JoinHandle<()>)>,
}

impl Timers {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            next_generation: 1,
            armed: HashMap::new(),
        }
    }

    /// Arm `kind`, replacing any timer of the same kind
    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.cancel(kind);

        let generation = self.next_generation;
        self.next_generation += 1;

        let sink = self.sink.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            sink.send(Event::Timer(TimerFired { kind, generation }));
        });
        trace!(?kind, generation, ?after, "timer armed");
        self.armed.insert(kind, (generation, handle));
    }

    /// Disarm `kind`; returns whether it was armed
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.armed.remove(&kind) {
            Some((generation, handle)) => {
                handle.abort();
                trace!(?kind, generation, "timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.armed.drain() {
            handle.abort();
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    /// Accept a fire if it belongs to the currently armed generation
    pub fn take_fired(&mut self, fired: TimerFired) -> bool {
        match self.armed.get(&fired.kind) {
            Some((generation, _)) if *generation == fired.generation => {
                self.armed.remove(&fired.kind);
                true
            }
            _ => {
                trace!(?fired, "stale timer fire ignored");
                false
            }
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
