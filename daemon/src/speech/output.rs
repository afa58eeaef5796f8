//! Speech output port
//!
//! Wraps a text-to-speech engine. Each accepted `speak` produces exactly
//! one `Completion`: finished, failed, or interrupted by a newer `speak`.
//! `stop` is the one exception: it fires nothing and hands the pending
//! continuation back to whoever stopped the speech.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Identifies one `speak` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtteranceId(pub u64);

impl std::fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "utt-{}", self.0)
    }
}

/// Reports from the speech engine, delivered through the event sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEvent {
    /// One-time readiness signal after construction
    Ready,
    /// Utterance played to the end
    Finished(UtteranceId),
    /// Engine reported an error for the utterance
    Failed(UtteranceId),
}

/// Text-to-speech engine behind the port
///
/// `speak` must flush whatever is playing. Completion is reported
/// asynchronously as a `SpeechEvent` carrying the same id.
pub trait SpeechEngine: Send {
    fn speak(&mut self, id: UtteranceId, text: &str);

    /// Cancel playback immediately
    fn stop(&mut self);

    /// Release the engine
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    Finished,
    Failed,
    Interrupted,
}

/// The single completion of an accepted `speak` call
#[derive(Debug)]
pub struct Completion<C> {
    pub id: UtteranceId,
    pub outcome: SpeechOutcome,
    pub then: C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("speech engine has not signalled readiness")]
    NotReady,

    #[error("speech engine is shut down")]
    ShutDown,
}

/// A `speak` call the port refused; the continuation is returned unrun
#[derive(Debug)]
pub struct Rejected<C> {
    pub reason: SpeechError,
    pub then: C,
}

/// Speech output port, generic over the caller's continuation type
pub struct SpeechOutput<C> {
    engine: Box<dyn SpeechEngine>,
    ready: bool,
    shut_down: bool,
    next_id: u64,
    current: Option<(UtteranceId, C)>,
    completed: VecDeque<Completion<C>>,
}

impl<C> SpeechOutput<C> {
    pub fn new(engine: Box<dyn SpeechEngine>) -> Self {
        Self {
            engine,
            ready: false,
            shut_down: false,
            next_id: 1,
            current: None,
            completed: VecDeque::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether an utterance is outstanding
    pub fn is_speaking(&self) -> bool {
        self.current.is_some()
    }

    /// Speak `text`, flushing any utterance still playing
    pub fn speak(&mut self, text: &str, then: C) -> Result<UtteranceId, Rejected<C>> {
        if self.shut_down {
            warn!(text, "speak after shutdown dropped");
            return Err(Rejected { reason: SpeechError::ShutDown, then });
        }
        if !self.ready {
            warn!(text, "speak before engine ready dropped");
            return Err(Rejected { reason: SpeechError::NotReady, then });
        }

        if let Some((old, prev)) = self.current.take() {
            debug!(%old, "utterance interrupted by newer speech");
            self.completed.push_back(Completion {
                id: old,
                outcome: SpeechOutcome::Interrupted,
                then: prev,
            });
        }

        let id = UtteranceId(self.next_id);
        self.next_id += 1;
        debug!(%id, text, "speaking");
        self.engine.speak(id, text);
        self.current = Some((id, then));
        Ok(id)
    }

    /// Cancel playback without firing the pending completion
    pub fn stop(&mut self) -> Option<C> {
        if self.shut_down {
            return None;
        }
        self.engine.stop();
        self.current.take().map(|(id, then)| {
            debug!(%id, "utterance stopped");
            then
        })
    }

    /// Apply an engine report
    pub fn on_engine_event(&mut self, event: SpeechEvent) {
        let (id, outcome) = match event {
            SpeechEvent::Ready => {
                if !self.ready {
                    debug!("speech engine ready");
                }
                self.ready = true;
                return;
            }
            SpeechEvent::Finished(id) => (id, SpeechOutcome::Finished),
            SpeechEvent::Failed(id) => {
                warn!(%id, "speech engine reported an error");
                (id, SpeechOutcome::Failed)
            }
        };

        match self.current.take() {
            Some((current, then)) if current == id => {
                self.completed.push_back(Completion { id, outcome, then });
            }
            other => {
                trace!(%id, "stale speech completion ignored");
                self.current = other;
            }
        }
    }

    /// Next completion waiting to be handled, oldest first
    pub fn take_completed(&mut self) -> Option<Completion<C>> {
        self.completed.pop_front()
    }

    /// Stop and release the engine; later `speak` calls are rejected
    pub fn shutdown(&mut self) -> Option<C> {
        let pending = self.stop();
        self.completed.clear();
        if !self.shut_down {
            self.engine.shutdown();
            self.shut_down = true;
        }
        pending
    }
}
