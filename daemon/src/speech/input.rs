//! Speech input port
//!
//! Wraps a one-shot recognizer. `restart` always destroys the engine and
//! builds a fresh one before listening again: re-listening on an engine
//! that has already produced a result is unreliable (it can get stuck), so
//! a bare re-listen is never used as a recovery path.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::events::EventSink;

/// Identifies one recognition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub u64);

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listen-{}", self.0)
    }
}

/// Engine-reported recognition failures; always recoverable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionErrorKind {
    NetworkTimeout,
    Network,
    Audio,
    Server,
    Client,
    SpeechTimeout,
    NoMatch,
    RecognizerBusy,
    InsufficientPermissions,
    Other(i32),
}

impl RecognitionErrorKind {
    /// Map a platform recognizer error code
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::NetworkTimeout,
            2 => Self::Network,
            3 => Self::Audio,
            4 => Self::Server,
            5 => Self::Client,
            6 => Self::SpeechTimeout,
            7 => Self::NoMatch,
            8 => Self::RecognizerBusy,
            9 => Self::InsufficientPermissions,
            other => Self::Other(other),
        }
    }
}

/// Reports from a recognizer, delivered through the event sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Result { attempt: AttemptId, text: String },
    Error { attempt: AttemptId, kind: RecognitionErrorKind },
}

impl RecognitionEvent {
    pub fn attempt(&self) -> AttemptId {
        match self {
            RecognitionEvent::Result { attempt, .. } | RecognitionEvent::Error { attempt, .. } => {
                *attempt
            }
        }
    }
}

/// Resolved outcome of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Text(String),
    Error(RecognitionErrorKind),
}

/// One recognition engine instance
pub trait Recognizer: Send {
    /// Begin one attempt; the outcome is reported with this id
    fn start(&mut self, attempt: AttemptId);

    /// Cancel the running attempt, if any
    fn stop(&mut self);

    /// Release the engine; it is never used again
    fn destroy(&mut self);
}

/// Builds recognizers; called once per `restart`
pub trait RecognizerFactory: Send {
    fn create(&mut self, sink: EventSink) -> Box<dyn Recognizer>;
}

/// Speech input port
pub struct SpeechInput {
    factory: Box<dyn RecognizerFactory>,
    sink: EventSink,
    engine: Option<Box<dyn Recognizer>>,
    active: Option<AttemptId>,
    next_attempt: u64,
    rebuilds: u64,
    torn_down: bool,
}

impl SpeechInput {
    pub fn new(factory: Box<dyn RecognizerFactory>, sink: EventSink) -> Self {
        Self {
            factory,
            sink,
            engine: None,
            active: None,
            next_attempt: 1,
            rebuilds: 0,
            torn_down: false,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.active.is_some()
    }

    /// Number of engines built by `restart`
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Begin exactly one recognition attempt
    pub fn listen(&mut self) -> Option<AttemptId> {
        if self.torn_down {
            warn!("listen after teardown dropped");
            return None;
        }
        if let Some(active) = self.active {
            debug!(%active, "already listening");
            return None;
        }
        if self.engine.is_none() {
            self.engine = Some(self.factory.create(self.sink.clone()));
        }
        Some(self.start_attempt())
    }

    /// Destroy the engine, build a new one, then listen
    pub fn restart(&mut self) -> Option<AttemptId> {
        if self.torn_down {
            warn!("restart after teardown dropped");
            return None;
        }
        self.active = None;
        if let Some(mut old) = self.engine.take() {
            old.destroy();
        }
        self.engine = Some(self.factory.create(self.sink.clone()));
        self.rebuilds += 1;
        debug!(rebuilds = self.rebuilds, "recognizer rebuilt");
        Some(self.start_attempt())
    }

    /// Cancel the running attempt; its late result is treated as stale
    pub fn stop(&mut self) {
        if let Some(attempt) = self.active.take() {
            debug!(%attempt, "listening stopped");
            if let Some(engine) = self.engine.as_mut() {
                engine.stop();
            }
        }
    }

    /// Resolve an engine report into the attempt's single outcome
    pub fn resolve(&mut self, event: RecognitionEvent) -> Option<Recognition> {
        let attempt = event.attempt();
        if self.active != Some(attempt) {
            trace!(%attempt, "stale recognition report ignored");
            return None;
        }
        self.active = None;

        Some(match event {
            RecognitionEvent::Result { text, .. } if text.trim().is_empty() => {
                Recognition::Error(RecognitionErrorKind::NoMatch)
            }
            RecognitionEvent::Result { text, .. } => Recognition::Text(text),
            RecognitionEvent::Error { kind, .. } => Recognition::Error(kind),
        })
    }

    /// Release the engine for good
    pub fn teardown(&mut self) {
        self.stop();
        if let Some(mut engine) = self.engine.take() {
            engine.destroy();
            info!("recognizer released");
        }
        self.torn_down = true;
    }

    fn start_attempt(&mut self) -> AttemptId {
        let attempt = AttemptId(self.next_attempt);
        self.next_attempt += 1;
        if let Some(engine) = self.engine.as_mut() {
            engine.start(attempt);
        }
        self.active = Some(attempt);
        debug!(%attempt, "listening");
        attempt
    }
}
