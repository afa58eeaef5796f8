//! Recognizer whose transcripts are injected from outside
//!
//! The control socket plays the role of the microphone: whatever text it
//! delivers resolves the attempt currently listening. Only the most
//! recently created recognizer may open attempts; a destroyed one is
//! inert.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::events::{Event, EventSink};
use crate::speech::{
    AttemptId, RecognitionErrorKind, RecognitionEvent, Recognizer, RecognizerFactory,
};

#[derive(Default)]
struct RelayState {
    generation: u64,
    sink: Option<EventSink>,
    listening: Option<AttemptId>,
}

/// Factory plus the injection handle shared with the control surface
#[derive(Clone, Default)]
pub struct RecognitionRelay {
    state: Arc<Mutex<RelayState>>,
}

impl RecognitionRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_listening(&self) -> bool {
        self.lock().listening.is_some()
    }

    /// Resolve the open attempt with a transcript
    ///
    /// Returns false when no attempt is open.
    pub fn deliver_text(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        self.deliver(|attempt| RecognitionEvent::Result { attempt, text })
    }

    /// Resolve the open attempt with a platform error code
    pub fn deliver_error(&self, code: i32) -> bool {
        let kind = RecognitionErrorKind::from_code(code);
        self.deliver(|attempt| RecognitionEvent::Error { attempt, kind })
    }

    fn deliver(&self, event: impl FnOnce(AttemptId) -> RecognitionEvent) -> bool {
        let mut state = self.lock();
        let (Some(attempt), Some(sink)) = (state.listening.take(), state.sink.clone()) else {
            debug!("nothing is listening, input dropped");
            return false;
        };
        drop(state);
        sink.send(Event::Recognition(event(attempt)))
    }
}

impl RecognizerFactory for RecognitionRelay {
    fn create(&mut self, sink: EventSink) -> Box<dyn Recognizer> {
        let mut state = self.lock();
        state.generation += 1;
        state.sink = Some(sink);
        state.listening = None;
        debug!(generation = state.generation, "relay recognizer created");
        Box::new(RelayRecognizer {
            relay: self.clone(),
            generation: state.generation,
            destroyed: false,
        })
    }
}

struct RelayRecognizer {
    relay: RecognitionRelay,
    generation: u64,
    destroyed: bool,
}

impl RelayRecognizer {
    fn with_current(&self, f: impl FnOnce(&mut RelayState)) {
        if self.destroyed {
            return;
        }
        let mut state = self.relay.lock();
        if state.generation == self.generation {
            f(&mut state);
        }
    }
}

impl Recognizer for RelayRecognizer {
    fn start(&mut self, attempt: AttemptId) {
        self.with_current(|state| state.listening = Some(attempt));
    }

    fn stop(&mut self) {
        self.with_current(|state| state.listening = None);
    }

    fn destroy(&mut self) {
        self.with_current(|state| state.listening = None);
        self.destroyed = true;
    }
}
