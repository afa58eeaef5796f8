//! Speech ports
//!
//! The controller never talks to a speech or recognition engine directly.
//! It goes through two ports that enforce the turn-taking contract:
//! - `SpeechOutput`: readiness gate, flush-on-speak, exactly-once completion
//! - `SpeechInput`: one attempt at a time, restart as destroy+recreate+listen

mod input;
mod output;

pub use input::{
    AttemptId, Recognition, RecognitionErrorKind, RecognitionEvent, Recognizer,
    RecognizerFactory, SpeechInput,
};
pub use output::{
    Completion, Rejected, SpeechEngine, SpeechError, SpeechEvent, SpeechOutcome, SpeechOutput,
    UtteranceId,
};
