//! Reference adapters for running the core as a daemon
//!
//! They stand in for device engines: speech is written to the log, the
//! camera reads an image file and transcripts arrive over the control
//! socket.

mod camera;
mod recognizer;
mod speech;

pub use camera::FileCamera;
pub use recognizer::RecognitionRelay;
pub use speech::LoggingSpeech;
