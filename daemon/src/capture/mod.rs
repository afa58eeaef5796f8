//! Capture and upload
//!
//! A capture action runs as a session: countdown notice, still capture,
//! encoding, upload with a bounded retry, response classification and a
//! spoken report. The pipeline itself is a pure state machine; the
//! controller executes the steps it asks for and feeds results back.

mod http;
mod outcome;
mod pipeline;
mod ports;
mod retry;

pub use http::HttpUploadTransport;
pub use outcome::{classify_response, SessionOutcome, UploadOutcome};
pub use pipeline::{CaptureEvent, CapturePipeline, CaptureSession, Cue, PipelineSettings, Step};
pub use ports::{
    CameraCapture, CaptureError, EncodeError, Frame, FrameFormat, ImageEncoder, JpegPassthrough,
    Payload, TransportError, UploadResponse, UploadTransport,
};
pub use retry::{is_retryable, RetryPolicy, Verdict};
