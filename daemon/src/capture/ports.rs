//! External collaborators of the capture pipeline
//!
//! Camera and upload run off the controller's context; only their results
//! come back in. Encoding is CPU work and runs on the blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Encoded image, shared by every upload attempt of a session
pub type Payload = Arc<[u8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum FrameFormat {
    Jpeg,
    Yuv420 { width: u32, height: u32 },
}

/// Raw still frame from the camera
#[derive(Clone)]
pub struct Frame {
    pub format: FrameFormat,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CaptureError {
    #[error("camera is not ready")]
    EngineNotReady,

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("captured frame could not be decoded: {0}")]
    DecodeFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EncodeError {
    #[error("unsupported frame format: {0}")]
    UnsupportedFormat(String),

    #[error("frame data is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("upload failed: {0}")]
    Io(String),

    #[error("upload timed out")]
    Timeout,
}

/// What the server sent back, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait CameraCapture: Send + Sync {
    async fn capture_still(&self) -> Result<Frame, CaptureError>;
}

pub trait ImageEncoder: Send + Sync {
    fn encode(&self, frame: Frame) -> Result<Vec<u8>, EncodeError>;
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn post(&self, payload: Payload) -> Result<UploadResponse, TransportError>;
}

/// Accepts frames the camera already delivers as JPEG
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegPassthrough;

impl ImageEncoder for JpegPassthrough {
    fn encode(&self, frame: Frame) -> Result<Vec<u8>, EncodeError> {
        match frame.format {
            FrameFormat::Jpeg => {
                let bytes = frame.bytes;
                if bytes.len() < 4 || bytes[..2] != [0xFF, 0xD8] {
                    return Err(EncodeError::Corrupt("missing JPEG start marker".into()));
                }
                if bytes[bytes.len() - 2..] != [0xFF, 0xD9] {
                    return Err(EncodeError::Corrupt("missing JPEG end marker".into()));
                }
                Ok(bytes)
            }
            FrameFormat::Yuv420 { width, height } => Err(EncodeError::UnsupportedFormat(format!(
                "yuv420 {}x{}",
                width, height
            ))),
        }
    }
}
