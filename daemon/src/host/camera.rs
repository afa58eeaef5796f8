//! Camera backed by an image file

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::capture::{CameraCapture, CaptureError, Frame, FrameFormat};

/// Serves the same still on every capture
#[derive(Debug, Clone)]
pub struct FileCamera {
    path: Option<PathBuf>,
}

impl FileCamera {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl CameraCapture for FileCamera {
    async fn capture_still(&self) -> Result<Frame, CaptureError> {
        let path = self.path.as_ref().ok_or(CaptureError::EngineNotReady)?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CaptureError::CaptureFailed(format!("{}: {}", path.display(), e)))?;

        if !bytes.starts_with(&[0xFF, 0xD8]) {
            return Err(CaptureError::DecodeFailed(format!(
                "{} is not a JPEG image",
                path.display()
            )));
        }
        debug!(path = %path.display(), bytes = bytes.len(), "still captured");
        Ok(Frame {
            format: FrameFormat::Jpeg,
            bytes,
        })
    }
}
