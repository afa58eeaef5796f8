//! Upload response classification
//!
//! Response schema: `{ success: bool, data: { total_price: string }, error: string }`.
//! A price that is empty or the literal "0" counts as absent.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ports::{CaptureError, EncodeError};

/// Result of one upload attempt, after classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadOutcome {
    Success { total_price: String },
    /// Parsed fine, but the price is absent or zero
    ContentMissing,
    /// The server could not read any text from the image
    RecognitionFailed,
    /// Non-2xx, malformed, or unsuccessful without a recognition marker
    ServerError { code: u16 },
    /// No response at all
    TransportError,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success { .. })
    }
}

/// How a capture session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum SessionOutcome {
    CaptureFailed { error: CaptureError },
    EncodeFailed { error: EncodeError },
    Uploaded { outcome: UploadOutcome },
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Uploaded { outcome } if outcome.is_success())
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::CaptureFailed { error } => write!(f, "capture failed: {}", error),
            SessionOutcome::EncodeFailed { error } => write!(f, "encode failed: {}", error),
            SessionOutcome::Uploaded { outcome } => match outcome {
                UploadOutcome::Success { total_price } => write!(f, "total {}", total_price),
                UploadOutcome::ContentMissing => write!(f, "content missing"),
                UploadOutcome::RecognitionFailed => write!(f, "recognition failed"),
                UploadOutcome::ServerError { code } => write!(f, "server error {}", code),
                UploadOutcome::TransportError => write!(f, "transport error"),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<ReceiptData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReceiptData {
    #[serde(default)]
    total_price: Option<serde_json::Value>,
}

impl ReceiptData {
    fn price(&self) -> Option<String> {
        let price = match self.total_price.as_ref()? {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        if price.is_empty() || price == "0" {
            None
        } else {
            Some(price)
        }
    }
}

/// Classify a received response
///
/// A body that reports the recognition marker is terminal even behind a
/// non-2xx status: sending the same image again cannot change what the
/// server reads from it.
pub fn classify_response(status: u16, body: &str, recognition_marker: &str) -> UploadOutcome {
    let parsed = serde_json::from_str::<ResponseBody>(body).ok();
    let marker = recognition_marker.to_lowercase();

    if let Some(body) = &parsed {
        let flagged = body
            .error
            .as_deref()
            .is_some_and(|e| !marker.is_empty() && e.to_lowercase().contains(&marker));
        if !body.success && flagged {
            return UploadOutcome::RecognitionFailed;
        }
    }

    if !(200..300).contains(&status) {
        return UploadOutcome::ServerError { code: status };
    }

    match parsed {
        None => {
            debug!(status, "response body is not the expected JSON");
            UploadOutcome::ServerError { code: status }
        }
        Some(body) if !body.success => UploadOutcome::ServerError { code: status },
        Some(body) => match body.data.as_ref().and_then(ReceiptData::price) {
            Some(total_price) => UploadOutcome::Success { total_price },
            None => UploadOutcome::ContentMissing,
        },
    }
}
