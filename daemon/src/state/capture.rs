//! Capture session state

use serde::{Deserialize, Serialize};

/// Progress of one capture-and-upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaptureState {
    #[default]
    Idle,
    /// Countdown notice playing, or the settle delay before the shutter
    Announcing,
    Capturing,
    Encoding,
    /// Waiting on the given upload attempt (1-based)
    Uploading { attempt: u32 },
    /// Speaking the final outcome
    Reporting,
    Done,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "Idle"),
            CaptureState::Announcing => write!(f, "Announcing"),
            CaptureState::Capturing => write!(f, "Capturing"),
            CaptureState::Encoding => write!(f, "Encoding"),
            CaptureState::Uploading { attempt } => write!(f, "Uploading({})", attempt),
            CaptureState::Reporting => write!(f, "Reporting"),
            CaptureState::Done => write!(f, "Done"),
        }
    }
}

impl CaptureState {
    /// Returns whether a transition from `self` to `target` is valid.
    ///
    /// Any live state may jump to `Reporting` (terminal failure) or to
    /// `Done` (aborted by the host).
    pub fn can_transition_to(&self, target: CaptureState) -> bool {
        use CaptureState::*;

        match (self, target) {
            (Done, _) => false,
            (Reporting, Done) => true,
            (Reporting, _) => false,
            (_, Done) | (_, Reporting) => *self != Idle,
            (Idle, Announcing) => true,
            (Announcing, Capturing) => true,
            (Capturing, Encoding) => true,
            (Encoding, Uploading { attempt: 1 }) => true,
            (Uploading { attempt: a }, Uploading { attempt: b }) => b == a + 1,
            _ => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        *self == CaptureState::Done
    }
}
