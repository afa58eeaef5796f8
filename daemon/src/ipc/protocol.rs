//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::capture::SessionOutcome;
use crate::events::TurnEvent;
use crate::gesture::{Gesture, PointerEvent};
use crate::lifecycle::HostCommand;
use crate::registry::ActionId;
use crate::state::{CaptureState, TurnState};

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from a host to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Forward a host lifecycle hook
    Lifecycle { hook: HostCommand },

    /// An already classified gesture
    Gesture { gesture: Gesture },

    /// Raw touch input for the gesture detector
    Pointer { event: PointerEvent },

    /// Transcript for the recognition attempt in progress
    Utterance { text: String },

    /// Recognizer failure code for the attempt in progress
    RecognitionError { code: i32 },
}

/// Responses from daemon to host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Input was handed to the controller
    Accepted,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    pub turn_state: TurnState,

    /// Stage of the live capture session, if any
    pub capture_state: Option<CaptureState>,

    /// Action holding the single-flight token
    pub in_flight: Option<ActionId>,

    pub last_outcome: Option<SessionOutcome>,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            turn_state: TurnState::default(),
            capture_state: None,
            in_flight: None,
            last_outcome: None,
            uptime_secs: 0,
        }
    }
}

impl DaemonStatus {
    /// Fold a controller notification into the snapshot
    pub fn apply(&mut self, event: &TurnEvent) {
        match event {
            TurnEvent::StateChanged { from, to } => {
                self.turn_state = *to;
                if *from == TurnState::Dispatching {
                    self.in_flight = None;
                }
            }
            TurnEvent::ActionDispatched { action, .. } => self.in_flight = Some(action.clone()),
            TurnEvent::CaptureStateChanged { state, .. } => {
                self.capture_state = (!state.is_finished()).then_some(*state);
            }
            TurnEvent::SessionFinished { outcome, .. } => {
                self.capture_state = None;
                self.last_outcome = Some(outcome.clone());
            }
            TurnEvent::SessionAborted { .. } => self.capture_state = None,
            TurnEvent::Terminated => {
                self.turn_state = TurnState::Terminated;
                self.capture_state = None;
                self.in_flight = None;
            }
            TurnEvent::TriggerRejected { .. }
            | TurnEvent::NotUnderstood { .. }
            | TurnEvent::Handoff { .. }
            | TurnEvent::UploadAttempt { .. } => {}
        }
    }
}
