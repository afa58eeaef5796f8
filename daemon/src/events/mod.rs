//! Events module
//!
//! Two directions of traffic:
//! - `Event`: everything that can change controller state. Host hooks,
//!   engine callbacks, I/O results and timer fires are all funnelled
//!   through an `EventSink` onto the controller's single inbox.
//! - `TurnEvent`: notifications the controller broadcasts to observers.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::capture::{CaptureEvent, SessionOutcome};
use crate::gesture::{Gesture, PointerEvent};
use crate::lifecycle::HostCommand;
use crate::registry::{ActionId, Trigger};
use crate::speech::{RecognitionEvent, SpeechEvent};
use crate::state::{CaptureState, TurnState};
use crate::timers::TimerFired;

/// Input to the controller's serialized context
#[derive(Debug)]
pub enum Event {
    Host(HostCommand),
    Speech(SpeechEvent),
    Recognition(RecognitionEvent),
    Pointer(PointerEvent),
    Gesture(Gesture),
    Capture(CaptureEvent),
    Timer(TimerFired),
}

/// Cloneable handle onto the controller inbox
///
/// The inbox is unbounded: the controller posts to it from inside its own
/// loop (timers, spawned I/O) and must never block on itself.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiver the controller runs on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Post an event; returns false once the controller has stopped
    pub fn send(&self, event: Event) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                warn!(?event, "controller inbox closed, event dropped");
                false
            }
        }
    }

    pub fn activate(&self) -> bool {
        self.send(Event::Host(HostCommand::Activate))
    }

    pub fn deactivate(&self) -> bool {
        self.send(Event::Host(HostCommand::Deactivate))
    }

    pub fn activate_resume(&self) -> bool {
        self.send(Event::Host(HostCommand::Resume))
    }

    pub fn teardown(&self) -> bool {
        self.send(Event::Host(HostCommand::Teardown))
    }

    pub fn gesture(&self, gesture: Gesture) -> bool {
        self.send(Event::Gesture(gesture))
    }

    pub fn pointer(&self, event: PointerEvent) -> bool {
        self.send(Event::Pointer(event))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Why a trigger did not start an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Another action holds the single-flight token
    Busy,
    /// The turn is not in a state that takes this kind of input
    NotListening,
}

/// Notifications broadcast by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    StateChanged { from: TurnState, to: TurnState },

    /// A trigger matched and took the single-flight token
    ActionDispatched { action: ActionId, trigger: Trigger },

    /// A matching trigger arrived while the turn could not take it
    TriggerRejected { trigger: Trigger, reason: RejectReason },

    /// A transcript matched no command
    NotUnderstood { transcript: String },

    /// A handoff action finished its confirmation; the host takes over
    Handoff { action: ActionId },

    CaptureStateChanged { session: Uuid, state: CaptureState },

    UploadAttempt { session: Uuid, attempt: u32 },

    /// The session spoke its outcome and handed control back
    SessionFinished { session: Uuid, outcome: SessionOutcome },

    /// The session ended without a report (host paused or torn down)
    SessionAborted { session: Uuid },

    Terminated,
}

impl std::fmt::Display for TurnEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnEvent::StateChanged { from, to } => write!(f, "STATE {} -> {}", from, to),
            TurnEvent::ActionDispatched { action, .. } => write!(f, "ACTION_DISPATCHED ({})", action),
            TurnEvent::TriggerRejected { reason, .. } => write!(f, "TRIGGER_REJECTED ({:?})", reason),
            TurnEvent::NotUnderstood { .. } => write!(f, "NOT_UNDERSTOOD"),
            TurnEvent::Handoff { action } => write!(f, "HANDOFF ({})", action),
            TurnEvent::CaptureStateChanged { state, .. } => write!(f, "CAPTURE {}", state),
            TurnEvent::UploadAttempt { attempt, .. } => write!(f, "UPLOAD_ATTEMPT ({})", attempt),
            TurnEvent::SessionFinished { outcome, .. } => write!(f, "SESSION_FINISHED ({})", outcome),
            TurnEvent::SessionAborted { .. } => write!(f, "SESSION_ABORTED"),
            TurnEvent::Terminated => write!(f, "TERMINATED"),
        }
    }
}
