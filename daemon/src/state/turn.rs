//! Turn state: announce, listen, dispatch

use serde::{Deserialize, Serialize};

/// Where the controller is within the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Not yet activated, or paused by the host
    #[default]
    Idle,
    /// Speaking a prompt; the recognizer is not running
    Announcing,
    /// One recognition attempt is (or is about to be) running
    Listening,
    /// An action holds the single-flight token
    Dispatching,
    /// Resources released; no further transitions
    Terminated,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnState::Idle => write!(f, "Idle"),
            TurnState::Announcing => write!(f, "Announcing"),
            TurnState::Listening => write!(f, "Listening"),
            TurnState::Dispatching => write!(f, "Dispatching"),
            TurnState::Terminated => write!(f, "Terminated"),
        }
    }
}

impl TurnState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: TurnState) -> bool {
        use TurnState::*;

        if *self == Terminated {
            return false;
        }
        matches!(
            (self, target),
            (_, Terminated)
                | (Idle, Announcing)
                | (Announcing, Listening)
                | (Announcing, Dispatching)
                | (Announcing, Idle)
                | (Listening, Announcing)
                | (Listening, Dispatching)
                | (Listening, Idle)
                | (Dispatching, Listening)
                | (Dispatching, Announcing)
                | (Dispatching, Idle)
        )
    }

    /// Whether a trigger may start an action from this state.
    ///
    /// Voice only counts while listening; a touch may also cut an
    /// announcement short.
    pub fn accepts_voice(&self) -> bool {
        *self == TurnState::Listening
    }

    pub fn accepts_gesture(&self) -> bool {
        matches!(self, TurnState::Listening | TurnState::Announcing)
    }
}
