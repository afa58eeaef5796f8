//! Host lifecycle
//!
//! The core has no dependency on any host lifecycle model. A host reports
//! foreground/background/destroy through four hooks, and the reference
//! daemon derives them from process signals.

mod signals;

use serde::{Deserialize, Serialize};

pub use signals::LifecycleSignals;

/// Lifecycle hooks the host must call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostCommand {
    /// Output and input subsystems are up; start the first turn
    Activate,
    /// Host moved to the background
    Deactivate,
    /// Host returned to the foreground
    Resume,
    /// Host is going away; release everything
    Teardown,
}

impl std::fmt::Display for HostCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostCommand::Activate => write!(f, "activate"),
            HostCommand::Deactivate => write!(f, "deactivate"),
            HostCommand::Resume => write!(f, "resume"),
            HostCommand::Teardown => write!(f, "teardown"),
        }
    }
}
