//! Signal handling for the reference daemon
//!
//! SIGUSR1 pauses the interaction, SIGUSR2 resumes it, and SIGTERM or
//! SIGINT tear it down.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

use super::HostCommand;

/// Maps process signals onto lifecycle hooks
pub struct LifecycleSignals {
    sigterm: Signal,
    sigint: Signal,
    sigusr1: Signal,
    sigusr2: Signal,
}

impl LifecycleSignals {
    /// Register the signal handlers
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sigusr1: signal(SignalKind::user_defined1())?,
            sigusr2: signal(SignalKind::user_defined2())?,
        })
    }

    /// Wait for the next signal and translate it
    pub async fn next(&mut self) -> HostCommand {
        tokio::select! {
            _ = self.sigterm.recv() => {
                debug!("received SIGTERM");
                HostCommand::Teardown
            }
            _ = self.sigint.recv() => {
                debug!("received SIGINT");
                HostCommand::Teardown
            }
            _ = self.sigusr1.recv() => {
                debug!("received SIGUSR1");
                HostCommand::Deactivate
            }
            _ = self.sigusr2.recv() => {
                debug!("received SIGUSR2");
                HostCommand::Resume
            }
        }
    }
}
