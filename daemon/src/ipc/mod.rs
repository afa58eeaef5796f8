//! IPC module for host-daemon communication
//!
//! The control socket is how a host (or a developer shell) drives the
//! reference daemon: lifecycle hooks, touch input, transcripts and status.

mod protocol;
mod server;

pub use protocol::{DaemonStatus, Request, Response};
pub use server::Server;
