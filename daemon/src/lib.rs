//! handsfree: turn-taking voice interaction core
//!
//! An eyes-free interaction loop: announce what the user can do, listen
//! for one spoken command or a touch gesture, run the matching action,
//! then announce or listen again. The capture action photographs a
//! receipt, uploads it for recognition with a bounded retry and reads the
//! total back to the user.
//!
//! Everything that mutates interaction state runs on one serialized
//! context (`controller::TurnController::run`). Speech, recognition,
//! camera and network engines sit behind ports and only post results.

pub mod capture;
pub mod config;
pub mod controller;
pub mod events;
pub mod gesture;
pub mod haptics;
pub mod host;
pub mod ipc;
pub mod lifecycle;
pub mod registry;
pub mod speech;
pub mod state;
pub mod timers;
