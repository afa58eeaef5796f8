//! State enums for the turn controller and the capture pipeline
//!
//! Both are explicit enums with a transition table, so the order of
//! operations is checked instead of inferred from flag timing:
//! - TurnState: Idle, Announcing, Listening, Dispatching, Terminated
//! - CaptureState: Idle through Uploading(attempt) to Done

mod capture;
mod turn;

pub use capture::CaptureState;
pub use turn::TurnState;
