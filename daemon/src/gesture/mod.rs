//! Gesture module for discrete touch input
//!
//! Classifies raw pointer presses into swipes and double taps, which the
//! turn controller resolves exactly like voice commands.

mod detector;
mod kinds;

pub use detector::{GestureDetector, PointerEvent};
pub use kinds::{classify_fling, Gesture, SWIPE_DISTANCE_THRESHOLD, SWIPE_VELOCITY_THRESHOLD};
