//! Gesture vocabulary and the swipe rule

use serde::{Deserialize, Serialize};

/// Minimum travel, in distance units, for a fling to count as a swipe
pub const SWIPE_DISTANCE_THRESHOLD: f32 = 100.0;

/// Minimum speed, in units per second, for a fling to count as a swipe
pub const SWIPE_VELOCITY_THRESHOLD: f32 = 100.0;

/// Discrete gestures the controller understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    SwipeLeft,
    SwipeRight,
    SwipeUp,
    SwipeDown,
    DoubleTap,
}

impl std::fmt::Display for Gesture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gesture::SwipeLeft => write!(f, "swipe_left"),
            Gesture::SwipeRight => write!(f, "swipe_right"),
            Gesture::SwipeUp => write!(f, "swipe_up"),
            Gesture::SwipeDown => write!(f, "swipe_down"),
            Gesture::DoubleTap => write!(f, "double_tap"),
        }
    }
}

/// Classify a fling by displacement and velocity.
///
/// The axis is whichever displacement is larger in magnitude; along that
/// axis both the distance and the speed must exceed their thresholds.
/// Screen coordinates grow downwards, so a negative `dy` is a swipe up.
pub fn classify_fling(dx: f32, dy: f32, vx: f32, vy: f32) -> Option<Gesture> {
    if dx.abs() > dy.abs() {
        if dx.abs() > SWIPE_DISTANCE_THRESHOLD && vx.abs() > SWIPE_VELOCITY_THRESHOLD {
            return Some(if dx > 0.0 {
                Gesture::SwipeRight
            } else {
                Gesture::SwipeLeft
            });
        }
    } else if dy.abs() > SWIPE_DISTANCE_THRESHOLD && vy.abs() > SWIPE_VELOCITY_THRESHOLD {
        return Some(if dy > 0.0 {
            Gesture::SwipeDown
        } else {
            Gesture::SwipeUp
        });
    }
    None
}
