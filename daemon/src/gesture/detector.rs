//! Pointer-event gesture detector
//!
//! Pairs each press with its release. A press that travels is judged as a
//! fling; a short, still press is a tap, and two taps close together in
//! time and space make a double tap.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::kinds::{classify_fling, Gesture};

/// Largest travel for a press to still count as a tap
const TAP_SLOP: f32 = 20.0;
/// Longest press that still counts as a tap
const TAP_TIMEOUT_MS: u64 = 500;
/// Longest gap between the first release and the second press
const DOUBLE_TAP_TIMEOUT_MS: u64 = 300;
/// Largest distance between the two taps of a double tap
const DOUBLE_TAP_SLOP: f32 = 100.0;

/// Raw pointer input from the host
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointerEvent {
    Down { x: f32, y: f32, at_ms: u64 },
    Up { x: f32, y: f32, at_ms: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Touch {
    x: f32,
    y: f32,
    at_ms: u64,
}

/// Stateful classifier from pointer events to gestures
#[derive(Debug, Default)]
pub struct GestureDetector {
    /// Press currently held down
    down: Option<Touch>,
    /// Release of the last single tap, waiting for a partner
    last_tap: Option<Touch>,
}

impl GestureDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one pointer event; returns a gesture when one completes
    pub fn feed(&mut self, event: PointerEvent) -> Option<Gesture> {
        match event {
            PointerEvent::Down { x, y, at_ms } => {
                if let Some(tap) = self.last_tap {
                    if at_ms.saturating_sub(tap.at_ms) > DOUBLE_TAP_TIMEOUT_MS {
                        self.last_tap = None;
                    }
                }
                self.down = Some(Touch { x, y, at_ms });
                None
            }
            PointerEvent::Up { x, y, at_ms } => {
                let Some(start) = self.down.take() else {
                    debug!("pointer up without a matching down, ignoring");
                    return None;
                };
                let end = Touch { x, y, at_ms };
                self.on_release(start, end)
            }
        }
    }

    fn on_release(&mut self, start: Touch, end: Touch) -> Option<Gesture> {
        let dx = end.x - start.x;
        let dy = end.y - start.y;
        let held_ms = end.at_ms.saturating_sub(start.at_ms);

        if dx.abs() <= TAP_SLOP && dy.abs() <= TAP_SLOP {
            if held_ms > TAP_TIMEOUT_MS {
                // long press, not part of the vocabulary
                self.last_tap = None;
                return None;
            }
            return self.on_tap(start, end);
        }

        self.last_tap = None;
        let secs = held_ms.max(1) as f32 / 1000.0;
        let gesture = classify_fling(dx, dy, dx / secs, dy / secs);
        debug!(dx, dy, held_ms, ?gesture, "fling classified");
        gesture
    }

    fn on_tap(&mut self, start: Touch, end: Touch) -> Option<Gesture> {
        match self.last_tap.take() {
            Some(prev)
                if start.at_ms.saturating_sub(prev.at_ms) <= DOUBLE_TAP_TIMEOUT_MS
                    && distance(prev, start) <= DOUBLE_TAP_SLOP =>
            {
                Some(Gesture::DoubleTap)
            }
            _ => {
                self.last_tap = Some(end);
                None
            }
        }
    }
}

fn distance(a: Touch, b: Touch) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}
