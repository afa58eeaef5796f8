//! Haptic feedback port
//!
//! Fire-and-forget; a missing or failing vibrator never affects the turn.

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pulse {
    Short,
    Long,
}

pub trait Haptics: Send {
    fn short_pulse(&mut self);
    fn long_pulse(&mut self);

    fn pulse(&mut self, pulse: Pulse) {
        match pulse {
            Pulse::Short => self.short_pulse(),
            Pulse::Long => self.long_pulse(),
        }
    }
}

/// Haptics for hosts without a vibrator: pulses only show up in the log
#[derive(Debug, Default)]
pub struct LogHaptics;

impl Haptics for LogHaptics {
    fn short_pulse(&mut self) {
        debug!(pulse = "short", "haptic pulse");
    }

    fn long_pulse(&mut self) {
        debug!(pulse = "long", "haptic pulse");
    }
}
