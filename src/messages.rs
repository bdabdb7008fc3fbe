// Message types published by the runtime

use serde::{Deserialize, Serialize};

use crate::device::{DeviceState, Uid};

// Device state snapshot, runtime -> telemetry subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySnapshot {
    pub uid: Option<String>,
    pub motors: [i8; 2],
    pub directions: [i8; 2],
    pub leds: [u8; 4],
    pub distances: [u8; 2],
    pub battery_level: u8,
    pub mode: u8,
}

impl TelemetrySnapshot {
    pub fn new(state: &DeviceState, uid: Option<Uid>) -> Self {
        Self {
            uid: uid.map(|uid| uid.to_string()),
            motors: state.motor_speeds(),
            directions: [
                state.motors[0].direction().as_i8(),
                state.motors[1].direction().as_i8(),
            ],
            leds: state.led_colors(),
            distances: state.distances(),
            battery_level: state.battery_level,
            mode: state.mode,
        }
    }
}

/// Link health published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LinkHealth {
    Ok,
    Stale,
}
