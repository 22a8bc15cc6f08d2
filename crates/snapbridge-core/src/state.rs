//! Thread-safe printer state snapshot.
//!
//! [`StateData`] is a plain value type safe to copy and hand out without
//! synchronization; [`State`] is its lock-guarded container. The state
//! poller is the only writer, the Moonraker layer reads snapshots.

use parking_lot::RwLock;
use serde::Serialize;

/// Printer state values without synchronization. Safe to copy by value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateData {
    /// Whether a SACP connection to the printer is active.
    pub connected: bool,
    /// One of "idle", "printing", "paused", "error".
    pub printer_state: String,

    // Temperatures
    pub extruder0_temp: f64,
    pub extruder0_target: f64,
    pub extruder1_temp: f64,
    pub extruder1_target: f64,
    pub bed_temp: f64,
    pub bed_target: f64,

    // Position
    pub x: f64,
    pub y: f64,
    pub z: f64,

    // Print progress
    /// Fraction complete, 0.0 - 1.0.
    pub print_progress: f64,
    pub print_file_name: String,
    /// Elapsed print time in seconds.
    pub print_duration: f64,
    /// Gcode line currently being executed.
    pub current_line: u32,

    /// Axes that have been homed, e.g. "xyz". Empty when unhomed.
    pub homed_axes: String,

    /// 1.0 = 100%.
    pub speed_factor: f64,
    /// 1.0 = 100%.
    pub extrude_factor: f64,

    /// Part fan speed, 0.0 - 1.0.
    pub fan_speed: f64,
}

impl Default for StateData {
    fn default() -> Self {
        Self {
            connected: false,
            printer_state: "idle".to_string(),
            extruder0_temp: 0.0,
            extruder0_target: 0.0,
            extruder1_temp: 0.0,
            extruder1_target: 0.0,
            bed_temp: 0.0,
            bed_target: 0.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            print_progress: 0.0,
            print_file_name: String::new(),
            print_duration: 0.0,
            current_line: 0,
            homed_axes: String::new(),
            speed_factor: 1.0,
            extrude_factor: 1.0,
            fan_speed: 0.0,
        }
    }
}

/// Provides thread-safe access to [`StateData`].
#[derive(Debug, Default)]
pub struct State {
    data: RwLock<StateData>,
}

impl State {
    /// Create a default state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of the current state data.
    pub fn snapshot(&self) -> StateData {
        self.data.read().clone()
    }

    /// Mutate the state under the write lock.
    pub fn update<F: FnOnce(&mut StateData)>(&self, f: F) {
        f(&mut self.data.write());
    }
}
