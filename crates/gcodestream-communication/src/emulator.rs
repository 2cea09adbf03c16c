//! Emulated printer
//!
//! A Marlin-like printer simulated in memory. It tracks position, positioning
//! modes, the active tool and heater temperatures, answers `M114`, `M105` and
//! `M119` (with a filament runout switch), and acknowledges every line with
//! `ok`. Used for dry runs and tests.

use crate::connection::Connection;
use gcodestream_core::{
    command, first_number_after, format_number, strip_comment, thread_safe, ConnectionError,
    PrinterMove, Result, ThreadSafe,
};
use glam::DVec3;
use std::collections::VecDeque;

/// Room temperature the heaters start at (°C)
const AMBIENT: f64 = 20.0;

/// Observable state of the emulated printer
#[derive(Debug, Clone)]
pub struct EmulatorState {
    /// Absolute position in the printer's coordinate frame
    pub position: PrinterMove,
    /// Relative XYZ positioning (`G91`)
    pub relative_xyz: bool,
    /// Relative extrusion (`G91` / `M83`)
    pub relative_e: bool,
    /// Selected tool
    pub tool: usize,
    /// Hotend (current, target) temperatures by tool
    pub hotends: Vec<(f64, f64)>,
    /// Bed (current, target) temperature
    pub bed: (f64, f64),
    /// Filament present at the runout switch
    pub filament_present: bool,
    /// Every line received, in order
    pub received: Vec<String>,
}

impl EmulatorState {
    fn new(extruder_count: usize) -> Self {
        Self {
            position: PrinterMove::new(DVec3::ZERO, 0.0, 1800.0),
            relative_xyz: false,
            relative_e: false,
            tool: 0,
            hotends: vec![(AMBIENT, 0.0); extruder_count.max(1)],
            bed: (AMBIENT, 0.0),
            filament_present: true,
            received: Vec::new(),
        }
    }
}

/// In-memory printer implementing [`Connection`]
///
/// Clones share the same printer, so a test can keep a handle while the
/// print runner owns the connection.
#[derive(Debug, Clone)]
pub struct Emulator {
    state: ThreadSafe<EmulatorState>,
    outbox: ThreadSafe<VecDeque<String>>,
    connected: ThreadSafe<bool>,
    heating_rate: f64,
}

impl Emulator {
    /// Create an emulator with `extruder_count` hotends
    pub fn new(extruder_count: usize) -> Self {
        Self {
            state: thread_safe(EmulatorState::new(extruder_count)),
            outbox: thread_safe(VecDeque::new()),
            connected: thread_safe(true),
            heating_rate: 50.0,
        }
    }

    /// Degrees a heater moves toward its target per temperature query
    pub fn with_heating_rate(mut self, degrees_per_query: f64) -> Self {
        self.heating_rate = degrees_per_query;
        self
    }

    /// Snapshot of the printer state
    pub fn state(&self) -> EmulatorState {
        self.state.lock().clone()
    }

    /// Lines received so far
    pub fn received(&self) -> Vec<String> {
        self.state.lock().received.clone()
    }

    /// Pretend the operator moved the head (e.g. jogging from the printer's panel)
    pub fn move_head(&self, position: DVec3) {
        self.state.lock().position.position = position;
    }

    /// Load or run out of filament
    pub fn set_filament_present(&self, present: bool) {
        self.state.lock().filament_present = present;
    }

    /// Simulate a dropped link
    pub fn disconnect(&self) {
        *self.connected.lock() = false;
    }

    fn respond(&self, line: &str) {
        self.outbox.lock().push_back(line.to_string());
    }

    fn execute(&self, line: &str) {
        let mut state = self.state.lock();
        state.received.push(line.to_string());

        let code = strip_comment(line).trim();
        let Some((letter, number)) = command(code) else {
            drop(state);
            self.respond("ok");
            return;
        };

        let mut extra = None;
        match (letter, number as u32) {
            ('G', 0) | ('G', 1) => apply_move(&mut state, code),
            ('G', 28) => {
                let named: Vec<char> = code
                    .split_whitespace()
                    .skip(1)
                    .filter_map(|word| word.chars().next())
                    .map(|c| c.to_ascii_uppercase())
                    .collect();
                let homes = |axis: char| named.is_empty() || named.contains(&axis);
                let position = &mut state.position.position;
                if homes('X') {
                    position.x = 0.0;
                }
                if homes('Y') {
                    position.y = 0.0;
                }
                if homes('Z') {
                    position.z = 0.0;
                }
            }
            ('G', 90) => {
                state.relative_xyz = false;
                state.relative_e = false;
            }
            ('G', 91) => {
                state.relative_xyz = true;
                state.relative_e = true;
            }
            ('G', 92) => apply_set_position(&mut state, code),
            ('M', 82) => state.relative_e = false,
            ('M', 83) => state.relative_e = true,
            ('M', 104) | ('M', 109) => {
                let tool = first_number_after("T", code)
                    .map(|t| t as usize)
                    .unwrap_or(state.tool);
                if let (Some(target), Some(heater)) =
                    (first_number_after("S", code), state.hotends.get_mut(tool))
                {
                    heater.1 = target;
                }
            }
            ('M', 140) | ('M', 190) => {
                if let Some(target) = first_number_after("S", code) {
                    state.bed.1 = target;
                }
            }
            ('M', 105) => {
                let rate = self.heating_rate;
                for heater in state.hotends.iter_mut() {
                    approach(heater, rate);
                }
                approach(&mut state.bed, rate);
                extra = Some(temperature_report(&state));
            }
            ('M', 119) => {
                let runout = if state.filament_present {
                    "open"
                } else {
                    "TRIGGERED"
                };
                self.respond("Reporting endstop status");
                self.respond("x_min: open");
                self.respond(&format!("ros_0: {}", runout));
            }
            ('M', 114) => {
                let p = state.position;
                self.respond(&format!(
                    "X:{:.2} Y:{:.2} Z:{:.2} E:{:.2} Count X:0 Y:0 Z:0",
                    p.position.x, p.position.y, p.position.z, p.extrusion
                ));
            }
            ('T', tool) => {
                if (tool as usize) < state.hotends.len() {
                    state.tool = tool as usize;
                } else {
                    drop(state);
                    self.respond(&format!("echo:T{} Invalid extruder", tool));
                    self.respond("ok");
                    return;
                }
            }
            _ => {}
        }
        drop(state);

        match extra {
            Some(report) => self.respond(&format!("ok {}", report)),
            None => self.respond("ok"),
        }
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new(1)
    }
}

fn apply_move(state: &mut EmulatorState, code: &str) {
    let relative_xyz = state.relative_xyz;
    let relative_e = state.relative_e;
    let position = &mut state.position;

    let axes: [(&str, &mut f64, bool); 4] = [
        ("X", &mut position.position.x, relative_xyz),
        ("Y", &mut position.position.y, relative_xyz),
        ("Z", &mut position.position.z, relative_xyz),
        ("E", &mut position.extrusion, relative_e),
    ];
    for (key, slot, relative) in axes {
        if let Some(value) = first_number_after(key, code) {
            *slot = if relative { *slot + value } else { value };
        }
    }
    if let Some(feed_rate) = first_number_after("F", code) {
        position.feed_rate = feed_rate;
    }
}

fn apply_set_position(state: &mut EmulatorState, code: &str) {
    let position = &mut state.position;
    let mut any = false;
    let axes: [(&str, &mut f64); 4] = [
        ("X", &mut position.position.x),
        ("Y", &mut position.position.y),
        ("Z", &mut position.position.z),
        ("E", &mut position.extrusion),
    ];
    for (key, slot) in axes {
        if let Some(value) = first_number_after(key, code) {
            *slot = value;
            any = true;
        }
    }
    if !any {
        position.position = DVec3::ZERO;
        position.extrusion = 0.0;
    }
}

fn approach(heater: &mut (f64, f64), rate: f64) {
    let (current, target) = *heater;
    let goal = if target > 0.0 { target } else { AMBIENT };
    let step = (goal - current).clamp(-rate, rate);
    heater.0 = current + step;
}

fn temperature_report(state: &EmulatorState) -> String {
    let (current, target) = state.hotends.get(state.tool).copied().unwrap_or((AMBIENT, 0.0));
    let mut report = format!(
        "T:{} /{} B:{} /{}",
        format_number(current),
        format_number(target),
        format_number(state.bed.0),
        format_number(state.bed.1)
    );
    if state.hotends.len() > 1 {
        for (tool, (current, target)) in state.hotends.iter().enumerate() {
            report.push_str(&format!(
                " T{}:{} /{}",
                tool,
                format_number(*current),
                format_number(*target)
            ));
        }
    }
    report
}

impl Connection for Emulator {
    fn name(&self) -> String {
        "emulator".to_string()
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }
        self.execute(line);
        Ok(())
    }

    fn poll_responses(&mut self) -> Result<Vec<String>> {
        if !self.is_connected() {
            return Err(ConnectionError::ConnectionLost {
                reason: "emulator disconnected".to_string(),
            }
            .into());
        }
        Ok(self.outbox.lock().drain(..).collect())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }
}
