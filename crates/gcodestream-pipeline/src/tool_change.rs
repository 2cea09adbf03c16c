//! Multi-extruder tool changes.
//!
//! A `T<n>` only records the requested tool. The physical switch (hooks,
//! `T<n>`, travel back to the print position) happens on the first move that
//! needs the new tool, so a `T1` immediately followed by `T0` never reaches
//! the printer. Coordinates above this stage are in the logical frame; the
//! printer sees them shifted by the active extruder's offset relative to
//! extruder 0.

use crate::stream::{macro_lines, BoxedStream, GcodeStream};
use crate::wait_for_temp::TemperatureReadings;
use gcodestream_core::{
    command, command_is, first_number_after, format_number, get_position, has_no_processing,
    is_movement, set_number_after, strip_comment, PrinterMove, NO_PROCESSING,
};
use gcodestream_settings::ToolChangeMacros;
use glam::DVec3;
use std::collections::VecDeque;

/// A tool this far below its target is heated before it prints (°C)
const REHEAT_MARGIN: f64 = 3.0;

/// Configuration for [`ToolChange`]
#[derive(Debug, Clone)]
pub struct ToolChangeConfig {
    /// Number of extruders
    pub extruder_count: usize,
    /// Offset of each extruder; missing entries are zero
    pub offsets: Vec<DVec3>,
    /// Hooks indexed by the extruder being switched to
    pub macros: Vec<ToolChangeMacros>,
    /// XY travel feed rate after a switch (mm/min)
    pub xy_travel_feed_rate: f64,
    /// Z travel feed rate after a switch (mm/min)
    pub z_travel_feed_rate: f64,
}

impl Default for ToolChangeConfig {
    fn default() -> Self {
        Self {
            extruder_count: 2,
            offsets: Vec::new(),
            macros: Vec::new(),
            xy_travel_feed_rate: 3000.0,
            z_travel_feed_rate: 315.0,
        }
    }
}

/// Stream stage deferring and executing tool switches
pub struct ToolChange {
    inner: BoxedStream,
    config: ToolChangeConfig,
    active: Option<usize>,
    requested: Option<usize>,
    last_destination: PrinterMove,
    queued: VecDeque<String>,
    targets: Vec<f64>,
    readings: Option<TemperatureReadings>,
}

impl ToolChange {
    /// Create a tool-change stage. `initial_tool` is the tool the printer is
    /// known to have selected, if any.
    pub fn new(inner: BoxedStream, config: ToolChangeConfig, initial_tool: Option<usize>) -> Self {
        Self {
            inner,
            config,
            active: initial_tool,
            requested: None,
            last_destination: PrinterMove::UNKNOWN,
            queued: VecDeque::new(),
            targets: Vec::new(),
            readings: None,
        }
    }

    /// Wait for the next tool to reach its target before printing with it,
    /// judged from these readings
    pub fn with_temperatures(mut self, readings: TemperatureReadings) -> Self {
        self.readings = Some(readings);
        self
    }

    /// Tool currently selected on the printer
    pub fn active_tool(&self) -> Option<usize> {
        self.active
    }

    /// Tool requested but not yet switched to
    pub fn pending_tool(&self) -> Option<usize> {
        self.requested
    }

    fn offset(&self, tool: usize) -> DVec3 {
        self.config.offsets.get(tool).copied().unwrap_or(DVec3::ZERO)
    }

    /// Shift applied to logical coordinates when sent with `tool` selected
    fn tool_shift(&self, tool: usize) -> DVec3 {
        self.offset(tool) - self.offset(0)
    }

    fn to_printer(&self, position: DVec3, tool: usize) -> DVec3 {
        position - self.tool_shift(tool)
    }

    /// Rewrite X/Y/Z words of a move into the printer frame of `tool`
    fn offset_line(&self, line: &str, tool: usize) -> String {
        let shift = self.tool_shift(tool);
        let mut output = line.to_string();
        for (key, delta) in [("X", shift.x), ("Y", shift.y), ("Z", shift.z)] {
            if delta == 0.0 {
                continue;
            }
            if let Some(value) = first_number_after(key, &output) {
                output = set_number_after(&output, key, value - delta);
            }
        }
        output
    }

    fn handle_tool_select(&mut self, tool: usize, line: String) -> String {
        if tool >= self.config.extruder_count {
            tracing::warn!(
                "Tool T{} out of range (extruder count {}), passing through",
                tool,
                self.config.extruder_count
            );
            return line;
        }

        match self.active {
            None => {
                tracing::debug!("Initial tool T{}", tool);
                self.active = Some(tool);
                self.requested = None;
                self.queued.push_back("M114".to_string());
                line
            }
            Some(active) if active == tool => {
                if self.requested.take().is_some() {
                    tracing::debug!("Switch back to T{} before any move, no change sent", tool);
                }
                String::new()
            }
            Some(_) => {
                self.requested = Some(tool);
                String::new()
            }
        }
    }

    /// Last hotend target set for `tool` (°C)
    pub fn target_temperature(&self, tool: usize) -> f64 {
        self.targets.get(tool).copied().unwrap_or(0.0)
    }

    fn record_target(&mut self, line: &str) {
        let Some(temperature) = first_number_after("S", line) else {
            return;
        };
        let tool = first_number_after("T", line)
            .map(|t| t as usize)
            .or(self.requested)
            .or(self.active)
            .unwrap_or(0);
        if tool >= self.config.extruder_count {
            return;
        }
        if self.targets.len() <= tool {
            self.targets.resize(tool + 1, 0.0);
        }
        self.targets[tool] = temperature;
    }

    /// `M109` for `tool` when it has a target and is still cold
    fn reheat_line(&self, tool: usize) -> Option<String> {
        let readings = self.readings.as_ref()?;
        let target = self.target_temperature(tool);
        if target <= 0.0 {
            return None;
        }
        let current = readings.hotend(tool).unwrap_or(0.0);
        if current >= target - REHEAT_MARGIN {
            return None;
        }
        tracing::info!("T{} at {:.1}, waiting for {:.1} before use", tool, current, target);
        Some(format!("M109 T{} S{}", tool, format_number(target)))
    }

    fn handle_temperature(&mut self, line: String) -> String {
        self.record_target(&line);
        let Some(active) = self.active else {
            return line;
        };
        let target_tool = first_number_after("T", &line)
            .map(|t| t as usize)
            .or(self.requested);
        let Some(tool) = target_tool else {
            return line;
        };
        if tool == active {
            return line;
        }
        let Some(temperature) = first_number_after("S", &line) else {
            return line;
        };

        let code = if command_is(&line, "M109") {
            "M109"
        } else {
            "M104"
        };
        self.queued.push_back(format!("T{}", active));
        self.queued.push_back("M114".to_string());
        format!("{} T{} S{}", code, tool, format_number(temperature))
    }

    fn execute_switch(&mut self, tool: usize, line: &str) -> String {
        let before = self.last_destination;
        let target = get_position(line, before);
        let macros = self.config.macros.get(tool).cloned().unwrap_or_default();
        tracing::info!("Switching to T{}", tool);

        for hook in macro_lines(&macros.before) {
            self.queued.push_back(format!("{} {}", hook, NO_PROCESSING));
        }
        self.queued.push_back(format!("T{}", tool));
        if let Some(reheat) = self.reheat_line(tool) {
            self.queued.push_back(reheat);
        }
        for hook in macro_lines(&macros.after) {
            self.queued.push_back(format!("{} {}", hook, NO_PROCESSING));
        }

        let extrudes = match (first_number_after("E", line), before.extrusion) {
            (Some(e), previous) if previous.is_finite() => e > previous,
            (Some(_), _) => true,
            (None, _) => false,
        };
        let travel_target = if extrudes {
            before.position
        } else {
            target.position
        };
        let travel = self.to_printer(travel_target, tool);

        let mut xy_travel = String::from("G1");
        if travel.x.is_finite() {
            xy_travel.push_str(&format!(" X{}", format_number(travel.x)));
        }
        if travel.y.is_finite() {
            xy_travel.push_str(&format!(" Y{}", format_number(travel.y)));
        }
        if xy_travel.len() > 2 {
            xy_travel.push_str(&format!(" F{}", format_number(self.config.xy_travel_feed_rate)));
            self.queued.push_back(xy_travel);
        }
        if travel.z.is_finite() {
            self.queued.push_back(format!(
                "G1 Z{} F{}",
                format_number(travel.z),
                format_number(self.config.z_travel_feed_rate)
            ));
        }
        if before.feed_rate.is_finite() {
            self.queued
                .push_back(format!("G1 F{}", format_number(before.feed_rate)));
        }

        self.queued.push_back(self.offset_line(line, tool));
        // Must follow the triggering move
        self.queued.push_back("M114".to_string());

        self.active = Some(tool);
        self.requested = None;
        self.last_destination = target;
        self.queued.pop_front().unwrap_or_default()
    }

    fn extrude_on_pending(&mut self, tool: usize, active: usize, line: &str) -> String {
        let before = self.last_destination;
        let after = get_position(line, before);

        self.queued.push_back(format!("T{}", tool));
        if before.extrusion.is_finite() {
            self.queued
                .push_back(format!("G92 E{}", format_number(before.extrusion)));
        }
        self.queued
            .push_back(format!("{} {}", strip_comment(line), NO_PROCESSING));
        self.queued.push_back(format!("T{}", active));
        if after.extrusion.is_finite() {
            self.queued
                .push_back(format!("G92 E{}", format_number(after.extrusion)));
        }
        self.queued.push_back("M114".to_string());

        self.last_destination = after;
        self.queued.pop_front().unwrap_or_default()
    }

    fn process_move(&mut self, line: String) -> String {
        let has_xyz = ["X", "Y", "Z"]
            .iter()
            .any(|key| first_number_after(key, &line).is_some());

        if let (Some(tool), Some(active)) = (self.requested, self.active) {
            if has_xyz {
                return self.execute_switch(tool, &line);
            }
            if first_number_after("E", &line).is_some() {
                return self.extrude_on_pending(tool, active, &line);
            }
        }

        self.last_destination = get_position(&line, self.last_destination);
        self.offset_line(&line, self.active.unwrap_or(0))
    }
}

impl GcodeStream for ToolChange {
    fn name(&self) -> &str {
        "tool_change"
    }

    fn read_line(&mut self) -> Option<String> {
        if let Some(line) = self.queued.pop_front() {
            return Some(line);
        }

        let line = self.inner.read_line()?;

        if has_no_processing(&line) {
            return Some(line);
        }

        if let Some(('T', tool)) = command(&line) {
            return Some(self.handle_tool_select(tool as usize, line));
        }

        if command_is(&line, "M104") || command_is(&line, "M109") {
            return Some(self.handle_temperature(line));
        }

        if command_is(&line, "G28") {
            if let Some(tool) = self.requested.take() {
                tracing::debug!("Homing cancels pending switch to T{}", tool);
            }
            if self.active.is_some_and(|tool| tool != 0) {
                tracing::debug!("Homing selects T0");
            }
            self.active = Some(0);
            return Some(line);
        }

        if command_is(&line, "G92") {
            let mut set = get_position(&line, self.last_destination);
            set.feed_rate = self.last_destination.feed_rate;
            self.last_destination = set;
            return Some(self.offset_line(&line, self.active.unwrap_or(0)));
        }

        if is_movement(&line) {
            return Some(self.process_move(line));
        }

        Some(line)
    }

    fn set_printer_position(&mut self, position: PrinterMove) {
        let shift = self.tool_shift(self.active.unwrap_or(0));
        let mut logical = position;
        logical.position += shift;
        self.last_destination.copy_known(&logical);
        self.inner.set_printer_position(logical);
    }

    fn cancel(&mut self) {
        self.queued.clear();
        self.requested = None;
        self.inner.cancel();
    }

    fn debug_info(&self) -> String {
        format!(
            "tool_change (active {:?}, pending {:?}) <- {}",
            self.active,
            self.requested,
            self.inner.debug_info()
        )
    }
}
