//! Non-blocking heater waits.
//!
//! `M109` / `M190` block the firmware until the heater settles, which stalls
//! the serial line. This stage rewrites them to their non-waiting forms
//! (`M104` / `M140`) and holds the stream with empty lines until the reported
//! temperature has been in range for the configured hold time.

use crate::stream::{BoxedStream, GcodeStream};
use gcodestream_core::{
    command_is, first_number_after, format_number, has_no_processing, thread_safe_rw,
    PrinterMove, ThreadSafeRw,
};
use std::time::{Duration, Instant};

/// Targets at or below this are "heater off" and never waited on (°C)
const MIN_WAIT_TEMPERATURE: f64 = 20.0;

/// Allowed deviation for a hotend (°C)
const HOTEND_TOLERANCE: f64 = 1.0;

/// Allowed deviation for the bed (°C)
const BED_TOLERANCE: f64 = 3.0;

/// A heater the stream is waiting on
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeaterWait {
    /// Hotend `tool` reaching `target`
    Hotend {
        tool: usize,
        target: f64,
        /// Wait while cooling too (`R` form)
        exact: bool,
    },
    /// Bed reaching `target`
    Bed { target: f64, exact: bool },
}

impl HeaterWait {
    fn reached(&self, readings: &Temperatures) -> bool {
        let (current, target, tolerance, exact) = match *self {
            HeaterWait::Hotend {
                tool,
                target,
                exact,
            } => (
                readings.hotends.get(tool).copied().flatten(),
                target,
                HOTEND_TOLERANCE,
                exact,
            ),
            HeaterWait::Bed { target, exact } => (readings.bed, target, BED_TOLERANCE, exact),
        };

        let Some(current) = current else {
            return false;
        };
        if exact {
            (current - target).abs() <= tolerance
        } else {
            current >= target - tolerance
        }
    }
}

/// Latest heater readings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Temperatures {
    /// Reported hotend temperatures by tool
    pub hotends: Vec<Option<f64>>,
    /// Reported bed temperature
    pub bed: Option<f64>,
    /// Heater the pipeline is currently waiting on
    pub waiting_for: Option<HeaterWait>,
}

/// Shared heater readings, written by the response parser and read by the pipeline
#[derive(Debug, Clone, Default)]
pub struct TemperatureReadings {
    inner: ThreadSafeRw<Temperatures>,
}

impl TemperatureReadings {
    pub fn new() -> Self {
        Self {
            inner: thread_safe_rw(Temperatures::default()),
        }
    }

    pub fn set_hotend(&self, tool: usize, temperature: f64) {
        let mut readings = self.inner.write();
        if readings.hotends.len() <= tool {
            readings.hotends.resize(tool + 1, None);
        }
        readings.hotends[tool] = Some(temperature);
    }

    pub fn set_bed(&self, temperature: f64) {
        self.inner.write().bed = Some(temperature);
    }

    pub fn hotend(&self, tool: usize) -> Option<f64> {
        self.inner.read().hotends.get(tool).copied().flatten()
    }

    pub fn bed(&self) -> Option<f64> {
        self.inner.read().bed
    }

    /// Heater the pipeline is waiting on, if any
    pub fn waiting_for(&self) -> Option<HeaterWait> {
        self.inner.read().waiting_for
    }

    pub fn snapshot(&self) -> Temperatures {
        self.inner.read().clone()
    }

    fn set_waiting(&self, wait: Option<HeaterWait>) {
        self.inner.write().waiting_for = wait;
    }
}

/// Stream stage turning blocking heater waits into host-side waits
pub struct WaitForTemp {
    inner: BoxedStream,
    readings: TemperatureReadings,
    hold_time: Duration,
    waiting: Option<HeaterWait>,
    in_range_since: Option<Instant>,
}

impl WaitForTemp {
    pub fn new(inner: BoxedStream, readings: TemperatureReadings, hold_time: Duration) -> Self {
        Self {
            inner,
            readings,
            hold_time,
            waiting: None,
            in_range_since: None,
        }
    }

    /// Heater being waited on
    pub fn waiting_for(&self) -> Option<HeaterWait> {
        self.waiting
    }

    fn start_wait(&mut self, wait: HeaterWait) {
        tracing::info!("Waiting for {:?}", wait);
        self.waiting = Some(wait);
        self.in_range_since = None;
        self.readings.set_waiting(Some(wait));
    }

    fn finish_wait(&mut self) {
        self.waiting = None;
        self.in_range_since = None;
        self.readings.set_waiting(None);
    }

    /// True while the stream must keep holding
    fn still_waiting(&mut self) -> bool {
        let Some(wait) = self.waiting else {
            return false;
        };

        if !wait.reached(&self.readings.snapshot()) {
            self.in_range_since = None;
            return true;
        }

        let since = *self.in_range_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= self.hold_time {
            tracing::info!("Heater wait complete: {:?}", wait);
            self.finish_wait();
            return false;
        }
        true
    }

    fn convert_hotend_wait(&mut self, line: String) -> String {
        if first_number_after("F", &line).is_some() {
            return line;
        }
        let (target, exact) = match (first_number_after("S", &line), first_number_after("R", &line)) {
            (Some(s), _) => (s, false),
            (None, Some(r)) => (r, true),
            (None, None) => return line,
        };

        let tool = first_number_after("T", &line).map(|t| t as usize);
        let converted = match tool {
            Some(tool) => format!("M104 T{} S{}", tool, format_number(target)),
            None => format!("M104 S{}", format_number(target)),
        };

        if target > MIN_WAIT_TEMPERATURE {
            self.start_wait(HeaterWait::Hotend {
                tool: tool.unwrap_or(0),
                target,
                exact,
            });
        }
        converted
    }

    fn convert_bed_wait(&mut self, line: String) -> String {
        let (target, exact) = match (first_number_after("S", &line), first_number_after("R", &line)) {
            (Some(s), _) => (s, false),
            (None, Some(r)) => (r, true),
            (None, None) => return line,
        };

        if target > MIN_WAIT_TEMPERATURE {
            self.start_wait(HeaterWait::Bed { target, exact });
        }
        format!("M140 S{}", format_number(target))
    }
}

impl GcodeStream for WaitForTemp {
    fn name(&self) -> &str {
        "wait_for_temp"
    }

    fn read_line(&mut self) -> Option<String> {
        if self.still_waiting() {
            return Some(String::new());
        }

        let line = self.inner.read_line()?;

        if has_no_processing(&line) {
            return Some(line);
        }

        if command_is(&line, "M109") {
            return Some(self.convert_hotend_wait(line));
        }

        if command_is(&line, "M190") {
            return Some(self.convert_bed_wait(line));
        }

        Some(line)
    }

    fn set_printer_position(&mut self, position: PrinterMove) {
        self.inner.set_printer_position(position);
    }

    fn cancel(&mut self) {
        if self.waiting.is_some() {
            tracing::info!("Heater wait cancelled");
        }
        self.finish_wait();
        self.inner.cancel();
    }

    fn debug_info(&self) -> String {
        format!(
            "wait_for_temp (waiting {:?}) <- {}",
            self.waiting,
            self.inner.debug_info()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn stage(lines: &[&str], readings: &TemperatureReadings) -> WaitForTemp {
        WaitForTemp::new(
            Box::new(MemorySource::new(lines.to_vec())),
            readings.clone(),
            Duration::ZERO,
        )
    }

    #[test]
    fn test_hotend_wait_holds_until_reached() {
        let readings = TemperatureReadings::new();
        let mut stage = stage(&["M109 S210", "G1 X1"], &readings);

        assert_eq!(stage.read_line().as_deref(), Some("M104 S210"));
        assert_eq!(stage.read_line().as_deref(), Some(""));
        assert!(matches!(
            readings.waiting_for(),
            Some(HeaterWait::Hotend { tool: 0, .. })
        ));

        readings.set_hotend(0, 150.0);
        assert_eq!(stage.read_line().as_deref(), Some(""));

        readings.set_hotend(0, 209.5);
        assert_eq!(stage.read_line().as_deref(), Some("G1 X1"));
        assert_eq!(readings.waiting_for(), None);
    }

    #[test]
    fn test_bed_wait_uses_wider_tolerance() {
        let readings = TemperatureReadings::new();
        let mut stage = stage(&["M190 S60", "G28"], &readings);

        assert_eq!(stage.read_line().as_deref(), Some("M140 S60"));
        readings.set_bed(57.5);
        assert_eq!(stage.read_line().as_deref(), Some("G28"));
    }

    #[test]
    fn test_cooling_wait_requires_exact_range() {
        let readings = TemperatureReadings::new();
        readings.set_hotend(1, 200.0);
        let mut stage = stage(&["M109 T1 R150", "M105"], &readings);

        assert_eq!(stage.read_line().as_deref(), Some("M104 T1 S150"));
        assert_eq!(stage.read_line().as_deref(), Some(""));
        readings.set_hotend(1, 150.5);
        assert_eq!(stage.read_line().as_deref(), Some("M105"));
    }

    #[test]
    fn test_low_targets_and_firmware_waits_pass() {
        let readings = TemperatureReadings::new();
        let mut stage = stage(&["M109 S0", "M109 S200 F1", "M105"], &readings);

        assert_eq!(stage.read_line().as_deref(), Some("M104 S0"));
        assert_eq!(stage.read_line().as_deref(), Some("M109 S200 F1"));
        assert_eq!(stage.read_line().as_deref(), Some("M105"));
    }

    #[test]
    fn test_cancel_releases_wait() {
        let readings = TemperatureReadings::new();
        let mut stage = stage(&["M109 S210", "G1 X1"], &readings);
        stage.read_line();
        assert!(stage.waiting_for().is_some());

        stage.cancel();
        assert_eq!(stage.waiting_for(), None);
        assert_eq!(stage.read_line(), None);
    }
}
