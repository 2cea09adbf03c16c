//! Printer Response Parser
//!
//! Classifies lines received from Marlin / Repetier / Smoothie style
//! firmware: acknowledgements, `M114` position reports, `M105` temperature
//! reports and firmware errors.

use gcodestream_core::PrinterMove;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

fn position_field() -> &'static Regex {
    static POSITION_FIELD: OnceLock<Regex> = OnceLock::new();
    POSITION_FIELD.get_or_init(|| {
        Regex::new(r"(?:^|\s)(?P<axis>[XYZE]):\s*(?P<value>[-+]?\d+(?:\.\d+)?)")
            .expect("invalid regex pattern")
    })
}

fn temperature_field() -> &'static Regex {
    static TEMPERATURE_FIELD: OnceLock<Regex> = OnceLock::new();
    TEMPERATURE_FIELD.get_or_init(|| {
        Regex::new(r"(?:^|\s)(?P<heater>T\d*|B):\s*(?P<value>[-+]?(?:\d+(?:\.\d+)?|inf))")
            .expect("invalid regex pattern")
    })
}

/// Firmware messages that mean the printer stopped or refused work
const ERROR_MARKERS: [&str; 10] = [
    "Error:",
    "MINTEMP",
    "MAXTEMP",
    "M999",
    "Thermal Runaway",
    "Heater decoupled",
    "cold extrusion prevented",
    "Printer halted",
    "T:inf",
    "B:inf",
];

/// Heater readings from one `M105` report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReport {
    /// `(tool, temperature)` pairs
    pub hotends: Vec<(usize, f64)>,
    /// Bed temperature, if reported
    pub bed: Option<f64>,
}

/// A classified response line
#[derive(Debug, Clone, PartialEq)]
pub enum PrinterResponse {
    /// Plain acknowledgement
    Ok,
    /// Position report (unknown axes are infinite)
    Position(PrinterMove),
    /// Temperature report
    Temperatures(TemperatureReport),
    /// The firmware reported a fault
    Error(String),
    /// Anything else (echo, busy, start banner)
    Message(String),
}

impl PrinterResponse {
    /// Classify one line
    pub fn parse(line: &str) -> Self {
        let line = line.trim();

        if is_error(line) {
            return Self::Error(line.to_string());
        }

        let body = line.strip_prefix("ok").map(str::trim_start).unwrap_or(line);

        if body.starts_with("X:") || body.starts_with("C:") {
            if let Some(position) = parse_position(body) {
                return Self::Position(position);
            }
        }

        if body.starts_with("B:") || body.contains("T:") || body.contains("T0:") {
            if let Some(report) = parse_temperatures(body) {
                return Self::Temperatures(report);
            }
        }

        if acknowledges(line) {
            return Self::Ok;
        }

        Self::Message(line.to_string())
    }
}

impl fmt::Display for PrinterResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Position(position) => write!(
                f,
                "position:{:?},{}",
                position.position, position.extrusion
            ),
            Self::Temperatures(report) => {
                write!(f, "temperatures:{:?}", report.hotends)?;
                if let Some(bed) = report.bed {
                    write!(f, " bed:{}", bed)?;
                }
                Ok(())
            }
            Self::Error(msg) => write!(f, "error:{}", msg),
            Self::Message(msg) => write!(f, "message:{}", msg),
        }
    }
}

/// True when the line lets the next command be sent
pub fn acknowledges(line: &str) -> bool {
    let line = line.trim_start();
    line == "ok" || line.starts_with("ok ") || line.starts_with("ok:")
}

/// True when the line is a firmware fault
pub fn is_error(line: &str) -> bool {
    ERROR_MARKERS.iter().any(|marker| line.contains(marker))
}

/// Parse an `M114` report such as `X:10.00 Y:20.00 Z:1.00 E:5.00 Count X:800 ...`
///
/// Only the first occurrence of each axis is used; the `Count` section
/// carries stepper counts, not millimetres.
pub fn parse_position(line: &str) -> Option<PrinterMove> {
    let mut position = PrinterMove::UNKNOWN;
    let mut found = false;

    let reported = line.split("Count").next().unwrap_or(line);
    for caps in position_field().captures_iter(reported) {
        let Ok(value) = caps["value"].parse::<f64>() else {
            continue;
        };
        let slot = match &caps["axis"] {
            "X" => &mut position.position.x,
            "Y" => &mut position.position.y,
            "Z" => &mut position.position.z,
            _ => &mut position.extrusion,
        };
        if slot.is_infinite() {
            *slot = value;
            found = true;
        }
    }

    found.then_some(position)
}

/// Parse an `M105` report such as `ok T:200.0 /200.0 B:60.0 /60.0 T0:200.0 /200.0 T1:25.0 /0.0`
///
/// `T:` is the active hotend and is reported as tool 0 unless an explicit
/// `T0:` reading is present.
pub fn parse_temperatures(line: &str) -> Option<TemperatureReport> {
    let mut report = TemperatureReport::default();
    let mut active = None;

    for caps in temperature_field().captures_iter(line) {
        let Ok(value) = caps["value"].parse::<f64>() else {
            continue;
        };
        let heater = &caps["heater"];
        if heater == "B" {
            report.bed.get_or_insert(value);
        } else if heater == "T" {
            active.get_or_insert(value);
        } else if let Ok(tool) = heater[1..].parse::<usize>() {
            if !report.hotends.iter().any(|(t, _)| *t == tool) {
                report.hotends.push((tool, value));
            }
        }
    }

    if let Some(value) = active {
        if !report.hotends.iter().any(|(t, _)| *t == 0) {
            report.hotends.insert(0, (0, value));
        }
    }

    if report.hotends.is_empty() && report.bed.is_none() {
        return None;
    }
    Some(report)
}
