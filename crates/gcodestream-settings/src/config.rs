//! Printer settings for GCodeStream
//!
//! Provides the read-only printer configuration consumed by the streaming
//! pipeline, with JSON and TOML file support and validation.
//!
//! Settings are organized into logical sections:
//! - Connection settings (port, baud rate)
//! - Macros (pause, resume, per-extruder tool-change hooks)
//! - Extruder table (count, XYZ offsets)
//! - Motion limits (segment splitting, travel feed rates)
//! - Print defaults (ratios, pause layers, heater hold time)

use crate::error::{SettingsError, SettingsResult};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Serial port name; empty means "ask / emulate"
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 250_000,
            timeout_ms: 100,
        }
    }
}

/// Hooks run around a switch to a given extruder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolChangeMacros {
    /// Lines sent before the `T` command
    #[serde(default)]
    pub before: String,
    /// Lines sent after the `T` command
    #[serde(default)]
    pub after: String,
}

/// Macro settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroSettings {
    /// Emitted when a pause begins
    pub pause_gcode: String,
    /// Emitted when the print resumes
    pub resume_gcode: String,
    /// Tool-change hooks indexed by the extruder being switched to
    #[serde(default)]
    pub tool_changes: Vec<ToolChangeMacros>,
}

impl Default for MacroSettings {
    fn default() -> Self {
        Self {
            pause_gcode: "G91\nG1 Z10 E-5 F12000\nG90".to_string(),
            resume_gcode: "G91\nG1 Z-10 E5 F12000\nG90".to_string(),
            tool_changes: Vec::new(),
        }
    }
}

/// Extruder table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtruderSettings {
    /// Number of extruders on the printer
    pub count: usize,
    /// XYZ offset of each extruder relative to the printer frame
    #[serde(default)]
    pub offsets: Vec<DVec3>,
}

impl Default for ExtruderSettings {
    fn default() -> Self {
        Self {
            count: 1,
            offsets: vec![DVec3::ZERO],
        }
    }
}

/// Motion limits used by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionSettings {
    /// Split moves longer than this when line splitting is enabled (mm)
    pub max_segment_length: f64,
    /// Minimum time a split segment should take (seconds)
    pub max_seconds_per_segment: f64,
    /// Enable move splitting for serial transmission
    pub enable_line_splitting: bool,
    /// Feed rate for XY travel after a tool change (mm/min)
    pub xy_travel_feed_rate: f64,
    /// Feed rate for Z travel after a tool change (mm/min)
    pub z_travel_feed_rate: f64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            max_segment_length: 1.0,
            max_seconds_per_segment: 0.05,
            enable_line_splitting: true,
            xy_travel_feed_rate: 3000.0,
            z_travel_feed_rate: 315.0,
        }
    }
}

/// Print-time defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintDefaults {
    /// Initial feed-rate ratio
    pub feed_rate_ratio: f64,
    /// Initial extrusion ratio
    pub extrusion_ratio: f64,
    /// Layers (0-based) on which the print pauses
    #[serde(default)]
    pub pause_layers: Vec<i32>,
    /// How long a heater must stay in range before a wait completes (seconds)
    pub heater_hold_seconds: f64,
    /// The printer reports filament runout (`ros_` / `pos_` lines)
    #[serde(default)]
    pub filament_runout_sensor: bool,
    /// Idle time while paused before the motors are nudged to stay
    /// energised (seconds, 0 disables)
    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: f64,
}

fn default_keep_alive_seconds() -> f64 {
    10.0
}

impl Default for PrintDefaults {
    fn default() -> Self {
        Self {
            feed_rate_ratio: 1.0,
            extrusion_ratio: 1.0,
            pause_layers: Vec::new(),
            heater_hold_seconds: 3.0,
            filament_runout_sensor: false,
            keep_alive_seconds: default_keep_alive_seconds(),
        }
    }
}

/// Complete printer configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PrinterSettings {
    /// Connection settings
    #[serde(default)]
    pub connection: ConnectionSettings,
    /// Macros
    #[serde(default)]
    pub macros: MacroSettings,
    /// Extruder table
    #[serde(default)]
    pub extruders: ExtruderSettings,
    /// Motion limits
    #[serde(default)]
    pub motion: MotionSettings,
    /// Print defaults
    #[serde(default)]
    pub print: PrintDefaults,
}

impl PrinterSettings {
    /// Create new settings with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default settings file location (`<config dir>/gcodestream/printer.toml`)
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("gcodestream").join("printer.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no configuration directory on this platform".into())
            })
    }

    /// Load settings from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)?;

        let settings: Self = match extension(path) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            other => {
                return Err(SettingsError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };

        settings.validate()?;
        tracing::debug!("Loaded printer settings from {}", path.display());
        Ok(settings)
    }

    /// Load settings from file, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!(
                "Settings file {} not found, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Save settings to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match extension(path) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string_pretty(self)?,
            other => {
                return Err(SettingsError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate settings
    pub fn validate(&self) -> SettingsResult<()> {
        if self.connection.baud_rate == 0 {
            return Err(invalid("connection.baud_rate", "must be > 0"));
        }

        if self.extruders.count == 0 {
            return Err(invalid("extruders.count", "must be at least 1"));
        }

        if self.extruders.offsets.len() > self.extruders.count {
            return Err(invalid(
                "extruders.offsets",
                "more offsets than configured extruders",
            ));
        }

        if self.extruders.offsets.iter().any(|offset| !offset.is_finite()) {
            return Err(invalid("extruders.offsets", "offsets must be finite"));
        }

        if !(self.motion.max_segment_length > 0.0) {
            return Err(invalid("motion.max_segment_length", "must be > 0"));
        }

        if !(self.motion.max_seconds_per_segment >= 0.0) {
            return Err(invalid("motion.max_seconds_per_segment", "must be >= 0"));
        }

        if !(self.motion.xy_travel_feed_rate > 0.0) || !(self.motion.z_travel_feed_rate > 0.0) {
            return Err(invalid("motion.travel_feed_rate", "must be > 0"));
        }

        if !(self.print.feed_rate_ratio > 0.0) {
            return Err(invalid("print.feed_rate_ratio", "must be > 0"));
        }

        if !(self.print.extrusion_ratio > 0.0) {
            return Err(invalid("print.extrusion_ratio", "must be > 0"));
        }

        if self.print.pause_layers.iter().any(|layer| *layer < 0) {
            return Err(invalid("print.pause_layers", "layers must be >= 0"));
        }

        if !(self.print.heater_hold_seconds >= 0.0) {
            return Err(invalid("print.heater_hold_seconds", "must be >= 0"));
        }

        if !(self.print.keep_alive_seconds >= 0.0) {
            return Err(invalid("print.keep_alive_seconds", "must be >= 0"));
        }

        Ok(())
    }

    /// Offset of `tool`; extruders without an entry sit at the origin.
    pub fn extruder_offset(&self, tool: usize) -> DVec3 {
        self.extruders
            .offsets
            .get(tool)
            .copied()
            .unwrap_or(DVec3::ZERO)
    }

    /// Tool-change hooks for switching to `tool`.
    pub fn tool_change_macros(&self, tool: usize) -> ToolChangeMacros {
        self.macros
            .tool_changes
            .get(tool)
            .cloned()
            .unwrap_or_default()
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

fn invalid(key: &str, reason: &str) -> SettingsError {
    SettingsError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = PrinterSettings::new();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.extruders.count, 1);
        assert_eq!(settings.motion.xy_travel_feed_rate, 3000.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = PrinterSettings::new();
        settings.motion.max_segment_length = 0.0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidSetting { ref key, .. }) if key == "motion.max_segment_length"
        ));

        let mut settings = PrinterSettings::new();
        settings.extruders.count = 0;
        assert!(settings.validate().is_err());

        let mut settings = PrinterSettings::new();
        settings.print.feed_rate_ratio = f64::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_offset_is_origin() {
        let mut settings = PrinterSettings::new();
        settings.extruders.count = 2;
        assert_eq!(settings.extruder_offset(1), DVec3::ZERO);
        assert_eq!(settings.tool_change_macros(1), ToolChangeMacros::default());
    }
}
