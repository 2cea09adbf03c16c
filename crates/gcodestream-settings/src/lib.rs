//! GCodeStream Settings Crate
//!
//! Printer configuration read by the streaming pipeline: macros, extruder
//! offsets, motion limits and print defaults.

pub mod config;
pub mod error;

pub use config::{
    ConnectionSettings, ExtruderSettings, MacroSettings, MotionSettings, PrintDefaults,
    PrinterSettings, ToolChangeMacros,
};
pub use error::{SettingsError, SettingsResult};
