//! # GCodeStream Communication
//!
//! Printer connections and the print runner for GCodeStream.
//! Supports serial/USB printers and an in-memory emulated printer, parses
//! Marlin-style responses, watches for filament runout, and streams a print
//! session line by line.

pub mod connection;
pub mod emulator;
pub mod responses;
pub mod runner;
pub mod runout;
pub mod serial;

pub use connection::Connection;
pub use emulator::{Emulator, EmulatorState};
pub use responses::{
    acknowledges, is_error, parse_position, parse_temperatures, PrinterResponse,
    TemperatureReport,
};
pub use runner::{prepare_line, PrintReport, PrintRunner, RunnerConfig, RunnerHandle};
pub use runout::RunoutMonitor;
pub use serial::{list_ports, SerialConnection, SerialPortInfo};
