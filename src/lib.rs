//! # GCodeStream
//!
//! A host-side G-code streaming pipeline for 3D printers:
//! - Pause/resume with parking macros and return-to-position
//! - Multi-extruder tool changes with offsets and before/after hooks
//! - Live feed-rate and extrusion ratios, baby-stepping
//! - Move splitting for serial-friendly streaming
//! - Host-side heater waits
//!
//! ## Architecture
//!
//! GCodeStream is organized as a workspace with multiple crates:
//!
//! 1. **gcodestream-core** - Position types, G-code tokenizer, errors
//! 2. **gcodestream-settings** - Printer settings (TOML/JSON)
//! 3. **gcodestream-pipeline** - Stream stages, pipeline builder, print session
//! 4. **gcodestream-communication** - Serial and emulated printers, print runner
//! 5. **gcodestream** - Command-line binary that integrates all crates

pub use gcodestream_communication::{
    list_ports, Connection, Emulator, PrintReport, PrintRunner, RunnerConfig, RunnerHandle,
    SerialConnection, SerialPortInfo,
};
pub use gcodestream_core::{Error, PrinterMove, Result};
pub use gcodestream_pipeline::{PauseState, PipelineBuilder, PrintSession};
pub use gcodestream_settings::PrinterSettings;

use std::sync::Arc;
use std::time::Duration;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Sets up structured logging with:
/// - RUST_LOG environment variable support (defaults to `info`)
/// - Output on stderr so G-code written to stdout stays clean
/// - JSON lines instead of human-readable output when `json` is set
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Runner timing for dry runs: no idle sleeps worth noticing, temperatures
/// queried on every line held by a heater wait.
fn dry_run_config() -> RunnerConfig {
    RunnerConfig {
        idle_delay: Duration::from_millis(1),
        poll_interval: Duration::from_millis(1),
        ok_timeout: Duration::from_secs(1),
        temperature_interval: Duration::ZERO,
        poll_temperatures: false,
        ..RunnerConfig::default()
    }
}

/// Stream `gcode` through the pipeline into an [`Emulator`] and return every
/// line the emulated printer received.
///
/// Heater waits complete as soon as the emulator reports the target and any
/// pause is resumed immediately, so the whole file is always processed.
pub async fn dry_run(gcode: &str, settings: &PrinterSettings) -> anyhow::Result<Vec<String>> {
    let mut settings = settings.clone();
    settings.print.heater_hold_seconds = 0.0;

    let session = Arc::new(PrintSession::from_text(gcode, &settings)?);
    let printer = Emulator::new(settings.extruders.count).with_heating_rate(1000.0);
    let runner = PrintRunner::new(printer.clone(), session.clone()).with_config(dry_run_config());

    let task = tokio::spawn(runner.run());
    while !task.is_finished() {
        if session.pause_state() == PauseState::Paused {
            tracing::info!("Dry run: resuming automatically");
            session.resume()?;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let report = task.await??;
    tracing::debug!(
        "Dry run sent {} lines in {:.2}s",
        report.lines_sent,
        report.duration.as_secs_f64()
    );

    Ok(printer.received())
}
