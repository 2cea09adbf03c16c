//! Print runner
//!
//! Drives a [`PrintSession`] against a [`Connection`]: pulls lines from the
//! pipeline, sends them one at a time waiting for `ok`, and feeds position
//! and temperature reports back into the session. Temperatures are polled
//! with `M105` and, with a runout sensor fitted, the endstops with `M119`.

use crate::connection::Connection;
use crate::responses::{acknowledges, PrinterResponse};
use crate::runout::RunoutMonitor;
use gcodestream_core::{command, has_no_processing, is_movement, strip_comment, Result};
use gcodestream_pipeline::{PauseState, PrintSession};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Timing for [`PrintRunner`]
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Sleep after a line with nothing to send
    pub idle_delay: Duration,
    /// Delay between response polls while waiting for `ok`
    pub poll_interval: Duration,
    /// Give up waiting for `ok` after this long and carry on
    pub ok_timeout: Duration,
    /// Minimum time between `M105` queries
    pub temperature_interval: Duration,
    /// Query temperatures throughout the print, not only during heater waits
    pub poll_temperatures: bool,
    /// Watch for filament runout reports and pause on them
    pub runout_sensor: bool,
    /// Minimum time between `M119` queries while printing with a runout sensor
    pub endstop_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_millis(10),
            poll_interval: Duration::from_millis(1),
            ok_timeout: Duration::from_secs(30),
            temperature_interval: Duration::from_secs(1),
            poll_temperatures: true,
            runout_sensor: false,
            endstop_interval: Duration::from_secs(5),
        }
    }
}

/// Summary of a finished (or cancelled) print
#[derive(Debug, Clone)]
pub struct PrintReport {
    pub session_id: Uuid,
    /// Lines written to the printer, including position queries
    pub lines_sent: u64,
    pub duration: Duration,
    /// Post-resume position reports that disagreed with the pause point
    pub position_mismatches: usize,
    pub cancelled: bool,
    /// Fault messages reported by the firmware
    pub firmware_errors: Vec<String>,
}

/// Cancels a running print from another task
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    cancelled: Arc<AtomicBool>,
}

impl RunnerHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// The code to transmit for a pipeline line, and whether a position query
/// must follow it. `None` means there is nothing to send.
///
/// Comments (including the `NO_PROCESSING` marker) are stripped. Moves that
/// bypassed the pipeline and homing/probing commands leave the tracked
/// position stale, so they are followed by `M114`.
pub fn prepare_line(line: &str) -> Option<(String, bool)> {
    let code = strip_comment(line).trim();
    if code.is_empty() {
        return None;
    }

    let unprocessed_move = has_no_processing(line) && is_movement(code);
    let rehomes = matches!(command(code), Some(('G', n)) if n == 28.0 || n == 29.0);

    Some((code.to_string(), unprocessed_move || rehomes))
}

/// Streams one print session to one connection
pub struct PrintRunner<C: Connection> {
    connection: C,
    session: Arc<PrintSession>,
    config: RunnerConfig,
    cancelled: Arc<AtomicBool>,
    lines_sent: u64,
    last_temperature_query: Option<Instant>,
    last_endstop_query: Option<Instant>,
    runout: RunoutMonitor,
    firmware_errors: Vec<String>,
}

impl<C: Connection> PrintRunner<C> {
    pub fn new(connection: C, session: Arc<PrintSession>) -> Self {
        Self {
            connection,
            session,
            config: RunnerConfig::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
            lines_sent: 0,
            last_temperature_query: None,
            last_endstop_query: None,
            runout: RunoutMonitor::new(),
            firmware_errors: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Handle for cancelling the print while [`run`](Self::run) is awaited elsewhere
    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    /// Run the print to completion or cancellation
    pub async fn run(mut self) -> Result<PrintReport> {
        let started = Instant::now();
        tracing::info!(
            "Starting print session {} on {}",
            self.session.id(),
            self.connection.name()
        );

        // Seed the pipeline with the printer's actual position
        self.send("M114").await?;

        loop {
            if self.cancelled.load(Ordering::Acquire) {
                self.session.cancel();
                break;
            }

            let Some(line) = self.session.next_line() else {
                if let Some(error) = self.session.read_error() {
                    tracing::error!(
                        "Print session {} stopped early: {}",
                        self.session.id(),
                        error
                    );
                    return Err(error.into());
                }
                break;
            };

            match prepare_line(&line) {
                Some((code, query_position)) => {
                    self.send(&code).await?;
                    if query_position {
                        self.send("M114").await?;
                    }
                    self.query_endstops().await?;
                }
                None => self.idle().await?,
            }

            self.query_temperatures().await?;
        }

        let report = PrintReport {
            session_id: self.session.id(),
            lines_sent: self.lines_sent,
            duration: started.elapsed(),
            position_mismatches: self.session.position_mismatches(),
            cancelled: self.session.is_cancelled(),
            firmware_errors: self.firmware_errors,
        };
        tracing::info!(
            "Print session {} {} after {} lines in {:.1}s",
            report.session_id,
            if report.cancelled { "cancelled" } else { "finished" },
            report.lines_sent,
            report.duration.as_secs_f64()
        );
        Ok(report)
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.connection.send_line(line)?;
        self.lines_sent += 1;

        let deadline = Instant::now() + self.config.ok_timeout;
        loop {
            let mut acknowledged = false;
            for response in self.connection.poll_responses()? {
                acknowledged |= acknowledges(&response);
                self.handle_response(&response);
            }
            if acknowledged {
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    "No ok for '{}' after {:?}, continuing",
                    line,
                    self.config.ok_timeout
                );
                return Ok(());
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn idle(&mut self) -> Result<()> {
        for response in self.connection.poll_responses()? {
            self.handle_response(&response);
        }
        tokio::time::sleep(self.config.idle_delay).await;
        Ok(())
    }

    async fn query_temperatures(&mut self) -> Result<()> {
        let waiting = self.session.temperatures().waiting_for().is_some();
        if !self.config.poll_temperatures && !waiting {
            return Ok(());
        }
        let due = self
            .last_temperature_query
            .is_none_or(|last| last.elapsed() >= self.config.temperature_interval);
        if due {
            self.last_temperature_query = Some(Instant::now());
            self.send("M105").await?;
        }
        Ok(())
    }

    async fn query_endstops(&mut self) -> Result<()> {
        if !self.config.runout_sensor || self.session.pause_state() != PauseState::Printing {
            return Ok(());
        }
        let due = self
            .last_endstop_query
            .is_none_or(|last| last.elapsed() >= self.config.endstop_interval);
        if due {
            self.last_endstop_query = Some(Instant::now());
            self.send("M119").await?;
        }
        Ok(())
    }

    fn handle_response(&mut self, line: &str) {
        if self.config.runout_sensor && self.runout.check(line) {
            self.session.filament_runout();
        }

        match PrinterResponse::parse(line) {
            PrinterResponse::Position(position) => {
                tracing::debug!("Printer position {:?}", position);
                self.session.set_printer_position(position);
            }
            PrinterResponse::Temperatures(report) => {
                let temperatures = self.session.temperatures();
                for (tool, value) in report.hotends {
                    temperatures.set_hotend(tool, value);
                }
                if let Some(bed) = report.bed {
                    temperatures.set_bed(bed);
                }
            }
            PrinterResponse::Error(message) => {
                tracing::warn!("Firmware reported: {}", message);
                self.firmware_errors.push(message);
            }
            PrinterResponse::Ok | PrinterResponse::Message(_) => {
                tracing::trace!("<- {}", line);
            }
        }
    }
}
