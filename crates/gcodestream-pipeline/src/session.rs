//! Print session: one pipeline plus the handles that control it.

use crate::builder::{PipelineBuilder, PipelineHandles};
use crate::pause::{PauseReason, PauseState};
use crate::queued::CommandQueue;
use crate::source::{FileSource, MemorySource, ReadFailure};
use crate::stream::BoxedStream;
use crate::wait_for_temp::TemperatureReadings;
use gcodestream_core::{
    thread_safe, GcodeError, PipelineError, PrinterMove, Result, ThreadSafe,
};
use gcodestream_settings::PrinterSettings;
use std::path::Path;
use uuid::Uuid;

/// A running print
///
/// All methods take `&self`; wrap the session in an `Arc` to drive it from
/// the print runner and control it from elsewhere at the same time.
pub struct PrintSession {
    id: Uuid,
    pipeline: ThreadSafe<Option<BoxedStream>>,
    handles: PipelineHandles,
    read_failure: Option<ReadFailure>,
}

impl PrintSession {
    /// Build a session from any source stage
    pub fn new(source: BoxedStream, settings: &PrinterSettings) -> Result<Self> {
        Self::with_builder(source, PipelineBuilder::new(settings.clone()))
    }

    /// Build a session with a customised builder
    pub fn with_builder(source: BoxedStream, builder: PipelineBuilder) -> Result<Self> {
        let pipeline = builder.build(source)?;
        let session = Self {
            id: Uuid::new_v4(),
            pipeline: thread_safe(Some(pipeline)),
            handles: builder.handles().clone(),
            read_failure: None,
        };
        tracing::info!("Print session {} created", session.id);
        Ok(session)
    }

    /// Stream a G-code file
    pub fn from_file(path: impl AsRef<Path>, settings: &PrinterSettings) -> Result<Self> {
        let source = FileSource::open(path)?;
        let failure = source.failure();
        let mut session = Self::new(Box::new(source), settings)?;
        session.read_failure = Some(failure);
        Ok(session)
    }

    /// Stream G-code held in memory
    pub fn from_text(text: &str, settings: &PrinterSettings) -> Result<Self> {
        Self::new(Box::new(MemorySource::from_text(text)), settings)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next line to transmit; `None` once the print is finished or cancelled
    pub fn next_line(&self) -> Option<String> {
        self.pipeline.lock().as_mut()?.read_line()
    }

    /// The error that cut the source file short, if any
    ///
    /// `next_line` returns `None` both at the end of the file and after a read
    /// error; check this once the stream ends.
    pub fn read_error(&self) -> Option<GcodeError> {
        self.read_failure.as_ref()?.lock().clone()
    }

    /// Feed a position reported by the printer into the pipeline
    pub fn set_printer_position(&self, position: PrinterMove) {
        if let Some(pipeline) = self.pipeline.lock().as_mut() {
            pipeline.set_printer_position(position);
        }
    }

    /// Request a user pause
    pub fn pause(&self) -> Result<()> {
        self.ensure_active()?;
        if self.handles.pause.request_pause(PauseReason::UserRequested) {
            tracing::info!("Pause requested for session {}", self.id);
            return Ok(());
        }
        Err(PipelineError::InvalidStateTransition {
            current: self.pause_state().to_string(),
            requested: PauseState::Pausing.to_string(),
        }
        .into())
    }

    /// Resume a paused print
    pub fn resume(&self) -> Result<()> {
        self.ensure_active()?;
        if self.handles.pause.resume() {
            tracing::info!("Resume requested for session {}", self.id);
            return Ok(());
        }
        Err(PipelineError::InvalidStateTransition {
            current: self.pause_state().to_string(),
            requested: PauseState::Resuming.to_string(),
        }
        .into())
    }

    /// Pause because the filament sensor tripped. Returns false when not printing.
    pub fn filament_runout(&self) -> bool {
        let accepted = self.handles.pause.request_pause(PauseReason::FilamentRunout);
        if accepted {
            tracing::warn!("Filament runout, pausing session {}", self.id);
        }
        accepted
    }

    pub fn pause_state(&self) -> PauseState {
        self.handles.pause.state()
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.handles.pause.reason()
    }

    /// Post-resume position reports that disagreed with the pause point
    pub fn position_mismatches(&self) -> usize {
        self.handles.pause.position_mismatches()
    }

    /// Inject one or more newline-separated lines ahead of the file
    pub fn queue_line(&self, text: &str) {
        self.handles.queue.add(text);
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.handles.queue
    }

    pub fn set_feed_rate_ratio(&self, ratio: f64) {
        tracing::info!("Feed rate ratio set to {:.2}", ratio);
        self.handles.ratios.feed_rate.store(ratio);
    }

    pub fn feed_rate_ratio(&self) -> f64 {
        self.handles.ratios.feed_rate.load()
    }

    pub fn set_extrusion_ratio(&self, ratio: f64) {
        tracing::info!("Extrusion ratio set to {:.2}", ratio);
        self.handles.ratios.extrusion.store(ratio);
    }

    pub fn extrusion_ratio(&self) -> f64 {
        self.handles.ratios.extrusion.load()
    }

    /// Set the absolute baby-step Z offset (mm)
    pub fn set_baby_step_offset(&self, offset: f64) {
        self.handles.ratios.baby_step_z.store(offset);
    }

    /// Adjust the baby-step Z offset by `delta`, returning the new offset
    pub fn baby_step(&self, delta: f64) -> f64 {
        let offset = self.handles.ratios.baby_step_z.fetch_add(delta) + delta;
        tracing::debug!("Baby-step offset {:.3}", offset);
        offset
    }

    pub fn baby_step_offset(&self) -> f64 {
        self.handles.ratios.baby_step_z.load()
    }

    /// Heater readings, written by the response parser
    pub fn temperatures(&self) -> &TemperatureReadings {
        &self.handles.temperatures
    }

    /// Stop the print and tear the pipeline down
    pub fn cancel(&self) {
        let pipeline = self.pipeline.lock().take();
        self.handles.queue.clear();
        if let Some(mut pipeline) = pipeline {
            pipeline.cancel();
            tracing::info!("Print session {} cancelled", self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.pipeline.lock().is_none()
    }

    /// Stage chain description, outermost first
    pub fn debug_info(&self) -> String {
        match self.pipeline.lock().as_ref() {
            Some(pipeline) => pipeline.debug_info(),
            None => format!("session {} (cancelled)", self.id),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled {
                id: self.id.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for PrintSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintSession")
            .field("id", &self.id)
            .field("state", &self.pause_state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings() -> PrinterSettings {
        let mut settings = PrinterSettings::default();
        settings.motion.enable_line_splitting = false;
        settings
    }

    #[test]
    fn test_session_streams_text() {
        let session = PrintSession::from_text("G28\nG1 X10 F3000\n", &settings()).unwrap();
        assert_eq!(session.next_line().as_deref(), Some("G28"));
        assert_eq!(session.next_line().as_deref(), Some("G1 X10 F3000"));
        assert_eq!(session.next_line(), None);
    }

    #[test]
    fn test_queued_line_goes_first() {
        let session = PrintSession::from_text("G28", &settings()).unwrap();
        session.queue_line("M105");
        assert_eq!(session.next_line().as_deref(), Some("M105"));
        assert_eq!(session.next_line().as_deref(), Some("G28"));
    }

    #[test]
    fn test_resume_while_printing_is_rejected() {
        let session = PrintSession::from_text("G28", &settings()).unwrap();
        let err = session.resume().unwrap_err();
        assert!(err.is_pipeline_error());
        assert!(err.to_string().contains("Printing"));
    }

    #[test]
    fn test_cancel_ends_stream() {
        let session = PrintSession::from_text("G28\nG28", &settings()).unwrap();
        session.queue_line("M105");
        session.cancel();

        assert!(session.is_cancelled());
        assert!(session.queue().is_empty());
        assert_eq!(session.next_line(), None);
        assert!(session.pause().is_err());
        assert!(session.debug_info().contains("cancelled"));
    }

    #[test]
    fn test_baby_step_accumulates() {
        let session = PrintSession::from_text("", &settings()).unwrap();
        session.baby_step(0.05);
        let offset = session.baby_step(-0.02);
        assert!((offset - 0.03).abs() < 1e-12);
        assert!((session.baby_step_offset() - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_file_with_invalid_utf8_streams_to_the_end() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"G1 X1\n; temp 210\xB0C\nG1 X2\nG1 X3\n").unwrap();

        let session = PrintSession::from_file(file.path(), &settings()).unwrap();
        let lines: Vec<String> = std::iter::from_fn(|| session.next_line())
            .filter(|line| !line.is_empty())
            .collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines.last().map(String::as_str), Some("G1 X3"));
        assert!(session.read_error().is_none());
    }

    #[test]
    fn test_read_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let session = PrintSession::from_file(dir.path(), &settings()).unwrap();

        assert_eq!(session.next_line(), None);
        let err = session.read_error().unwrap();
        assert!(err.to_string().starts_with("Read failed in"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = PrintSession::from_file("/nonexistent/print.gcode", &settings()).unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }
}
