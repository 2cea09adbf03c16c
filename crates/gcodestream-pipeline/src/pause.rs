//! Pause handling.
//!
//! Pauses on request (user, `@pause` / `M226` in the file, a configured layer,
//! or a filament runout), runs the pause macro, holds while paused, and on
//! resume returns the head to where the pause began before pulling the next
//! source line. A long pause nudges X back and forth so the steppers stay
//! energised and the parked position is not lost.
//!
//! Position reports received while the print is not `Printing` are kept
//! inside this stage: the stages below track the logical print position,
//! which must not move while the head is parked.

use crate::stream::{macro_lines, BoxedStream, GcodeStream};
use gcodestream_core::{
    command_is, first_number_after, format_number, get_position, has_no_processing, is_movement,
    layer_index, strip_comment, PrinterMove,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Distance after resume beyond which the reported position is flagged (mm)
const POSITION_TOLERANCE: f64 = 0.1;

/// Nudge applied before returning to the parked position so the firmware always moves
const RETURN_NUDGE: f64 = 0.01;

/// X travel of the keep-alive move while parked (mm)
const KEEP_ALIVE_NUDGE: f64 = 0.1;

/// Pause state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseState {
    /// Streaming the source
    Printing,
    /// Emitting the pause macro
    Pausing,
    /// Parked, waiting for resume
    Paused,
    /// Emitting the resume sequence
    Resuming,
}

impl PauseState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Pausing,
            2 => Self::Paused,
            3 => Self::Resuming,
            _ => Self::Printing,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Printing => 0,
            Self::Pausing => 1,
            Self::Paused => 2,
            Self::Resuming => 3,
        }
    }
}

impl fmt::Display for PauseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Printing => write!(f, "Printing"),
            Self::Pausing => write!(f, "Pausing"),
            Self::Paused => write!(f, "Paused"),
            Self::Resuming => write!(f, "Resuming"),
        }
    }
}

/// Why a pause began
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Requested from a control surface
    UserRequested,
    /// A configured pause layer was reached
    PauseLayerReached,
    /// `@pause` or `M226` in the G-code
    GCodeRequest,
    /// The filament sensor reported a runout
    FilamentRunout,
}

impl PauseReason {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::UserRequested),
            2 => Some(Self::PauseLayerReached),
            3 => Some(Self::GCodeRequest),
            4 => Some(Self::FilamentRunout),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::UserRequested => 1,
            Self::PauseLayerReached => 2,
            Self::GCodeRequest => 3,
            Self::FilamentRunout => 4,
        }
    }
}

#[derive(Debug, Default)]
struct ControlState {
    state: AtomicU8,
    reason: AtomicU8,
    pause_requested: AtomicU8,
    resume_requested: AtomicBool,
    position_mismatches: AtomicUsize,
}

/// Lock-free handle for pausing and resuming a running pipeline
///
/// Cloned handles share state. Requests are picked up on the next
/// `read_line` of the pause stage.
#[derive(Debug, Clone, Default)]
pub struct PauseControl {
    shared: Arc<ControlState>,
}

impl PauseControl {
    /// A control in the `Printing` state with no requests outstanding
    pub fn new() -> Self {
        Self::default()
    }

    /// Current pause state
    pub fn state(&self) -> PauseState {
        PauseState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Reason for the current (or last) pause
    pub fn reason(&self) -> Option<PauseReason> {
        PauseReason::from_u8(self.shared.reason.load(Ordering::Acquire))
    }

    /// Ask the pipeline to pause. Returns false when not printing.
    pub fn request_pause(&self, reason: PauseReason) -> bool {
        if self.state() != PauseState::Printing {
            return false;
        }
        self.shared
            .pause_requested
            .store(reason.as_u8(), Ordering::Release);
        true
    }

    /// Ask the pipeline to resume. Returns false unless pausing or paused.
    pub fn resume(&self) -> bool {
        match self.state() {
            PauseState::Pausing | PauseState::Paused => {
                self.shared.resume_requested.store(true, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// Number of post-resume position reports that disagreed with the pause point
    pub fn position_mismatches(&self) -> usize {
        self.shared.position_mismatches.load(Ordering::Acquire)
    }

    fn set_state(&self, state: PauseState) {
        self.shared.state.store(state.as_u8(), Ordering::Release);
    }

    fn set_reason(&self, reason: PauseReason) {
        self.shared.reason.store(reason.as_u8(), Ordering::Release);
    }

    fn take_pause_request(&self) -> Option<PauseReason> {
        PauseReason::from_u8(self.shared.pause_requested.swap(0, Ordering::AcqRel))
    }

    fn take_resume_request(&self) -> bool {
        self.shared.resume_requested.swap(false, Ordering::AcqRel)
    }

    fn record_mismatch(&self) {
        self.shared
            .position_mismatches
            .fetch_add(1, Ordering::AcqRel);
    }
}

/// Configuration for [`PauseHandling`]
#[derive(Debug, Clone, Default)]
pub struct PauseConfig {
    /// Macro run when a pause begins; `G91` / `G90` inside it are honoured
    pub pause_gcode: String,
    /// Macro run on resume, after the head is back at the parked position
    pub resume_gcode: String,
    /// 0-based layers that pause on their layer-change comment
    pub pause_layers: Vec<i32>,
    /// Feed rate for return and keep-alive moves (mm/min)
    pub travel_feed_rate: f64,
    /// Idle time while paused before the keep-alive move; `None` disables it
    pub keep_alive: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
enum Pending {
    /// Emitted as-is
    Raw(String),
    /// A macro line; relative moves are converted here
    Macro(String),
    /// Return moves to the parked position
    ReturnToPark,
    /// Moves back to the pause anchor if the macros were not symmetric
    Reconcile,
    /// Final position query of the resume sequence
    VerifyPosition,
    EnterPaused,
    FinishResume,
}

/// Stream stage implementing pause and resume
pub struct PauseHandling {
    inner: BoxedStream,
    control: PauseControl,
    config: PauseConfig,
    state: PauseState,
    pending: VecDeque<Pending>,
    last_destination: PrinterMove,
    anchor: PrinterMove,
    end_of_pause: PrinterMove,
    manual_move_delta: PrinterMove,
    macro_relative: bool,
    verify_next_report: bool,
    last_activity: Instant,
}

impl PauseHandling {
    /// Create a pause stage over `inner`
    pub fn new(inner: BoxedStream, control: PauseControl, config: PauseConfig) -> Self {
        control.set_state(PauseState::Printing);
        Self {
            inner,
            control,
            config,
            state: PauseState::Printing,
            pending: VecDeque::new(),
            last_destination: PrinterMove::UNKNOWN,
            anchor: PrinterMove::UNKNOWN,
            end_of_pause: PrinterMove::UNKNOWN,
            manual_move_delta: PrinterMove::ZERO,
            macro_relative: false,
            verify_next_report: false,
            last_activity: Instant::now(),
        }
    }

    /// Offset between the reported position and the parked position while paused
    pub fn manual_move_delta(&self) -> PrinterMove {
        self.manual_move_delta
    }

    fn set_state(&mut self, state: PauseState) {
        tracing::info!("Pause state {} -> {}", self.state, state);
        self.state = state;
        self.control.set_state(state);
    }

    fn begin_pause(&mut self, reason: PauseReason) {
        self.anchor = self.last_destination;
        self.macro_relative = false;
        self.manual_move_delta = PrinterMove::ZERO;
        self.control.set_reason(reason);
        tracing::info!("Pausing print ({:?})", reason);

        for line in macro_lines(&self.config.pause_gcode) {
            self.pending.push_back(Pending::Macro(line));
        }
        self.pending.push_back(Pending::Raw("M114".to_string()));
        self.pending.push_back(Pending::EnterPaused);
        self.set_state(PauseState::Pausing);
    }

    fn begin_resume(&mut self) {
        self.macro_relative = false;
        self.pending.push_back(Pending::ReturnToPark);
        for line in macro_lines(&self.config.resume_gcode) {
            self.pending.push_back(Pending::Macro(line));
        }
        self.pending.push_back(Pending::Reconcile);
        self.pending.push_back(Pending::VerifyPosition);
        self.pending.push_back(Pending::FinishResume);
        self.set_state(PauseState::Resuming);
    }

    fn is_pause_marker(line: &str) -> bool {
        line.trim_start().starts_with("@pause") || command_is(line, "M226")
    }

    fn track(&mut self, line: &str) {
        if is_movement(line) {
            self.last_destination = get_position(line, self.last_destination);
        } else if command_is(line, "G92") {
            let mut set = get_position(line, self.last_destination);
            set.feed_rate = self.last_destination.feed_rate;
            self.last_destination = set;
        }
    }

    fn emit(&mut self, line: String) -> Option<String> {
        self.track(&line);
        Some(line)
    }

    fn process_macro_line(&mut self, line: &str) -> String {
        let code = strip_comment(line).trim().to_ascii_uppercase();

        if command_is(&code, "G91") {
            self.macro_relative = true;
            return String::new();
        }
        if command_is(&code, "G90") {
            self.macro_relative = false;
            return String::new();
        }
        if !self.macro_relative || !is_movement(&code) {
            return code;
        }

        let mut output = if command_is(&code, "G0") {
            String::from("G0")
        } else {
            String::from("G1")
        };
        let current = self.last_destination;
        let axes = [
            ("X", current.position.x),
            ("Y", current.position.y),
            ("Z", current.position.z),
            ("E", current.extrusion),
        ];
        for (key, value) in axes {
            let Some(delta) = first_number_after(key, &code) else {
                continue;
            };
            if !value.is_finite() {
                tracing::warn!("Skipping relative {} in macro: position unknown", key);
                continue;
            }
            output.push_str(&format!(" {}{}", key, format_number(value + delta)));
        }
        if let Some(feed_rate) = first_number_after("F", &code) {
            output.push_str(&format!(" F{}", format_number(feed_rate)));
        }
        output
    }

    fn return_to_park_lines(&self) -> Vec<String> {
        let park = self.end_of_pause;
        let mut lines = Vec::new();

        if park.extrusion.is_finite() {
            lines.push(format!("G92 E{}", format_number(park.extrusion)));
        }

        if park.position_known() {
            let p = park.position;
            lines.push(format!(
                "G1 X{} Y{} Z{} F{}",
                format_number(p.x + RETURN_NUDGE),
                format_number(p.y + RETURN_NUDGE),
                format_number(p.z + RETURN_NUDGE),
                format_number(self.config.travel_feed_rate)
            ));
            lines.push(format!(
                "G1 X{} Y{} Z{}",
                format_number(p.x),
                format_number(p.y),
                format_number(p.z)
            ));
        } else {
            tracing::warn!("Parked position unknown, resuming without return move");
        }

        lines
    }

    fn reconcile_lines(&self) -> Vec<String> {
        let anchor = self.anchor;
        let current = self.last_destination;
        let mut lines = Vec::new();

        if anchor.position_known() && current.position.distance(anchor.position) > 1e-6 {
            tracing::debug!(
                "Resume macro left the head away from the pause point, moving back"
            );
            lines.push(format!(
                "G1 X{} Y{} Z{} F{}",
                format_number(anchor.position.x),
                format_number(anchor.position.y),
                format_number(anchor.position.z),
                format_number(self.config.travel_feed_rate)
            ));
        }

        if anchor.extrusion.is_finite() && (current.extrusion - anchor.extrusion).abs() > 1e-6 {
            lines.push(format!("G92 E{}", format_number(anchor.extrusion)));
        }

        if anchor.feed_rate.is_finite() && anchor.feed_rate != current.feed_rate {
            lines.push(format!("G1 F{}", format_number(anchor.feed_rate)));
        }

        lines
    }

    fn expand(&mut self, lines: Vec<String>) {
        for line in lines.into_iter().rev() {
            self.pending.push_front(Pending::Raw(line));
        }
    }

    /// Queue the X nudge when the pause has been idle long enough
    fn queue_keep_alive(&mut self) -> bool {
        let Some(interval) = self.config.keep_alive else {
            return false;
        };
        if self.last_activity.elapsed() < interval {
            return false;
        }
        self.last_activity = Instant::now();

        let x = self.last_destination.position.x;
        if !x.is_finite() {
            tracing::debug!("Parked X unknown, skipping keep-alive move");
            return false;
        }
        tracing::debug!("Keep-alive move while paused");
        self.pending.push_back(Pending::Raw(format!(
            "G1 X{} F{}",
            format_number(x + KEEP_ALIVE_NUDGE),
            format_number(self.config.travel_feed_rate)
        )));
        self.pending
            .push_back(Pending::Raw(format!("G1 X{}", format_number(x))));
        true
    }

    fn check_resumed_position(&mut self, reported: &PrinterMove) {
        self.verify_next_report = false;
        let anchor = self.anchor;
        let pairs = [
            (reported.position.x, anchor.position.x),
            (reported.position.y, anchor.position.y),
            (reported.position.z, anchor.position.z),
            (reported.extrusion, anchor.extrusion),
        ];
        let mismatch = pairs
            .iter()
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .any(|(a, b)| (a - b).abs() > POSITION_TOLERANCE);

        if mismatch {
            tracing::warn!(
                "Position after resume {:?} differs from pause point {:?}",
                reported,
                anchor
            );
            self.control.record_mismatch();
        }
    }
}

impl GcodeStream for PauseHandling {
    fn name(&self) -> &str {
        "pause"
    }

    fn read_line(&mut self) -> Option<String> {
        loop {
            match self.state {
                PauseState::Printing => {
                    if let Some(reason) = self.control.take_pause_request() {
                        self.begin_pause(reason);
                    }
                }
                PauseState::Paused => {
                    if self.control.take_resume_request() {
                        self.begin_resume();
                    }
                }
                PauseState::Pausing | PauseState::Resuming => {}
            }

            if let Some(item) = self.pending.pop_front() {
                match item {
                    Pending::Raw(line) => return self.emit(line),
                    Pending::Macro(line) => {
                        let line = self.process_macro_line(&line);
                        return self.emit(line);
                    }
                    Pending::ReturnToPark => {
                        let lines = self.return_to_park_lines();
                        self.expand(lines);
                    }
                    Pending::Reconcile => {
                        let lines = self.reconcile_lines();
                        self.expand(lines);
                    }
                    Pending::VerifyPosition => {
                        self.verify_next_report = true;
                        return Some("M114".to_string());
                    }
                    Pending::EnterPaused => {
                        self.end_of_pause = self.last_destination;
                        self.last_activity = Instant::now();
                        self.set_state(PauseState::Paused);
                        return Some(String::new());
                    }
                    Pending::FinishResume => {
                        self.set_state(PauseState::Printing);
                    }
                }
                continue;
            }

            if self.state != PauseState::Printing {
                if self.state == PauseState::Paused && self.queue_keep_alive() {
                    continue;
                }
                return Some(String::new());
            }

            let line = self.inner.read_line()?;
            self.last_activity = Instant::now();

            if has_no_processing(&line) {
                return Some(line);
            }

            if Self::is_pause_marker(&line) {
                self.begin_pause(PauseReason::GCodeRequest);
                return Some(String::new());
            }

            if let Some(layer) = layer_index(&line) {
                if self.config.pause_layers.contains(&layer) {
                    tracing::info!("Reached pause layer {}", layer);
                    self.begin_pause(PauseReason::PauseLayerReached);
                }
                return Some(line);
            }

            return self.emit(line);
        }
    }

    fn set_printer_position(&mut self, position: PrinterMove) {
        self.last_destination.copy_known(&position);

        if self.verify_next_report {
            self.check_resumed_position(&position);
        }

        match self.state {
            PauseState::Printing => self.inner.set_printer_position(position),
            PauseState::Paused => {
                if self.end_of_pause.fully_known() {
                    let mut delta = self.last_destination - self.end_of_pause;
                    delta.feed_rate = 0.0;
                    self.manual_move_delta = delta;
                }
            }
            PauseState::Pausing | PauseState::Resuming => {}
        }
    }

    fn cancel(&mut self) {
        self.pending.clear();
        self.inner.cancel();
    }

    fn debug_info(&self) -> String {
        format!(
            "pause ({}, {} pending) <- {}",
            self.state,
            self.pending.len(),
            self.inner.debug_info()
        )
    }
}
