//! End-to-end scenarios through single stages and the assembled pipeline

use gcodestream_core::{command_is, get_position, is_movement, strip_comment, PrinterMove};
use gcodestream_pipeline::{
    is_nop, GcodeStream, MaxLength, MemorySource, PauseState, PrintSession, ToolChange,
    ToolChangeConfig,
};
use gcodestream_settings::PrinterSettings;
use glam::DVec3;

fn drain(stream: &mut dyn GcodeStream) -> Vec<String> {
    std::iter::from_fn(|| stream.read_line()).collect()
}

fn drain_session(session: &PrintSession) -> Vec<String> {
    std::iter::from_fn(|| session.next_line())
        .filter(|line| !is_nop(line))
        .collect()
}

/// Sends a session to a simulated absolute-mode printer, answering every
/// `M114` with where that printer is. Returns the lines sent and the final
/// printer position.
fn replay(session: &PrintSession) -> (Vec<String>, PrinterMove) {
    let mut printer = PrinterMove::ZERO;
    let mut sent = Vec::new();
    while let Some(line) = session.next_line() {
        let code = strip_comment(&line).trim().to_string();
        if code.is_empty() {
            continue;
        }
        if code == "M114" {
            let mut report = printer;
            report.feed_rate = f64::INFINITY;
            session.set_printer_position(report);
        } else if is_movement(&code) || command_is(&code, "G92") {
            printer = get_position(&code, printer);
        }
        sent.push(code);
    }
    (sent, printer)
}

const RELATIVE_E_TOOL_SWITCH: &str =
    "T0\nG92 E0\nM83\nG1 X10 Y10 Z1 E1 F1200\nT1\nG1 X20 Y10 Z1 E2\nG1 X30 Y10 Z1 E3";

const MAX_LENGTH_INPUT: [&str; 5] = [
    "G1 X0 Y0 Z0 E0 F500",
    "M105",
    "G1 X18 Y0 Z0 F2500",
    "G28",
    "G1 X0 Y0 Z0 E0 F500",
];

const MAX_LENGTH_OUTPUT: [&str; 9] = [
    "G1 X0 Y0 Z0 E0 F500",
    "M105",
    "G1 X6 F2500",
    "G1 X12",
    "G1 X18",
    "G28",
    "G1 X12 F500",
    "G1 X6",
    "G1 X0",
];

#[test]
fn test_max_length_splits_long_moves() {
    let mut stage = MaxLength::new(Box::new(MemorySource::new(MAX_LENGTH_INPUT)), 6.0, 0.05);
    assert_eq!(drain(&mut stage), MAX_LENGTH_OUTPUT);
}

#[test]
fn test_full_pipeline_splits_long_moves() {
    let mut settings = PrinterSettings::default();
    settings.motion.max_segment_length = 6.0;

    let session = PrintSession::from_text(&MAX_LENGTH_INPUT.join("\n"), &settings).unwrap();
    assert_eq!(drain_session(&session), MAX_LENGTH_OUTPUT);
}

#[test]
fn test_tool_switch_elided_without_move() {
    let mut stage = ToolChange::new(
        Box::new(MemorySource::new(["T0", "T1", "T0", "G1 X10"])),
        ToolChangeConfig::default(),
        None,
    );
    let output: Vec<String> = drain(&mut stage).into_iter().filter(|l| !is_nop(l)).collect();
    assert_eq!(output, vec!["T0", "M114", "G1 X10"]);
    assert_eq!(stage.active_tool(), Some(0));
    assert_eq!(stage.pending_tool(), None);
}

#[test]
fn test_relative_file_becomes_absolute() {
    let mut settings = PrinterSettings::default();
    settings.motion.enable_line_splitting = false;

    let gcode = "G92 X0 Y0 Z0 E0\nG91\nG1 X5 E1 F1200\nG1 X5 E1\nG90\nG1 X20\nM83\nG1 E2";
    let session = PrintSession::from_text(gcode, &settings).unwrap();
    assert_eq!(
        drain_session(&session),
        vec![
            "G92 X0 Y0 Z0 E0",
            "G1 X5 E1 F1200",
            "G1 X10 E2",
            "G90",
            "G1 X20",
            "G1 E4",
        ]
    );
}

#[test]
fn test_session_pause_resume_round_trip() {
    let mut settings = PrinterSettings::default();
    settings.motion.enable_line_splitting = false;

    let session =
        PrintSession::from_text("G1 X10 Y20 Z1 E5 F1800\nG1 X30\nG1 X40", &settings).unwrap();
    assert_eq!(session.next_line().as_deref(), Some("G1 X10 Y20 Z1 E5 F1800"));

    session.pause().unwrap();
    let mut printer = PrinterMove::ZERO;
    printer = get_position("G1 X10 Y20 Z1 E5 F1800", printer);
    while session.pause_state() != PauseState::Paused {
        let line = session.next_line().unwrap();
        printer = get_position(&line, printer);
    }
    assert!(printer.position.z > 1.0);

    // jog while parked; the report must not leak into the logical position
    session.queue_line("G1 X100 Y100");
    let jog = session.next_line().unwrap();
    assert_eq!(jog, "G1 X100 Y100");
    printer = get_position(&jog, printer);
    session.set_printer_position(printer);

    session.resume().unwrap();
    let next = loop {
        let line = session.next_line().unwrap();
        if session.pause_state() == PauseState::Printing && !is_nop(&line) && line != "M114" {
            break line;
        }
        printer = get_position(&line, printer);
    };

    assert_eq!(printer.position, DVec3::new(10.0, 20.0, 1.0));
    assert_eq!(printer.extrusion, 5.0);
    assert_eq!(next, "G1 X30");
}

#[test]
fn test_ratio_changes_apply_to_following_lines() {
    let mut settings = PrinterSettings::default();
    settings.motion.enable_line_splitting = false;

    let session =
        PrintSession::from_text("G1 X1 E1 F1000\nG1 X2 E2\nG1 X3 E3 F1000", &settings).unwrap();
    assert_eq!(session.next_line().as_deref(), Some("G1 X1 E1 F1000"));

    session.set_extrusion_ratio(1.5);
    session.set_feed_rate_ratio(2.0);
    assert_eq!(session.next_line().as_deref(), Some("G1 X2 E2.5"));
    assert_eq!(session.next_line().as_deref(), Some("G1 X3 E4 F2000"));
}

#[test]
fn test_heater_wait_holds_session() {
    let mut settings = PrinterSettings::default();
    settings.print.heater_hold_seconds = 0.0;

    let session = PrintSession::from_text("M109 S200\nG28", &settings).unwrap();
    assert_eq!(session.next_line().as_deref(), Some("M104 S200"));
    assert_eq!(session.next_line().as_deref(), Some(""));

    session.temperatures().set_hotend(0, 199.5);
    assert_eq!(session.next_line().as_deref(), Some("G28"));
}

#[test]
fn test_baby_step_through_session() {
    let mut settings = PrinterSettings::default();
    settings.motion.enable_line_splitting = false;

    let session = PrintSession::from_text("G1 X1 Z0.2 F600\nG1 X2\nG1 X3", &settings).unwrap();
    assert_eq!(session.next_line().as_deref(), Some("G1 X1 Z0.2 F600"));
    session.baby_step(0.1);
    assert_eq!(session.next_line().as_deref(), Some("G1 X2 Z0.3"));
    assert_eq!(session.next_line().as_deref(), Some("G1 X3"));
}

#[test]
fn test_no_processing_lines_untouched() {
    let mut settings = PrinterSettings::default();
    settings.motion.max_segment_length = 1.0;

    let session = PrintSession::from_text(
        "G1 X0 Y0 Z0 E0 F6000\nG91 ; NO_PROCESSING\nG1 X50 ; NO_PROCESSING",
        &settings,
    )
    .unwrap();
    session.set_feed_rate_ratio(2.0);
    assert_eq!(
        drain_session(&session),
        vec!["G1 X0 Y0 Z0 E0 F12000", "G91 ; NO_PROCESSING", "G1 X50 ; NO_PROCESSING"]
    );
}

#[test]
fn test_relative_extrusion_survives_tool_switch() {
    let mut settings = PrinterSettings::default();
    settings.motion.enable_line_splitting = false;
    settings.extruders.count = 2;

    let session = PrintSession::from_text(RELATIVE_E_TOOL_SWITCH, &settings).unwrap();
    let (sent, printer) = replay(&session);

    assert_eq!(
        sent,
        vec![
            "T0",
            "M114",
            "G92 E0",
            "G1 X10 Y10 Z1 E1 F1200",
            "T1",
            "G1 X10 Y10 F3000",
            "G1 Z1 F315",
            "G1 F1200",
            "G1 X20 Y10 Z1 E3",
            "M114",
            "G1 X30 Y10 Z1 E6",
        ]
    );
    assert_eq!(printer.position, DVec3::new(30.0, 10.0, 1.0));
    assert_eq!(printer.extrusion, 6.0);
}

#[test]
fn test_position_query_after_switch_sees_offset_move() {
    let mut settings = PrinterSettings::default();
    settings.motion.enable_line_splitting = false;
    settings.extruders.count = 2;
    settings.extruders.offsets = vec![DVec3::ZERO, DVec3::new(10.0, 0.0, 0.0)];

    let session = PrintSession::from_text(RELATIVE_E_TOOL_SWITCH, &settings).unwrap();
    let (sent, printer) = replay(&session);

    let switch = sent.iter().position(|line| line == "T1").unwrap();
    assert_eq!(
        &sent[switch..],
        &[
            "T1",
            "G1 X0 Y10 F3000",
            "G1 Z1 F315",
            "G1 F1200",
            "G1 X10 Y10 Z1 E3",
            "M114",
            "G1 X20 Y10 Z1 E6",
        ]
    );
    assert_eq!(printer.position, DVec3::new(20.0, 10.0, 1.0));
    assert_eq!(printer.extrusion, 6.0);
}
