use gcodestream_communication::{Emulator, PrintRunner, RunnerConfig};
use gcodestream_pipeline::{PauseReason, PauseState, PrintSession};
use gcodestream_settings::PrinterSettings;
use glam::DVec3;
use std::sync::Arc;
use std::time::Duration;

fn settings() -> PrinterSettings {
    let mut settings = PrinterSettings::default();
    settings.motion.enable_line_splitting = false;
    settings.print.heater_hold_seconds = 0.0;
    settings
}

fn fast_config() -> RunnerConfig {
    RunnerConfig {
        idle_delay: Duration::from_millis(1),
        poll_interval: Duration::from_millis(1),
        ok_timeout: Duration::from_millis(200),
        temperature_interval: Duration::ZERO,
        poll_temperatures: false,
        ..RunnerConfig::default()
    }
}

fn session(gcode: &str) -> Arc<PrintSession> {
    Arc::new(PrintSession::from_text(gcode, &settings()).unwrap())
}

#[tokio::test]
async fn test_streams_file_to_emulator() {
    let printer = Emulator::default();
    let session = session("G28\nG1 X10 Y10 Z0.3 F3000\nG1 X20 E1\n; done");

    let report = PrintRunner::new(printer.clone(), session)
        .with_config(fast_config())
        .run()
        .await
        .unwrap();

    assert_eq!(
        printer.received(),
        vec!["M114", "G28", "M114", "G1 X10 Y10 Z0.3 F3000", "G1 X20 E1"]
    );
    assert_eq!(report.lines_sent, 5);
    assert!(!report.cancelled);
    assert!(report.firmware_errors.is_empty());

    let state = printer.state();
    assert_eq!(state.position.position, DVec3::new(20.0, 10.0, 0.3));
    assert_eq!(state.position.extrusion, 1.0);
}

#[tokio::test]
async fn test_heater_wait_polls_temperatures() {
    let printer = Emulator::default().with_heating_rate(100.0);
    let session = session("M109 S200\nG28");

    PrintRunner::new(printer.clone(), session.clone())
        .with_config(fast_config())
        .run()
        .await
        .unwrap();

    let received = printer.received();
    assert_eq!(received[1], "M104 S200");
    assert_eq!(received[received.len() - 2..], ["G28", "M114"]);
    assert!(received.iter().filter(|line| *line == "M105").count() >= 2);
    assert!(session.temperatures().waiting_for().is_none());
    assert_eq!(session.temperatures().hotend(0), Some(200.0));
}

#[tokio::test]
async fn test_cancel_before_first_line() {
    let printer = Emulator::default();
    let session = session("G28\nG1 X10\nG1 X20");

    let runner = PrintRunner::new(printer.clone(), session.clone()).with_config(fast_config());
    runner.handle().cancel();
    let report = runner.run().await.unwrap();

    assert!(report.cancelled);
    assert!(session.is_cancelled());
    assert_eq!(printer.received(), vec!["M114"]);
}

#[tokio::test]
async fn test_disconnected_printer_fails() {
    let printer = Emulator::default();
    printer.disconnect();

    let err = PrintRunner::new(printer, session("G28"))
        .with_config(fast_config())
        .run()
        .await
        .unwrap_err();
    assert!(err.is_connection_error());
}

#[tokio::test]
async fn test_pause_jog_and_resume() {
    let printer = Emulator::default();
    let session = session("G1 X10 Y20 Z1 E5 F1800\n@pause\nG1 X30 Y20");

    let runner = PrintRunner::new(printer.clone(), session.clone()).with_config(fast_config());
    let task = tokio::spawn(runner.run());

    let control = async {
        while session.pause_state() != PauseState::Paused {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(printer.state().position.position, DVec3::new(10.0, 20.0, 11.0));

        session.queue_line("G1 X50 Y50");
        while !printer.received().iter().any(|line| line == "G1 X50 Y50") {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        session.resume().unwrap();
    };
    tokio::time::timeout(Duration::from_secs(10), control)
        .await
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let state = printer.state();
    assert_eq!(state.position.position, DVec3::new(30.0, 20.0, 1.0));
    assert_eq!(state.position.extrusion, 5.0);
    assert_eq!(report.position_mismatches, 0);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_relative_extrusion_across_offset_tool_change() {
    let mut settings = settings();
    settings.extruders.count = 2;
    settings.extruders.offsets = vec![DVec3::ZERO, DVec3::new(10.0, 0.0, 0.0)];
    let session = Arc::new(
        PrintSession::from_text(
            "T0\nG92 E0\nM83\nG1 X10 Y10 Z1 E1 F1200\nT1\nG1 X20 Y10 Z1 E2\nG1 X30 Y10 Z1 E3",
            &settings,
        )
        .unwrap(),
    );
    let printer = Emulator::new(2);

    PrintRunner::new(printer.clone(), session)
        .with_config(fast_config())
        .run()
        .await
        .unwrap();

    let state = printer.state();
    assert_eq!(state.tool, 1);
    assert_eq!(state.position.position, DVec3::new(20.0, 10.0, 1.0));
    assert_eq!(state.position.extrusion, 6.0);

    let received = printer.received();
    let switch = received.iter().position(|line| line == "T1").unwrap();
    assert_eq!(received[switch + 4], "G1 X10 Y10 Z1 E3");
    assert_eq!(received[switch + 5], "M114");
}

#[tokio::test]
async fn test_temperatures_polled_while_printing() {
    let printer = Emulator::default();
    let session = session("G1 X1 F600\nG1 X2\nG1 X3");
    let config = RunnerConfig {
        poll_temperatures: true,
        ..fast_config()
    };

    PrintRunner::new(printer.clone(), session.clone())
        .with_config(config)
        .run()
        .await
        .unwrap();

    let received = printer.received();
    assert!(received.iter().filter(|line| *line == "M105").count() >= 3);
    assert_eq!(received.iter().filter(|line| line.starts_with("G1")).count(), 3);
    assert_eq!(session.temperatures().hotend(0), Some(20.0));
}

#[tokio::test]
async fn test_filament_runout_pauses_print() {
    let printer = Emulator::default();
    printer.set_filament_present(false);
    let session = session("G1 X10 Y10 Z1 E1 F1200\nG1 X20 E2\nG1 X30 E3");
    let config = RunnerConfig {
        runout_sensor: true,
        endstop_interval: Duration::ZERO,
        ..fast_config()
    };

    let runner = PrintRunner::new(printer.clone(), session.clone()).with_config(config);
    let task = tokio::spawn(runner.run());

    let control = async {
        while session.pause_state() != PauseState::Paused {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(session.pause_reason(), Some(PauseReason::FilamentRunout));
        assert!(printer.received().iter().any(|line| line == "M119"));

        printer.set_filament_present(true);
        session.resume().unwrap();
    };
    tokio::time::timeout(Duration::from_secs(10), control)
        .await
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(!report.cancelled);
    let state = printer.state();
    assert_eq!(state.position.position, DVec3::new(30.0, 10.0, 1.0));
    assert_eq!(state.position.extrusion, 3.0);
}

#[tokio::test]
async fn test_runout_reports_ignored_without_sensor() {
    let printer = Emulator::default();
    printer.set_filament_present(false);
    let session = session("G1 X10 F1200\nM119\nG1 X20");

    PrintRunner::new(printer.clone(), session.clone())
        .with_config(fast_config())
        .run()
        .await
        .unwrap();

    assert_eq!(session.pause_reason(), None);
    assert_eq!(printer.state().position.position.x, 20.0);
}

#[tokio::test]
async fn test_read_error_fails_the_print() {
    let dir = tempfile::tempdir().unwrap();
    let session = Arc::new(PrintSession::from_file(dir.path(), &settings()).unwrap());

    let err = PrintRunner::new(Emulator::default(), session)
        .with_config(fast_config())
        .run()
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Read failed in"));
}
