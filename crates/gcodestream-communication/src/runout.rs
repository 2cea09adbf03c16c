//! Filament runout detection from firmware telemetry.
//!
//! Two kinds of sensor report are understood:
//!
//! - switch sensors, reported in the `M119` endstop listing as
//!   `ros_0: TRIGGERED` once the filament is gone
//! - position sensors, reporting `pos_ SENSOR:<mm> STEPPER:<mm>`; filament
//!   that stops following the extruder stepper means a runout or a jam

use gcodestream_core::first_number_after;

/// Sensor readings within this distance of zero are noise (mm)
const SENSOR_NOISE: f64 = 1.0;

/// Stepper travel needed before a sensor comparison is made (mm)
const MIN_STEPPER_TRAVEL: f64 = 1.0;

/// Sensor/stepper travel ratios outside this range are discrepancies
const RATIO_RANGE: (f64, f64) = (0.5, 2.0);

/// Consecutive discrepancies needed to declare a runout
const MAX_DISCREPANCIES: u32 = 2;

/// Watches response lines for a filament runout
#[derive(Debug, Clone, Default)]
pub struct RunoutMonitor {
    position_sensor_detected: bool,
    last_sensor: f64,
    last_stepper: f64,
    discrepancies: u32,
}

impl RunoutMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a position sensor has reported real movement
    pub fn position_sensor_detected(&self) -> bool {
        self.position_sensor_detected
    }

    /// Inspect one response line; true when it signals a runout
    pub fn check(&mut self, line: &str) -> bool {
        if line.contains("ros_") && line.contains("TRIGGERED") {
            tracing::warn!("Runout sensor triggered: {}", line.trim());
            return true;
        }
        if line.contains("pos_") {
            return self.check_position_sensor(line);
        }
        false
    }

    fn check_position_sensor(&mut self, line: &str) -> bool {
        let Some(sensor) = first_number_after("SENSOR:", line) else {
            return false;
        };
        if sensor.abs() > SENSOR_NOISE {
            self.position_sensor_detected = true;
        }
        if !self.position_sensor_detected {
            return false;
        }

        let stepper = first_number_after("STEPPER:", line).unwrap_or(0.0);
        let stepper_delta = (stepper - self.last_stepper).abs();
        if stepper_delta <= MIN_STEPPER_TRAVEL {
            return false;
        }

        let sensor_delta = (sensor - self.last_sensor).abs();
        let ratio = sensor_delta / stepper_delta;
        self.last_sensor = sensor;
        self.last_stepper = stepper;

        if ratio >= RATIO_RANGE.0 && ratio <= RATIO_RANGE.1 {
            self.discrepancies = 0;
            return false;
        }

        self.discrepancies += 1;
        tracing::debug!(
            "Filament moved {:.2}mm for {:.2}mm of stepper travel ({} in a row)",
            sensor_delta,
            stepper_delta,
            self.discrepancies
        );
        if self.discrepancies > MAX_DISCREPANCIES {
            self.discrepancies = 0;
            tracing::warn!("Filament stopped following the extruder");
            return true;
        }
        false
    }
}
