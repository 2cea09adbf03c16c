//! Live Z offset (baby-stepping).

use crate::stream::{BoxedStream, GcodeStream};
use gcodestream_core::{
    command_is, first_number_after, has_no_processing, is_movement, set_number_after,
    PrinterMove, SharedValue,
};

/// Adds the shared Z offset to every outgoing Z
///
/// Reported positions have the applied offset removed before they are passed
/// down, so stages below keep tracking logical Z.
pub struct BabySteps {
    inner: BoxedStream,
    offset: SharedValue,
    applied: f64,
    last_z: f64,
}

impl BabySteps {
    pub fn new(inner: BoxedStream, offset: SharedValue) -> Self {
        Self {
            inner,
            offset,
            applied: 0.0,
            last_z: f64::INFINITY,
        }
    }

    fn adjust(&mut self, line: String) -> String {
        let offset = self.offset.load();

        if let Some(z) = first_number_after("Z", &line) {
            self.last_z = z;
            self.applied = offset;
            if offset != 0.0 {
                return set_number_after(&line, "Z", z + offset);
            }
            return line;
        }

        if offset != self.applied && self.last_z.is_finite() && is_movement(&line) {
            tracing::debug!("Baby-step offset now {:.3}", offset);
            self.applied = offset;
            return set_number_after(&line, "Z", self.last_z + offset);
        }

        line
    }
}

impl GcodeStream for BabySteps {
    fn name(&self) -> &str {
        "baby_steps"
    }

    fn read_line(&mut self) -> Option<String> {
        let line = self.inner.read_line()?;

        if has_no_processing(&line) {
            return Some(line);
        }

        if is_movement(&line) || command_is(&line, "G92") {
            return Some(self.adjust(line));
        }

        Some(line)
    }

    fn set_printer_position(&mut self, position: PrinterMove) {
        let mut logical = position;
        if logical.position.z.is_finite() {
            logical.position.z -= self.applied;
            self.last_z = logical.position.z;
        }
        self.inner.set_printer_position(logical);
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }

    fn debug_info(&self) -> String {
        format!(
            "baby_steps (offset {:.3}) <- {}",
            self.applied,
            self.inner.debug_info()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use gcodestream_core::AtomicF64;
    use std::sync::Arc;

    #[test]
    fn test_zero_offset_is_untouched() {
        let offset = Arc::new(AtomicF64::new(0.0));
        let mut stage = BabySteps::new(
            Box::new(MemorySource::new(vec!["G1 X1 Z0.2", "G1 X2"])),
            offset,
        );
        assert_eq!(stage.read_line().as_deref(), Some("G1 X1 Z0.2"));
        assert_eq!(stage.read_line().as_deref(), Some("G1 X2"));
    }

    #[test]
    fn test_offset_applied_and_added_on_change() {
        let offset = Arc::new(AtomicF64::new(0.0));
        let mut stage = BabySteps::new(
            Box::new(MemorySource::new(vec!["G1 X1 Z0.2", "G1 X2", "G1 X3", "G1 Z0.4"])),
            offset.clone(),
        );
        assert_eq!(stage.read_line().as_deref(), Some("G1 X1 Z0.2"));

        offset.store(0.05);
        assert_eq!(stage.read_line().as_deref(), Some("G1 X2 Z0.25"));
        assert_eq!(stage.read_line().as_deref(), Some("G1 X3"));
        assert_eq!(stage.read_line().as_deref(), Some("G1 Z0.45"));
    }

    #[test]
    fn test_reported_z_has_offset_removed() {
        let offset = Arc::new(AtomicF64::new(0.1));
        let mut stage =
            BabySteps::new(Box::new(MemorySource::new(vec!["G1 Z1", "G1 X5"])), offset.clone());
        assert_eq!(stage.read_line().as_deref(), Some("G1 Z1.1"));

        let mut report = PrinterMove::UNKNOWN;
        report.position.z = 1.1;
        stage.set_printer_position(report);
        assert!((stage.last_z - 1.0).abs() < 1e-9);
    }
}
