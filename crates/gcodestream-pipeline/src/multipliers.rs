//! Live feed-rate and extrusion ratios.

use crate::stream::{BoxedStream, GcodeStream};
use gcodestream_core::{
    command_is, first_number_after, has_no_processing, is_movement, set_number_after,
    PrinterMove, SharedValue,
};

/// Values closer than this are treated as unchanged
const EPSILON: f64 = 1e-9;

/// Scales every `F` word by the shared feed-rate ratio
pub struct FeedRateMultiplier {
    inner: BoxedStream,
    ratio: SharedValue,
}

impl FeedRateMultiplier {
    /// Scale feed rates from `inner` by `ratio`, read on every line
    pub fn new(inner: BoxedStream, ratio: SharedValue) -> Self {
        Self { inner, ratio }
    }
}

impl GcodeStream for FeedRateMultiplier {
    fn name(&self) -> &str {
        "feed_rate_multiplier"
    }

    fn read_line(&mut self) -> Option<String> {
        let line = self.inner.read_line()?;

        if has_no_processing(&line) || !is_movement(&line) {
            return Some(line);
        }

        let ratio = self.ratio.load();
        if ratio == 1.0 {
            return Some(line);
        }

        match first_number_after("F", &line) {
            Some(feed_rate) => Some(set_number_after(&line, "F", feed_rate * ratio)),
            None => Some(line),
        }
    }

    fn set_printer_position(&mut self, position: PrinterMove) {
        self.inner.set_printer_position(position);
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }

    fn debug_info(&self) -> String {
        format!(
            "feed_rate_multiplier (x{:.2}) <- {}",
            self.ratio.load(),
            self.inner.debug_info()
        )
    }
}

/// Scales extrusion by the shared extrusion ratio
///
/// Works on deltas: each move adds `(requested E - previous requested E) * ratio`
/// to the emitted E, so a ratio change affects only extrusion that follows it.
pub struct ExtrusionMultiplier {
    inner: BoxedStream,
    ratio: SharedValue,
    previous_requested: f64,
    actual: f64,
}

impl ExtrusionMultiplier {
    pub fn new(inner: BoxedStream, ratio: SharedValue) -> Self {
        Self {
            inner,
            ratio,
            previous_requested: f64::INFINITY,
            actual: f64::INFINITY,
        }
    }

    fn scale(&mut self, line: String) -> String {
        let Some(requested) = first_number_after("E", &line) else {
            return line;
        };

        if !self.previous_requested.is_finite() || !self.actual.is_finite() {
            self.previous_requested = requested;
            self.actual = requested;
            return line;
        }

        let ratio = self.ratio.load();
        let mut actual = self.actual + (requested - self.previous_requested) * ratio;
        self.previous_requested = requested;

        if (actual - requested).abs() <= EPSILON {
            actual = requested;
            self.actual = actual;
            return line;
        }

        self.actual = actual;
        set_number_after(&line, "E", actual)
    }
}

impl GcodeStream for ExtrusionMultiplier {
    fn name(&self) -> &str {
        "extrusion_multiplier"
    }

    fn read_line(&mut self) -> Option<String> {
        let line = self.inner.read_line()?;

        if has_no_processing(&line) {
            return Some(line);
        }

        if command_is(&line, "G92") {
            if let Some(e) = first_number_after("E", &line) {
                self.previous_requested = e;
                self.actual = e;
            }
            return Some(line);
        }

        if is_movement(&line) {
            return Some(self.scale(line));
        }

        Some(line)
    }

    fn set_printer_position(&mut self, position: PrinterMove) {
        let mut requested_frame = position;
        if position.extrusion.is_finite() {
            if self.previous_requested.is_finite() && self.actual.is_finite() {
                requested_frame.extrusion =
                    self.previous_requested + (position.extrusion - self.actual);
            }
            self.actual = position.extrusion;
            self.previous_requested = requested_frame.extrusion;
        }
        self.inner.set_printer_position(requested_frame);
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }

    fn debug_info(&self) -> String {
        format!(
            "extrusion_multiplier (x{:.2}) <- {}",
            self.ratio.load(),
            self.inner.debug_info()
        )
    }
}
