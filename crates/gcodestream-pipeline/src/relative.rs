//! Relative-to-absolute conversion.
//!
//! Everything above this stage sees absolute coordinates only. `G91` / `M83`
//! are consumed here; relative moves are rewritten with absolute values.

use crate::stream::{BoxedStream, GcodeStream};
use gcodestream_core::{
    command_is, first_number_after, has_no_processing, is_movement, set_number_after, PrinterMove,
};

/// Rewrites relative moves as absolute moves
pub struct RelativeToAbsolute {
    inner: BoxedStream,
    last: PrinterMove,
    relative_xyz: bool,
    relative_e: bool,
}

impl RelativeToAbsolute {
    /// Create a converter over `inner`
    pub fn new(inner: BoxedStream) -> Self {
        Self {
            inner,
            last: PrinterMove::UNKNOWN,
            relative_xyz: false,
            relative_e: false,
        }
    }

    /// Last absolute destination
    pub fn last_destination(&self) -> PrinterMove {
        self.last
    }

    fn absolute_axis(&self, key: &str, current: f64, delta: f64) -> f64 {
        if current.is_finite() {
            current + delta
        } else {
            tracing::warn!("Relative {} move with unknown position, assuming 0", key);
            delta
        }
    }

    fn convert_move(&mut self, mut line: String) -> String {
        let mut next = self.last;

        let axes = [
            ("X", self.relative_xyz, self.last.position.x),
            ("Y", self.relative_xyz, self.last.position.y),
            ("Z", self.relative_xyz, self.last.position.z),
            ("E", self.relative_e, self.last.extrusion),
        ];

        for (key, relative, current) in axes {
            let Some(value) = first_number_after(key, &line) else {
                continue;
            };
            let absolute = if relative {
                let absolute = self.absolute_axis(key, current, value);
                line = set_number_after(&line, key, absolute);
                absolute
            } else {
                value
            };
            match key {
                "X" => next.position.x = absolute,
                "Y" => next.position.y = absolute,
                "Z" => next.position.z = absolute,
                _ => next.extrusion = absolute,
            }
        }

        if let Some(feed_rate) = first_number_after("F", &line) {
            next.feed_rate = feed_rate;
        }

        self.last = next;
        line
    }

    fn apply_set_position(&mut self, line: &str) {
        let x = first_number_after("X", line);
        let y = first_number_after("Y", line);
        let z = first_number_after("Z", line);
        let e = first_number_after("E", line);

        if x.is_none() && y.is_none() && z.is_none() && e.is_none() {
            self.last.position = glam::DVec3::ZERO;
            self.last.extrusion = 0.0;
            return;
        }

        if let Some(x) = x {
            self.last.position.x = x;
        }
        if let Some(y) = y {
            self.last.position.y = y;
        }
        if let Some(z) = z {
            self.last.position.z = z;
        }
        if let Some(e) = e {
            self.last.extrusion = e;
        }
    }
}

impl GcodeStream for RelativeToAbsolute {
    fn name(&self) -> &str {
        "relative_to_absolute"
    }

    fn read_line(&mut self) -> Option<String> {
        let line = self.inner.read_line()?;

        if has_no_processing(&line) {
            return Some(line);
        }

        if command_is(&line, "G91") {
            self.relative_xyz = true;
            self.relative_e = true;
            return Some(String::new());
        }

        if command_is(&line, "G90") {
            self.relative_xyz = false;
            self.relative_e = false;
            return Some(line);
        }

        if command_is(&line, "M83") {
            self.relative_e = true;
            return Some(String::new());
        }

        if command_is(&line, "M82") {
            self.relative_e = false;
            return Some(line);
        }

        if command_is(&line, "G92") {
            self.apply_set_position(&line);
            return Some(line);
        }

        if is_movement(&line) {
            return Some(self.convert_move(line));
        }

        Some(line)
    }

    fn set_printer_position(&mut self, position: PrinterMove) {
        self.last.copy_known(&position);
        self.inner.set_printer_position(position);
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }

    fn debug_info(&self) -> String {
        format!(
            "relative_to_absolute (relative xyz: {}, relative e: {}) <- {}",
            self.relative_xyz,
            self.relative_e,
            self.inner.debug_info()
        )
    }
}
