//! Move splitting for serial transmission.
//!
//! Long moves are cut into shorter segments so that a pause, a ratio change
//! or a baby-step takes effect quickly instead of after a long move drains.

use crate::stream::{BoxedStream, GcodeStream};
use gcodestream_core::{
    command_is, create_movement_line, get_position, has_no_processing, is_movement, PrinterMove,
};
use std::collections::VecDeque;

/// Split the move `start -> end` into segments no longer than `max_length`.
///
/// The displacement length is the larger of the XYZ distance and the
/// extrusion distance. The number of segments is additionally capped so each
/// one lasts at least `min_seconds` at the destination feed rate. The last
/// segment is exactly `end`.
pub fn split_move(
    start: &PrinterMove,
    end: &PrinterMove,
    max_length: f64,
    min_seconds: f64,
) -> Vec<PrinterMove> {
    let delta_position = end.position - start.position;
    let delta_extrusion = if start.extrusion.is_finite() && end.extrusion.is_finite() {
        end.extrusion - start.extrusion
    } else {
        0.0
    };
    let length = delta_position.length().max(delta_extrusion.abs());

    if !(length > max_length) || !(max_length > 0.0) {
        return vec![*end];
    }

    let mut segments = (length / max_length).ceil() as usize;
    if min_seconds > 0.0 && end.feed_rate.is_finite() && end.feed_rate > 0.0 {
        let mm_per_second = end.feed_rate / 60.0;
        let time_limited = (length / (mm_per_second * min_seconds)).floor() as usize;
        segments = segments.min(time_limited);
    }
    let segments = segments.max(1);

    (1..=segments)
        .map(|i| {
            if i == segments {
                return *end;
            }
            let fraction = i as f64 / segments as f64;
            PrinterMove {
                position: start.position + delta_position * fraction,
                extrusion: if delta_extrusion != 0.0 {
                    start.extrusion + delta_extrusion * fraction
                } else {
                    end.extrusion
                },
                feed_rate: end.feed_rate,
            }
        })
        .collect()
}

/// Stream stage splitting long moves into segments
pub struct MaxLength {
    inner: BoxedStream,
    max_segment_length: f64,
    min_seconds_per_segment: f64,
    last: PrinterMove,
    segments: VecDeque<String>,
}

impl MaxLength {
    /// Split moves longer than `max_segment_length` (mm), using fewer
    /// segments when each would take less than `min_seconds_per_segment`
    pub fn new(inner: BoxedStream, max_segment_length: f64, min_seconds_per_segment: f64) -> Self {
        Self {
            inner,
            max_segment_length,
            min_seconds_per_segment,
            last: PrinterMove::UNKNOWN,
            segments: VecDeque::new(),
        }
    }

    /// Longest segment emitted (mm)
    pub fn max_segment_length(&self) -> f64 {
        self.max_segment_length
    }

    fn process_move(&mut self, line: String) -> String {
        let destination = get_position(&line, self.last);

        if !self.last.position_known() {
            self.last = destination;
            return line;
        }

        let pieces = split_move(
            &self.last,
            &destination,
            self.max_segment_length,
            self.min_seconds_per_segment,
        );

        if pieces.len() <= 1 {
            self.last = destination;
            return line;
        }

        tracing::trace!("Splitting '{}' into {} segments", line, pieces.len());
        let mut previous = self.last;
        for piece in &pieces {
            self.segments
                .push_back(create_movement_line(piece, &previous));
            previous = *piece;
        }
        self.last = destination;
        self.segments.pop_front().unwrap_or(line)
    }
}

impl GcodeStream for MaxLength {
    fn name(&self) -> &str {
        "max_length"
    }

    fn read_line(&mut self) -> Option<String> {
        if let Some(segment) = self.segments.pop_front() {
            return Some(segment);
        }

        let line = self.inner.read_line()?;

        if has_no_processing(&line) {
            return Some(line);
        }

        if is_movement(&line) {
            return Some(self.process_move(line));
        }

        if command_is(&line, "G92") {
            let feed_rate = self.last.feed_rate;
            self.last = get_position(&line, self.last);
            self.last.feed_rate = feed_rate;
        }

        Some(line)
    }

    fn set_printer_position(&mut self, position: PrinterMove) {
        self.last.copy_known(&position);
        self.inner.set_printer_position(position);
    }

    fn cancel(&mut self) {
        self.segments.clear();
        self.inner.cancel();
    }

    fn debug_info(&self) -> String {
        format!(
            "max_length ({} mm, {} segments pending) <- {}",
            self.max_segment_length,
            self.segments.len(),
            self.inner.debug_info()
        )
    }
}
