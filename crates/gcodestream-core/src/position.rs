//! Printer position model.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// A printer destination: XYZ position, extruder position (E) and feed rate (F).
///
/// Axes that have never been learned are held at `+inf`; see
/// [`PrinterMove::UNKNOWN`] and [`PrinterMove::copy_known`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrinterMove {
    /// X, Y, Z in millimeters
    pub position: DVec3,
    /// Extruder position in millimeters of filament
    pub extrusion: f64,
    /// Feed rate in mm/min
    pub feed_rate: f64,
}

impl PrinterMove {
    /// Every axis unknown.
    pub const UNKNOWN: Self = Self {
        position: DVec3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
        extrusion: f64::INFINITY,
        feed_rate: f64::INFINITY,
    };

    /// Origin with zero extrusion and feed rate.
    pub const ZERO: Self = Self {
        position: DVec3::ZERO,
        extrusion: 0.0,
        feed_rate: 0.0,
    };

    /// Create a new move
    pub fn new(position: DVec3, extrusion: f64, feed_rate: f64) -> Self {
        Self {
            position,
            extrusion,
            feed_rate,
        }
    }

    /// Overwrite every field for which `other` holds a known (finite) value.
    pub fn copy_known(&mut self, other: &PrinterMove) {
        if other.position.x.is_finite() {
            self.position.x = other.position.x;
        }
        if other.position.y.is_finite() {
            self.position.y = other.position.y;
        }
        if other.position.z.is_finite() {
            self.position.z = other.position.z;
        }
        if other.extrusion.is_finite() {
            self.extrusion = other.extrusion;
        }
        if other.feed_rate.is_finite() {
            self.feed_rate = other.feed_rate;
        }
    }

    /// True when X, Y and Z are all known.
    pub fn position_known(&self) -> bool {
        self.position.is_finite()
    }

    /// True when X, Y, Z and E are all known.
    pub fn fully_known(&self) -> bool {
        self.position_known() && self.extrusion.is_finite()
    }

    /// Length of the XYZ component.
    pub fn length_xyz(&self) -> f64 {
        self.position.length()
    }
}

impl Default for PrinterMove {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl Add for PrinterMove {
    type Output = PrinterMove;

    fn add(self, rhs: PrinterMove) -> PrinterMove {
        PrinterMove {
            position: self.position + rhs.position,
            extrusion: self.extrusion + rhs.extrusion,
            feed_rate: self.feed_rate + rhs.feed_rate,
        }
    }
}

impl Sub for PrinterMove {
    type Output = PrinterMove;

    fn sub(self, rhs: PrinterMove) -> PrinterMove {
        PrinterMove {
            position: self.position - rhs.position,
            extrusion: self.extrusion - rhs.extrusion,
            feed_rate: self.feed_rate - rhs.feed_rate,
        }
    }
}
