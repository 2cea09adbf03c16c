//! Lock-free print ratios.
//!
//! Feed-rate ratio, extrusion ratio and the baby-step Z offset are written by
//! control surfaces while the print runner reads them once per line. Each value
//! is an `f64` stored as its bit pattern in an `AtomicU64`, so reads are never torn.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An `f64` that can be shared between threads without a lock.
#[derive(Debug)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    /// Create a new atomic float
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    /// Read the current value
    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Replace the current value
    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Add `delta` and return the previous value.
    pub fn fetch_add(&self, delta: f64) -> f64 {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(previous) => return f64::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// A shared, lock-free `f64`.
pub type SharedValue = Arc<AtomicF64>;

/// Live ratios owned by a print session and handed to the stages that read them.
#[derive(Debug, Clone)]
pub struct PrintRatios {
    /// Multiplier applied to every `F` word
    pub feed_rate: SharedValue,
    /// Multiplier applied to extrusion deltas
    pub extrusion: SharedValue,
    /// Baby-step Z offset in millimeters
    pub baby_step_z: SharedValue,
}

impl PrintRatios {
    pub fn new(feed_rate: f64, extrusion: f64) -> Self {
        Self {
            feed_rate: Arc::new(AtomicF64::new(feed_rate)),
            extrusion: Arc::new(AtomicF64::new(extrusion)),
            baby_step_z: Arc::new(AtomicF64::new(0.0)),
        }
    }
}

impl Default for PrintRatios {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_load_store() {
        let value = AtomicF64::new(1.5);
        assert_eq!(value.load(), 1.5);
        value.store(-0.25);
        assert_eq!(value.load(), -0.25);
    }

    #[test]
    fn test_fetch_add_across_threads() {
        let value = Arc::new(AtomicF64::new(0.0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let value = Arc::clone(&value);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        value.fetch_add(0.5);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(value.load(), 2000.0);
    }

    #[test]
    fn test_ratios_default_to_identity() {
        let ratios = PrintRatios::default();
        assert_eq!(ratios.feed_rate.load(), 1.0);
        assert_eq!(ratios.extrusion.load(), 1.0);
        assert_eq!(ratios.baby_step_z.load(), 0.0);
    }
}
