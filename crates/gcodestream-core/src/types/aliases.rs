//! Shared-state aliases.
//!
//! Print control surfaces (queued commands, heater readings, the session's
//! pipeline) are touched by the runner task and by whoever drives the print.
//!
//! ```rust,ignore
//! use gcodestream_core::types::*;
//!
//! let queue: ThreadSafeDeque<String> = thread_safe_deque();
//! queue.lock().push_back("G28".to_string());
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;

/// State shared between the runner task and control surfaces (`parking_lot::Mutex`)
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// Shared FIFO, used for injected command lines
pub type ThreadSafeDeque<T> = Arc<Mutex<VecDeque<T>>>;

/// Shared state written rarely and read on every line (heater readings)
pub type ThreadSafeRw<T> = Arc<RwLock<T>>;

#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

#[inline]
pub fn thread_safe_deque<T>() -> ThreadSafeDeque<T> {
    Arc::new(Mutex::new(VecDeque::new()))
}

#[inline]
pub fn thread_safe_rw<T>(value: T) -> ThreadSafeRw<T> {
    Arc::new(RwLock::new(value))
}
