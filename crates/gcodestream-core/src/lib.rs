//! # GCodeStream Core
//!
//! Core types and utilities shared by every GCodeStream crate:
//! the [`PrinterMove`] position model, comment-aware G-code line helpers,
//! lock-free print ratios, and the unified error type.

pub mod error;
pub mod gcode;
pub mod position;
pub mod ratio;
pub mod types;

pub use error::{ConnectionError, Error, GcodeError, PipelineError, Result};

pub use gcode::{
    command, command_is, create_movement_line, first_number_after, format_number, get_position,
    has_no_processing, is_movement, layer_index, set_number_after, strip_comment, NO_PROCESSING,
};

pub use position::PrinterMove;

pub use ratio::{AtomicF64, PrintRatios, SharedValue};

// Re-export type aliases for convenience
pub use types::{
    thread_safe, thread_safe_deque, thread_safe_rw, ThreadSafe, ThreadSafeDeque, ThreadSafeRw,
};
