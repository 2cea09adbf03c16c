//! Common type definitions and aliases.

pub mod aliases;

pub use aliases::*;
