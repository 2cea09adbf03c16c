//! Error handling for GCodeStream
//!
//! Provides error types for the layers of the streaming host:
//! - G-Code errors (line parsing)
//! - Pipeline errors (stream stages and print control)
//! - Connection errors (serial / emulated printer communication)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// G-Code source error type
///
/// Stream stages never fail on malformed numbers (they keep the previous
/// value), so G-code failures come from the source file alone.
#[derive(Error, Debug, Clone)]
pub enum GcodeError {
    /// Source file could not be read
    #[error("File error: {reason}")]
    FileError {
        /// The reason for the file error.
        reason: String,
    },

    /// Reading stopped partway through the source
    #[error("Read failed in {path} after line {line}: {reason}")]
    ReadFailed {
        /// The source file.
        path: String,
        /// Last line read successfully.
        line: u64,
        /// The underlying I/O error.
        reason: String,
    },
}

/// Pipeline error type
///
/// Represents errors raised by print control operations on a running pipeline.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// Invalid pause state transition
    #[error("Invalid state transition from {current} to {requested}")]
    InvalidStateTransition {
        /// The current state name.
        current: String,
        /// The requested state name.
        requested: String,
    },

    /// Tool index outside the configured extruder table
    #[error("Tool {tool} out of range (extruder count {extruder_count})")]
    ToolOutOfRange {
        /// The requested tool index.
        tool: usize,
        /// The number of configured extruders.
        extruder_count: usize,
    },

    /// The print session was already cancelled
    #[error("Print session {id} was cancelled")]
    Cancelled {
        /// The session identifier.
        id: String,
    },
}

/// Connection error type
///
/// Represents errors related to communication with the printer.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Operation attempted while disconnected
    #[error("Not connected")]
    NotConnected,
}

/// Main error type for GCodeStream
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// G-Code error
    #[error(transparent)]
    Gcode(#[from] GcodeError),

    /// Pipeline error
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a pipeline error
    pub fn is_pipeline_error(&self) -> bool {
        matches!(self, Error::Pipeline(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
