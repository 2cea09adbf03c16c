//! Error types for the settings crate.

use std::io;
use thiserror::Error;

/// Failures loading, saving or validating [`PrinterSettings`](crate::PrinterSettings)
#[derive(Error, Debug)]
pub enum SettingsError {
    /// A value failed `validate()`
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    /// Extension other than `.toml` / `.json`
    #[error("Unsupported settings format: {0}")]
    UnsupportedFormat(String),

    /// No user configuration directory on this platform
    #[error("Config directory error: {0}")]
    ConfigDirectory(String),

    #[error("Settings file I/O failed: {0}")]
    IoError(#[from] io::Error),

    #[error("Malformed JSON settings: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Malformed TOML settings: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cannot write settings as TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Result type for settings operations
pub type SettingsResult<T> = Result<T, SettingsError>;
