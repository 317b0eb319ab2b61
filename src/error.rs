//! Custom error types for fixloop.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the repair pipeline.
//!
//! Only *unexpected* failures live here. A script that exits non-zero, a model
//! response without the expected code blocks, and a candidate that fails in
//! the lab are ordinary outcomes and are modelled as values, not errors.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for fixloop operations
#[derive(Error, Debug)]
pub enum FixloopError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Script Errors
    // =========================================================================
    /// The working script does not exist or is not a file
    #[error("Script not found: {path}")]
    MissingScript { path: PathBuf },

    /// The configured interpreter is not on PATH
    #[error("Interpreter not found: {interpreter}")]
    MissingInterpreter { interpreter: String },

    /// A subprocess could not be started at all
    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    /// Snapshot could not be written; no rollback point exists
    #[error("Backup failed for snapshot {counter}: {message}")]
    Backup { counter: u32, message: String },

    /// The model call failed or the endpoint is unavailable
    #[error("Fix generation failed: {message}")]
    Generation { message: String },

    /// Copying the validated candidate over the working script failed
    #[error("Promotion failed for {path}: {message}")]
    Promotion { path: PathBuf, message: String },

    /// Requested snapshot does not exist or does not verify
    #[error("Snapshot {counter} unavailable: {reason}")]
    Snapshot { counter: u32, reason: String },

    /// Another process holds the project lock
    #[error("Project '{project}' is locked by another fixloop process")]
    ProjectLocked { project: String },

    /// The cycle was cancelled while a stage was in flight
    #[error("Cancelled during {stage}")]
    Cancelled { stage: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FixloopError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a backup error
    pub fn backup(counter: u32, message: impl Into<String>) -> Self {
        Self::Backup {
            counter,
            message: message.into(),
        }
    }

    /// Create a generation error
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create a cancellation error for the named stage
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error must abort the whole run, not just the cycle
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Backup { .. }
                | Self::MissingScript { .. }
                | Self::MissingInterpreter { .. }
                | Self::Config { .. }
                | Self::InvalidConfig { .. }
                | Self::ProjectLocked { .. }
                | Self::Cancelled { .. }
        )
    }

    /// Check if this error came from the model call
    pub fn is_generation_failure(&self) -> bool {
        matches!(self, Self::Generation { .. })
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled { .. } => 130,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::MissingScript { .. } | Self::MissingInterpreter { .. } => 6,
            Self::Backup { .. } => 5,
            Self::Generation { .. } => 4,
            Self::ProjectLocked { .. } => 3,
            _ => 1,
        }
    }
}

/// Type alias for fixloop results
pub type Result<T> = std::result::Result<T, FixloopError>;

/// Extension trait for converting foreign errors to FixloopError
pub trait IntoFixloopError<T> {
    fn into_fixloop_config(self) -> Result<T>;
    fn into_fixloop_generation(self) -> Result<T>;
    fn into_fixloop_backup(self, counter: u32) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoFixloopError<T> for std::result::Result<T, E> {
    fn into_fixloop_config(self) -> Result<T> {
        self.map_err(|e| FixloopError::config(e.into().to_string()))
    }

    fn into_fixloop_generation(self) -> Result<T> {
        // `{:#}` keeps the whole context chain on one line.
        self.map_err(|e| FixloopError::generation(format!("{:#}", e.into())))
    }

    fn into_fixloop_backup(self, counter: u32) -> Result<T> {
        self.map_err(|e| FixloopError::backup(counter, format!("{:#}", e.into())))
    }
}
