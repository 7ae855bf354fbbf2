//! Error taxonomy shared by every backend

use thiserror::Error;

/// Failure of a backend operation.
///
/// Variants carry the captured diagnostic text untouched so the operator can
/// act on the raw command output.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Path or resource absent on the target
    #[error("not found: {path}")]
    NotFound { path: String },

    /// Establishing or using the remote session failed
    #[error("connection error: {0}")]
    Connection(String),

    /// A command exited with a non-zero status
    #[error("command failed (exit {exit_status}): {output}")]
    OperationFailed {
        command: String,
        exit_status: i32,
        output: String,
    },

    /// The log directory is missing and could not be created
    #[error("directory unavailable: {path}: {reason}")]
    DirectoryUnavailable { path: String, reason: String },

    /// Command output did not have the expected shape
    #[error("could not parse {what}: {raw}")]
    Parse { what: String, raw: String },

    /// File transfer was denied or broke off
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// Streaming needs passwordless sudo; password elevation cannot share the output channel
    #[error("live follow requires passwordless sudo (sudo -n); password elevation is not supported for streaming")]
    ElevationUnsupported,

    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Whether the captured output reads like a missing-file diagnostic
    pub fn mentions_missing_file(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::OperationFailed { output, .. } => {
                output.to_lowercase().contains("no such file")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
