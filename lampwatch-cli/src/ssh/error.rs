use std::time::Duration;

use lampwatch_core::BackendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("host key verification failed: {0}")]
    HostKey(String),

    #[error("key error: {0}")]
    KeyError(String),

    #[error("SFTP error: {0}")]
    Sftp(String),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("disconnected")]
    Disconnected,
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::KeyError(err.to_string())
    }
}

impl From<SshError> for BackendError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::Sftp(msg) => BackendError::TransferFailed(msg),
            other => BackendError::Connection(other.to_string()),
        }
    }
}
