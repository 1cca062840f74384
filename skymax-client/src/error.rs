//! Client error types.

use bytes::Bytes;
use skymax_protocol::ProtocolError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Client errors.
///
/// Every variant aborts only the query in progress; the cache keeps its
/// last good value until a later query succeeds.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("device {} unavailable: {reason}", .path.display())]
    DeviceUnavailable { path: PathBuf, reason: String },

    #[error(
        "{command}: no complete reply after {elapsed:?} ({} bytes buffered: {})",
        .partial.len(),
        hex::encode(.partial)
    )]
    ReadTimeout {
        command: String,
        elapsed: Duration,
        partial: Bytes,
    },

    #[error("{command}: device closed the stream ({} bytes buffered)", .partial.len())]
    DeviceClosed { command: String, partial: Bytes },

    #[error("{command}: device rejected the command")]
    Rejected { command: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("poller shutting down")]
    ShuttingDown,
}

/// Failure category, used for logging and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DeviceUnavailable,
    ReadTimeout,
    MalformedFrame,
    ChecksumFailure,
    InvalidCommand,
    DeviceClosed,
    Rejected,
    Io,
    ShuttingDown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DeviceUnavailable => write!(f, "DEVICE_UNAVAILABLE"),
            ErrorKind::ReadTimeout => write!(f, "READ_TIMEOUT"),
            ErrorKind::MalformedFrame => write!(f, "MALFORMED_FRAME"),
            ErrorKind::ChecksumFailure => write!(f, "CHECKSUM_FAILURE"),
            ErrorKind::InvalidCommand => write!(f, "INVALID_COMMAND"),
            ErrorKind::DeviceClosed => write!(f, "DEVICE_CLOSED"),
            ErrorKind::Rejected => write!(f, "REJECTED"),
            ErrorKind::Io => write!(f, "IO_ERROR"),
            ErrorKind::ShuttingDown => write!(f, "SHUTTING_DOWN"),
        }
    }
}

impl ClientError {
    /// Returns the failure category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::DeviceUnavailable { .. } => ErrorKind::DeviceUnavailable,
            ClientError::ReadTimeout { .. } => ErrorKind::ReadTimeout,
            ClientError::DeviceClosed { .. } => ErrorKind::DeviceClosed,
            ClientError::Rejected { .. } => ErrorKind::Rejected,
            ClientError::Protocol(e) => match e {
                ProtocolError::InvalidCommand { .. } => ErrorKind::InvalidCommand,
                ProtocolError::MalformedFrame { .. } => ErrorKind::MalformedFrame,
                ProtocolError::ChecksumFailure { .. } => ErrorKind::ChecksumFailure,
            },
            ClientError::Io(_) => ErrorKind::Io,
            ClientError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Returns whether the same query may succeed on a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DeviceUnavailable
                | ErrorKind::ReadTimeout
                | ErrorKind::MalformedFrame
                | ErrorKind::ChecksumFailure
                | ErrorKind::DeviceClosed
                | ErrorKind::Io
        )
    }

    /// Bytes received before the query was abandoned, if any.
    pub fn partial_buffer(&self) -> Option<&Bytes> {
        match self {
            ClientError::ReadTimeout { partial, .. } => Some(partial),
            ClientError::DeviceClosed { partial, .. } => Some(partial),
            ClientError::Protocol(e) => e.buffer(),
            _ => None,
        }
    }
}
