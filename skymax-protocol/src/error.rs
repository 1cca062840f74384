//! Protocol error types.

use bytes::Bytes;
use thiserror::Error;

/// Errors raised while building a command frame or validating a reply.
///
/// Reply errors carry the bytes that were received so the caller can log
/// them when it abandons the query.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid command {command:?}: {reason}")]
    InvalidCommand {
        command: String,
        reason: &'static str,
    },

    #[error("malformed frame: {reason} (buffer: {})", hex::encode(.buffer))]
    MalformedFrame { reason: &'static str, buffer: Bytes },

    #[error(
        "CRC mismatch: computed {computed:#06x}, received {received:#06x} (buffer: {})",
        hex::encode(.buffer)
    )]
    ChecksumFailure {
        computed: u16,
        received: u16,
        buffer: Bytes,
    },
}

impl ProtocolError {
    pub(crate) fn malformed(reason: &'static str, buffer: &[u8]) -> Self {
        ProtocolError::MalformedFrame {
            reason,
            buffer: Bytes::copy_from_slice(buffer),
        }
    }

    /// Returns the received bytes attached to a reply error.
    pub fn buffer(&self) -> Option<&Bytes> {
        match self {
            ProtocolError::InvalidCommand { .. } => None,
            ProtocolError::MalformedFrame { buffer, .. } => Some(buffer),
            ProtocolError::ChecksumFailure { buffer, .. } => Some(buffer),
        }
    }
}
