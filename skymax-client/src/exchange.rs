//! Command/reply exchange over an open device stream.

use crate::config::Framing;
use crate::error::ClientError;
use skymax_core::QueryKind;
use skymax_protocol::{Command, FrameBoundary, ProtocolError, Reply, ReplyDecoder};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Largest single read request.
pub const READ_CHUNK_SIZE: usize = 64;

/// Reply framing parameters for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingOptions {
    /// Boundary detection policy.
    pub framing: Framing,
    /// Wall-clock budget for the whole reply.
    pub read_timeout: Duration,
    /// Reply buffer capacity.
    pub capacity: usize,
}

impl FramingOptions {
    /// Boundary for a reply to `kind`.
    ///
    /// Commands without a known reply length are always framed by terminator.
    pub fn boundary_for(&self, kind: Option<QueryKind>) -> FrameBoundary {
        match (self.framing, kind) {
            (Framing::FixedLength, Some(kind)) => {
                FrameBoundary::FixedLength(kind.expected_reply_len())
            }
            _ => FrameBoundary::Terminator,
        }
    }
}

impl Default for FramingOptions {
    fn default() -> Self {
        Self {
            framing: Framing::Terminator,
            read_timeout: Duration::from_secs(2),
            capacity: skymax_protocol::MAX_FRAME_SIZE,
        }
    }
}

/// Sends `command` and reads its reply.
pub async fn exchange<S>(
    stream: &mut S,
    command: &Command,
    boundary: FrameBoundary,
    options: &FramingOptions,
) -> Result<Reply, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = command.encode();
    tracing::debug!(
        command = %command,
        crc = %hex::encode(&frame[frame.len() - 3..frame.len() - 1]),
        "Sending command"
    );
    stream.write_all(&frame).await?;
    stream.flush().await?;
    read_frame(stream, command, boundary, options).await
}

/// Reads one reply frame and validates it.
///
/// Reads accumulate across partial results until the boundary is reached.
/// The whole reply shares one deadline; when it passes the query is
/// abandoned with [`ClientError::ReadTimeout`] carrying what was received.
pub async fn read_frame<S>(
    stream: &mut S,
    command: &Command,
    boundary: FrameBoundary,
    options: &FramingOptions,
) -> Result<Reply, ClientError>
where
    S: AsyncRead + Unpin,
{
    let started = Instant::now();
    let deadline = started + options.read_timeout;
    let mut decoder = ReplyDecoder::new(options.capacity, boundary);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    let frame = loop {
        if let Some(frame) = decoder.decode()? {
            break frame;
        }

        let want = decoder.want().min(READ_CHUNK_SIZE);
        if want == 0 {
            return Err(ProtocolError::MalformedFrame {
                reason: "reply exceeds buffer capacity",
                buffer: decoder.partial(),
            }
            .into());
        }

        let n = match tokio::time::timeout_at(deadline, stream.read(&mut chunk[..want])).await {
            Ok(Ok(0)) => {
                return Err(ClientError::DeviceClosed {
                    command: command.to_string(),
                    partial: decoder.partial(),
                })
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ClientError::Io(e)),
            Err(_) => {
                return Err(ClientError::ReadTimeout {
                    command: command.to_string(),
                    elapsed: started.elapsed(),
                    partial: decoder.partial(),
                })
            }
        };
        decoder.extend(&chunk[..n])?;
    };

    tracing::debug!(
        command = %command,
        reply_len = frame.len(),
        boundary = ?decoder.boundary(),
        trailing = decoder.buffered(),
        elapsed = ?started.elapsed(),
        "Reply frame complete"
    );

    let reply = Reply::parse(&frame)?;
    Ok(reply)
}
