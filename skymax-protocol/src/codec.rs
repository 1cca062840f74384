//! Incremental reply framing.
//!
//! The device answers in one or more short bursts, so a reply has to be
//! accumulated across reads before it can be validated. [`ReplyDecoder`]
//! owns a bounded buffer and reports a complete frame once either the
//! terminator has been seen or a known reply length has been reached.

use crate::error::ProtocolError;
use crate::{MAX_FRAME_SIZE, TERMINATOR};
use bytes::{Bytes, BytesMut};

/// How the end of a reply is recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBoundary {
    /// The first CR ends the frame.
    Terminator,
    /// The frame is exactly this many bytes long.
    FixedLength(usize),
}

/// Accumulates reply bytes until a whole frame is present.
#[derive(Debug)]
pub struct ReplyDecoder {
    buffer: BytesMut,
    capacity: usize,
    boundary: FrameBoundary,
    /// Bytes already searched for the terminator.
    scanned: usize,
    frame_len: Option<usize>,
}

impl ReplyDecoder {
    /// Creates a decoder whose buffer never grows beyond `capacity`.
    pub fn new(capacity: usize, boundary: FrameBoundary) -> Self {
        let capacity = match boundary {
            FrameBoundary::Terminator => capacity,
            FrameBoundary::FixedLength(len) => len.min(capacity),
        };
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
            boundary,
            scanned: 0,
            frame_len: None,
        }
    }

    /// Creates a terminator-scanning decoder with the default capacity.
    pub fn scanning() -> Self {
        Self::new(MAX_FRAME_SIZE, FrameBoundary::Terminator)
    }

    pub fn boundary(&self) -> FrameBoundary {
        self.boundary
    }

    /// Appends received bytes.
    ///
    /// Fails if the reply would overrun the buffer before its end was found.
    pub fn extend(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if self.buffer.len() + data.len() > self.capacity {
            self.buffer.extend_from_slice(&data[..self.want()]);
            return Err(ProtocolError::malformed(
                "reply exceeds buffer capacity",
                &self.buffer,
            ));
        }
        self.buffer.extend_from_slice(data);
        self.locate();
        Ok(())
    }

    fn locate(&mut self) {
        if self.frame_len.is_some() {
            return;
        }
        match self.boundary {
            FrameBoundary::Terminator => {
                let fresh = &self.buffer[self.scanned..];
                if let Some(pos) = fresh.iter().position(|&b| b == TERMINATOR) {
                    self.frame_len = Some(self.scanned + pos + 1);
                }
                self.scanned = self.buffer.len();
            }
            FrameBoundary::FixedLength(len) => {
                if self.buffer.len() >= len {
                    self.frame_len = Some(len);
                }
            }
        }
    }

    /// Length of the detected frame, if its end has been seen.
    pub fn frame_len(&self) -> Option<usize> {
        self.frame_len
    }

    /// Splits off the complete frame, if any.
    ///
    /// Bytes received after the frame stay buffered.
    pub fn decode(&mut self) -> Result<Option<BytesMut>, ProtocolError> {
        let Some(len) = self.frame_len.take() else {
            return Ok(None);
        };
        let frame = self.buffer.split_to(len);
        self.scanned = 0;
        self.locate();
        Ok(Some(frame))
    }

    /// Maximum number of bytes the next read should request.
    pub fn want(&self) -> usize {
        self.capacity.saturating_sub(self.buffer.len())
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Copy of the buffered bytes, for diagnostics.
    pub fn partial(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer)
    }
}

impl Default for ReplyDecoder {
    fn default() -> Self {
        Self::scanning()
    }
}
