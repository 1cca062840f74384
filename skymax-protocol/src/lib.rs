//! # skymax-protocol
//!
//! Wire protocol for inverters speaking the QPIGS command set.
//!
//! This crate provides:
//! - The protocol CRC16 (nibble table with delimiter escaping)
//! - Command frame construction
//! - Incremental reply framing over partial reads
//! - Reply validation and payload extraction
//!
//! It performs no I/O; the client crate drives it from a device stream.

pub mod codec;
pub mod crc;
pub mod error;
pub mod frame;

pub use codec::{FrameBoundary, ReplyDecoder};
pub use crc::crc16;
pub use error::ProtocolError;
pub use frame::{encode, Command, Reply};

/// First byte of every reply frame.
pub const START_MARKER: u8 = b'(';

/// Last byte of every frame, in both directions.
pub const TERMINATOR: u8 = 0x0D;

/// Bytes following the command or payload: CRC high, CRC low, terminator.
pub const TRAILER_LEN: usize = 3;

/// Transport buffer capacity. No command or reply may exceed it.
pub const MAX_FRAME_SIZE: usize = 256;
