//! Command and reply frames.
//!
//! Frame layout:
//!
//! ```text
//! outbound:  | command (ASCII) | crc_hi | crc_lo | 0x0D |
//! inbound:   | '(' | payload (ASCII) | crc_hi | crc_lo | 0x0D |
//! ```
//!
//! The inbound CRC covers the start marker and the payload.

use crate::crc;
use crate::error::ProtocolError;
use crate::{MAX_FRAME_SIZE, START_MARKER, TERMINATOR, TRAILER_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Smallest well-formed reply: marker, CRC pair, terminator.
pub const MIN_REPLY_LEN: usize = 1 + TRAILER_LEN;

/// Payload the device sends when it rejects a command.
pub const NAK_PAYLOAD: &str = "NAK";

/// A command string that is safe to frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    /// Validates a command string.
    pub fn new(command: impl Into<String>) -> Result<Self, ProtocolError> {
        let command = command.into();
        if command.is_empty() {
            return Err(ProtocolError::InvalidCommand {
                command,
                reason: "command is empty",
            });
        }
        if !command.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
            return Err(ProtocolError::InvalidCommand {
                command,
                reason: "command must be printable ASCII",
            });
        }
        if command.len() + TRAILER_LEN > MAX_FRAME_SIZE {
            return Err(ProtocolError::InvalidCommand {
                command,
                reason: "command does not fit in the transport buffer",
            });
        }
        Ok(Self(command))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds the outbound frame: command, CRC high, CRC low, CR.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.0.len() + TRAILER_LEN);
        buf.put_slice(self.0.as_bytes());
        buf.put_u16(crc::crc16(self.0.as_bytes()));
        buf.put_u8(TERMINATOR);
        buf.freeze()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Validates and frames a command in one step.
pub fn encode(command: &str) -> Result<Bytes, ProtocolError> {
    Ok(Command::new(command)?.encode())
}

/// A validated reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Text between the start marker and the CRC pair.
    pub payload: String,
    /// Total length of the frame on the wire, terminator included.
    pub frame_len: usize,
}

impl Reply {
    /// Validates a complete reply frame and extracts its payload.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        let len = frame.len();
        if len < MIN_REPLY_LEN {
            return Err(ProtocolError::malformed("reply shorter than trailer", frame));
        }
        if frame[0] != START_MARKER {
            return Err(ProtocolError::malformed("missing start marker", frame));
        }
        if frame[len - 1] != TERMINATOR {
            return Err(ProtocolError::malformed("missing terminator", frame));
        }

        let crc_at = len - TRAILER_LEN;
        let received = [frame[crc_at], frame[crc_at + 1]];
        if !crc::verify(&frame[..crc_at], received) {
            return Err(ProtocolError::ChecksumFailure {
                computed: crc::crc16(&frame[..crc_at]),
                received: u16::from_be_bytes(received),
                buffer: Bytes::copy_from_slice(frame),
            });
        }

        let body = &frame[1..crc_at];
        let body = match body.iter().position(|&b| b == 0) {
            Some(nul) => &body[..nul],
            None => body,
        };

        Ok(Self {
            payload: String::from_utf8_lossy(body).into_owned(),
            frame_len: len,
        })
    }

    /// Returns true if the device rejected the command.
    pub fn is_nak(&self) -> bool {
        self.payload == NAK_PAYLOAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![START_MARKER];
        frame.extend_from_slice(payload);
        let crc = crc::crc16(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame.push(TERMINATOR);
        frame
    }

    #[test]
    fn test_encode_qpigs() {
        let frame = encode("QPIGS").unwrap();
        assert_eq!(frame.as_ref(), b"QPIGS\xB7\xA9\r");
    }

    #[test]
    fn test_encode_qmod() {
        let frame = Command::new("QMOD").unwrap().encode();
        assert_eq!(frame.as_ref(), b"QMOD\x49\xC1\r");
    }

    #[test]
    fn test_encode_escapes_trailer() {
        let frame = encode("AAL").unwrap();
        assert_eq!(frame.as_ref(), b"AAL\x9D\x29\r");
        assert_eq!(frame.iter().filter(|&&b| b == TERMINATOR).count(), 1);
    }

    #[test]
    fn test_command_validation() {
        assert!(matches!(
            Command::new(""),
            Err(ProtocolError::InvalidCommand { .. })
        ));
        assert!(matches!(
            Command::new("QPI\rGS"),
            Err(ProtocolError::InvalidCommand { .. })
        ));
        assert!(matches!(
            Command::new("QPIGS\n"),
            Err(ProtocolError::InvalidCommand { .. })
        ));
        assert!(Command::new("POP02").is_ok());
        assert!(Command::new("PBCV 48.0").is_ok());
    }

    #[test]
    fn test_command_length_limit() {
        let longest = "Q".repeat(MAX_FRAME_SIZE - TRAILER_LEN);
        assert_eq!(encode(&longest).unwrap().len(), MAX_FRAME_SIZE);

        let too_long = "Q".repeat(MAX_FRAME_SIZE - TRAILER_LEN + 1);
        assert!(matches!(
            encode(&too_long),
            Err(ProtocolError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn test_parse_abc() {
        let frame = reply_frame(b"ABC");
        assert_eq!(frame, b"(ABC\x8B\x19\r");

        let reply = Reply::parse(&frame).unwrap();
        assert_eq!(reply.payload, "ABC");
        assert_eq!(reply.frame_len, 7);
        assert!(!reply.is_nak());
    }

    #[test]
    fn test_parse_checks_escaped_trailer() {
        // Raw checksum of "(CP" is 0x2D0D; the low byte is sent as 0x0E
        let reply = Reply::parse(b"(CP\x2D\x0E\r").unwrap();
        assert_eq!(reply.payload, "CP");

        let err = Reply::parse(b"(CP\x2D\x0D\r").unwrap_err();
        match err {
            ProtocolError::ChecksumFailure {
                computed, received, ..
            } => {
                assert_eq!(computed, 0x2D0E);
                assert_eq!(received, 0x2D0D);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_flipped_payload_byte() {
        let frame = reply_frame(b"ABC");
        for i in 1..4 {
            let mut corrupted = frame.clone();
            corrupted[i] ^= 0x01;
            let result = Reply::parse(&corrupted);
            assert!(
                matches!(result, Err(ProtocolError::ChecksumFailure { .. })),
                "byte {} flip not detected",
                i
            );
        }
    }

    #[test]
    fn test_parse_missing_start_marker() {
        let mut frame = reply_frame(b"ABC");
        frame[0] = b'X';
        assert!(matches!(
            Reply::parse(&frame),
            Err(ProtocolError::MalformedFrame {
                reason: "missing start marker",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_too_short() {
        assert!(matches!(
            Reply::parse(b"(\r"),
            Err(ProtocolError::MalformedFrame { .. })
        ));
        assert!(matches!(
            Reply::parse(b""),
            Err(ProtocolError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_parse_missing_terminator() {
        let mut frame = reply_frame(b"B");
        let last = frame.len() - 1;
        frame[last] = b'X';
        assert!(matches!(
            Reply::parse(&frame),
            Err(ProtocolError::MalformedFrame {
                reason: "missing terminator",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_empty_payload() {
        let frame = reply_frame(b"");
        let reply = Reply::parse(&frame).unwrap();
        assert_eq!(reply.payload, "");
    }

    #[test]
    fn test_parse_nak() {
        let reply = Reply::parse(&reply_frame(b"NAK")).unwrap();
        assert!(reply.is_nak());
    }

    #[test]
    fn test_parse_truncates_at_nul() {
        let reply = Reply::parse(&reply_frame(b"AB\0CD")).unwrap();
        assert_eq!(reply.payload, "AB");
    }

    #[test]
    fn test_encoded_reply_roundtrip() {
        // A reply is framed like a command whose text begins with the marker.
        for payload in ["B", "230.0 50.0 0161", "00000000000000000000000000000000"] {
            let frame = encode(&format!("({}", payload)).unwrap();
            let reply = Reply::parse(&frame).unwrap();
            assert_eq!(reply.payload, payload);
        }
    }

    #[test]
    fn test_qpigs_reply() {
        let payload = b"230.0 50.0 230.0 50.0 0161 0119 003 460 57.50 012 100 0069 0014 103.8 57.49 00000 00110110 00 00 00856 010";
        let frame = reply_frame(payload);
        assert_eq!(frame.len(), 110);
        assert_eq!(&frame[107..], b"\x14\xA4\r");

        let reply = Reply::parse(&frame).unwrap();
        assert_eq!(reply.payload.as_bytes(), payload);
    }
}
