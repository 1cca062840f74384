//! CRC16 used by the inverter protocol.
//!
//! The checksum is CRC-CCITT (XMODEM polynomial `0x1021`, zero seed)
//! computed four bits at a time from a 16-entry table. Before a checksum is
//! put on the wire each of its two bytes is checked against the frame
//! delimiters (`(`, CR, LF) and bumped by one if it collides, so a CRC byte
//! can never be mistaken for a marker or terminator.
//!
//! Verification recomputes the escaped checksum over the received bytes and
//! compares it with the trailer as received. The escape is never reversed.

/// Nibble lookup table for polynomial `0x1021`.
const CRC_TABLE: [u16; 16] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7, 0x8108, 0x9129, 0xa14a, 0xb16b,
    0xc18c, 0xd1ad, 0xe1ce, 0xf1ef,
];

/// Bytes that delimit frames and must not appear in a CRC trailer.
pub const RESERVED: [u8; 3] = [0x28, 0x0D, 0x0A];

/// Returns true if `byte` is one of the frame delimiters.
#[inline]
pub fn is_reserved(byte: u8) -> bool {
    RESERVED.contains(&byte)
}

#[inline]
fn fold_nibble(crc: u16, nibble: u8) -> u16 {
    let index = ((crc >> 12) as u8 ^ nibble) as usize;
    (crc << 4) ^ CRC_TABLE[index]
}

/// Computes the raw checksum, without delimiter escaping.
pub fn crc16_unescaped(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        let crc = fold_nibble(crc, byte >> 4);
        fold_nibble(crc, byte & 0x0f)
    })
}

/// Computes the checksum as it is sent on the wire.
pub fn crc16(data: &[u8]) -> u16 {
    let [hi, lo] = crc16_unescaped(data).to_be_bytes();
    u16::from_be_bytes([escape(hi), escape(lo)])
}

#[inline]
fn escape(byte: u8) -> u8 {
    if is_reserved(byte) {
        byte + 1
    } else {
        byte
    }
}

/// Checks a received trailer against the checksum of `data`.
pub fn verify(data: &[u8], received: [u8; 2]) -> bool {
    crc16(data).to_be_bytes() == received
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_golden_vectors() {
        assert_eq!(crc16(b"QPIGS"), 0xB7A9);
        assert_eq!(crc16(b"QMOD"), 0x49C1);
        assert_eq!(crc16(b"QPIRI"), 0xF854);
        assert_eq!(crc16(b"QPIWS"), 0xB4DA);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(crc16_unescaped(b""), 0x0000);
        assert_eq!(crc16(b""), 0x0000);
    }

    #[test]
    fn test_escape_low_byte() {
        // Raw checksum 0x9D28 ends in '('
        assert_eq!(crc16_unescaped(b"AAL"), 0x9D28);
        assert_eq!(crc16(b"AAL"), 0x9D29);

        // Raw 0x560A ends in LF
        assert_eq!(crc16_unescaped(b"AFX"), 0x560A);
        assert_eq!(crc16(b"AFX"), 0x560B);

        // Raw 0xF40D ends in CR
        assert_eq!(crc16_unescaped(b"AHP"), 0xF40D);
        assert_eq!(crc16(b"AHP"), 0xF40E);
    }

    #[test]
    fn test_escape_high_byte() {
        // Raw 0x28F7 starts with '('
        assert_eq!(crc16_unescaped(b"ACP"), 0x28F7);
        assert_eq!(crc16(b"ACP"), 0x29F7);

        // Raw 0x0AA5 starts with LF
        assert_eq!(crc16_unescaped(b"ACC"), 0x0AA5);
        assert_eq!(crc16(b"ACC"), 0x0BA5);
    }

    #[test]
    fn test_verify_uses_escaped_value() {
        assert!(verify(b"AAL", [0x9D, 0x29]));
        assert!(!verify(b"AAL", [0x9D, 0x28]));
        assert!(verify(b"QPIGS", [0xB7, 0xA9]));
        assert!(!verify(b"QPIGT", [0xB7, 0xA9]));
    }

    #[test]
    fn test_is_reserved() {
        assert!(is_reserved(b'('));
        assert!(is_reserved(b'\r'));
        assert!(is_reserved(b'\n'));
        assert!(!is_reserved(b')'));
        assert!(!is_reserved(0x00));
    }

    proptest! {
        #[test]
        fn prop_deterministic(data in proptest::collection::vec(any::<u8>(), 0..300)) {
            prop_assert_eq!(crc16(&data), crc16(&data));
        }

        #[test]
        fn prop_never_emits_delimiters(data in proptest::collection::vec(any::<u8>(), 0..300)) {
            let [hi, lo] = crc16(&data).to_be_bytes();
            prop_assert!(!is_reserved(hi));
            prop_assert!(!is_reserved(lo));
        }

        #[test]
        fn prop_escape_only_touches_delimiters(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let raw = crc16_unescaped(&data).to_be_bytes();
            let sent = crc16(&data).to_be_bytes();
            for (r, s) in raw.iter().zip(sent.iter()) {
                if is_reserved(*r) {
                    prop_assert_eq!(*s, *r + 1);
                } else {
                    prop_assert_eq!(s, r);
                }
            }
        }
    }
}
