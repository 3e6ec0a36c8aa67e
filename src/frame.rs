//! Modbus RTU framing as tunnelled through the GATT write/notify characteristics.
//!
//! Requests are always 8 bytes:
//!
//! Start Byte | End Byte | Meaning
//! 0          | 0        | Slave id
//! 1          | 1        | Function code (0x03 read holding registers, 0x06 write single register)
//! 2          | 3        | Register address, big endian
//! 4          | 5        | Word count (reads) or value (writes), big endian
//! 6          | 7        | A MODBUS CRC over bytes 0-5, low byte first
//!
//! Read responses carry `[slave id, 0x03, byte count, data.., crc lo, crc hi]`,
//! so a read of `n` words is answered with `n * 2 + 5` bytes.

use crc16::{State, MODBUS};

use crate::error::CodecError;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Set on the function code of an exception reply.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Header, byte count and CRC around the data of a read response.
const READ_OVERHEAD: usize = 5;
const MIN_FRAME_LEN: usize = 5;
const WRITE_ECHO_LEN: usize = 8;

/// Compute the CRC check value for the given bytes, low byte first.
pub fn crc(data: &[u8]) -> [u8; 2] {
    State::<MODBUS>::calculate(data).to_le_bytes()
}

/// Whether the trailing two bytes of `frame` are the CRC of the rest.
pub fn crc_matches(frame: &[u8]) -> bool {
    frame.len() >= 2 && frame[frame.len() - 2..] == crc(&frame[..frame.len() - 2])
}

/// Expected length of the response to a read of `word_count` registers.
pub fn read_response_len(word_count: u16) -> usize {
    word_count as usize * 2 + READ_OVERHEAD
}

pub fn build_read_request(slave_id: u8, register: u16, word_count: u16) -> [u8; 8] {
    build_request(slave_id, READ_HOLDING_REGISTERS, register, word_count)
}

pub fn build_write_request(slave_id: u8, register: u16, value: u16) -> [u8; 8] {
    build_request(slave_id, WRITE_SINGLE_REGISTER, register, value)
}

fn build_request(slave_id: u8, function: u8, register: u16, operand: u16) -> [u8; 8] {
    let [reg_hi, reg_lo] = register.to_be_bytes();
    let [op_hi, op_lo] = operand.to_be_bytes();
    let mut frame = [slave_id, function, reg_hi, reg_lo, op_hi, op_lo, 0, 0];
    let [crc_lo, crc_hi] = crc(&frame[..6]);
    frame[6] = crc_lo;
    frame[7] = crc_hi;
    frame
}

/// A response frame whose CRC (and length, when known) has been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame<'a> {
    pub slave_id: u8,
    pub function: u8,
    /// The whole frame, for decoders that address fields by frame offset.
    pub frame: &'a [u8],
}

impl<'a> ResponseFrame<'a> {
    /// Bytes between the byte count and the CRC.
    pub fn data(&self) -> &'a [u8] {
        &self.frame[3..self.frame.len() - 2]
    }

    pub fn is_exception(&self) -> bool {
        self.function & EXCEPTION_FLAG != 0
    }

    /// Exception code of an error reply.
    pub fn exception_code(&self) -> Option<u8> {
        self.is_exception().then(|| self.frame[2])
    }

    /// Register and value echoed by a write acknowledgement.
    pub fn write_echo(&self) -> Option<(u16, u16)> {
        if self.function != WRITE_SINGLE_REGISTER || self.frame.len() != WRITE_ECHO_LEN {
            return None;
        }
        let register = u16::from_be_bytes([self.frame[2], self.frame[3]]);
        let value = u16::from_be_bytes([self.frame[4], self.frame[5]]);
        Some((register, value))
    }
}

/// Check the CRC and, when `expected_word_count` is given, the length of a
/// read response.
pub fn validate_and_extract(
    raw: &[u8],
    expected_word_count: Option<u16>,
) -> Result<ResponseFrame<'_>, CodecError> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(CodecError::TooShort { len: raw.len() });
    }

    let (body, trailer) = raw.split_at(raw.len() - 2);
    let expected = State::<MODBUS>::calculate(body);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    if expected != received {
        return Err(CodecError::CrcMismatch { expected, received });
    }

    if let Some(word_count) = expected_word_count {
        let expected = read_response_len(word_count);
        if raw.len() != expected {
            return Err(CodecError::LengthMismatch {
                expected,
                received: raw.len(),
            });
        }
    }

    Ok(ResponseFrame {
        slave_id: raw[0],
        function: raw[1],
        frame: raw,
    })
}

/// Read a big-endian integer of `width` bytes at `offset` within `frame` and
/// multiply it by `scale`.
///
/// Offsets are relative to the start of the frame (slave id at 0), matching the
/// way device register maps are usually documented.
pub fn read_scaled_int(
    frame: &[u8],
    offset: usize,
    width: usize,
    scale: f64,
    signed: bool,
) -> Result<f64, CodecError> {
    if !(1..=4).contains(&width) {
        return Err(CodecError::InvalidWidth(width));
    }
    let bytes = offset
        .checked_add(width)
        .and_then(|end| frame.get(offset..end))
        .ok_or(CodecError::OutOfBounds {
            offset,
            width,
            len: frame.len(),
        })?;

    let raw = bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    let bits = width as u32 * 8;
    let value = if signed && raw >> (bits - 1) & 1 == 1 {
        i64::from(raw) - (1i64 << bits)
    } else {
        i64::from(raw)
    };

    Ok(value as f64 * scale)
}

/// How much of a response the receive buffer holds.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Assembly {
    /// More notifications are needed.
    Incomplete,
    /// The frame is complete once this many bytes are buffered.
    Complete(usize),
    /// The function code is not a reply to anything this crate sends.
    Unrecognized(u8),
}

/// Work out whether `buffer` holds a whole response.
///
/// BLE delivers a response over several notifications, and the byte count of a
/// garbled header cannot be trusted, so the frame length is capped at
/// `expected_len` when the caller knows it.
pub(crate) fn assemble(buffer: &[u8], expected_len: Option<usize>) -> Assembly {
    if buffer.len() < 2 {
        return Assembly::Incomplete;
    }

    let len = match buffer[1] {
        READ_HOLDING_REGISTERS => {
            if buffer.len() < 3 {
                return Assembly::Incomplete;
            }
            let declared = buffer[2] as usize + READ_OVERHEAD;
            expected_len.map_or(declared, |expected| declared.min(expected))
        }
        WRITE_SINGLE_REGISTER => WRITE_ECHO_LEN,
        f if f == READ_HOLDING_REGISTERS | EXCEPTION_FLAG
            || f == WRITE_SINGLE_REGISTER | EXCEPTION_FLAG =>
        {
            MIN_FRAME_LEN
        }
        other => return Assembly::Unrecognized(other),
    };

    if buffer.len() < len {
        Assembly::Incomplete
    } else {
        Assembly::Complete(len)
    }
}

#[cfg(test)]
pub(crate) fn with_crc(mut body: Vec<u8>) -> Vec<u8> {
    let check = crc(&body);
    body.extend_from_slice(&check);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    const BMS_RESPONSE: &str = "010318240c000002a7000000000000000000000000000000000000bc90";

    #[test]
    fn checksum() {
        let payload = [
            0x01, 0x03, 0x18, 0x24, 0x0c, 0x00, 0x00, 0x02, 0xa7, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(State::<MODBUS>::calculate(&payload), 0x90bc);
        assert_eq!(crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), [0x84, 0x0a]);
    }

    #[test]
    fn read_requests_match_known_frames() {
        assert_eq!(
            build_read_request(0x01, 0x0000, 0x0001),
            [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0a]
        );
        assert_eq!(
            build_read_request(0x01, 0xd000, 0x0026),
            [0x01, 0x03, 0xd0, 0x00, 0x00, 0x26, 0xfc, 0xd0]
        );
        assert_eq!(
            build_read_request(0x01, 0xd026, 0x0019),
            [0x01, 0x03, 0xd0, 0x26, 0x00, 0x19, 0x5d, 0x0b]
        );
    }

    #[test]
    fn write_request() {
        assert_eq!(
            build_write_request(0x01, 0x000a, 0x0001),
            [0x01, 0x06, 0x00, 0x0a, 0x00, 0x01, 0x68, 0x08]
        );
    }

    #[test]
    fn validate_happy() {
        let message = hex::decode(BMS_RESPONSE).unwrap();
        let frame = validate_and_extract(&message, Some(12)).unwrap();
        assert_eq!(frame.slave_id, 0x01);
        assert_eq!(frame.function, READ_HOLDING_REGISTERS);
        assert_eq!(
            frame.data(),
            &hex::decode("240c000002a7000000000000000000000000000000000000").unwrap()[..]
        );
    }

    #[test]
    fn validate_bad_crc() {
        let message =
            hex::decode("010318240c000002a7000000000000000000000000000000000000bc91").unwrap();
        assert_eq!(
            validate_and_extract(&message, None),
            Err(CodecError::CrcMismatch {
                expected: 0x90bc,
                received: 0x91bc
            })
        );
    }

    #[test]
    fn validate_too_short() {
        assert_eq!(
            validate_and_extract(&[0x01, 0x03, 0x00, 0x00], None),
            Err(CodecError::TooShort { len: 4 })
        );
    }

    #[test]
    fn every_single_bit_flip_fails_crc() {
        let message = hex::decode(BMS_RESPONSE).unwrap();
        for byte in 0..message.len() {
            for bit in 0..8 {
                let mut corrupted = message.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        validate_and_extract(&corrupted, Some(12)),
                        Err(CodecError::CrcMismatch { .. })
                    ),
                    "flip of bit {bit} in byte {byte} was accepted"
                );
            }
        }
    }

    #[test]
    fn response_length_must_match_word_count() {
        for word_count in 1u16..125 {
            let len = read_response_len(word_count);
            let exact = with_crc(vec![0x01; len - 2]);
            assert!(validate_and_extract(&exact, Some(word_count)).is_ok());

            for wrong in [len - 1, len + 1] {
                let frame = with_crc(vec![0x01; wrong - 2]);
                assert_eq!(
                    validate_and_extract(&frame, Some(word_count)),
                    Err(CodecError::LengthMismatch {
                        expected: len,
                        received: wrong
                    })
                );
            }
        }
    }

    #[test]
    fn exception_reply() {
        let reply = with_crc(vec![0x01, 0x83, 0x02]);
        let frame = validate_and_extract(&reply, None).unwrap();
        assert!(frame.is_exception());
        assert_eq!(frame.exception_code(), Some(0x02));
        assert!(frame.data().is_empty());
    }

    #[test]
    fn write_echo() {
        let ack = build_write_request(0x01, 0x010a, 0x0001);
        let frame = validate_and_extract(&ack, None).unwrap();
        assert_eq!(frame.write_echo(), Some((0x010a, 0x0001)));
    }

    #[test]
    fn scaled_unsigned() {
        let value = read_scaled_int(&[0x00, 0x01, 0x2c], 0, 3, 0.001, false).unwrap();
        assert!((value - 0.300).abs() < 1e-9);
        assert_eq!(read_scaled_int(&[0xff, 0xff], 0, 2, 1.0, false).unwrap(), 65535.0);
    }

    #[test]
    fn scaled_signed() {
        let value = read_scaled_int(&[0xff, 0xfe, 0xd4], 0, 3, 0.001, true).unwrap();
        assert!((value + 0.300).abs() < 1e-9);
        assert_eq!(read_scaled_int(&[0x80], 0, 1, 1.0, true).unwrap(), -128.0);
        assert_eq!(read_scaled_int(&[0x7f], 0, 1, 1.0, true).unwrap(), 127.0);
        assert_eq!(
            read_scaled_int(&[0xff, 0xff, 0xff, 0xff], 0, 4, 1.0, true).unwrap(),
            -1.0
        );
        assert_eq!(
            read_scaled_int(&[0x00, 0x80, 0x00, 0x00, 0x00], 1, 4, 1.0, true).unwrap(),
            -2147483648.0
        );
    }

    #[test]
    fn scaled_bounds() {
        assert_eq!(
            read_scaled_int(&[0x00, 0x01], 1, 2, 1.0, false),
            Err(CodecError::OutOfBounds {
                offset: 1,
                width: 2,
                len: 2
            })
        );
        assert_eq!(
            read_scaled_int(&[0x00; 8], 0, 5, 1.0, false),
            Err(CodecError::InvalidWidth(5))
        );
        assert_eq!(
            read_scaled_int(&[0x00; 8], 0, 0, 1.0, false),
            Err(CodecError::InvalidWidth(0))
        );
    }

    #[test]
    fn assemble_fragments() {
        let message = hex::decode(BMS_RESPONSE).unwrap();
        assert_eq!(assemble(&message[..1], Some(29)), Assembly::Incomplete);
        assert_eq!(assemble(&message[..2], Some(29)), Assembly::Incomplete);
        assert_eq!(assemble(&message[..20], Some(29)), Assembly::Incomplete);
        assert_eq!(assemble(&message, Some(29)), Assembly::Complete(29));
        // a garbled byte count cannot hold the session hostage
        let mut garbled = message.clone();
        garbled[2] = 0xff;
        assert_eq!(assemble(&garbled, Some(29)), Assembly::Complete(29));
        assert_eq!(assemble(&[0x01, 0x83, 0x02], None), Assembly::Incomplete);
        assert_eq!(assemble(&[0x01, 0x83, 0x02, 0, 0], None), Assembly::Complete(5));
        assert_eq!(assemble(&[0x01, 0x42], None), Assembly::Unrecognized(0x42));
    }
}
