//! CRC-16/MODBUS shared by the field-bus framing and the retained-state image.

const POLY: u16 = 0xA001;
const INIT: u16 = 0xFFFF;

/// Computes the CRC-16/MODBUS checksum of `data`.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = INIT;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Returns `true` when the trailing two bytes of `frame` carry its CRC, low byte first.
#[must_use]
pub fn verify_trailing_crc(frame: &[u8]) -> bool {
    let Some(split) = frame.len().checked_sub(2) else {
        return false;
    };
    let (body, tail) = frame.split_at(split);
    let expected = crc16(body);
    tail == expected.to_le_bytes()
}
