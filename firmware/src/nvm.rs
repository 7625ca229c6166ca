//! Records kept in the last two flash pages.
//!
//! Each record is a magic word, a body and a CRC-16 over both, padded to the
//! flash write granularity. An erased page reads back as all ones and fails
//! the magic check.

use node_core::checksum::crc16;
use node_core::session::{NONCES_LEN, NonceBlock};

/// Flash programs in 64-bit double words.
pub const WRITE_GRANULARITY: usize = 8;

pub const NONCE_MAGIC: u32 = 0x4E4F_4E31;
pub const CONFIG_MAGIC: u32 = 0x434F_4E31;

/// Bytes the store writes for a nonce record.
pub const NONCE_RECORD_LEN: usize = padded(4 + NONCES_LEN + 2);
/// Bytes the store writes for the configuration marker.
pub const CONFIG_RECORD_LEN: usize = padded(4 + 2);

const fn padded(len: usize) -> usize {
    len.div_ceil(WRITE_GRANULARITY) * WRITE_GRANULARITY
}

fn seal<const N: usize>(magic: u32, body: &[u8]) -> [u8; N] {
    let mut record = [0xFF; N];
    record[..4].copy_from_slice(&magic.to_le_bytes());
    record[4..4 + body.len()].copy_from_slice(body);
    let crc = crc16(&record[..4 + body.len()]);
    record[4 + body.len()..6 + body.len()].copy_from_slice(&crc.to_le_bytes());
    record
}

fn open(magic: u32, record: &[u8], body_len: usize) -> Option<&[u8]> {
    let framed = record.get(..6 + body_len)?;
    if framed[..4] != magic.to_le_bytes() {
        return None;
    }
    let (covered, crc) = framed.split_at(4 + body_len);
    (crc == crc16(covered).to_le_bytes()).then(|| &covered[4..])
}

#[must_use]
pub fn encode_nonces(nonces: &NonceBlock) -> [u8; NONCE_RECORD_LEN] {
    seal(NONCE_MAGIC, nonces)
}

#[must_use]
pub fn decode_nonces(record: &[u8]) -> Option<NonceBlock> {
    open(NONCE_MAGIC, record, NONCES_LEN)?.try_into().ok()
}

#[must_use]
pub fn config_marker() -> [u8; CONFIG_RECORD_LEN] {
    seal(CONFIG_MAGIC, &[])
}

#[must_use]
pub fn is_config_marker(record: &[u8]) -> bool {
    open(CONFIG_MAGIC, record, 0).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_fill_whole_double_words() {
        assert_eq!(NONCE_RECORD_LEN % WRITE_GRANULARITY, 0);
        assert_eq!(CONFIG_RECORD_LEN, WRITE_GRANULARITY);
    }

    #[test]
    fn nonce_record_reads_back() {
        let mut nonces = [0u8; NONCES_LEN];
        nonces[0] = 7;
        nonces[NONCES_LEN - 1] = 0xA5;
        let record = encode_nonces(&nonces);
        assert_eq!(decode_nonces(&record), Some(nonces));
    }

    #[test]
    fn erased_page_holds_no_records() {
        let erased = [0xFF; NONCE_RECORD_LEN];
        assert_eq!(decode_nonces(&erased), None);
        assert!(!is_config_marker(&erased[..CONFIG_RECORD_LEN]));
    }

    #[test]
    fn corrupted_nonce_record_is_rejected() {
        let mut record = encode_nonces(&[3u8; NONCES_LEN]);
        record[10] ^= 0x01;
        assert_eq!(decode_nonces(&record), None);
    }

    #[test]
    fn marker_is_not_a_nonce_record() {
        let marker = config_marker();
        assert!(is_config_marker(&marker));
        assert_eq!(decode_nonces(&marker), None);
    }
}
