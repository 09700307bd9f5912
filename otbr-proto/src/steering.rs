//! Steering data Bloom filter and joiner ID derivation.
//!
//! The filter is a 1..=16 byte bit set. A joiner is admitted by hashing its
//! joiner ID with two CRC16 variants and setting both resulting bit
//! positions. Bit numbering starts at the least significant bit of the
//! *last* byte, so the same joiner maps to different bytes as the filter
//! length changes.

use std::fmt;

use ring::digest;

use crate::ot::ExtAddress;

/// Largest steering data length permitted by MeshCoP.
pub const MAX_STEERING_DATA_LEN: usize = 16;

const CRC_CCITT_POLY: u16 = 0x1021;
const CRC_ANSI_POLY: u16 = 0x8005;

fn crc16(poly: u16, data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Derives the joiner ID from a factory EUI-64.
///
/// The ID is the first 8 bytes of SHA-256 over the EUI-64, with the
/// locally administered bit forced on.
pub fn compute_joiner_id(eui64: &ExtAddress) -> ExtAddress {
    let hash = digest::digest(&digest::SHA256, &eui64.0);
    let mut id = [0u8; 8];
    id.copy_from_slice(&hash.as_ref()[..8]);
    id[0] |= 0x02;
    ExtAddress(id)
}

#[derive(Clone, PartialEq, Eq)]
pub struct SteeringData {
    filter: [u8; MAX_STEERING_DATA_LEN],
    length: usize,
}

impl SteeringData {
    /// Creates an all-zero filter of `length` bytes, clamped to 1..=16.
    pub fn new(length: usize) -> Self {
        Self {
            filter: [0; MAX_STEERING_DATA_LEN],
            length: length.clamp(1, MAX_STEERING_DATA_LEN),
        }
    }

    /// Creates the "allow any joiner" filter: a single 0xff byte.
    pub fn allow_any() -> Self {
        let mut data = Self::new(1);
        data.set();
        data
    }

    pub fn clear(&mut self) {
        self.filter = [0; MAX_STEERING_DATA_LEN];
    }

    /// Sets every bit of the filter, admitting any joiner.
    pub fn set(&mut self) {
        self.filter[..self.length].fill(0xff);
    }

    pub fn num_bits(&self) -> usize {
        self.length * 8
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.filter[..self.length]
    }

    pub fn is_cleared(&self) -> bool {
        self.as_bytes().iter().all(|&b| b == 0)
    }

    /// True when every bit is set, which admits any joiner.
    pub fn permits_all(&self) -> bool {
        self.as_bytes().iter().all(|&b| b == 0xff)
    }

    fn set_bit(&mut self, bit: usize) {
        self.filter[self.length - 1 - bit / 8] |= 1 << (bit % 8);
    }

    fn get_bit(&self, bit: usize) -> bool {
        self.filter[self.length - 1 - bit / 8] & (1 << (bit % 8)) != 0
    }

    /// Admits `joiner_id` into the filter.
    pub fn compute_bloom_filter(&mut self, joiner_id: &ExtAddress) {
        let ccitt = crc16(CRC_CCITT_POLY, &joiner_id.0);
        let ansi = crc16(CRC_ANSI_POLY, &joiner_id.0);
        self.set_bit(ccitt as usize % self.num_bits());
        self.set_bit(ansi as usize % self.num_bits());
    }

    /// Tests whether the filter may admit `joiner_id`.
    pub fn contains(&self, joiner_id: &ExtAddress) -> bool {
        let ccitt = crc16(CRC_CCITT_POLY, &joiner_id.0);
        let ansi = crc16(CRC_ANSI_POLY, &joiner_id.0);
        self.get_bit(ccitt as usize % self.num_bits()) && self.get_bit(ansi as usize % self.num_bits())
    }
}

impl fmt::Debug for SteeringData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn joiner_id_sets_local_bit() {
        let id = compute_joiner_id(&ExtAddress(hex!("0011223344556677")));
        assert_eq!(id.0[0] & 0x02, 0x02);
        // deterministic across runs
        assert_eq!(id, compute_joiner_id(&ExtAddress(hex!("0011223344556677"))));
    }

    #[test]
    fn bloom_filter_membership_all_lengths() {
        let joiner = compute_joiner_id(&ExtAddress(hex!("18b4300000000001")));
        let other = compute_joiner_id(&ExtAddress(hex!("18b4300000000002")));
        for length in 1..=MAX_STEERING_DATA_LEN {
            let mut data = SteeringData::new(length);
            assert!(data.is_cleared());
            data.compute_bloom_filter(&joiner);
            assert!(data.contains(&joiner), "length {length}");
            // a cleared filter admits nobody
            let empty = SteeringData::new(length);
            assert!(!empty.contains(&other));
            // a fully set filter admits everybody
            let mut full = SteeringData::new(length);
            full.set();
            assert!(full.permits_all(), "length {length}");
            assert!(full.contains(&other));
        }
    }

    #[test]
    fn allow_any_permits_everything() {
        let data = SteeringData::allow_any();
        assert!(data.permits_all());
        assert_eq!(data.as_bytes(), &[0xff]);
        assert!(data.contains(&compute_joiner_id(&ExtAddress(hex!("ffeeddccbbaa9988")))));
    }

    #[test]
    fn set_bit_counts_from_last_byte() {
        let mut data = SteeringData::new(2);
        data.set_bit(0);
        assert_eq!(data.as_bytes(), &[0x00, 0x01]);
        data.set_bit(15);
        assert_eq!(data.as_bytes(), &[0x80, 0x01]);
    }
}
