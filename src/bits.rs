//! Big-endian field access and the seedable CRC-32 used by the v10 format.
//!
//! Every multi-byte integer in the container is big-endian; these helpers
//! are the single place that convention lives.

use crate::error::{Error, Result};

/// Read a big-endian u16 at `offset`, bounds-checked.
pub fn get_u16(buf: &[u8], offset: usize) -> Result<u16> {
    let bytes = buf
        .get(offset..offset + 2)
        .ok_or(Error::TruncatedRead { position: offset as u64, wanted: 2 })?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Read a big-endian u32 at `offset`, bounds-checked.
pub fn get_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = buf
        .get(offset..offset + 4)
        .ok_or(Error::TruncatedRead { position: offset as u64, wanted: 4 })?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a big-endian u64 at `offset`, bounds-checked.
pub fn get_u64(buf: &[u8], offset: usize) -> Result<u64> {
    let bytes = buf
        .get(offset..offset + 8)
        .ok_or(Error::TruncatedRead { position: offset as u64, wanted: 8 })?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(raw))
}

/// Write a big-endian u16 at `offset`, bounds-checked.
pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) -> Result<()> {
    let bytes = buf
        .get_mut(offset..offset + 2)
        .ok_or(Error::TruncatedRead { position: offset as u64, wanted: 2 })?;
    bytes.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Running CRC-32 (IEEE) seeded from an arbitrary prior value.
///
/// The v10 format seeds every meta record's CRC from the store nonce, which
/// couples integrity checking to session identity; the seed must be carried
/// through unchanged. Fields are fed in wire order as big-endian bytes.
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    pub fn seeded(seed: u32) -> Self {
        Crc32 { hasher: crc32fast::Hasher::new_with_initial(seed) }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update(&[value]);
    }

    pub fn update_u16(&mut self, value: u16) {
        self.hasher.update(&value.to_be_bytes());
    }

    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(&value.to_be_bytes());
    }

    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(&value.to_be_bytes());
    }

    /// Current CRC value; the running state is unaffected.
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_u16_big_endian() {
        let buf = [0x12, 0x34, 0x56];
        assert_eq!(get_u16(&buf, 0).unwrap(), 0x1234);
        assert_eq!(get_u16(&buf, 1).unwrap(), 0x3456);
    }

    #[test]
    fn test_get_u32_u64_big_endian() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(get_u32(&buf, 0).unwrap(), 0x01020304);
        assert_eq!(get_u64(&buf, 0).unwrap(), 0x0102030405060708);
    }

    #[test]
    fn test_get_out_of_bounds() {
        let buf = [0u8; 3];
        assert!(matches!(get_u32(&buf, 0), Err(Error::TruncatedRead { .. })));
        assert!(matches!(get_u16(&buf, 2), Err(Error::TruncatedRead { .. })));
    }

    #[test]
    fn test_put_u16_round_trip() {
        let mut buf = [0u8; 4];
        put_u16(&mut buf, 1, 0xBEEF).unwrap();
        assert_eq!(buf, [0x00, 0xBE, 0xEF, 0x00]);
        assert_eq!(get_u16(&buf, 1).unwrap(), 0xBEEF);
    }

    #[test]
    fn test_crc_incremental_matches_one_shot() {
        let mut a = Crc32::seeded(0x1234);
        a.update_u8(0x01);
        a.update_u16(0x0203);
        a.update_u32(0x04050607);

        let mut b = Crc32::seeded(0x1234);
        b.update(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);

        assert_eq!(a.value(), b.value());
    }

    #[test]
    fn test_crc_seed_changes_value() {
        let mut a = Crc32::seeded(1);
        a.update(b"same bytes");
        let mut b = Crc32::seeded(2);
        b.update(b"same bytes");
        assert_ne!(a.value(), b.value());
    }

    #[test]
    fn test_crc_value_does_not_consume() {
        let mut crc = Crc32::seeded(17);
        crc.update(b"abc");
        let first = crc.value();
        assert_eq!(first, crc.value());
        crc.update(b"def");
        assert_ne!(first, crc.value());
    }
}
