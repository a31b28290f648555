//! Read-only access to a closed store file.
//!
//! The scanner never writes: `Store` exposes blocking positional reads and
//! nothing else. `StoreReader` layers a bounded, forward-seekable cursor on
//! top for the hand-rolled record decoding.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Random-access byte source for a closed store.
pub trait Store {
    /// Fill `buf` from `address`. Short reads are errors.
    fn read_at(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Total store length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Store backed by a regular file, read with positional I/O.
pub struct FileStore {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let len = file.metadata()?.len();

        Ok(FileStore {
            file,
            path: path.as_ref().to_path_buf(),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store for FileStore {
    fn read_at(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        match address.checked_add(buf.len() as u64) {
            Some(end) if end <= self.len => {}
            _ => return Err(Error::TruncatedRead { position: address, wanted: buf.len() }),
        }
        self.file.read_exact_at(buf, address)?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// Store over an owned in-memory image.
pub struct MemStore {
    data: Vec<u8>,
}

impl MemStore {
    pub fn new(data: Vec<u8>) -> Self {
        MemStore { data }
    }
}

impl Store for MemStore {
    fn read_at(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let source = usize::try_from(address)
            .ok()
            .and_then(|start| start.checked_add(buf.len()).map(|end| (start, end)))
            .and_then(|(start, end)| self.data.get(start..end))
            .ok_or(Error::TruncatedRead { position: address, wanted: buf.len() })?;
        buf.copy_from_slice(source);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Bounded cursor over one extent of a store.
///
/// Positions are relative to the extent start; any read or seek past the
/// extent length fails with `TruncatedRead` rather than spilling into a
/// neighboring segment.
pub struct StoreReader<'a, S: Store + ?Sized> {
    store: &'a S,
    base: u64,
    length: u64,
    position: u64,
}

impl<'a, S: Store + ?Sized> StoreReader<'a, S> {
    pub fn new(store: &'a S, address: u64, length: u64) -> Self {
        StoreReader { store, base: address, length, position: 0 }
    }

    /// Current position relative to the extent start.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn remaining(&self) -> u64 {
        self.length - self.position
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.length {
            return Err(Error::TruncatedRead { position, wanted: 0 });
        }
        self.position = position;
        Ok(())
    }

    pub fn skip(&mut self, count: u64) -> Result<()> {
        let target = self.position.checked_add(count).ok_or(Error::TruncatedRead {
            position: self.position,
            wanted: count as usize,
        })?;
        self.seek(target)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() as u64 > self.remaining() {
            return Err(Error::TruncatedRead { position: self.position, wanted: buf.len() });
        }
        self.store.read_at(self.base + self.position, buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Read the next byte without advancing.
    pub fn peek_u8(&mut self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(Error::TruncatedRead { position: self.position, wanted: 1 });
        }
        let mut buf = [0u8; 1];
        self.store.read_at(self.base + self.position, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> MemStore {
        MemStore::new((0u8..64).collect())
    }

    #[test]
    fn test_mem_store_read_at() {
        let store = sample_store();
        let mut buf = [0u8; 4];
        store.read_at(10, &mut buf).expect("read failed");
        assert_eq!(buf, [10, 11, 12, 13]);
    }

    #[test]
    fn test_mem_store_read_past_end() {
        let store = sample_store();
        let mut buf = [0u8; 8];
        assert!(matches!(
            store.read_at(60, &mut buf),
            Err(Error::TruncatedRead { .. })
        ));
    }

    #[test]
    fn test_reader_big_endian_fields() {
        let store = MemStore::new(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        let mut reader = StoreReader::new(&store, 0, 8);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert_eq!(reader.read_u32().unwrap(), 0x03040506);
        assert_eq!(reader.position(), 6);
    }

    #[test]
    fn test_reader_bounded_by_extent() {
        let store = sample_store();
        let mut reader = StoreReader::new(&store, 8, 4);
        assert_eq!(reader.read_u32().unwrap(), 0x08090a0b);
        // The store has more bytes, but the extent is exhausted.
        assert!(matches!(reader.read_u8(), Err(Error::TruncatedRead { .. })));
    }

    #[test]
    fn test_reader_seek_and_skip() {
        let store = sample_store();
        let mut reader = StoreReader::new(&store, 0, 64);
        reader.seek(32).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 32);
        reader.skip(7).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 40);
        assert!(reader.seek(65).is_err());
    }

    #[test]
    fn test_reader_peek_does_not_advance() {
        let store = sample_store();
        let mut reader = StoreReader::new(&store, 4, 8);
        assert_eq!(reader.peek_u8().unwrap(), 4);
        assert_eq!(reader.peek_u8().unwrap(), 4);
        assert_eq!(reader.read_u8().unwrap(), 4);
        assert_eq!(reader.read_u8().unwrap(), 5);
    }
}
