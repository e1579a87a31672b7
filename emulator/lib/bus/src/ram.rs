/*++

Licensed under the Apache-2.0 license.

File Name:

    ram.rs

Abstract:

    File contains implementation of RAM

--*/

use crate::{Bus, BusError};
use ot_emu_types::{RvAddr, RvData, RvSize};

/// Byte-addressable little-endian memory.
pub struct Ram {
    data: Vec<u8>,
}

impl Ram {
    /// Create new RAM
    ///
    /// # Arguments
    ///
    /// * `data` - Initial content of the RAM
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Create a zero-filled RAM of `size` bytes.
    pub fn zeroed(size: usize) -> Self {
        Self::new(vec![0; size])
    }

    pub fn mmap_size(&self) -> RvAddr {
        self.data.len() as RvAddr
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn range(&self, size: RvSize, addr: RvAddr) -> Option<std::ops::Range<usize>> {
        let len = match size {
            RvSize::Invalid => return None,
            size => usize::from(size),
        };
        let start = addr as usize;
        let end = start.checked_add(len)?;
        if end > self.data.len() {
            return None;
        }
        Some(start..end)
    }
}

impl Bus for Ram {
    /// Read data of specified size from given address
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        let range = self.range(size, addr).ok_or(BusError::LoadAccessFault)?;
        Ok(self.data[range]
            .iter()
            .rev()
            .fold(0, |acc, b| (acc << 8) | RvData::from(*b)))
    }

    /// Write data of specified size to given address
    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        let range = self.range(size, addr).ok_or(BusError::StoreAccessFault)?;
        for (i, b) in self.data[range].iter_mut().enumerate() {
            *b = (val >> (8 * i)) as u8;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read() {
        let mut ram = Ram::new(vec![1, 2, 3, 4]);
        assert_eq!(ram.read(RvSize::Byte, 0).ok(), Some(1));
        assert_eq!(ram.read(RvSize::HalfWord, 0).ok(), Some(1 | 2 << 8));
        assert_eq!(
            ram.read(RvSize::Word, 0).ok(),
            Some(1 | 2 << 8 | 3 << 16 | 4 << 24)
        );
    }

    #[test]
    fn test_read_error() {
        let mut ram = Ram::new(vec![1, 2, 3, 4]);
        assert_eq!(
            ram.read(RvSize::Byte, ram.mmap_size()),
            Err(BusError::LoadAccessFault)
        );
        assert_eq!(ram.read(RvSize::Word, 2), Err(BusError::LoadAccessFault));
    }

    #[test]
    fn test_write() {
        let mut ram = Ram::zeroed(4);
        assert_eq!(ram.write(RvSize::HalfWord, 2, 0xdead_beef), Ok(()));
        assert_eq!(ram.data(), &[0, 0, 0xef, 0xbe]);
    }

    #[test]
    fn test_write_error() {
        let mut ram = Ram::new(vec![1, 2, 3, 4]);
        assert_eq!(
            ram.write(RvSize::Byte, ram.mmap_size(), 0),
            Err(BusError::StoreAccessFault)
        )
    }
}
