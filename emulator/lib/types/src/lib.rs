/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the OpenTitan Emulator Types library.

--*/

mod macros;
mod memtx;

pub use crate::memtx::{MemTxAttrs, MemTxError, MemTxResult};

/// RISCV Data width
pub type RvData = u32;

/// RISCV Address width
pub type RvAddr = u32;

emu_enum!(
    /// RISCV IO Operation size
    #[derive(Debug, Eq, PartialEq, Copy, Clone)]
    pub RvSize;
    usize;
    {
        Byte = 1,
        HalfWord = 2,
        Word = 4,
    };
    Invalid
);

impl RvSize {
    /// Mask covering the bits transferred by an access of this size.
    pub fn mask(self) -> RvData {
        match self {
            RvSize::Byte => 0xff,
            RvSize::HalfWord => 0xffff,
            _ => 0xffff_ffff,
        }
    }

    /// Largest access size usable for `len` bytes at `addr`.
    pub fn for_access(addr: u64, len: usize) -> RvSize {
        if len >= 4 && addr & 3 == 0 {
            RvSize::Word
        } else if len >= 2 && addr & 1 == 0 {
            RvSize::HalfWord
        } else {
            RvSize::Byte
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rv_size_conversions() {
        assert_eq!(RvSize::from(4usize), RvSize::Word);
        assert_eq!(RvSize::from(3usize), RvSize::Invalid);
        assert_eq!(usize::from(RvSize::HalfWord), 2);
        assert_eq!(RvSize::Byte.to_string(), "Byte");
    }

    #[test]
    fn test_rv_size_for_access() {
        assert_eq!(RvSize::for_access(0x1000, 16), RvSize::Word);
        assert_eq!(RvSize::for_access(0x1002, 16), RvSize::HalfWord);
        assert_eq!(RvSize::for_access(0x1001, 16), RvSize::Byte);
        assert_eq!(RvSize::for_access(0x1000, 3), RvSize::HalfWord);
        assert_eq!(RvSize::Word.mask(), u32::MAX);
    }
}
