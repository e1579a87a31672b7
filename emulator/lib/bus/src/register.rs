/*++

Licensed under the Apache-2.0 license.

File Name:

    register.rs

Abstract:

    File contains the 32-bit register wrappers used by peripherals. Fields
    are declared with `register_bitfields!` and accessed through the
    tock-registers interfaces.

--*/

use crate::BusError;
use ot_emu_types::{RvData, RvSize};
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::InMemoryRegister;
use tock_registers::RegisterLongName;

/// Read Write Register
pub struct ReadWriteRegister<R: RegisterLongName = ()> {
    /// Register
    pub reg: InMemoryRegister<u32, R>,
}

impl<R: RegisterLongName> ReadWriteRegister<R> {
    /// Create an instance of Read Write Register
    pub fn new(val: u32) -> Self {
        Self {
            reg: InMemoryRegister::new(val),
        }
    }

    /// Word-sized MMIO read
    pub fn read(&self, size: RvSize) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        Ok(self.reg.get())
    }

    /// Word-sized MMIO write, keeping only the bits in `mask`.
    pub fn write(&mut self, size: RvSize, val: RvData, mask: u32) -> Result<(), BusError> {
        if size != RvSize::Word {
            Err(BusError::StoreAccessFault)?
        }
        self.reg.set(val & mask);
        Ok(())
    }
}

impl<R: RegisterLongName> Default for ReadWriteRegister<R> {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Read Only Register
pub struct ReadOnlyRegister<R: RegisterLongName = ()> {
    /// Register
    pub reg: InMemoryRegister<u32, R>,
}

impl<R: RegisterLongName> ReadOnlyRegister<R> {
    /// Create an instance of Read Only Register
    pub fn new(val: u32) -> Self {
        Self {
            reg: InMemoryRegister::new(val),
        }
    }

    /// Word-sized MMIO read
    pub fn read(&self, size: RvSize) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        Ok(self.reg.get())
    }
}

impl<R: RegisterLongName> Default for ReadOnlyRegister<R> {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tock_registers::interfaces::ReadWriteable;
    use tock_registers::register_bitfields;

    register_bitfields! [
        u32,
        Ctrl [
            EN OFFSET(0) NUMBITS(1) [],
            MODE OFFSET(4) NUMBITS(2) [
                A = 0,
                B = 1,
            ],
        ],
    ];

    #[test]
    fn test_read_write_register() {
        let mut reg = ReadWriteRegister::<Ctrl::Register>::new(0);
        assert_eq!(reg.write(RvSize::Word, 0xffff_ffff, 0x31), Ok(()));
        assert_eq!(reg.read(RvSize::Word), Ok(0x31));
        assert!(reg.reg.is_set(Ctrl::EN));
        reg.reg.modify(Ctrl::MODE::A);
        assert_eq!(reg.reg.read(Ctrl::MODE), 0);
        assert_eq!(reg.read(RvSize::Byte), Err(BusError::LoadAccessFault));
        assert_eq!(
            reg.write(RvSize::HalfWord, 0, u32::MAX),
            Err(BusError::StoreAccessFault)
        );
    }

    #[test]
    fn test_read_only_register() {
        let reg = ReadOnlyRegister::<()>::new(0x1234);
        assert_eq!(reg.read(RvSize::Word), Ok(0x1234));
        assert_eq!(reg.read(RvSize::HalfWord), Err(BusError::LoadAccessFault));
    }
}
