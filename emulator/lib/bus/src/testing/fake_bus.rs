/*++

Licensed under the Apache-2.0 license.

File Name:

    fake_bus.rs

Abstract:

    File contains code for a fake implementation of the Bus trait.

--*/
use ot_emu_types::{MemTxAttrs, RvAddr, RvData, RvSize};

use crate::{testing::Log, Bus, BusError};
use std::fmt::Write;

/// A Bus implementation that logs all calls, and allows the user to override
/// the return value of the methods.
///
/// # Example
///
/// ```
/// use ot_emu_bus::{Bus, testing::FakeBus};
/// use ot_emu_types::RvSize;
///
/// let mut fake_bus = FakeBus::new();
/// fake_bus.read_result = Ok(35);
/// assert_eq!(fake_bus.read(RvSize::HalfWord, 0xdeadcafe), Ok(35));
/// assert_eq!("read(RvSize::HalfWord, 0xdeadcafe)\n", fake_bus.log.take());
/// ```
pub struct FakeBus {
    pub log: Log,
    pub read_result: Result<RvData, BusError>,
    pub write_result: Result<(), BusError>,
}
impl FakeBus {
    pub fn new() -> Self {
        Self {
            log: Log::new(),
            read_result: Ok(0),
            write_result: Ok(()),
        }
    }
}
impl Default for FakeBus {
    fn default() -> Self {
        Self::new()
    }
}
impl Bus for FakeBus {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        writeln!(self.log.w(), "read(RvSize::{size:?}, {addr:#x})").unwrap();
        self.read_result
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        writeln!(self.log.w(), "write(RvSize::{size:?}, {addr:#x}, {val:#x})").unwrap();
        self.write_result
    }

    fn read_attrs(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        attrs: MemTxAttrs,
    ) -> Result<RvData, BusError> {
        if attrs.role != 0 {
            writeln!(self.log.w(), "role({})", attrs.role).unwrap();
        }
        self.read(size, addr)
    }

    fn poll(&mut self) {
        writeln!(self.log.w(), "poll()").unwrap();
    }

    fn warm_reset(&mut self) {
        writeln!(self.log.w(), "warm_reset()").unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_bus() {
        let mut fake_bus = FakeBus::new();

        assert_eq!(fake_bus.read(RvSize::HalfWord, 0xdeadcafe), Ok(0));
        assert_eq!("read(RvSize::HalfWord, 0xdeadcafe)\n", fake_bus.log.take());

        assert_eq!(fake_bus.write(RvSize::Word, 0xf00dcafe, 0x537), Ok(()));
        assert_eq!(
            "write(RvSize::Word, 0xf00dcafe, 0x537)\n",
            fake_bus.log.take()
        );

        fake_bus.read_result = Err(BusError::LoadAccessFault);
        assert_eq!(
            fake_bus.read_attrs(RvSize::Byte, 0x12345678, MemTxAttrs::with_role(2)),
            Err(BusError::LoadAccessFault)
        );
        assert_eq!(
            "role(2)\nread(RvSize::Byte, 0x12345678)\n",
            fake_bus.log.take()
        );

        fake_bus.poll();
        assert_eq!("poll()\n", fake_bus.log.take());
    }
}
