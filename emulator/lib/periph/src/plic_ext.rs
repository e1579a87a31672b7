/*++

Licensed under the Apache-2.0 license.

File Name:

    plic_ext.rs

Abstract:

    File contains the PLIC extension holding the machine software
    interrupt pending bit.

--*/

use ot_emu_bus::{Bus, BusError, IrqLine};
use ot_emu_types::{RvAddr, RvData, RvSize};

const REG_MSIP0: RvAddr = 0x00;
const REG_ALERT_TEST: RvAddr = 0x04;
const REGS_SIZE: RvAddr = 0x08;

/// Software interrupt register block
#[derive(Default)]
pub struct PlicExt {
    msip: u32,
    msip_irq: IrqLine,
    alert: IrqLine,
}

impl PlicExt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mmap_size(&self) -> RvAddr {
        REGS_SIZE
    }

    /// Machine software interrupt of hart 0.
    pub fn msip(&self) -> IrqLine {
        self.msip_irq.clone()
    }

    pub fn alert(&self) -> IrqLine {
        self.alert.clone()
    }
}

impl Bus for PlicExt {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        match addr {
            REG_MSIP0 => Ok(self.msip),
            REG_ALERT_TEST => Ok(0),
            _ => {
                log::warn!("plic_ext: invalid read at {addr:#x}");
                Err(BusError::LoadAccessFault)
            }
        }
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word {
            Err(BusError::StoreAccessFault)?
        }
        match addr {
            REG_MSIP0 => {
                self.msip = val & 1;
                self.msip_irq.set_bool(self.msip != 0);
            }
            REG_ALERT_TEST => {
                if val & 1 != 0 {
                    self.alert.raise();
                    self.alert.lower();
                }
            }
            _ => {
                log::warn!("plic_ext: invalid write at {addr:#x}");
                Err(BusError::StoreAccessFault)?
            }
        }
        Ok(())
    }

    fn warm_reset(&mut self) {
        self.msip = 0;
        self.msip_irq.lower();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msip() {
        let mut plic = PlicExt::new();
        let irq = plic.msip();
        plic.write(RvSize::Word, REG_MSIP0, 0xffff_ffff).unwrap();
        assert!(irq.is_high());
        assert_eq!(plic.read(RvSize::Word, REG_MSIP0).unwrap(), 1);
        plic.write(RvSize::Word, REG_MSIP0, 0).unwrap();
        assert!(!irq.is_high());

        plic.write(RvSize::Word, REG_MSIP0, 1).unwrap();
        plic.warm_reset();
        assert!(!irq.is_high());
        assert_eq!(
            plic.read(RvSize::Word, 0x08).err(),
            Some(BusError::LoadAccessFault)
        );
    }
}
