/*++

Licensed under the Apache-2.0 license.

File Name:

    soc_proxy.rs

Abstract:

    File contains the SoC proxy: external interrupt and alert sources of
    the integrating SoC, brought into the root of trust.

--*/

use crate::mubi::w1c;
use crate::ConfigError;
use ot_emu_bus::{Bus, BusError, GpioIn, GpioSink, IrqLine};
use ot_emu_types::{RvAddr, RvData, RvSize};
use std::cell::RefCell;
use std::rc::Rc;

const REG_INTR_STATE: RvAddr = 0x00;
const REG_INTR_ENABLE: RvAddr = 0x04;
const REG_INTR_TEST: RvAddr = 0x08;
const REG_ALERT_TEST: RvAddr = 0x0c;
const REGS_SIZE: RvAddr = 0x10;

/// Alert raised on a bus integrity error; external alerts follow it.
pub const ALERT_FATAL_INTG: usize = 0;

#[derive(Debug, Clone)]
pub struct SocProxyArgs {
    /// External interrupt sources, at most 32
    pub n_irqs: usize,
    pub n_ext_alerts: usize,
}

impl Default for SocProxyArgs {
    fn default() -> Self {
        Self {
            n_irqs: 32,
            n_ext_alerts: 8,
        }
    }
}

pub struct SocProxyRegs {
    n_irqs: usize,
    intr_state: u32,
    intr_enable: u32,
    ext_levels: u32,
    irqs: Vec<IrqLine>,
    alerts: Vec<IrqLine>,
}

impl SocProxyRegs {
    fn valid_mask(&self) -> u32 {
        if self.n_irqs == 32 {
            u32::MAX
        } else {
            (1 << self.n_irqs) - 1
        }
    }

    fn update_irqs(&self) {
        let active = self.intr_state & self.intr_enable;
        for (i, irq) in self.irqs.iter().enumerate() {
            let level = active & (1 << i) != 0;
            if irq.is_high() != level {
                irq.set_bool(level);
            }
        }
    }

    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        match addr {
            REG_INTR_STATE => Ok(self.intr_state),
            REG_INTR_ENABLE => Ok(self.intr_enable),
            REG_INTR_TEST | REG_ALERT_TEST => Ok(0),
            _ => {
                log::warn!("soc_proxy: invalid read at {addr:#x}");
                Err(BusError::LoadAccessFault)
            }
        }
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word {
            Err(BusError::StoreAccessFault)?
        }
        let val = match addr {
            REG_ALERT_TEST => val,
            _ => val & self.valid_mask(),
        };
        match addr {
            REG_INTR_STATE => self.intr_state = w1c(self.intr_state, val),
            REG_INTR_ENABLE => self.intr_enable = val,
            REG_INTR_TEST => self.intr_state |= val,
            REG_ALERT_TEST => {
                for (i, alert) in self.alerts.iter().enumerate() {
                    if i < 32 && val & (1 << i) != 0 {
                        alert.raise();
                        alert.lower();
                    }
                }
            }
            _ => {
                log::warn!("soc_proxy: invalid write at {addr:#x}");
                Err(BusError::StoreAccessFault)?
            }
        }
        self.update_irqs();
        Ok(())
    }

    fn reset(&mut self) {
        self.intr_state = 0;
        self.intr_enable = 0;
        self.update_irqs();
    }
}

impl GpioSink for SocProxyRegs {
    /// Inputs `0..n_irqs` are the external interrupts, the following ones
    /// the external alerts.
    fn set_level(&mut self, input: usize, level: i32) {
        if input < self.n_irqs {
            let bit = 1u32 << input;
            let high = level > 0;
            if high && self.ext_levels & bit == 0 {
                log::trace!("soc_proxy: external irq {input}");
                self.intr_state |= bit;
            }
            if high {
                self.ext_levels |= bit;
            } else {
                self.ext_levels &= !bit;
            }
            self.update_irqs();
        } else if let Some(alert) = self.alerts.get(input - self.n_irqs + 1) {
            alert.set(level);
        }
    }
}

/// SoC proxy peripheral
#[derive(Clone)]
pub struct SocProxy {
    regs: Rc<RefCell<SocProxyRegs>>,
}

impl SocProxy {
    pub fn new(args: SocProxyArgs) -> Result<Self, ConfigError> {
        if args.n_irqs > 32 {
            return Err(ConfigError::invalid(
                "soc_proxy",
                format!("{} interrupts exceed the register width", args.n_irqs),
            ));
        }
        let lines = |n: usize| -> Vec<IrqLine> { (0..n).map(|_| IrqLine::new()).collect() };
        Ok(Self {
            regs: Rc::new(RefCell::new(SocProxyRegs {
                n_irqs: args.n_irqs,
                intr_state: 0,
                intr_enable: 0,
                ext_levels: 0,
                irqs: lines(args.n_irqs),
                alerts: lines(1 + args.n_ext_alerts),
            })),
        })
    }

    pub fn mmap_size(&self) -> RvAddr {
        REGS_SIZE
    }

    pub fn ext_irq(&self, n: usize) -> GpioIn {
        GpioIn::new(&self.regs, n)
    }

    pub fn ext_alert(&self, n: usize) -> GpioIn {
        let n_irqs = self.regs.borrow().n_irqs;
        GpioIn::new(&self.regs, n_irqs + n)
    }

    pub fn irq(&self, n: usize) -> Option<IrqLine> {
        self.regs.borrow().irqs.get(n).cloned()
    }

    pub fn irqs(&self) -> Vec<IrqLine> {
        self.regs.borrow().irqs.clone()
    }

    /// Alert [`ALERT_FATAL_INTG`] then one per external alert.
    pub fn alert(&self, n: usize) -> Option<IrqLine> {
        self.regs.borrow().alerts.get(n).cloned()
    }
}

impl Bus for SocProxy {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        self.regs.borrow_mut().read(size, addr)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        self.regs.borrow_mut().write(size, addr, val)
    }

    fn warm_reset(&mut self) {
        self.regs.borrow_mut().reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_irq_latch() {
        let mut proxy = SocProxy::new(SocProxyArgs {
            n_irqs: 4,
            n_ext_alerts: 1,
        })
        .unwrap();
        let irq = proxy.irq(2).unwrap();
        proxy.write(RvSize::Word, REG_INTR_ENABLE, 0xff).unwrap();
        assert_eq!(proxy.read(RvSize::Word, REG_INTR_ENABLE).unwrap(), 0xf);

        proxy.ext_irq(2).set(1);
        assert!(irq.is_high());
        proxy.ext_irq(2).set(0);
        // latched until cleared
        assert!(irq.is_high());
        proxy.write(RvSize::Word, REG_INTR_STATE, 0b100).unwrap();
        assert!(!irq.is_high());

        proxy.write(RvSize::Word, REG_INTR_TEST, 0b100).unwrap();
        assert_eq!(proxy.read(RvSize::Word, REG_INTR_STATE).unwrap(), 0b100);
        proxy.warm_reset();
        assert!(!irq.is_high());
    }

    #[test]
    fn test_alert_forwarding() {
        let mut proxy = SocProxy::new(SocProxyArgs {
            n_irqs: 4,
            n_ext_alerts: 2,
        })
        .unwrap();
        let ext = proxy.alert(2).unwrap();
        proxy.ext_alert(1).set(1);
        assert!(ext.is_high());
        proxy.ext_alert(1).set(0);
        assert!(!ext.is_high());

        proxy.write(RvSize::Word, REG_ALERT_TEST, 0b1).unwrap();
        assert!(!proxy.alert(ALERT_FATAL_INTG).unwrap().is_high());
        assert!(SocProxy::new(SocProxyArgs {
            n_irqs: 33,
            n_ext_alerts: 0
        })
        .is_err());
    }
}
