/*++

Licensed under the Apache-2.0 license.

File Name:

    gpio.rs

Abstract:

    File contains the GPIO controller: 32 input pins with edge and level
    interrupts, 32 output pins with masked writes and output enables.

--*/

use crate::mubi::w1c;
use ot_emu_bus::{Bus, BusError, GpioIn, GpioSink, IrqLine};
use ot_emu_types::{RvAddr, RvData, RvSize};
use std::cell::RefCell;
use std::rc::Rc;

const REG_INTR_STATE: RvAddr = 0x00;
const REG_INTR_ENABLE: RvAddr = 0x04;
const REG_INTR_TEST: RvAddr = 0x08;
const REG_ALERT_TEST: RvAddr = 0x0c;
const REG_DATA_IN: RvAddr = 0x10;
const REG_DIRECT_OUT: RvAddr = 0x14;
const REG_MASKED_OUT_LOWER: RvAddr = 0x18;
const REG_MASKED_OUT_UPPER: RvAddr = 0x1c;
const REG_DIRECT_OE: RvAddr = 0x20;
const REG_MASKED_OE_LOWER: RvAddr = 0x24;
const REG_MASKED_OE_UPPER: RvAddr = 0x28;
const REG_INTR_CTRL_EN_RISING: RvAddr = 0x2c;
const REG_INTR_CTRL_EN_FALLING: RvAddr = 0x30;
const REG_INTR_CTRL_EN_LVLHIGH: RvAddr = 0x34;
const REG_INTR_CTRL_EN_LVLLOW: RvAddr = 0x38;
const REGS_SIZE: RvAddr = 0x3c;

pub const GPIO_PINS: usize = 32;

/// Output level of a pin whose driver is disabled
pub const PIN_HIGH_Z: i32 = -1;

#[derive(Debug, Clone, Default)]
pub struct GpioArgs {
    /// Input levels seen before anything drives the pins
    pub pull_up: u32,
}

/// Updates the 16-bit half selected by `shift` with the unmasked bits of a
/// `{mask[31:16], data[15:0]}` write.
fn masked_write(reg: u32, val: u32, shift: u32) -> u32 {
    let mask = (val >> 16) << shift;
    let data = (val & 0xffff) << shift;
    (reg & !mask) | (data & mask)
}

pub struct GpioRegs {
    intr_state: u32,
    intr_enable: u32,
    en_rising: u32,
    en_falling: u32,
    en_lvlhigh: u32,
    en_lvllow: u32,
    out: u32,
    oe: u32,
    pins_in: u32,
    data_in: u32,
    pull_up: u32,

    outputs: Vec<IrqLine>,
    irqs: Vec<IrqLine>,
    alert: IrqLine,
}

impl GpioRegs {
    fn update_irqs(&self) {
        let active = self.intr_state & self.intr_enable;
        for (i, irq) in self.irqs.iter().enumerate() {
            let level = active & (1 << i) != 0;
            if irq.is_high() != level {
                irq.set_bool(level);
            }
        }
    }

    fn update_outputs(&self) {
        for (i, line) in self.outputs.iter().enumerate() {
            let level = if self.oe & (1 << i) == 0 {
                PIN_HIGH_Z
            } else {
                ((self.out >> i) & 1) as i32
            };
            if line.level() != level {
                line.set(level);
            }
        }
    }

    /// Recomputes DATA_IN and latches the interrupts it raises.
    fn update_data_in(&mut self) {
        let prev = self.data_in;
        self.data_in = (self.pins_in & !self.oe) | (self.out & self.oe);
        let rising = !prev & self.data_in;
        let falling = prev & !self.data_in;
        let events = (rising & self.en_rising)
            | (falling & self.en_falling)
            | (self.data_in & self.en_lvlhigh)
            | (!self.data_in & self.en_lvllow);
        if events != 0 {
            log::trace!("gpio: interrupts {events:#010x}");
            self.intr_state |= events;
        }
        self.update_irqs();
    }

    fn pins_changed(&mut self) {
        self.update_outputs();
        self.update_data_in();
    }

    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        let val = match addr {
            REG_INTR_STATE => self.intr_state,
            REG_INTR_ENABLE => self.intr_enable,
            REG_INTR_TEST | REG_ALERT_TEST => 0,
            REG_DATA_IN => self.data_in,
            REG_DIRECT_OUT => self.out,
            REG_MASKED_OUT_LOWER => self.out & 0xffff,
            REG_MASKED_OUT_UPPER => self.out >> 16,
            REG_DIRECT_OE => self.oe,
            REG_MASKED_OE_LOWER => self.oe & 0xffff,
            REG_MASKED_OE_UPPER => self.oe >> 16,
            REG_INTR_CTRL_EN_RISING => self.en_rising,
            REG_INTR_CTRL_EN_FALLING => self.en_falling,
            REG_INTR_CTRL_EN_LVLHIGH => self.en_lvlhigh,
            REG_INTR_CTRL_EN_LVLLOW => self.en_lvllow,
            _ => {
                log::warn!("gpio: invalid read at {addr:#x}");
                Err(BusError::LoadAccessFault)?
            }
        };
        Ok(val)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word {
            Err(BusError::StoreAccessFault)?
        }
        match addr {
            REG_INTR_STATE => {
                self.intr_state = w1c(self.intr_state, val);
                // level interrupts assert again while the condition holds
                self.update_data_in();
            }
            REG_INTR_ENABLE => {
                self.intr_enable = val;
                self.update_irqs();
            }
            REG_INTR_TEST => {
                self.intr_state |= val;
                self.update_irqs();
            }
            REG_ALERT_TEST => {
                if val & 1 != 0 {
                    self.alert.raise();
                    self.alert.lower();
                }
            }
            REG_DATA_IN => log::warn!("gpio: DATA_IN is read-only"),
            REG_DIRECT_OUT => {
                self.out = val;
                self.pins_changed();
            }
            REG_MASKED_OUT_LOWER => {
                self.out = masked_write(self.out, val, 0);
                self.pins_changed();
            }
            REG_MASKED_OUT_UPPER => {
                self.out = masked_write(self.out, val, 16);
                self.pins_changed();
            }
            REG_DIRECT_OE => {
                self.oe = val;
                self.pins_changed();
            }
            REG_MASKED_OE_LOWER => {
                self.oe = masked_write(self.oe, val, 0);
                self.pins_changed();
            }
            REG_MASKED_OE_UPPER => {
                self.oe = masked_write(self.oe, val, 16);
                self.pins_changed();
            }
            REG_INTR_CTRL_EN_RISING => self.en_rising = val,
            REG_INTR_CTRL_EN_FALLING => self.en_falling = val,
            REG_INTR_CTRL_EN_LVLHIGH => {
                self.en_lvlhigh = val;
                self.update_data_in();
            }
            REG_INTR_CTRL_EN_LVLLOW => {
                self.en_lvllow = val;
                self.update_data_in();
            }
            _ => {
                log::warn!("gpio: invalid write at {addr:#x}");
                Err(BusError::StoreAccessFault)?
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.intr_state = 0;
        self.intr_enable = 0;
        self.en_rising = 0;
        self.en_falling = 0;
        self.en_lvlhigh = 0;
        self.en_lvllow = 0;
        self.out = 0;
        self.oe = 0;
        self.data_in = (self.pins_in & !self.oe) | (self.out & self.oe);
        self.update_outputs();
        self.update_irqs();
    }
}

impl GpioSink for GpioRegs {
    /// Pin input; a negative level leaves the pin to its pull.
    fn set_level(&mut self, input: usize, level: i32) {
        let bit = 1u32 << input;
        let high = match level {
            l if l < 0 => self.pull_up & bit != 0,
            0 => false,
            _ => true,
        };
        if high {
            self.pins_in |= bit;
        } else {
            self.pins_in &= !bit;
        }
        self.update_data_in();
    }
}

/// GPIO peripheral
#[derive(Clone)]
pub struct Gpio {
    regs: Rc<RefCell<GpioRegs>>,
}

impl Gpio {
    pub fn new(args: GpioArgs) -> Self {
        let outputs: Vec<IrqLine> = (0..GPIO_PINS).map(|_| IrqLine::new()).collect();
        for line in &outputs {
            line.set(PIN_HIGH_Z);
        }
        Self {
            regs: Rc::new(RefCell::new(GpioRegs {
                intr_state: 0,
                intr_enable: 0,
                en_rising: 0,
                en_falling: 0,
                en_lvlhigh: 0,
                en_lvllow: 0,
                out: 0,
                oe: 0,
                pins_in: args.pull_up,
                data_in: args.pull_up,
                pull_up: args.pull_up,
                outputs,
                irqs: (0..GPIO_PINS).map(|_| IrqLine::new()).collect(),
                alert: IrqLine::new(),
            })),
        }
    }

    pub fn mmap_size(&self) -> RvAddr {
        REGS_SIZE
    }

    pub fn input(&self, pin: usize) -> GpioIn {
        GpioIn::new(&self.regs, pin % GPIO_PINS)
    }

    /// Pin output, at [`PIN_HIGH_Z`] while the driver is disabled.
    pub fn output(&self, pin: usize) -> IrqLine {
        self.regs.borrow().outputs[pin % GPIO_PINS].clone()
    }

    pub fn irq(&self, pin: usize) -> IrqLine {
        self.regs.borrow().irqs[pin % GPIO_PINS].clone()
    }

    pub fn alert(&self) -> IrqLine {
        self.regs.borrow().alert.clone()
    }
}

impl Bus for Gpio {
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
    fn test_masked_outputs() {
        let mut gpio = Gpio::new(GpioArgs::default());
        assert_eq!(gpio.output(3).level(), PIN_HIGH_Z);
        gpio.write(RvSize::Word, REG_DIRECT_OE, 0x0001_0008).unwrap();
        gpio.write(RvSize::Word, REG_MASKED_OUT_LOWER, 0x000c_ffff).unwrap();
        assert_eq!(gpio.read(RvSize::Word, REG_DIRECT_OUT).unwrap(), 0x0000_000c);
        assert_eq!(gpio.output(3).level(), 1);
        assert_eq!(gpio.output(2).level(), PIN_HIGH_Z);
        assert_eq!(gpio.output(16).level(), 0);

        gpio.write(RvSize::Word, REG_MASKED_OUT_UPPER, 0x0001_0001).unwrap();
        assert_eq!(gpio.output(16).level(), 1);
        gpio.write(RvSize::Word, REG_MASKED_OE_UPPER, 0x0001_0000).unwrap();
        assert_eq!(gpio.output(16).level(), PIN_HIGH_Z);
        assert_eq!(gpio.read(RvSize::Word, REG_DIRECT_OE).unwrap(), 0x8);
        // driven outputs read back through DATA_IN
        assert_eq!(gpio.read(RvSize::Word, REG_DATA_IN).unwrap(), 0x8);
        assert_eq!(
            gpio.read(RvSize::Byte, REG_DATA_IN).err(),
            Some(BusError::LoadAccessFault)
        );
    }

    #[test]
    fn test_edge_interrupts() {
        let mut gpio = Gpio::new(GpioArgs::default());
        gpio.write(RvSize::Word, REG_INTR_ENABLE, 0b11).unwrap();
        gpio.write(RvSize::Word, REG_INTR_CTRL_EN_RISING, 0b01).unwrap();
        gpio.write(RvSize::Word, REG_INTR_CTRL_EN_FALLING, 0b10).unwrap();

        gpio.input(0).set(1);
        gpio.input(1).set(1);
        assert_eq!(gpio.read(RvSize::Word, REG_DATA_IN).unwrap(), 0b11);
        assert_eq!(gpio.read(RvSize::Word, REG_INTR_STATE).unwrap(), 0b01);
        assert!(gpio.irq(0).is_high());
        assert!(!gpio.irq(1).is_high());

        gpio.input(1).set(0);
        assert!(gpio.irq(1).is_high());
        gpio.write(RvSize::Word, REG_INTR_STATE, 0b11).unwrap();
        assert_eq!(gpio.read(RvSize::Word, REG_INTR_STATE).unwrap(), 0);
        assert!(!gpio.irq(0).is_high());
    }

    #[test]
    fn test_level_interrupts() {
        let mut gpio = Gpio::new(GpioArgs { pull_up: 0b100 });
        gpio.write(RvSize::Word, REG_INTR_ENABLE, 0b100).unwrap();
        gpio.write(RvSize::Word, REG_INTR_CTRL_EN_LVLLOW, 0b100).unwrap();
        assert_eq!(gpio.read(RvSize::Word, REG_INTR_STATE).unwrap(), 0);

        gpio.input(2).set(0);
        assert!(gpio.irq(2).is_high());
        // still low: clearing does not stick
        gpio.write(RvSize::Word, REG_INTR_STATE, 0b100).unwrap();
        assert!(gpio.irq(2).is_high());

        gpio.input(2).set(PIN_HIGH_Z);
        gpio.write(RvSize::Word, REG_INTR_STATE, 0b100).unwrap();
        assert!(!gpio.irq(2).is_high());

        gpio.write(RvSize::Word, REG_INTR_TEST, 0b100).unwrap();
        assert!(gpio.irq(2).is_high());
    }
}
