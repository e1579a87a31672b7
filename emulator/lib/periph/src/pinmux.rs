/*++

Licensed under the Apache-2.0 license.

File Name:

    pinmux.rs

Abstract:

    File contains the pin multiplexer: routing of multiplexed pads to
    peripheral inputs and of peripheral outputs to pads, plus the pad
    attribute registers.

--*/

use crate::mubi::w0c;
use crate::ConfigError;
use ot_emu_bus::{Bus, BusError, GpioIn, GpioSink, IrqLine};
use ot_emu_types::{RvAddr, RvData, RvSize};
use std::cell::RefCell;
use std::rc::Rc;

/// Writable bits of a pad attribute: invert, virtual open drain, pull
/// enable and select, keeper, schmitt, open drain, input disable, slew rate
/// and drive strength.
const PAD_ATTR_MASK: u32 = 0x00f3_00ff;
const PAD_ATTR_INPUT_DISABLE: u32 = 1 << 7;

/// Peripheral input selectors below this value pick a constant
const INSEL_FIRST_PAD: u32 = 2;
const OUTSEL_CONST_0: u32 = 0;
const OUTSEL_CONST_1: u32 = 1;
const OUTSEL_HIGH_Z: u32 = 2;
const OUTSEL_FIRST_PERIPH: u32 = 3;

/// Level carried by a disconnected pad
pub const PAD_HIGH_Z: i32 = -1;

#[derive(Debug, Clone)]
pub struct PinmuxArgs {
    /// Multiplexed peripheral inputs
    pub n_periph_in: usize,
    /// Multiplexed peripheral outputs
    pub n_periph_out: usize,
    pub n_mio_pads: usize,
    pub n_dio_pads: usize,
}

impl Default for PinmuxArgs {
    fn default() -> Self {
        Self {
            n_periph_in: 57,
            n_periph_out: 75,
            n_mio_pads: 47,
            n_dio_pads: 16,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Reg {
    AlertTest,
    InselRegwen(usize),
    Insel(usize),
    OutselRegwen(usize),
    Outsel(usize),
    MioAttrRegwen(usize),
    MioAttr(usize),
    DioAttrRegwen(usize),
    DioAttr(usize),
}

impl Reg {
    fn decode(addr: RvAddr, args: &PinmuxArgs) -> Option<Reg> {
        if addr % 4 != 0 {
            return None;
        }
        let mut idx = addr as usize / 4;
        if idx == 0 {
            return Some(Reg::AlertTest);
        }
        idx -= 1;
        let arrays: [(usize, fn(usize) -> Reg); 8] = [
            (args.n_periph_in, Reg::InselRegwen),
            (args.n_periph_in, Reg::Insel),
            (args.n_mio_pads, Reg::OutselRegwen),
            (args.n_mio_pads, Reg::Outsel),
            (args.n_mio_pads, Reg::MioAttrRegwen),
            (args.n_mio_pads, Reg::MioAttr),
            (args.n_dio_pads, Reg::DioAttrRegwen),
            (args.n_dio_pads, Reg::DioAttr),
        ];
        for (count, reg) in arrays {
            if idx < count {
                return Some(reg(idx));
            }
            idx -= count;
        }
        None
    }

    fn regs_size(args: &PinmuxArgs) -> RvAddr {
        let words = 1 + 2 * args.n_periph_in + 4 * args.n_mio_pads + 2 * args.n_dio_pads;
        (words * 4) as RvAddr
    }
}

pub struct PinmuxRegs {
    args: PinmuxArgs,

    insel_regwen: Vec<u32>,
    insel: Vec<u32>,
    outsel_regwen: Vec<u32>,
    outsel: Vec<u32>,
    mio_attr_regwen: Vec<u32>,
    mio_attr: Vec<u32>,
    dio_attr_regwen: Vec<u32>,
    dio_attr: Vec<u32>,

    /// Levels seen on the pads
    pad_in: Vec<i32>,
    /// Levels driven by the peripherals
    periph_out: Vec<i32>,

    periph_in_lines: Vec<IrqLine>,
    mio_out_lines: Vec<IrqLine>,
    mio_attr_lines: Vec<IrqLine>,
    dio_attr_lines: Vec<IrqLine>,
    alert: IrqLine,
}

fn set_if_changed(line: &IrqLine, level: i32) {
    if line.level() != level {
        line.set(level);
    }
}

impl PinmuxRegs {
    fn new(args: PinmuxArgs) -> Self {
        let lines = |n: usize| -> Vec<IrqLine> { (0..n).map(|_| IrqLine::new()).collect() };
        let (np_in, np_out, nmio, ndio) = (
            args.n_periph_in,
            args.n_periph_out,
            args.n_mio_pads,
            args.n_dio_pads,
        );
        let mut regs = Self {
            args,
            insel_regwen: vec![1; np_in],
            insel: vec![0; np_in],
            outsel_regwen: vec![1; nmio],
            outsel: vec![OUTSEL_HIGH_Z; nmio],
            mio_attr_regwen: vec![1; nmio],
            mio_attr: vec![0; nmio],
            dio_attr_regwen: vec![1; ndio],
            dio_attr: vec![0; ndio],
            pad_in: vec![PAD_HIGH_Z; nmio],
            periph_out: vec![PAD_HIGH_Z; np_out],
            periph_in_lines: lines(np_in),
            mio_out_lines: lines(nmio),
            mio_attr_lines: lines(nmio),
            dio_attr_lines: lines(ndio),
            alert: IrqLine::new(),
        };
        regs.refresh();
        regs
    }

    fn periph_in_level(&self, p: usize) -> i32 {
        match self.insel[p] {
            0 => 0,
            1 => 1,
            sel => self.pad_in[(sel - INSEL_FIRST_PAD) as usize],
        }
    }

    fn mio_out_level(&self, pad: usize) -> i32 {
        match self.outsel[pad] {
            OUTSEL_CONST_0 => 0,
            OUTSEL_CONST_1 => 1,
            OUTSEL_HIGH_Z => PAD_HIGH_Z,
            sel => self.periph_out[(sel - OUTSEL_FIRST_PERIPH) as usize],
        }
    }

    /// Packed attribute of a pad; negative when the pad neither drives nor
    /// samples.
    fn mio_attr_level(&self, pad: usize) -> i32 {
        let attr = self.mio_attr[pad];
        let disabled =
            attr & PAD_ATTR_INPUT_DISABLE != 0 && self.outsel[pad] == OUTSEL_HIGH_Z;
        (attr | (u32::from(disabled) << 31)) as i32
    }

    fn dio_attr_level(&self, pad: usize) -> i32 {
        let attr = self.dio_attr[pad];
        let disabled = attr & PAD_ATTR_INPUT_DISABLE != 0;
        (attr | (u32::from(disabled) << 31)) as i32
    }

    fn refresh(&self) {
        for (p, line) in self.periph_in_lines.iter().enumerate() {
            set_if_changed(line, self.periph_in_level(p));
        }
        for (pad, line) in self.mio_out_lines.iter().enumerate() {
            set_if_changed(line, self.mio_out_level(pad));
        }
        for (pad, line) in self.mio_attr_lines.iter().enumerate() {
            set_if_changed(line, self.mio_attr_level(pad));
        }
        for (pad, line) in self.dio_attr_lines.iter().enumerate() {
            set_if_changed(line, self.dio_attr_level(pad));
        }
    }

    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        let Some(reg) = Reg::decode(addr, &self.args) else {
            log::warn!("pinmux: invalid read at {addr:#x}");
            return Err(BusError::LoadAccessFault);
        };
        let val = match reg {
            Reg::AlertTest => 0,
            Reg::InselRegwen(n) => self.insel_regwen[n],
            Reg::Insel(n) => self.insel[n],
            Reg::OutselRegwen(n) => self.outsel_regwen[n],
            Reg::Outsel(n) => self.outsel[n],
            Reg::MioAttrRegwen(n) => self.mio_attr_regwen[n],
            Reg::MioAttr(n) => self.mio_attr[n],
            Reg::DioAttrRegwen(n) => self.dio_attr_regwen[n],
            Reg::DioAttr(n) => self.dio_attr[n],
        };
        Ok(val)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word {
            Err(BusError::StoreAccessFault)?
        }
        let Some(reg) = Reg::decode(addr, &self.args) else {
            log::warn!("pinmux: invalid write at {addr:#x}");
            return Err(BusError::StoreAccessFault);
        };
        let locked = match reg {
            Reg::Insel(n) => self.insel_regwen[n] == 0,
            Reg::Outsel(n) => self.outsel_regwen[n] == 0,
            Reg::MioAttr(n) => self.mio_attr_regwen[n] == 0,
            Reg::DioAttr(n) => self.dio_attr_regwen[n] == 0,
            _ => false,
        };
        if locked {
            log::warn!("pinmux: {reg:?} is locked");
            return Ok(());
        }
        match reg {
            Reg::AlertTest => {
                if val & 1 != 0 {
                    self.alert.raise();
                    self.alert.lower();
                }
            }
            Reg::InselRegwen(n) => self.insel_regwen[n] = w0c(self.insel_regwen[n], val & 1),
            Reg::Insel(n) => {
                if val >= INSEL_FIRST_PAD + self.args.n_mio_pads as u32 {
                    log::warn!("pinmux: {reg:?} invalid selector {val}");
                    return Ok(());
                }
                self.insel[n] = val;
            }
            Reg::OutselRegwen(n) => self.outsel_regwen[n] = w0c(self.outsel_regwen[n], val & 1),
            Reg::Outsel(n) => {
                if val >= OUTSEL_FIRST_PERIPH + self.args.n_periph_out as u32 {
                    log::warn!("pinmux: {reg:?} invalid selector {val}");
                    return Ok(());
                }
                self.outsel[n] = val;
            }
            Reg::MioAttrRegwen(n) => {
                self.mio_attr_regwen[n] = w0c(self.mio_attr_regwen[n], val & 1)
            }
            Reg::MioAttr(n) => self.mio_attr[n] = val & PAD_ATTR_MASK,
            Reg::DioAttrRegwen(n) => {
                self.dio_attr_regwen[n] = w0c(self.dio_attr_regwen[n], val & 1)
            }
            Reg::DioAttr(n) => self.dio_attr[n] = val & PAD_ATTR_MASK,
        }
        self.refresh();
        Ok(())
    }

    fn reset(&mut self) {
        self.insel_regwen.fill(1);
        self.insel.fill(0);
        self.outsel_regwen.fill(1);
        self.outsel.fill(OUTSEL_HIGH_Z);
        self.mio_attr_regwen.fill(1);
        self.mio_attr.fill(0);
        self.dio_attr_regwen.fill(1);
        self.dio_attr.fill(0);
        self.refresh();
    }
}

impl GpioSink for PinmuxRegs {
    /// Inputs `0..n_mio_pads` are the pad levels, the following ones the
    /// peripheral outputs.
    fn set_level(&mut self, input: usize, level: i32) {
        let nmio = self.args.n_mio_pads;
        if input < nmio {
            self.pad_in[input] = level;
        } else if let Some(out) = self.periph_out.get_mut(input - nmio) {
            *out = level;
        }
        self.refresh();
    }
}

/// Pin multiplexer peripheral
#[derive(Clone)]
pub struct Pinmux {
    regs: Rc<RefCell<PinmuxRegs>>,
}

impl Pinmux {
    pub fn new(args: PinmuxArgs) -> Result<Self, ConfigError> {
        if args.n_mio_pads == 0 || args.n_periph_in == 0 {
            return Err(ConfigError::invalid("pinmux", "no multiplexed pad"));
        }
        Ok(Self {
            regs: Rc::new(RefCell::new(PinmuxRegs::new(args))),
        })
    }

    pub fn mmap_size(&self) -> RvAddr {
        Reg::regs_size(&self.regs.borrow().args)
    }

    /// Level seen on a multiplexed pad.
    pub fn pad_input(&self, pad: usize) -> GpioIn {
        GpioIn::new(&self.regs, pad)
    }

    /// Output of a multiplexed peripheral.
    pub fn periph_output(&self, n: usize) -> GpioIn {
        let nmio = self.regs.borrow().args.n_mio_pads;
        GpioIn::new(&self.regs, nmio + n)
    }

    pub fn periph_input(&self, n: usize) -> Option<IrqLine> {
        self.regs.borrow().periph_in_lines.get(n).cloned()
    }

    pub fn pad_output(&self, pad: usize) -> Option<IrqLine> {
        self.regs.borrow().mio_out_lines.get(pad).cloned()
    }

    pub fn mio_pad_attr(&self, pad: usize) -> Option<IrqLine> {
        self.regs.borrow().mio_attr_lines.get(pad).cloned()
    }

    pub fn dio_pad_attr(&self, pad: usize) -> Option<IrqLine> {
        self.regs.borrow().dio_attr_lines.get(pad).cloned()
    }

    pub fn alert(&self) -> IrqLine {
        self.regs.borrow().alert.clone()
    }
}

impl Bus for Pinmux {
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

    fn small() -> Pinmux {
        Pinmux::new(PinmuxArgs {
            n_periph_in: 2,
            n_periph_out: 2,
            n_mio_pads: 3,
            n_dio_pads: 1,
        })
        .unwrap()
    }

    // ALERT_TEST, 2 INSEL_REGWEN, 2 INSEL, 3 OUTSEL_REGWEN, 3 OUTSEL,
    // 3 ATTR_REGWEN, 3 ATTR, 1 DIO_REGWEN, 1 DIO_ATTR
    const INSEL_REGWEN: RvAddr = 0x04;
    const INSEL: RvAddr = 0x0c;
    const OUTSEL: RvAddr = 0x20;
    const MIO_ATTR: RvAddr = 0x38;
    const DIO_ATTR: RvAddr = 0x48;

    #[test]
    fn test_layout() {
        let pm = small();
        assert_eq!(pm.mmap_size(), 0x4c);
        let args = PinmuxArgs::default();
        assert_eq!(Reg::decode(0x04, &args), Some(Reg::InselRegwen(0)));
        assert_eq!(Reg::decode(0xe4, &args), Some(Reg::InselRegwen(56)));
        assert_eq!(Reg::decode(0xe8, &args), Some(Reg::Insel(0)));
        assert_eq!(Reg::decode(Reg::regs_size(&args), &args), None);
    }

    #[test]
    fn test_input_routing() {
        let mut pm = small();
        let periph = pm.periph_input(1).unwrap();
        pm.pad_input(2).set(1);
        assert_eq!(periph.level(), 0);
        // pad 2 is selector 4
        pm.write(RvSize::Word, INSEL + 4, 4).unwrap();
        assert_eq!(periph.level(), 1);
        pm.pad_input(2).set(0);
        assert_eq!(periph.level(), 0);
        pm.write(RvSize::Word, INSEL + 4, 1).unwrap();
        assert_eq!(periph.level(), 1);

        // lock, then the selector sticks
        pm.write(RvSize::Word, INSEL_REGWEN + 4, 0).unwrap();
        pm.write(RvSize::Word, INSEL + 4, 0).unwrap();
        assert_eq!(pm.read(RvSize::Word, INSEL + 4).unwrap(), 1);
        pm.write(RvSize::Word, INSEL_REGWEN + 4, 1).unwrap();
        assert_eq!(pm.read(RvSize::Word, INSEL_REGWEN + 4).unwrap(), 0);

        // out of range selector is ignored
        pm.write(RvSize::Word, INSEL, 5).unwrap();
        assert_eq!(pm.read(RvSize::Word, INSEL).unwrap(), 0);
    }

    #[test]
    fn test_output_routing() {
        let mut pm = small();
        let pad = pm.pad_output(0).unwrap();
        assert_eq!(pad.level(), PAD_HIGH_Z);
        pm.write(RvSize::Word, OUTSEL, 1).unwrap();
        assert_eq!(pad.level(), 1);
        // peripheral output 1 is selector 4
        pm.write(RvSize::Word, OUTSEL, 4).unwrap();
        assert_eq!(pad.level(), PAD_HIGH_Z);
        pm.periph_output(1).set(1);
        assert_eq!(pad.level(), 1);
        pm.periph_output(1).set(0);
        assert_eq!(pad.level(), 0);
    }

    #[test]
    fn test_pad_attributes() {
        let mut pm = small();
        let mio = pm.mio_pad_attr(1).unwrap();
        let dio = pm.dio_pad_attr(0).unwrap();
        pm.write(RvSize::Word, MIO_ATTR + 4, 0xffff_ffff).unwrap();
        assert_eq!(pm.read(RvSize::Word, MIO_ATTR + 4).unwrap(), PAD_ATTR_MASK);
        // input disabled and no driver selected
        assert!(mio.level() < 0);
        assert_eq!(mio.level() as u32 & !(1 << 31), PAD_ATTR_MASK);
        pm.write(RvSize::Word, OUTSEL + 4, 0).unwrap();
        assert_eq!(mio.level() as u32, PAD_ATTR_MASK);

        pm.write(RvSize::Word, DIO_ATTR, 0x4).unwrap();
        assert_eq!(dio.level(), 0x4);
        pm.write(RvSize::Word, DIO_ATTR, 0x84).unwrap();
        assert!(dio.level() < 0);

        pm.warm_reset();
        assert_eq!(dio.level(), 0);
        assert_eq!(mio.level(), 0);
    }
}
