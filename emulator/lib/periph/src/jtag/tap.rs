/*++

Licensed under the Apache-2.0 license.

File Name:

    tap.rs

Abstract:

    File contains the JTAG TAP controller: the IEEE 1149.1 state machine,
    the instruction register and the table of data register handlers.

--*/

use crate::ConfigError;
use std::collections::HashMap;

/// IR value selecting the IDCODE register.
pub const IR_IDCODE: u32 = 1;

/// IR value selecting the bypass register; all-ones selects it too.
pub const IR_BYPASS: u32 = 0;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TapState {
    TestLogicReset,
    RunTestIdle,
    SelectDrScan,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIrScan,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

impl TapState {
    /// State reached on a TCK rising edge with the given TMS.
    pub fn next(self, tms: bool) -> TapState {
        use TapState::*;
        match (self, tms) {
            (TestLogicReset, true) => TestLogicReset,
            (TestLogicReset, false) => RunTestIdle,
            (RunTestIdle, true) => SelectDrScan,
            (RunTestIdle, false) => RunTestIdle,
            (SelectDrScan, true) => SelectIrScan,
            (SelectDrScan, false) => CaptureDr,
            (CaptureDr, true) => Exit1Dr,
            (CaptureDr, false) => ShiftDr,
            (ShiftDr, true) => Exit1Dr,
            (ShiftDr, false) => ShiftDr,
            (Exit1Dr, true) => UpdateDr,
            (Exit1Dr, false) => PauseDr,
            (PauseDr, true) => Exit2Dr,
            (PauseDr, false) => PauseDr,
            (Exit2Dr, true) => UpdateDr,
            (Exit2Dr, false) => ShiftDr,
            (UpdateDr, true) => SelectDrScan,
            (UpdateDr, false) => RunTestIdle,
            (SelectIrScan, true) => TestLogicReset,
            (SelectIrScan, false) => CaptureIr,
            (CaptureIr, true) => Exit1Ir,
            (CaptureIr, false) => ShiftIr,
            (ShiftIr, true) => Exit1Ir,
            (ShiftIr, false) => ShiftIr,
            (Exit1Ir, true) => UpdateIr,
            (Exit1Ir, false) => PauseIr,
            (PauseIr, true) => Exit2Ir,
            (PauseIr, false) => PauseIr,
            (Exit2Ir, true) => UpdateIr,
            (Exit2Ir, false) => ShiftIr,
            (UpdateIr, true) => SelectDrScan,
            (UpdateIr, false) => RunTestIdle,
        }
    }
}

/// A data register selected by an instruction.
pub trait DataRegister {
    fn name(&self) -> &str;

    /// Length of the register in bits, 1 to 64.
    fn length(&self) -> u32;

    /// Value loaded into the shift register in Capture-DR.
    fn capture(&mut self) -> u64;

    /// Receives the shifted-in value in Update-DR.
    fn update(&mut self, _value: u64) {}
}

struct IdCode(u32);

impl DataRegister for IdCode {
    fn name(&self) -> &str {
        "idcode"
    }

    fn length(&self) -> u32 {
        32
    }

    fn capture(&mut self) -> u64 {
        u64::from(self.0)
    }
}

struct Bypass;

impl DataRegister for Bypass {
    fn name(&self) -> &str {
        "bypass"
    }

    fn length(&self) -> u32 {
        1
    }

    fn capture(&mut self) -> u64 {
        0
    }
}

#[derive(Debug, Clone)]
pub struct TapCtrlArgs {
    /// Instruction register length in bits
    pub ir_length: u32,
    pub idcode: u32,
}

impl Default for TapCtrlArgs {
    fn default() -> Self {
        Self {
            ir_length: 5,
            idcode: 0x1000_1cdf,
        }
    }
}

pub struct TapController {
    ir_length: u32,
    state: TapState,
    tck: bool,
    tms: bool,
    tdi: bool,
    tdo: bool,
    trst: bool,

    /// Instruction shift register
    ir: u32,
    /// Active instruction
    ir_hold: u32,
    /// Data shift register
    dr: u64,
    dr_len: u32,

    handlers: HashMap<u32, Box<dyn DataRegister>>,
}

impl TapController {
    pub fn new(args: TapCtrlArgs) -> Result<Self, ConfigError> {
        if !(2..=32).contains(&args.ir_length) {
            return Err(ConfigError::invalid(
                "jtag",
                format!("IR length {} out of range", args.ir_length),
            ));
        }
        let mut tap = Self {
            ir_length: args.ir_length,
            state: TapState::TestLogicReset,
            tck: false,
            tms: false,
            tdi: false,
            tdo: false,
            trst: false,
            ir: IR_IDCODE,
            ir_hold: IR_IDCODE,
            dr: 0,
            dr_len: 0,
            handlers: HashMap::new(),
        };
        let all_ones = tap.ir_mask();
        tap.register(IR_BYPASS, Box::new(Bypass))?;
        tap.register(all_ones, Box::new(Bypass))?;
        tap.register(IR_IDCODE, Box::new(IdCode(args.idcode)))?;
        Ok(tap)
    }

    fn ir_mask(&self) -> u32 {
        u32::MAX >> (32 - self.ir_length)
    }

    /// Installs the data register selected by instruction `ir`.
    pub fn register(
        &mut self,
        ir: u32,
        handler: Box<dyn DataRegister>,
    ) -> Result<(), ConfigError> {
        if ir & !self.ir_mask() != 0 {
            return Err(ConfigError::invalid(
                "jtag",
                format!("instruction {ir:#x} wider than the IR"),
            ));
        }
        if !(1..=64).contains(&handler.length()) {
            return Err(ConfigError::invalid(
                "jtag",
                format!("{}: invalid DR length {}", handler.name(), handler.length()),
            ));
        }
        if let Some(prev) = self.handlers.get(&ir) {
            return Err(ConfigError::invalid(
                "jtag",
                format!("instruction {ir:#x} already used by {}", prev.name()),
            ));
        }
        self.handlers.insert(ir, handler);
        Ok(())
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    /// Active instruction.
    pub fn ir(&self) -> u32 {
        self.ir_hold
    }

    pub fn tdo(&self) -> bool {
        self.tdo
    }

    /// Returns the TAP to Test-Logic-Reset with IDCODE selected.
    pub fn reset(&mut self) {
        self.state = TapState::TestLogicReset;
        self.ir = IR_IDCODE;
        self.ir_hold = IR_IDCODE;
        self.dr = 0;
        self.dr_len = 0;
        log::trace!("jtag: tap reset");
    }

    /// Drives the test reset; the TAP is held in reset while asserted.
    pub fn set_trst(&mut self, trst: bool) {
        self.trst = trst;
        if trst {
            self.reset();
        }
    }

    /// Samples new pin levels. State advances on a TCK rising edge, the
    /// shift registers act on a falling edge.
    pub fn write(&mut self, tck: bool, tms: bool, tdi: bool) {
        self.tms = tms;
        self.tdi = tdi;
        if tck == self.tck {
            return;
        }
        self.tck = tck;
        if self.trst {
            return;
        }
        if tck {
            self.rising();
        } else {
            self.falling();
        }
    }

    fn rising(&mut self) {
        let next = self.state.next(self.tms);
        if next != self.state {
            log::trace!("jtag: {:?} -> {next:?}", self.state);
        }
        self.state = next;
        if next == TapState::TestLogicReset {
            self.ir_hold = IR_IDCODE;
        }
    }

    fn falling(&mut self) {
        match self.state {
            TapState::CaptureIr => self.ir = 0b01,
            TapState::ShiftIr => {
                self.tdo = self.ir & 1 != 0;
                self.ir = (self.ir >> 1) | (u32::from(self.tdi) << (self.ir_length - 1));
            }
            TapState::UpdateIr => {
                self.ir_hold = self.ir & self.ir_mask();
                log::debug!("jtag: IR {:#x}", self.ir_hold);
            }
            TapState::CaptureDr => self.capture_dr(),
            TapState::ShiftDr => {
                self.tdo = self.dr & 1 != 0;
                self.dr = (self.dr >> 1) | (u64::from(self.tdi) << (self.dr_len - 1));
            }
            TapState::UpdateDr => {
                let ir = self.ir_hold;
                let (dr, mask) = (self.dr, u64::MAX >> (64 - self.dr_len));
                if let Some(handler) = self.handlers.get_mut(&ir) {
                    handler.update(dr & mask);
                }
            }
            _ => {}
        }
    }

    fn capture_dr(&mut self) {
        match self.handlers.get_mut(&self.ir_hold) {
            Some(handler) => {
                self.dr = handler.capture();
                self.dr_len = handler.length();
                log::trace!("jtag: capture {} ({} bits)", handler.name(), self.dr_len);
            }
            None => {
                log::error!("jtag: no data register for IR {:#x}", self.ir_hold);
                self.dr = 0;
                self.dr_len = 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn tap() -> TapController {
        TapController::new(TapCtrlArgs {
            ir_length: 5,
            idcode: 0x1122_3344,
        })
        .unwrap()
    }

    /// One TCK cycle; returns TDO sampled while TCK is low.
    fn clock(tap: &mut TapController, tms: bool, tdi: bool) -> bool {
        tap.write(false, tms, tdi);
        let tdo = tap.tdo();
        tap.write(true, tms, tdi);
        tdo
    }

    fn shift(tap: &mut TapController, value: u64, bits: u32) -> u64 {
        let mut out = 0;
        for i in 0..bits {
            let last = i == bits - 1;
            if clock(tap, last, value >> i & 1 != 0) {
                out |= 1 << i;
            }
        }
        out
    }

    fn shift_ir(tap: &mut TapController, ir: u32) {
        for tms in [false, true, true, false, false] {
            clock(tap, tms, false);
        }
        assert_eq!(tap.state(), TapState::ShiftIr);
        shift(tap, u64::from(ir), 5);
        clock(tap, true, false);
        clock(tap, false, false);
        assert_eq!(tap.state(), TapState::RunTestIdle);
    }

    fn shift_dr(tap: &mut TapController, value: u64, bits: u32) -> u64 {
        for tms in [true, false, false] {
            clock(tap, tms, false);
        }
        assert_eq!(tap.state(), TapState::ShiftDr);
        let out = shift(tap, value, bits);
        clock(tap, true, false);
        clock(tap, false, false);
        out
    }

    #[test]
    fn test_state_transitions() {
        use TapState::*;
        let mut state = TestLogicReset;
        for (tms, expected) in [
            (false, RunTestIdle),
            (true, SelectDrScan),
            (false, CaptureDr),
            (true, Exit1Dr),
            (false, PauseDr),
            (true, Exit2Dr),
            (false, ShiftDr),
            (true, Exit1Dr),
            (true, UpdateDr),
            (true, SelectDrScan),
            (true, SelectIrScan),
            (false, CaptureIr),
            (false, ShiftIr),
            (true, Exit1Ir),
            (false, PauseIr),
            (true, Exit2Ir),
            (true, UpdateIr),
            (true, SelectDrScan),
            (true, SelectIrScan),
            (true, TestLogicReset),
        ] {
            state = state.next(tms);
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_five_tms_reset() {
        let mut tap = tap();
        clock(&mut tap, false, false);
        shift_ir(&mut tap, 0x1f);
        assert_eq!(tap.ir(), 0x1f);
        for tms in [true, false, false] {
            clock(&mut tap, tms, false);
        }
        assert_eq!(tap.state(), TapState::ShiftDr);
        for _ in 0..5 {
            clock(&mut tap, true, false);
        }
        assert_eq!(tap.state(), TapState::TestLogicReset);
        assert_eq!(tap.ir(), IR_IDCODE);
    }

    #[test]
    fn test_idcode_and_bypass() {
        let mut tap = tap();
        clock(&mut tap, false, false);
        assert_eq!(shift_dr(&mut tap, 0, 32), 0x1122_3344);

        shift_ir(&mut tap, IR_BYPASS);
        assert_eq!(tap.ir(), IR_BYPASS);
        // one bit of delay
        assert_eq!(shift_dr(&mut tap, 0b1011, 5), 0b10110);

        tap.set_trst(true);
        tap.set_trst(false);
        assert_eq!(tap.ir(), IR_IDCODE);
        assert_eq!(tap.state(), TapState::TestLogicReset);
    }

    struct Scratch {
        captured: u64,
        updates: Rc<RefCell<Vec<u64>>>,
    }

    impl DataRegister for Scratch {
        fn name(&self) -> &str {
            "scratch"
        }

        fn length(&self) -> u32 {
            12
        }

        fn capture(&mut self) -> u64 {
            self.captured
        }

        fn update(&mut self, value: u64) {
            self.updates.borrow_mut().push(value);
            self.captured = value;
        }
    }

    #[test]
    fn test_custom_register() {
        let mut tap = tap();
        let updates = Rc::new(RefCell::new(vec![]));
        tap.register(
            0x10,
            Box::new(Scratch {
                captured: 0xabc,
                updates: updates.clone(),
            }),
        )
        .unwrap();
        assert!(tap.register(0x10, Box::new(Bypass)).is_err());
        assert!(tap.register(0x20, Box::new(Bypass)).is_err());

        clock(&mut tap, false, false);
        shift_ir(&mut tap, 0x10);
        assert_eq!(shift_dr(&mut tap, 0x123, 12), 0xabc);
        assert_eq!(*updates.borrow(), vec![0x123]);
        assert_eq!(shift_dr(&mut tap, 0, 12), 0x123);

        // unknown instruction reads as a single zero bit
        shift_ir(&mut tap, 0x11);
        assert_eq!(shift_dr(&mut tap, 0, 4), 0);
    }

    #[test]
    fn test_invalid_args() {
        assert!(TapController::new(TapCtrlArgs {
            ir_length: 1,
            idcode: 1
        })
        .is_err());
        assert!(TapController::new(TapCtrlArgs {
            ir_length: 33,
            idcode: 1
        })
        .is_err());
    }
}
