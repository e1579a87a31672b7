/*++

Licensed under the Apache-2.0 license.

File Name:

    sram_ctrl.rs

Abstract:

    File contains the SRAM controller: scrambling key management, the
    chunked scrambled initialization engine and the memory view that traps
    accesses to not-yet-initialized words.

--*/

use crate::mubi::{mubi4_test_true_strict, w1c, MB4_FALSE, MB4_TRUE, MB8_TRUE};
use crate::otp_ctrl::{OtpInterface, OtpKey, OtpKeyKind};
use crate::ConfigError;
use ot_emu_bus::{
    ActionHandle, AddressSpace, Bus, BusError, Clock, GpioIn, GpioSink, IrqLine, MappingId,
    MemoryRegion, Ram, Timer,
};
use ot_emu_types::{RvAddr, RvData, RvSize};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tock_registers::register_bitfields;
use tock_registers::LocalRegisterCopy;

register_bitfields! [
    u32,

    /// Controller status
    Status [
        BUS_INTEG_ERROR OFFSET(0) NUMBITS(1) [],
        INIT_ERROR OFFSET(1) NUMBITS(1) [],
        ESCALATED OFFSET(2) NUMBITS(1) [],
        SCR_KEY_VALID OFFSET(3) NUMBITS(1) [],
        SCR_KEY_SEED_VALID OFFSET(4) NUMBITS(1) [],
        INIT_DONE OFFSET(5) NUMBITS(1) [],
        READBACK_ERROR OFFSET(6) NUMBITS(1) [],
        SRAM_ALERT OFFSET(7) NUMBITS(1) [],
    ],

    /// Control
    Ctrl [
        RENEW_SCR_KEY OFFSET(0) NUMBITS(1) [],
        INIT OFFSET(1) NUMBITS(1) [],
    ],
];

const REG_ALERT_TEST: RvAddr = 0x00;
const REG_STATUS: RvAddr = 0x04;
const REG_EXEC_REGWEN: RvAddr = 0x08;
const REG_EXEC: RvAddr = 0x0c;
const REG_CTRL_REGWEN: RvAddr = 0x10;
const REG_CTRL: RvAddr = 0x14;
const REG_SCR_KEY_ROTATED: RvAddr = 0x18;
const REGS_SIZE: RvAddr = 0x20;

const KEY_SIZE: usize = 16;
const WORDS_PER_SLOT: usize = 64;

/// Device configuration.
#[derive(Debug, Clone)]
pub struct SramCtrlArgs {
    /// Memory size in bytes
    pub size: usize,
    /// Bytes scrubbed per initialization step
    pub init_chunk: usize,
    /// Virtual time between initialization steps
    pub init_chunk_ns: u64,
}

impl Default for SramCtrlArgs {
    fn default() -> Self {
        Self {
            size: 0x20000,
            init_chunk: 4096,
            init_chunk_ns: 100_000,
        }
    }
}

/// Two-level initialization map: one bit per word plus one bit per
/// 64-word slot that still holds an uninitialized word.
struct InitBitmap {
    words: Vec<u64>,
    slots: Vec<u64>,
    n_words: usize,
}

impl InitBitmap {
    fn new(n_words: usize) -> Self {
        let n_slots = n_words.div_ceil(WORDS_PER_SLOT);
        let mut bm = Self {
            words: vec![0; n_slots],
            slots: vec![0; n_slots.div_ceil(64)],
            n_words,
        };
        bm.fill();
        bm
    }

    fn fill(&mut self) {
        for (slot, bits) in self.words.iter_mut().enumerate() {
            let first = slot * WORDS_PER_SLOT;
            let count = (self.n_words - first).min(WORDS_PER_SLOT);
            *bits = if count == 64 { u64::MAX } else { (1 << count) - 1 };
            self.slots[slot / 64] |= 1 << (slot % 64);
        }
    }

    fn clear(&mut self) {
        self.words.fill(0);
        self.slots.fill(0);
    }

    fn is_uninit(&self, word: usize) -> bool {
        self.words[word / WORDS_PER_SLOT] & (1 << (word % WORDS_PER_SLOT)) != 0
    }

    /// Marks `word` initialized. Returns true once no uninitialized word
    /// remains.
    fn mark(&mut self, word: usize) -> bool {
        let slot = word / WORDS_PER_SLOT;
        self.words[slot] &= !(1 << (word % WORDS_PER_SLOT));
        if self.words[slot] == 0 {
            self.slots[slot / 64] &= !(1 << (slot % 64));
        }
        self.is_empty()
    }

    fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| *s == 0)
    }
}

pub struct SramCtrlRegs {
    args: SramCtrlArgs,
    status: LocalRegisterCopy<u32, Status::Register>,
    exec_regwen: u32,
    exec: u32,
    ctrl_regwen: u32,
    scr_key_rotated: u32,

    key: OtpKey,
    rng: StdRng,
    init_bm: InitBitmap,
    initialized: bool,
    initializing: bool,
    /// Word cursor of the initialization engine
    init_slot_pos: usize,
    escalated: bool,

    sram: Rc<RefCell<Ram>>,
    mem: AddressSpace,
    mem_mapping: MappingId,
    trap_region: Option<MemoryRegion>,
    init_action: Option<ActionHandle>,
    swap_action: Option<ActionHandle>,

    alert: IrqLine,
    otp: Box<dyn OtpInterface>,
    timer: Timer,
}

impl SramCtrlRegs {
    fn wsize(&self) -> usize {
        self.args.size / 4
    }

    fn blank_key() -> OtpKey {
        OtpKey {
            seed: vec![0; KEY_SIZE],
            nonce: vec![0; KEY_SIZE],
            seed_valid: false,
        }
    }

    fn rng_from_key(key: &OtpKey) -> StdRng {
        let mut seed = [0u8; 32];
        for (dst, src) in seed.iter_mut().zip(key.seed.iter().chain(key.nonce.iter())) {
            *dst = *src;
        }
        StdRng::from_seed(seed)
    }

    /// Points the memory view at the trap or at plain RAM.
    fn update_alias(&mut self) {
        let trapped = self.escalated || !self.initialized;
        let region = match (&self.trap_region, trapped) {
            (Some(trap), true) => trap.clone(),
            _ => MemoryRegion::ram(self.sram.clone()),
        };
        let id = self.mem_mapping;
        self.mem.transaction(|space| space.set_region(id, region));
    }

    fn schedule_alias_update(&mut self) {
        if self.swap_action.is_none() {
            self.swap_action = Some(self.timer.schedule_bh());
        }
    }

    fn renew_key(&mut self) {
        self.key = self.otp.otp_key(OtpKeyKind::Sram);
        self.rng = Self::rng_from_key(&self.key);
        self.status.modify(Status::SCR_KEY_VALID::SET);
        if self.key.seed_valid {
            self.status.modify(Status::SCR_KEY_SEED_VALID::SET);
        } else {
            self.status.modify(Status::SCR_KEY_SEED_VALID::CLEAR);
        }
        self.scr_key_rotated = MB4_TRUE;
        log::debug!("sram_ctrl: scrambling key renewed");
    }

    fn start_init(&mut self) {
        self.initialized = false;
        self.initializing = true;
        self.init_slot_pos = 0;
        self.init_bm.fill();
        self.status.modify(Status::INIT_DONE::CLEAR);
        self.rng = Self::rng_from_key(&self.key);
        self.update_alias();
        self.timer.cancel_opt(&mut self.init_action);
        self.init_action = Some(self.timer.schedule_poll_in(self.args.init_chunk_ns));
    }

    /// Scrubs up to `words` words at the cursor. Returns true when the
    /// whole memory has been scrubbed.
    fn init_step(&mut self, words: usize) -> bool {
        let end = (self.init_slot_pos + words).min(self.wsize());
        {
            let mut sram = self.sram.borrow_mut();
            let data = &mut sram.data_mut()[self.init_slot_pos * 4..end * 4];
            self.rng.fill_bytes(data);
        }
        self.init_slot_pos = end;
        self.init_slot_pos == self.wsize()
    }

    fn finish_init(&mut self) {
        self.timer.cancel_opt(&mut self.init_action);
        self.init_bm.clear();
        self.initialized = true;
        self.initializing = false;
        self.status.modify(Status::INIT_DONE::SET);
        log::debug!("sram_ctrl: initialization done");
    }

    /// Completes a pending initialization at once.
    fn collapse_init(&mut self) {
        if self.initializing {
            self.init_step(self.wsize());
            self.finish_init();
            self.schedule_alias_update();
        }
    }

    fn mem_read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if self.escalated {
            log::warn!("sram_ctrl: read at {addr:#x} after escalation");
            Err(BusError::LoadAccessFault)?
        }
        self.collapse_init();
        let word = addr as usize / 4;
        if word >= self.wsize() {
            Err(BusError::LoadAccessFault)?
        }
        if !self.initialized && self.init_bm.is_uninit(word) {
            log::warn!("sram_ctrl: read from uninitialized word at {addr:#x}");
            Err(BusError::LoadAccessFault)?
        }
        self.sram.borrow_mut().read(size, addr)
    }

    fn mem_write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if self.escalated {
            log::warn!("sram_ctrl: write at {addr:#x} after escalation");
            Err(BusError::StoreAccessFault)?
        }
        self.collapse_init();
        self.sram.borrow_mut().write(size, addr, val)?;
        if !self.initialized && self.init_bm.mark(addr as usize / 4) {
            self.initialized = true;
            self.schedule_alias_update();
        }
        Ok(())
    }

    fn exec_enabled(&self) -> bool {
        self.otp.hw_cfg().en_sram_ifetch == MB8_TRUE && mubi4_test_true_strict(self.exec)
    }

    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        let val = match addr {
            REG_ALERT_TEST => 0,
            REG_STATUS => self.status.get(),
            REG_EXEC_REGWEN => self.exec_regwen,
            REG_EXEC => self.exec,
            REG_CTRL_REGWEN => self.ctrl_regwen,
            REG_CTRL => 0,
            REG_SCR_KEY_ROTATED => self.scr_key_rotated,
            _ => {
                log::warn!("sram_ctrl: invalid read at {addr:#x}");
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
            REG_ALERT_TEST => {
                if val & 1 != 0 {
                    self.alert.raise();
                    self.alert.lower();
                }
            }
            REG_STATUS => log::warn!("sram_ctrl: STATUS is read-only"),
            REG_EXEC_REGWEN => self.exec_regwen &= val & 1,
            REG_EXEC => {
                if self.exec_regwen & 1 == 0 {
                    log::warn!("sram_ctrl: EXEC is write-protected");
                } else {
                    self.exec = val & 0xf;
                }
            }
            REG_CTRL_REGWEN => self.ctrl_regwen &= val & 1,
            REG_CTRL => {
                if self.ctrl_regwen & 1 == 0 {
                    log::warn!("sram_ctrl: CTRL is write-protected, {val:#x} ignored");
                    return Ok(());
                }
                let ctrl = LocalRegisterCopy::<u32, Ctrl::Register>::new(val);
                if ctrl.is_set(Ctrl::RENEW_SCR_KEY) {
                    self.renew_key();
                }
                if ctrl.is_set(Ctrl::INIT) {
                    self.start_init();
                }
            }
            REG_SCR_KEY_ROTATED => self.scr_key_rotated = w1c(self.scr_key_rotated, val & 0xf),
            _ => {
                log::warn!("sram_ctrl: invalid write at {addr:#x}");
                Err(BusError::StoreAccessFault)?
            }
        }
        Ok(())
    }

    fn poll(&mut self) {
        if self.timer.fired(&mut self.init_action) && self.initializing {
            if self.init_step(self.args.init_chunk / 4) {
                self.finish_init();
                self.update_alias();
            } else {
                self.init_action = Some(self.timer.schedule_poll_in(self.args.init_chunk_ns));
            }
        }
        if self.timer.fired(&mut self.swap_action) {
            self.update_alias();
        }
    }

    fn reset(&mut self) {
        self.timer.cancel_opt(&mut self.init_action);
        self.timer.cancel_opt(&mut self.swap_action);
        self.status.set(0);
        self.exec_regwen = 1;
        self.exec = MB4_FALSE;
        self.ctrl_regwen = 1;
        self.scr_key_rotated = MB4_FALSE;
        self.key = Self::blank_key();
        self.rng = Self::rng_from_key(&self.key);
        self.init_bm.fill();
        self.initialized = false;
        self.initializing = false;
        self.init_slot_pos = 0;
        self.escalated = false;
        self.update_alias();
    }
}

impl GpioSink for SramCtrlRegs {
    /// Escalation input: locks the memory until reset.
    fn set_level(&mut self, _input: usize, level: i32) {
        if level != 0 && !self.escalated {
            log::warn!("sram_ctrl: escalation received, memory disabled");
            self.escalated = true;
            self.status.modify(Status::ESCALATED::SET);
            self.update_alias();
        }
    }
}

/// Trapping view of the memory, active until every word is initialized.
struct SramTrap {
    regs: Weak<RefCell<SramCtrlRegs>>,
}

impl Bus for SramTrap {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        let regs = self.regs.upgrade().ok_or(BusError::LoadAccessFault)?;
        let mut regs = regs.borrow_mut();
        regs.mem_read(size, addr)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        let regs = self.regs.upgrade().ok_or(BusError::StoreAccessFault)?;
        let mut regs = regs.borrow_mut();
        regs.mem_write(size, addr, val)
    }
}

/// SRAM controller peripheral
#[derive(Clone)]
pub struct SramCtrl {
    regs: Rc<RefCell<SramCtrlRegs>>,
}

impl SramCtrl {
    pub fn new(
        clock: &Clock,
        args: SramCtrlArgs,
        otp: Box<dyn OtpInterface>,
    ) -> Result<Self, ConfigError> {
        if args.size == 0 || args.size % 4 != 0 {
            return Err(ConfigError::invalid(
                "sram_ctrl",
                format!("size {:#x} is not a non-zero multiple of 4", args.size),
            ));
        }
        if args.init_chunk < 4 {
            return Err(ConfigError::invalid("sram_ctrl", "init chunk below one word"));
        }
        let sram = Rc::new(RefCell::new(Ram::zeroed(args.size)));
        let mem = AddressSpace::new("sram");
        let mem_mapping = mem.map(
            "sram",
            0,
            args.size as u64,
            MemoryRegion::ram(sram.clone()),
            0,
        );
        let key = SramCtrlRegs::blank_key();
        let regs = Rc::new(RefCell::new(SramCtrlRegs {
            init_bm: InitBitmap::new(args.size / 4),
            args,
            status: LocalRegisterCopy::new(0),
            exec_regwen: 1,
            exec: MB4_FALSE,
            ctrl_regwen: 1,
            scr_key_rotated: MB4_FALSE,
            rng: SramCtrlRegs::rng_from_key(&key),
            key,
            initialized: false,
            initializing: false,
            init_slot_pos: 0,
            escalated: false,
            sram,
            mem,
            mem_mapping,
            trap_region: None,
            init_action: None,
            swap_action: None,
            alert: IrqLine::new(),
            otp,
            timer: Timer::new(clock),
        }));
        let trap: Rc<RefCell<dyn Bus>> = Rc::new(RefCell::new(SramTrap {
            regs: Rc::downgrade(&regs),
        }));
        {
            let mut r = regs.borrow_mut();
            r.trap_region = Some(MemoryRegion::io(trap));
            r.update_alias();
        }
        Ok(Self { regs })
    }

    pub fn mmap_size(&self) -> RvAddr {
        REGS_SIZE
    }

    /// Memory view to alias into a bus address space at offset 0.
    pub fn mem(&self) -> AddressSpace {
        self.regs.borrow().mem.clone()
    }

    pub fn mem_size(&self) -> usize {
        self.regs.borrow().args.size
    }

    /// Backing RAM.
    pub fn ram(&self) -> Rc<RefCell<Ram>> {
        self.regs.borrow().sram.clone()
    }

    pub fn escalate_input(&self) -> GpioIn {
        GpioIn::new(&self.regs, 0)
    }

    pub fn alert(&self) -> IrqLine {
        self.regs.borrow().alert.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.regs.borrow().initialized
    }

    /// Whether instruction fetch from this memory is permitted.
    pub fn exec_enabled(&self) -> bool {
        self.regs.borrow().exec_enabled()
    }

    /// Whether the bus currently reaches the trapping view.
    pub fn is_trapped(&self) -> bool {
        let regs = self.regs.borrow();
        match regs.mem.find_region(0, 1) {
            Some(section) => !section.region.is_ram(),
            None => false,
        }
    }
}

impl Bus for SramCtrl {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        self.regs.borrow_mut().read(size, addr)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        self.regs.borrow_mut().write(size, addr, val)
    }

    fn poll(&mut self) {
        self.regs.borrow_mut().poll()
    }

    fn warm_reset(&mut self) {
        self.regs.borrow_mut().reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::RandomEntropy;
    use crate::otp_ctrl::{item, OtpCtrl, OtpCtrlArgs, OtpImage, OTP_DATA_SIZE};
    use ot_emu_types::{MemTxAttrs, MemTxError};

    const SIZE: usize = 0x4000;

    fn otp(ifetch: bool) -> OtpCtrl {
        let mut image = OtpImage::blank(OTP_DATA_SIZE);
        image.data[item::SRAM_DATA_KEY_SEED..item::SRAM_DATA_KEY_SEED + 16].fill(0x42);
        if ifetch {
            image.data[item::EN_SRAM_IFETCH] = MB8_TRUE as u8;
        }
        OtpCtrl::new(
            &Clock::new(),
            OtpCtrlArgs { image: Some(image) },
            Box::new(RandomEntropy::from_seed(9)),
        )
        .unwrap()
    }

    fn sram(clock: &Clock, ifetch: bool) -> SramCtrl {
        SramCtrl::new(
            clock,
            SramCtrlArgs {
                size: SIZE,
                ..Default::default()
            },
            Box::new(otp(ifetch)),
        )
        .unwrap()
    }

    fn status(sram: &mut SramCtrl) -> LocalRegisterCopy<u32, Status::Register> {
        LocalRegisterCopy::new(sram.read(RvSize::Word, REG_STATUS).unwrap())
    }

    fn expected_fill(sram: &SramCtrl) -> Vec<u8> {
        let mut rng = SramCtrlRegs::rng_from_key(&sram.regs.borrow().key);
        let mut data = vec![0u8; SIZE];
        rng.fill_bytes(&mut data);
        data
    }

    #[test]
    fn test_rejects_bad_size() {
        let clock = Clock::new();
        let result = SramCtrl::new(
            &clock,
            SramCtrlArgs {
                size: 6,
                ..Default::default()
            },
            Box::new(otp(false)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_uninitialized_words_trap() {
        let clock = Clock::new();
        let s = sram(&clock, false);
        let mem = s.mem();
        assert!(s.is_trapped());
        assert_eq!(
            mem.read_u32(0x10, MemTxAttrs::default()),
            Err(MemTxError::Access)
        );
        mem.write_u32(0x10, 0xdead_beef, MemTxAttrs::default()).unwrap();
        assert_eq!(mem.read_u32(0x10, MemTxAttrs::default()), Ok(0xdead_beef));
        assert!(!s.is_initialized());
    }

    #[test]
    fn test_writing_every_word_releases_trap() {
        let clock = Clock::new();
        let mut s = sram(&clock, false);
        let mem = s.mem();
        for addr in (0..SIZE as u64).step_by(4) {
            mem.write_u32(addr, addr as u32, MemTxAttrs::default()).unwrap();
        }
        assert!(s.is_initialized());
        assert!(s.is_trapped());
        clock.increment_and_process_timer_actions(1, &mut s);
        assert!(!s.is_trapped());
        assert_eq!(mem.read_u32(0x100, MemTxAttrs::default()), Ok(0x100));
    }

    #[test]
    fn test_chunked_init() {
        let clock = Clock::new();
        let mut s = sram(&clock, false);
        s.write(RvSize::Word, REG_CTRL, 0x3).unwrap();
        let st = status(&mut s);
        assert!(st.is_set(Status::SCR_KEY_VALID));
        assert!(!st.is_set(Status::SCR_KEY_SEED_VALID));
        assert!(!st.is_set(Status::INIT_DONE));
        assert_eq!(s.read(RvSize::Word, REG_SCR_KEY_ROTATED), Ok(MB4_TRUE));

        // 16 KiB at 4 KiB per 100 us
        for _ in 0..3 {
            clock.increment_and_process_timer_actions(100_000, &mut s);
            assert!(!status(&mut s).is_set(Status::INIT_DONE));
        }
        clock.increment_and_process_timer_actions(100_000, &mut s);
        assert!(status(&mut s).is_set(Status::INIT_DONE));
        assert!(s.is_initialized());
        assert!(!s.is_trapped());
        assert_eq!(s.ram().borrow().data(), expected_fill(&s).as_slice());

        s.write(RvSize::Word, REG_SCR_KEY_ROTATED, MB4_TRUE).unwrap();
        assert_eq!(s.read(RvSize::Word, REG_SCR_KEY_ROTATED), Ok(0));
    }

    #[test]
    fn test_access_during_init_collapses() {
        let clock = Clock::new();
        let mut s = sram(&clock, false);
        s.write(RvSize::Word, REG_CTRL, 0x3).unwrap();
        clock.increment_and_process_timer_actions(100_000, &mut s);
        let mut b = [0u8; 1];
        s.mem().read(0, &mut b, MemTxAttrs::default()).unwrap();
        assert!(status(&mut s).is_set(Status::INIT_DONE));
        let expected = expected_fill(&s);
        assert_eq!(b[0], expected[0]);
        assert_eq!(s.ram().borrow().data(), expected.as_slice());
        clock.increment_and_process_timer_actions(1, &mut s);
        assert!(!s.is_trapped());
    }

    #[test]
    fn test_ctrl_regwen() {
        let clock = Clock::new();
        let mut s = sram(&clock, false);
        s.write(RvSize::Word, REG_CTRL_REGWEN, 0).unwrap();
        s.write(RvSize::Word, REG_CTRL, 0x2).unwrap();
        assert!(!s.regs.borrow().initializing);
        s.write(RvSize::Word, REG_CTRL_REGWEN, 1).unwrap();
        assert_eq!(s.read(RvSize::Word, REG_CTRL_REGWEN), Ok(0));
    }

    #[test]
    fn test_exec_gating() {
        let clock = Clock::new();
        let mut s = sram(&clock, false);
        s.write(RvSize::Word, REG_EXEC, MB4_TRUE).unwrap();
        assert!(!s.exec_enabled());

        let mut s = sram(&clock, true);
        assert!(!s.exec_enabled());
        s.write(RvSize::Word, REG_EXEC, MB4_TRUE).unwrap();
        assert!(s.exec_enabled());
        s.write(RvSize::Word, REG_EXEC_REGWEN, 0).unwrap();
        s.write(RvSize::Word, REG_EXEC, MB4_FALSE).unwrap();
        assert!(s.exec_enabled());
    }

    #[test]
    fn test_escalation_blocks_memory() {
        let clock = Clock::new();
        let mut s = sram(&clock, false);
        s.write(RvSize::Word, REG_CTRL, 0x3).unwrap();
        s.mem().read_u32(0, MemTxAttrs::default()).unwrap();
        clock.increment_and_process_timer_actions(1, &mut s);
        assert!(!s.is_trapped());

        s.escalate_input().set(1);
        assert!(status(&mut s).is_set(Status::ESCALATED));
        assert!(s.is_trapped());
        assert_eq!(
            s.mem().read_u32(0, MemTxAttrs::default()),
            Err(MemTxError::Access)
        );

        s.warm_reset();
        assert_eq!(s.read(RvSize::Word, REG_STATUS), Ok(0));
        s.mem().write_u32(0, 1, MemTxAttrs::default()).unwrap();
        assert_eq!(s.mem().read_u32(0, MemTxAttrs::default()), Ok(1));
    }

    #[test]
    fn test_bitmap_slots() {
        let mut bm = InitBitmap::new(130);
        assert_eq!(bm.words[2], 0b11);
        assert!(bm.is_uninit(129));
        for w in 0..64 {
            assert!(!bm.mark(w));
        }
        assert_eq!(bm.slots[0], 0b110);
        for w in 64..129 {
            assert!(!bm.mark(w));
        }
        assert!(bm.mark(129));
        assert!(bm.is_empty());
    }
}
