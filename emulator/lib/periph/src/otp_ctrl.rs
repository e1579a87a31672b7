/*++

Licensed under the Apache-2.0 license.

File Name:

    otp_ctrl.rs

Abstract:

    File contains the OTP controller: partitioned read-only storage with
    digests and read locks, the direct access interface, the software
    config window and the queries exported to life cycle, SRAM and
    entropy consumers.

--*/

mod image;
mod lifecycle;
mod partitions;

pub use image::{OtpImage, OtpImageError};
pub use lifecycle::{
    decode_count, decode_state, encode_count, encode_state, replicate_state, LcState,
    LC_STATE_INVALID, LC_TRANSITION_COUNT_MAX,
};
pub use partitions::{
    item, partition_of, Partition, CREATOR_SW_CFG, DIGEST_SIZE, HW_CFG0, HW_CFG1, LIFE_CYCLE,
    OTP_DATA_SIZE, OWNER_SW_CFG, PARTITIONS, PARTITION_COUNT, SECRET0, SECRET1, SECRET2,
    VENDOR_TEST,
};

use crate::entropy::EntropySource;
use crate::mubi::w1c;
use lazy_static::lazy_static;
use ot_emu_bus::{ActionHandle, Bus, BusError, Clock, IrqLine, Timer};
use ot_emu_types::{RvAddr, RvData, RvSize};
use std::cell::RefCell;
use std::rc::Rc;

const REGS_SIZE: RvAddr = 0xc0;
const SW_CFG_WINDOW: RvAddr = 0x1000;
const MMAP_SIZE: RvAddr = 0x2000;

/// Latency of a direct access read from an unbuffered partition.
pub const DAI_READ_DELAY_NS: u64 = 100_000;

const INTR_OTP_OPERATION_DONE: u32 = 1 << 0;
const INTR_OTP_ERROR: u32 = 1 << 1;
const INTR_MASK: u32 = 0x3;

const STATUS_DAI_ERROR: u32 = 1 << 9;
const STATUS_DAI_IDLE: u32 = 1 << 16;

const ERR_CODE_COUNT: usize = 11;
const ERR_CODE_DAI: usize = 9;
const NUM_ALERTS: usize = 5;
const READ_LOCK_COUNT: usize = 3;
const DIGEST_REG_COUNT: usize = 8;

const DAI_CMD_RD: u32 = 1 << 0;
const DAI_CMD_WR: u32 = 1 << 1;
const DAI_CMD_DIGEST: u32 = 1 << 2;

/// Error codes reported in `ERR_CODE_*`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u32)]
pub enum OtpErrCode {
    None = 0,
    MacroError = 1,
    MacroEccCorr = 2,
    MacroEccUncorr = 3,
    MacroWriteBlank = 4,
    Access = 5,
    CheckFail = 6,
    FsmState = 7,
}

/// Life cycle view of the OTP contents.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LcInfo {
    /// Canonical state replicated six times
    pub lc_state: u32,
    pub transition_count: u32,
    pub lc_valid: bool,
    pub secret_valid: bool,
    pub tokens: LcTokens,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct LcTokens {
    pub test_unlock: [u8; item::TOKEN_SIZE],
    pub test_exit: [u8; item::TOKEN_SIZE],
    pub rma: [u8; item::TOKEN_SIZE],
}

/// Hardware configuration exported from the HW_CFG partitions.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct HwCfg {
    pub device_id: [u32; 8],
    pub manuf_state: [u32; 8],
    pub soc_dbg_state: u32,
    /// MB8 instruction fetch enable for the main SRAM
    pub en_sram_ifetch: u32,
}

/// Entropy complex configuration, each field an MB8.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct EntropyCfg {
    pub en_csrng_sw_app_read: u32,
    pub en_entropy_src_fw_read: u32,
    pub en_entropy_src_fw_over: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OtpKeyKind {
    Sram,
    Otbn,
    FlashData,
    FlashAddr,
}

/// Scrambling key material handed out to a peer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OtpKey {
    pub seed: Vec<u8>,
    pub nonce: Vec<u8>,
    pub seed_valid: bool,
}

/// Queries the OTP controller serves to its peers.
pub trait OtpInterface {
    fn lc_info(&self) -> LcInfo;

    fn hw_cfg(&self) -> HwCfg;

    fn entropy_cfg(&self) -> EntropyCfg;

    /// Returns the key seed of `kind` together with a fresh nonce.
    fn otp_key(&self, kind: OtpKeyKind) -> OtpKey;
}

#[derive(Default)]
pub struct OtpCtrlArgs {
    /// Backend image; storage is blank when absent
    pub image: Option<OtpImage>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Protect {
    None,
    Dai,
    CheckTrigger,
    Check,
}

type ReadFn = fn(&OtpCtrlRegs, usize) -> u32;
type WriteFn = fn(&mut OtpCtrlRegs, usize, u32);
type PostFn = fn(&mut OtpCtrlRegs);

/// Register descriptor: accessors, writable mask, write protection and
/// the action run after an accepted write.
struct RegDesc {
    name: String,
    idx: usize,
    read: ReadFn,
    write: Option<WriteFn>,
    mask: u32,
    protect: Protect,
    post: Option<PostFn>,
}

impl RegDesc {
    fn ro(name: impl Into<String>, idx: usize, read: ReadFn) -> Self {
        Self {
            name: name.into(),
            idx,
            read,
            write: None,
            mask: 0,
            protect: Protect::None,
            post: None,
        }
    }

    fn rw(mut self, mask: u32, write: WriteFn) -> Self {
        self.mask = mask;
        self.write = Some(write);
        self
    }

    fn protected(mut self, protect: Protect) -> Self {
        self.protect = protect;
        self
    }

    fn then(mut self, post: PostFn) -> Self {
        self.post = Some(post);
        self
    }
}

fn rw0c(reg: &mut u32, val: u32) {
    *reg &= val;
}

lazy_static! {
    /// Register table indexed by word offset.
    static ref REGISTERS: Vec<RegDesc> = {
        let mut regs = vec![
            RegDesc::ro("INTR_STATE", 0, |r, _| r.intr_state)
                .rw(INTR_MASK, |r, _, v| r.intr_state = w1c(r.intr_state, v))
                .then(OtpCtrlRegs::update_irqs),
            RegDesc::ro("INTR_ENABLE", 0, |r, _| r.intr_enable)
                .rw(INTR_MASK, |r, _, v| r.intr_enable = v)
                .then(OtpCtrlRegs::update_irqs),
            RegDesc::ro("INTR_TEST", 0, |_, _| 0)
                .rw(INTR_MASK, |r, _, v| r.intr_state |= v)
                .then(OtpCtrlRegs::update_irqs),
            RegDesc::ro("ALERT_TEST", 0, |_, _| 0)
                .rw((1 << NUM_ALERTS) - 1, |r, _, v| r.pulse_alerts(v)),
            RegDesc::ro("STATUS", 0, |r, _| r.status()),
        ];
        for i in 0..ERR_CODE_COUNT {
            regs.push(RegDesc::ro(format!("ERR_CODE_{i}"), i, |r, i| r.err_code[i]));
        }
        regs.extend([
            RegDesc::ro("DIRECT_ACCESS_REGWEN", 0, |r, _| r.dai_regwen()),
            RegDesc::ro("DIRECT_ACCESS_CMD", 0, |_, _| 0)
                .rw(0x7, |r, _, v| r.dai_cmd = v)
                .protected(Protect::Dai)
                .then(OtpCtrlRegs::dai_command),
            RegDesc::ro("DIRECT_ACCESS_ADDRESS", 0, |r, _| r.dai_addr)
                .rw(0x7ff, |r, _, v| r.dai_addr = v)
                .protected(Protect::Dai),
            RegDesc::ro("DIRECT_ACCESS_WDATA_0", 0, |r, i| r.dai_wdata[i])
                .rw(u32::MAX, |r, i, v| r.dai_wdata[i] = v)
                .protected(Protect::Dai),
            RegDesc::ro("DIRECT_ACCESS_WDATA_1", 1, |r, i| r.dai_wdata[i])
                .rw(u32::MAX, |r, i, v| r.dai_wdata[i] = v)
                .protected(Protect::Dai),
            RegDesc::ro("DIRECT_ACCESS_RDATA_0", 0, |r, i| r.dai_rdata[i]),
            RegDesc::ro("DIRECT_ACCESS_RDATA_1", 1, |r, i| r.dai_rdata[i]),
            RegDesc::ro("CHECK_TRIGGER_REGWEN", 0, |r, _| r.check_trigger_regwen)
                .rw(1, |r, _, v| rw0c(&mut r.check_trigger_regwen, v)),
            RegDesc::ro("CHECK_TRIGGER", 0, |_, _| 0)
                .rw(0x3, |_, _, v| {
                    if v != 0 {
                        log::info!("otp_ctrl: CHECK_TRIGGER {v:#x} unimplemented");
                    }
                })
                .protected(Protect::CheckTrigger),
            RegDesc::ro("CHECK_REGWEN", 0, |r, _| r.check_regwen)
                .rw(1, |r, _, v| rw0c(&mut r.check_regwen, v)),
            RegDesc::ro("CHECK_TIMEOUT", 0, |r, _| r.check_timeout)
                .rw(u32::MAX, |r, _, v| r.check_timeout = v)
                .protected(Protect::Check),
            RegDesc::ro("INTEGRITY_CHECK_PERIOD", 0, |r, _| r.integrity_check_period)
                .rw(u32::MAX, |r, _, v| r.integrity_check_period = v)
                .protected(Protect::Check),
            RegDesc::ro("CONSISTENCY_CHECK_PERIOD", 0, |r, _| r.consistency_check_period)
                .rw(u32::MAX, |r, _, v| r.consistency_check_period = v)
                .protected(Protect::Check),
        ]);
        for (i, part) in PARTITIONS.iter().take(READ_LOCK_COUNT).enumerate() {
            regs.push(
                RegDesc::ro(format!("{}_READ_LOCK", part.name), i, |r, i| r.read_lock[i])
                    .rw(1, |r, i, v| rw0c(&mut r.read_lock[i], v))
                    .protected(Protect::Dai),
            );
        }
        for (p, part) in PARTITIONS.iter().take(DIGEST_REG_COUNT).enumerate() {
            for w in 0..2 {
                regs.push(RegDesc::ro(
                    format!("{}_DIGEST_{w}", part.name),
                    2 * p + w,
                    |r, i| (r.digest(i / 2) >> (32 * (i % 2))) as u32,
                ));
            }
        }
        regs
    };
}

#[derive(Debug, Copy, Clone)]
struct DaiRead {
    addr: usize,
    wide: bool,
}

pub struct OtpCtrlRegs {
    data: Vec<u8>,
    ecc: Vec<u8>,
    intr_state: u32,
    intr_enable: u32,
    status: u32,
    err_code: [u32; ERR_CODE_COUNT],
    dai_sw_regwen: u32,
    dai_cmd: u32,
    dai_addr: u32,
    dai_wdata: [u32; 2],
    dai_rdata: [u32; 2],
    check_trigger_regwen: u32,
    check_regwen: u32,
    check_timeout: u32,
    integrity_check_period: u32,
    consistency_check_period: u32,
    read_lock: [u32; READ_LOCK_COUNT],

    /// Pending delayed DAI read
    dai_pending: Option<DaiRead>,
    dai_action: Option<ActionHandle>,

    irqs: [IrqLine; 2],
    alerts: [IrqLine; NUM_ALERTS],
    entropy: Box<dyn EntropySource>,
    timer: Timer,
}

impl OtpCtrlRegs {
    fn new(
        clock: &Clock,
        args: OtpCtrlArgs,
        entropy: Box<dyn EntropySource>,
    ) -> Result<Self, OtpImageError> {
        let image = args
            .image
            .unwrap_or_else(|| OtpImage::blank(OTP_DATA_SIZE));
        if image.data.len() != OTP_DATA_SIZE {
            return Err(OtpImageError::SizeMismatch {
                found: image.data.len(),
                expected: OTP_DATA_SIZE,
            });
        }
        if image.ecc_bits != 0 {
            log::info!("otp_ctrl: ECC checking unimplemented, ECC bits ignored");
        }
        Ok(Self {
            data: image.data,
            ecc: image.ecc,
            intr_state: 0,
            intr_enable: 0,
            status: 0,
            err_code: [0; ERR_CODE_COUNT],
            dai_sw_regwen: 1,
            dai_cmd: 0,
            dai_addr: 0,
            dai_wdata: [0; 2],
            dai_rdata: [0; 2],
            check_trigger_regwen: 1,
            check_regwen: 1,
            check_timeout: 0,
            integrity_check_period: 0,
            consistency_check_period: 0,
            read_lock: [1; READ_LOCK_COUNT],
            dai_pending: None,
            dai_action: None,
            irqs: Default::default(),
            alerts: Default::default(),
            entropy,
            timer: Timer::new(clock),
        })
    }

    fn status(&self) -> u32 {
        let idle = if self.dai_pending.is_none() {
            STATUS_DAI_IDLE
        } else {
            0
        };
        self.status | idle
    }

    fn dai_regwen(&self) -> u32 {
        if self.dai_pending.is_some() {
            0
        } else {
            self.dai_sw_regwen
        }
    }

    fn update_irqs(&mut self) {
        let level = self.intr_state & self.intr_enable;
        self.irqs[0].set_bool(level & INTR_OTP_OPERATION_DONE != 0);
        self.irqs[1].set_bool(level & INTR_OTP_ERROR != 0);
    }

    fn pulse_alerts(&mut self, val: u32) {
        for (n, alert) in self.alerts.iter().enumerate() {
            if val & (1 << n) != 0 {
                alert.raise();
                alert.lower();
            }
        }
    }

    fn read_u32(&self, addr: usize) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[addr..addr + 4]);
        u32::from_le_bytes(bytes)
    }

    fn read_u64(&self, addr: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[addr..addr + 8]);
        u64::from_le_bytes(bytes)
    }

    fn bytes<const N: usize>(&self, addr: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[addr..addr + N]);
        out
    }

    fn words<const N: usize>(&self, addr: usize) -> [u32; N] {
        std::array::from_fn(|i| self.read_u32(addr + 4 * i))
    }

    fn digest(&self, p: usize) -> u64 {
        match PARTITIONS[p].digest_offset {
            Some(offset) => self.read_u64(offset),
            None => 0,
        }
    }

    /// Whether the non-digest content of partition `p` is readable.
    fn is_readable(&self, p: usize) -> bool {
        let part = &PARTITIONS[p];
        if part.read_lock_csr && self.read_lock[p] & 1 == 0 {
            return false;
        }
        if part.read_lock && self.digest(p) != 0 {
            return false;
        }
        true
    }

    fn set_dai_error(&mut self, code: OtpErrCode) {
        self.err_code[ERR_CODE_DAI] = code as u32;
        self.status |= STATUS_DAI_ERROR;
        self.intr_state |= INTR_OTP_ERROR;
        self.update_irqs();
    }

    fn dai_command(&mut self) {
        let cmd = std::mem::take(&mut self.dai_cmd);
        if cmd & DAI_CMD_RD != 0 {
            self.dai_read();
        } else if cmd & DAI_CMD_WR != 0 {
            log::info!("otp_ctrl: DAI write unimplemented");
        } else if cmd & DAI_CMD_DIGEST != 0 {
            log::info!("otp_ctrl: DAI digest unimplemented");
        }
    }

    fn dai_read(&mut self) {
        self.err_code[ERR_CODE_DAI] = OtpErrCode::None as u32;
        self.status &= !STATUS_DAI_ERROR;
        let addr = self.dai_addr as usize;
        let Some(p) = partition_of(addr) else {
            log::warn!("otp_ctrl: DAI read from unmapped address {addr:#x}");
            self.set_dai_error(OtpErrCode::Access);
            return;
        };
        let part = &PARTITIONS[p];
        let is_digest = part.is_digest(addr);
        if !is_digest && !self.is_readable(p) {
            log::warn!("otp_ctrl: DAI read from locked partition {}", part.name);
            self.dai_rdata = [0; 2];
            self.set_dai_error(OtpErrCode::Access);
            return;
        }
        let wide = part.secret || is_digest;
        let addr = if wide { addr & !0x7 } else { addr & !0x3 };
        let read = DaiRead { addr, wide };
        if part.buffered {
            self.dai_complete(read);
        } else {
            self.dai_pending = Some(read);
            self.dai_action = Some(self.timer.schedule_poll_in(DAI_READ_DELAY_NS));
        }
    }

    fn dai_complete(&mut self, read: DaiRead) {
        self.dai_rdata[0] = self.read_u32(read.addr);
        self.dai_rdata[1] = if read.wide {
            self.read_u32(read.addr + 4)
        } else {
            0
        };
        self.intr_state |= INTR_OTP_OPERATION_DONE;
        self.update_irqs();
    }

    fn is_locked(&self, protect: Protect) -> bool {
        match protect {
            Protect::None => false,
            Protect::Dai => self.dai_regwen() & 1 == 0,
            Protect::CheckTrigger => self.check_trigger_regwen & 1 == 0,
            Protect::Check => self.check_regwen & 1 == 0,
        }
    }

    fn window_read(&self, offset: usize) -> u32 {
        let Some(p) = partition_of(offset) else {
            return 0;
        };
        let part = &PARTITIONS[p];
        if !part.is_digest(offset) && !self.is_readable(p) {
            log::warn!(
                "otp_ctrl: read from locked partition {} at {offset:#x}",
                part.name
            );
            return 0;
        }
        self.read_u32(offset)
    }

    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word || addr & 3 != 0 {
            Err(BusError::LoadAccessFault)?
        }
        if (SW_CFG_WINDOW..SW_CFG_WINDOW + OTP_DATA_SIZE as RvAddr).contains(&addr) {
            return Ok(self.window_read((addr - SW_CFG_WINDOW) as usize));
        }
        match REGISTERS.get((addr / 4) as usize) {
            Some(reg) if addr < REGS_SIZE => Ok((reg.read)(self, reg.idx)),
            _ => {
                log::warn!("otp_ctrl: invalid read at {addr:#x}");
                Err(BusError::LoadAccessFault)
            }
        }
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word || addr & 3 != 0 {
            Err(BusError::StoreAccessFault)?
        }
        if (SW_CFG_WINDOW..SW_CFG_WINDOW + OTP_DATA_SIZE as RvAddr).contains(&addr) {
            log::warn!("otp_ctrl: write to read-only window at {addr:#x}");
            return Ok(());
        }
        let Some(reg) = REGISTERS.get((addr / 4) as usize) else {
            log::warn!("otp_ctrl: invalid write at {addr:#x}");
            return Err(BusError::StoreAccessFault);
        };
        let Some(write) = reg.write else {
            log::warn!("otp_ctrl: {} is read-only", reg.name);
            return Ok(());
        };
        if self.is_locked(reg.protect) {
            log::warn!("otp_ctrl: {} is write-protected, {val:#x} ignored", reg.name);
            return Ok(());
        }
        write(self, reg.idx, val & reg.mask);
        if let Some(post) = reg.post {
            post(self);
        }
        Ok(())
    }

    fn poll(&mut self) {
        if self.timer.fired(&mut self.dai_action) {
            if let Some(read) = self.dai_pending.take() {
                self.dai_complete(read);
            }
        }
    }

    fn reset(&mut self) {
        self.timer.cancel_opt(&mut self.dai_action);
        self.dai_pending = None;
        self.intr_state = 0;
        self.intr_enable = 0;
        self.status = 0;
        self.err_code = [0; ERR_CODE_COUNT];
        self.dai_sw_regwen = 1;
        self.dai_cmd = 0;
        self.dai_addr = 0;
        self.dai_wdata = [0; 2];
        self.dai_rdata = [0; 2];
        self.check_trigger_regwen = 1;
        self.check_regwen = 1;
        self.check_timeout = 0;
        self.integrity_check_period = 0;
        self.consistency_check_period = 0;
        self.read_lock = [1; READ_LOCK_COUNT];
        self.update_irqs();
    }

    fn lc_info(&self) -> LcInfo {
        let state = decode_state(&self.data[item::LC_STATE..item::LC_STATE + item::LC_STATE_SIZE]);
        let count = decode_count(
            &self.data[item::LC_TRANSITION_CNT..item::LC_TRANSITION_CNT + item::LC_TRANSITION_CNT_SIZE],
        );
        let lc_valid = state != LcState::Invalid && count.is_some();
        if !lc_valid {
            log::warn!("otp_ctrl: invalid life cycle encoding");
        }
        LcInfo {
            lc_state: replicate_state(state.value().unwrap_or(LC_STATE_INVALID)),
            transition_count: count.unwrap_or(LC_TRANSITION_COUNT_MAX),
            lc_valid,
            secret_valid: self.digest(SECRET2) != 0,
            tokens: LcTokens {
                test_unlock: self.bytes(item::TEST_UNLOCK_TOKEN),
                test_exit: self.bytes(item::TEST_EXIT_TOKEN),
                rma: self.bytes(item::RMA_TOKEN),
            },
        }
    }

    fn hw_cfg(&self) -> HwCfg {
        HwCfg {
            device_id: self.words(item::DEVICE_ID),
            manuf_state: self.words(item::MANUF_STATE),
            soc_dbg_state: self.read_u32(item::SOC_DBG_STATE),
            en_sram_ifetch: self.data[item::EN_SRAM_IFETCH] as u32,
        }
    }

    fn entropy_cfg(&self) -> EntropyCfg {
        EntropyCfg {
            en_csrng_sw_app_read: self.data[item::EN_CSRNG_SW_APP_READ] as u32,
            en_entropy_src_fw_read: self.data[item::EN_ENTROPY_SRC_FW_READ] as u32,
            en_entropy_src_fw_over: self.data[item::EN_ENTROPY_SRC_FW_OVER] as u32,
        }
    }

    fn otp_key(&mut self, kind: OtpKeyKind) -> OtpKey {
        let (offset, size) = match kind {
            OtpKeyKind::Sram | OtpKeyKind::Otbn => {
                (item::SRAM_DATA_KEY_SEED, item::SRAM_KEY_SEED_SIZE)
            }
            OtpKeyKind::FlashData => (item::FLASH_DATA_KEY_SEED, item::FLASH_KEY_SEED_SIZE),
            OtpKeyKind::FlashAddr => (item::FLASH_ADDR_KEY_SEED, item::FLASH_KEY_SEED_SIZE),
        };
        let mut nonce = vec![0u8; 16];
        self.entropy.fill_bytes(&mut nonce);
        OtpKey {
            seed: self.data[offset..offset + size].to_vec(),
            nonce,
            seed_valid: self.digest(SECRET1) != 0,
        }
    }
}

/// OTP controller peripheral
#[derive(Clone)]
pub struct OtpCtrl {
    regs: Rc<RefCell<OtpCtrlRegs>>,
}

impl OtpCtrl {
    pub fn new(
        clock: &Clock,
        args: OtpCtrlArgs,
        entropy: Box<dyn EntropySource>,
    ) -> Result<Self, OtpImageError> {
        Ok(Self {
            regs: Rc::new(RefCell::new(OtpCtrlRegs::new(clock, args, entropy)?)),
        })
    }

    pub fn mmap_size(&self) -> RvAddr {
        MMAP_SIZE
    }

    /// `OTP_OPERATION_DONE` (0) and `OTP_ERROR` (1) interrupts.
    pub fn irq(&self, n: usize) -> IrqLine {
        self.regs.borrow().irqs[n].clone()
    }

    pub fn alert(&self, n: usize) -> IrqLine {
        self.regs.borrow().alerts[n].clone()
    }

    /// Raw storage, including ECC bits, as a backend image.
    pub fn image(&self) -> OtpImage {
        let regs = self.regs.borrow();
        OtpImage {
            ecc_bits: 0,
            ecc_granule: 0,
            data: regs.data.clone(),
            ecc: regs.ecc.clone(),
        }
    }
}

impl OtpInterface for OtpCtrl {
    fn lc_info(&self) -> LcInfo {
        self.regs.borrow().lc_info()
    }

    fn hw_cfg(&self) -> HwCfg {
        self.regs.borrow().hw_cfg()
    }

    fn entropy_cfg(&self) -> EntropyCfg {
        self.regs.borrow().entropy_cfg()
    }

    fn otp_key(&self, kind: OtpKeyKind) -> OtpKey {
        self.regs.borrow_mut().otp_key(kind)
    }
}

impl Bus for OtpCtrl {
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
