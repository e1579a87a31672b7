/*++

Licensed under the Apache-2.0 license.

File Name:

    dma.rs

Abstract:

    File contains the DMA controller: memory-to-memory transfers between
    the OpenTitan, control and system address spaces with an inline
    SHA-2 engine.

--*/

use crate::mubi::{mubi4_test_true_strict, w1c, MB4_FALSE, MB4_TRUE};
use ot_emu_bus::{
    ActionHandle, AddressSpace, Bus, BusError, Clock, IrqLine, MemoryRegion, ReadWriteRegister,
    Section, Timer,
};
use ot_emu_types::{MemTxAttrs, MemTxError, MemTxResult, RvAddr, RvData, RvSize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::cell::RefCell;
use std::rc::Rc;
use tock_registers::fields::FieldValue;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::register_bitfields;
use tock_registers::LocalRegisterCopy;

register_bitfields! [
    u32,

    /// Control
    Control [
        OPCODE OFFSET(0) NUMBITS(4) [
            COPY = 0,
            COPY_SHA256 = 1,
            COPY_SHA384 = 2,
            COPY_SHA512 = 3,
        ],
        HW_HANDSHAKE_EN OFFSET(4) NUMBITS(1) [],
        INITIAL_TRANSFER OFFSET(8) NUMBITS(1) [],
        ABORT OFFSET(27) NUMBITS(1) [],
        GO OFFSET(31) NUMBITS(1) [],
    ],

    /// Status
    Status [
        BUSY OFFSET(0) NUMBITS(1) [],
        DONE OFFSET(1) NUMBITS(1) [],
        ABORTED OFFSET(2) NUMBITS(1) [],
        ERROR OFFSET(3) NUMBITS(1) [],
        SHA2_DIGEST_VALID OFFSET(12) NUMBITS(1) [],
    ],

    /// Error code
    ErrorCode [
        SRC_ADDRESS OFFSET(0) NUMBITS(1) [],
        DEST_ADDRESS OFFSET(1) NUMBITS(1) [],
        OPCODE OFFSET(2) NUMBITS(1) [],
        SIZE OFFSET(3) NUMBITS(1) [],
        BUS OFFSET(4) NUMBITS(1) [],
        BASE_LIMIT OFFSET(5) NUMBITS(1) [],
        RANGE_VALID OFFSET(6) NUMBITS(1) [],
        ASID OFFSET(7) NUMBITS(1) [],
    ],
];

const REG_INTR_STATE: RvAddr = 0x00;
const REG_INTR_ENABLE: RvAddr = 0x04;
const REG_INTR_TEST: RvAddr = 0x08;
const REG_ALERT_TEST: RvAddr = 0x0c;
const REG_SRC_ADDR_LO: RvAddr = 0x10;
const REG_SRC_ADDR_HI: RvAddr = 0x14;
const REG_DST_ADDR_LO: RvAddr = 0x18;
const REG_DST_ADDR_HI: RvAddr = 0x1c;
const REG_ADDR_SPACE_ID: RvAddr = 0x20;
const REG_RANGE_BASE: RvAddr = 0x24;
const REG_RANGE_LIMIT: RvAddr = 0x28;
const REG_RANGE_VALID: RvAddr = 0x2c;
const REG_RANGE_REGWEN: RvAddr = 0x30;
const REG_CFG_REGWEN: RvAddr = 0x34;
const REG_TOTAL_DATA_SIZE: RvAddr = 0x38;
const REG_CHUNK_DATA_SIZE: RvAddr = 0x3c;
const REG_TRANSFER_WIDTH: RvAddr = 0x40;
const REG_CONTROL: RvAddr = 0x44;
const REG_SRC_CONFIG: RvAddr = 0x48;
const REG_DST_CONFIG: RvAddr = 0x4c;
const REG_STATUS: RvAddr = 0x50;
const REG_ERROR_CODE: RvAddr = 0x54;
const REG_SHA2_DIGEST_0: RvAddr = 0x58;
const REG_SHA2_DIGEST_15: RvAddr = 0x94;
const REG_HANDSHAKE_INTR_ENABLE: RvAddr = 0x98;
const REG_CLEAR_INTR_SRC: RvAddr = 0x9c;
const REG_CLEAR_INTR_BUS: RvAddr = 0xa0;
const MMAP_SIZE: RvAddr = 0x100;

pub const INTR_DMA_DONE: u32 = 1 << 0;
pub const INTR_DMA_CHUNK_DONE: u32 = 1 << 1;
pub const INTR_DMA_ERROR: u32 = 1 << 2;
const INTR_MASK: u32 = 0x7;

pub const ASID_OT: u32 = 7;
pub const ASID_SYS: u32 = 9;
pub const ASID_CTN: u32 = 10;

const CONTROL_GO: u32 = 1 << 31;
const CONTROL_ABORT: u32 = 1 << 27;
const STATUS_W1C_MASK: u32 = 0b1110;
const STATUS_ERROR: u32 = 1 << 3;
const ERROR_CODE_BUS: u32 = 1 << 4;

const DIGEST_WORDS: usize = 16;
const BLOCK_SIZE: usize = 4096;

/// Address spaces the DMA can reach.
#[derive(Clone)]
pub struct DmaSpaces {
    pub ot: AddressSpace,
    pub ctn: AddressSpace,
    pub sys: AddressSpace,
}

/// Device configuration.
#[derive(Debug, Clone)]
pub struct DmaArgs {
    /// Initiator role of the transactions
    pub role: u8,
    /// Virtual time between transfer blocks
    pub block_ns: u64,
}

impl Default for DmaArgs {
    fn default() -> Self {
        Self {
            role: 0x2,
            block_ns: 1000,
        }
    }
}

/// Transfer engine state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DmaState {
    Idle,
    /// Hardware handshake states, unused while handshake mode is rejected
    /// at GO
    ClearIntrSrc,
    WaitIntrSrcResp,
    AddrSetup,
    SendRead,
    WaitReadResp,
    SendWrite,
    WaitWriteResp,
    /// Left only by clearing STATUS.ERROR or by a new GO
    Error,
    ShaFinalize,
    ShaWait,
}

impl DmaState {
    fn is_busy(self) -> bool {
        !matches!(self, DmaState::Idle | DmaState::Error)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Asid {
    Ot,
    Ctn,
    Sys,
}

impl Asid {
    fn decode(val: u32) -> Option<Self> {
        match val {
            ASID_OT => Some(Asid::Ot),
            ASID_CTN => Some(Asid::Ctn),
            ASID_SYS => Some(Asid::Sys),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ShaMode {
    Sha256,
    Sha384,
    Sha512,
}

#[derive(Clone)]
enum HashCtx {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl HashCtx {
    fn new(mode: ShaMode) -> Self {
        match mode {
            ShaMode::Sha256 => HashCtx::Sha256(Sha256::new()),
            ShaMode::Sha384 => HashCtx::Sha384(Sha384::new()),
            ShaMode::Sha512 => HashCtx::Sha512(Sha512::new()),
        }
    }

    fn mode(&self) -> ShaMode {
        match self {
            HashCtx::Sha256(_) => ShaMode::Sha256,
            HashCtx::Sha384(_) => ShaMode::Sha384,
            HashCtx::Sha512(_) => ShaMode::Sha512,
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            HashCtx::Sha256(h) => h.update(data),
            HashCtx::Sha384(h) => h.update(data),
            HashCtx::Sha512(h) => h.update(data),
        }
    }

    /// Digest of everything hashed so far; the running context is kept.
    fn snapshot(&self) -> Vec<u8> {
        match self {
            HashCtx::Sha256(h) => h.clone().finalize().to_vec(),
            HashCtx::Sha384(h) => h.clone().finalize().to_vec(),
            HashCtx::Sha512(h) => h.clone().finalize().to_vec(),
        }
    }
}

/// One side of a transfer, pinned to the section that covers it.
struct Endpoint {
    space: AddressSpace,
    addr: u64,
    section: Section,
}

impl Endpoint {
    fn is_device(&self) -> bool {
        !self.section.region.is_ram()
    }

    /// Moves `buf` from or to the endpoint at byte offset `pos`.
    fn rw(
        &self,
        pos: usize,
        buf: &mut [u8],
        width: usize,
        attrs: MemTxAttrs,
        is_write: bool,
    ) -> MemTxResult {
        match &self.section.region {
            MemoryRegion::Ram(ram) => {
                let start = self.section.offset as usize + pos;
                let end = start + buf.len();
                if is_write {
                    let mut ram = ram.borrow_mut();
                    let dst = ram
                        .data_mut()
                        .get_mut(start..end)
                        .ok_or(MemTxError::Access)?;
                    dst.copy_from_slice(buf);
                } else {
                    let ram = ram.borrow();
                    let src = ram.data().get(start..end).ok_or(MemTxError::Access)?;
                    buf.copy_from_slice(src);
                }
                Ok(())
            }
            _ => {
                for (i, elem) in buf.chunks_mut(width).enumerate() {
                    let addr = self.addr + (pos + i * width) as u64;
                    self.space.rw(addr, attrs, elem, is_write)?;
                }
                Ok(())
            }
        }
    }
}

struct Transfer {
    src: Endpoint,
    dst: Endpoint,
    width: usize,
    size: usize,
    done: usize,
}

pub struct DmaRegs {
    args: DmaArgs,
    intr_state: u32,
    intr_enable: u32,
    src_addr: [u32; 2],
    dst_addr: [u32; 2],
    addr_space_id: u32,
    range_base: u32,
    range_limit: u32,
    range_valid: u32,
    range_regwen: u32,
    total_data_size: u32,
    chunk_data_size: u32,
    transfer_width: u32,
    control: ReadWriteRegister<Control::Register>,
    src_config: u32,
    dst_config: u32,
    status: ReadWriteRegister<Status::Register>,
    error_code: ReadWriteRegister<ErrorCode::Register>,
    sha2_digest: [u32; DIGEST_WORDS],
    handshake_intr_enable: u32,
    clear_intr_src: u32,
    clear_intr_bus: u32,

    state: DmaState,
    hash: Option<HashCtx>,
    xfer: Option<Transfer>,
    abort: bool,
    op_action: Option<ActionHandle>,

    spaces: DmaSpaces,
    irqs: [IrqLine; 3],
    alert: IrqLine,
    timer: Timer,
}

impl DmaRegs {
    fn from_timer(timer: Timer, args: DmaArgs, spaces: DmaSpaces) -> Self {
        Self {
            args,
            intr_state: 0,
            intr_enable: 0,
            src_addr: [0; 2],
            dst_addr: [0; 2],
            addr_space_id: 0x77,
            range_base: 0,
            range_limit: 0,
            range_valid: 0,
            range_regwen: MB4_TRUE,
            total_data_size: 0,
            chunk_data_size: 0,
            transfer_width: 2,
            control: ReadWriteRegister::new(0),
            src_config: 0,
            dst_config: 0,
            status: ReadWriteRegister::new(0),
            error_code: ReadWriteRegister::new(0),
            sha2_digest: [0; DIGEST_WORDS],
            handshake_intr_enable: 0,
            clear_intr_src: 0,
            clear_intr_bus: 0,
            state: DmaState::Idle,
            hash: None,
            xfer: None,
            abort: false,
            op_action: None,
            spaces,
            irqs: Default::default(),
            alert: IrqLine::new(),
            timer,
        }
    }

    fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Moves the engine to `state`, keeping STATUS.BUSY in step.
    fn set_state(&mut self, state: DmaState) {
        log::trace!("dma: {:?} -> {state:?}", self.state);
        self.state = state;
        if state.is_busy() {
            self.status.reg.modify(Status::BUSY::SET);
        } else {
            self.status.reg.modify(Status::BUSY::CLEAR);
        }
    }

    fn update_irqs(&self) {
        let level = self.intr_state & self.intr_enable;
        for (n, irq) in self.irqs.iter().enumerate() {
            irq.set_bool(level & (1 << n) != 0);
        }
    }

    fn space(&self, asid: Asid) -> AddressSpace {
        match asid {
            Asid::Ot => self.spaces.ot.clone(),
            Asid::Ctn => self.spaces.ctn.clone(),
            Asid::Sys => self.spaces.sys.clone(),
        }
    }

    fn sha_mode(&self) -> Result<Option<ShaMode>, ()> {
        match self.control.reg.read_as_enum(Control::OPCODE) {
            Some(Control::OPCODE::Value::COPY) => Ok(None),
            Some(Control::OPCODE::Value::COPY_SHA256) => Ok(Some(ShaMode::Sha256)),
            Some(Control::OPCODE::Value::COPY_SHA384) => Ok(Some(ShaMode::Sha384)),
            Some(Control::OPCODE::Value::COPY_SHA512) => Ok(Some(ShaMode::Sha512)),
            None => Err(()),
        }
    }

    /// Validates the programmed transfer. Every failed check contributes
    /// its bit to the returned error code.
    fn validate(&self) -> Result<Transfer, u32> {
        let mut err = LocalRegisterCopy::<u32, ErrorCode::Register>::new(0);
        let mut fail = |field: FieldValue<u32, ErrorCode::Register>| err.modify(field);

        let width = match self.transfer_width {
            0 => 1,
            1 => 2,
            2 => 4,
            w => {
                log::warn!("dma: invalid transfer width {w}");
                fail(ErrorCode::SIZE::SET);
                4
            }
        };
        let sha_mode = self.sha_mode();
        if sha_mode.is_err() {
            log::warn!("dma: invalid opcode");
            fail(ErrorCode::OPCODE::SET);
        }
        if self.control.reg.is_set(Control::HW_HANDSHAKE_EN) {
            log::info!("dma: hardware handshake unimplemented");
            fail(ErrorCode::OPCODE::SET);
        }
        let size = self.total_data_size as usize;
        if size == 0 || self.total_data_size != self.chunk_data_size || size % width != 0 {
            log::warn!(
                "dma: unsupported size total {:#x} chunk {:#x}",
                self.total_data_size,
                self.chunk_data_size
            );
            fail(ErrorCode::SIZE::SET);
        }
        if self.range_valid & 1 == 0 {
            log::warn!("dma: memory range not validated");
            fail(ErrorCode::RANGE_VALID::SET);
        }

        let src_asid = Asid::decode(self.addr_space_id & 0xf);
        let dst_asid = Asid::decode((self.addr_space_id >> 4) & 0xf);
        if src_asid.is_none() || dst_asid.is_none() {
            log::warn!("dma: invalid ASID {:#x}", self.addr_space_id);
            fail(ErrorCode::ASID::SET);
        }
        if src_asid == Some(Asid::Sys) && dst_asid == Some(Asid::Sys) {
            log::warn!("dma: system to system transfers are not supported");
            fail(ErrorCode::ASID::SET);
        }

        let src_addr = (self.src_addr[1] as u64) << 32 | self.src_addr[0] as u64;
        let dst_addr = (self.dst_addr[1] as u64) << 32 | self.dst_addr[0] as u64;
        let mut resolve = |asid: Option<Asid>, addr: u64, field| {
            let asid = asid?;
            let space = self.space(asid);
            let section = space.find_region(addr, size.max(1) as u64);
            let valid = match &section {
                Some(s) => {
                    addr % width as u64 == 0 && s.region.supports(RvSize::from(width))
                }
                None => false,
            };
            if !valid {
                log::warn!("dma: no region covering {addr:#x}+{size:#x} in {}", space.name());
                fail(field);
                return None;
            }
            section.map(|section| Endpoint {
                space,
                addr,
                section,
            })
        };
        let src = resolve(src_asid, src_addr, ErrorCode::SRC_ADDRESS::SET);
        let dst = resolve(dst_asid, dst_addr, ErrorCode::DEST_ADDRESS::SET);

        if let (Some(src), Some(dst)) = (&src, &dst) {
            if src.is_device() && dst.is_device() {
                log::warn!("dma: device to device transfers are not supported");
                fail(ErrorCode::DEST_ADDRESS::SET);
            }
        }

        // the OpenTitan side of a transfer leaving or entering it must lie
        // in the enabled range
        let ot_side = match (src_asid, dst_asid) {
            (Some(Asid::Ot), Some(d)) if d != Asid::Ot => src.as_ref().map(|e| e.addr),
            (Some(s), Some(Asid::Ot)) if s != Asid::Ot => dst.as_ref().map(|e| e.addr),
            _ => None,
        };
        if let Some(addr) = ot_side {
            let (base, limit) = (self.range_base as u64, self.range_limit as u64);
            let in_range = match addr.checked_add(size as u64) {
                Some(end) => addr >= base && end <= limit + 1,
                None => false,
            };
            if !in_range {
                log::warn!(
                    "dma: {addr:#x}+{size:#x} outside range {:#x}..={:#x}",
                    self.range_base,
                    self.range_limit
                );
                fail(ErrorCode::BASE_LIMIT::SET);
            }
        }

        if let Ok(Some(mode)) = sha_mode {
            if !self.control.reg.is_set(Control::INITIAL_TRANSFER) {
                match &self.hash {
                    Some(h) if h.mode() == mode => {}
                    _ => {
                        log::warn!("dma: SHA mode {mode:?} not initialized");
                        fail(ErrorCode::OPCODE::SET);
                    }
                }
            }
        }

        match (err.get(), src, dst) {
            (0, Some(src), Some(dst)) => Ok(Transfer {
                src,
                dst,
                width,
                size,
                done: 0,
            }),
            (code, ..) => Err(code),
        }
    }

    fn fail(&mut self, code: u32) {
        self.xfer = None;
        self.error_code.reg.set(self.error_code.reg.get() | code);
        self.status.reg.modify(Status::ERROR::SET);
        self.set_state(DmaState::Error);
        self.intr_state |= INTR_DMA_ERROR;
        self.update_irqs();
    }

    fn go(&mut self) {
        self.set_state(DmaState::AddrSetup);
        match self.validate() {
            Ok(xfer) => {
                if let Ok(Some(mode)) = self.sha_mode() {
                    if self.control.reg.is_set(Control::INITIAL_TRANSFER) {
                        self.hash = Some(HashCtx::new(mode));
                        self.status.reg.modify(Status::SHA2_DIGEST_VALID::CLEAR);
                    }
                }
                log::debug!(
                    "dma: {:#x} bytes {:#x} -> {:#x}",
                    xfer.size,
                    xfer.src.addr,
                    xfer.dst.addr
                );
                self.xfer = Some(xfer);
                self.abort = false;
                self.set_state(DmaState::SendRead);
                self.timer.cancel_opt(&mut self.op_action);
                self.op_action = Some(self.timer.schedule_bh());
            }
            Err(code) => self.fail(code),
        }
    }

    fn block(&mut self) {
        if self.abort {
            self.abort = false;
            self.xfer = None;
            self.status.reg.modify(Status::ABORTED::SET);
            self.set_state(DmaState::Idle);
            self.intr_state |= INTR_DMA_ERROR;
            self.update_irqs();
            log::debug!("dma: transfer aborted");
            return;
        }
        if self.state != DmaState::SendRead {
            return;
        }
        let Some(mut xfer) = self.xfer.take() else {
            return;
        };
        let attrs = MemTxAttrs::with_role(self.args.role);
        let len = (xfer.size - xfer.done).min(BLOCK_SIZE);
        let mut buf = vec![0u8; len];
        self.set_state(DmaState::WaitReadResp);
        if xfer.src.rw(xfer.done, &mut buf, xfer.width, attrs, false).is_err() {
            log::warn!("dma: read error at offset {:#x}", xfer.done);
            self.fail(ERROR_CODE_BUS);
            return;
        }
        self.set_state(DmaState::SendWrite);
        self.set_state(DmaState::WaitWriteResp);
        if xfer.dst.rw(xfer.done, &mut buf, xfer.width, attrs, true).is_err() {
            log::warn!("dma: write error at offset {:#x}", xfer.done);
            self.fail(ERROR_CODE_BUS);
            return;
        }
        let hashing = matches!(self.sha_mode(), Ok(Some(_)));
        if let (true, Some(hash)) = (hashing, self.hash.as_mut()) {
            hash.update(&buf);
        }
        xfer.done += len;
        if xfer.done < xfer.size {
            self.xfer = Some(xfer);
            self.set_state(DmaState::SendRead);
            self.op_action = Some(self.timer.schedule_poll_in(self.args.block_ns));
            return;
        }
        if hashing {
            self.set_state(DmaState::ShaFinalize);
            let digest = self.hash.as_ref().map(HashCtx::snapshot);
            self.set_state(DmaState::ShaWait);
            if let Some(digest) = digest {
                self.sha2_digest = [0; DIGEST_WORDS];
                for (reg, word) in self.sha2_digest.iter_mut().zip(digest.chunks(4)) {
                    *reg = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
                }
                self.status.reg.modify(Status::SHA2_DIGEST_VALID::SET);
            }
        }
        self.status.reg.modify(Status::DONE::SET);
        self.set_state(DmaState::Idle);
        self.intr_state |= INTR_DMA_DONE;
        self.update_irqs();
    }

    fn cfg_locked(&self, addr: RvAddr) -> bool {
        if self.is_busy() {
            log::warn!("dma: register {addr:#x} is locked while busy");
            return true;
        }
        false
    }

    fn range_locked(&self, addr: RvAddr) -> bool {
        if !mubi4_test_true_strict(self.range_regwen) {
            log::warn!("dma: range register {addr:#x} is locked");
            return true;
        }
        self.cfg_locked(addr)
    }

    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        let val = match addr {
            REG_INTR_STATE => self.intr_state,
            REG_INTR_ENABLE => self.intr_enable,
            REG_INTR_TEST | REG_ALERT_TEST => 0,
            REG_SRC_ADDR_LO => self.src_addr[0],
            REG_SRC_ADDR_HI => self.src_addr[1],
            REG_DST_ADDR_LO => self.dst_addr[0],
            REG_DST_ADDR_HI => self.dst_addr[1],
            REG_ADDR_SPACE_ID => self.addr_space_id,
            REG_RANGE_BASE => self.range_base,
            REG_RANGE_LIMIT => self.range_limit,
            REG_RANGE_VALID => self.range_valid,
            REG_RANGE_REGWEN => self.range_regwen,
            REG_CFG_REGWEN => {
                if self.is_busy() {
                    MB4_FALSE
                } else {
                    MB4_TRUE
                }
            }
            REG_TOTAL_DATA_SIZE => self.total_data_size,
            REG_CHUNK_DATA_SIZE => self.chunk_data_size,
            REG_TRANSFER_WIDTH => self.transfer_width,
            REG_CONTROL => self.control.read(size)?,
            REG_SRC_CONFIG => self.src_config,
            REG_DST_CONFIG => self.dst_config,
            REG_STATUS => self.status.read(size)?,
            REG_ERROR_CODE => self.error_code.read(size)?,
            REG_SHA2_DIGEST_0..=REG_SHA2_DIGEST_15 if addr & 3 == 0 => {
                self.sha2_digest[((addr - REG_SHA2_DIGEST_0) / 4) as usize]
            }
            REG_HANDSHAKE_INTR_ENABLE => self.handshake_intr_enable,
            REG_CLEAR_INTR_SRC => self.clear_intr_src,
            REG_CLEAR_INTR_BUS => self.clear_intr_bus,
            _ => {
                log::warn!("dma: invalid read at {addr:#x}");
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
                self.intr_state = w1c(self.intr_state, val & INTR_MASK);
                self.update_irqs();
            }
            REG_INTR_ENABLE => {
                self.intr_enable = val & INTR_MASK;
                self.update_irqs();
            }
            REG_INTR_TEST => {
                self.intr_state |= val & INTR_MASK;
                self.update_irqs();
            }
            REG_ALERT_TEST => {
                if val & 1 != 0 {
                    self.alert.raise();
                    self.alert.lower();
                }
            }
            REG_RANGE_BASE if !self.range_locked(addr) => self.range_base = val,
            REG_RANGE_LIMIT if !self.range_locked(addr) => self.range_limit = val,
            REG_RANGE_VALID if !self.range_locked(addr) => self.range_valid = val & 1,
            REG_RANGE_REGWEN => self.range_regwen &= val & 0xf,
            REG_RANGE_BASE | REG_RANGE_LIMIT | REG_RANGE_VALID => {}
            REG_CFG_REGWEN => log::warn!("dma: CFG_REGWEN is read-only"),
            REG_CONTROL => self.write_control(val),
            REG_STATUS => {
                let cleared = val & STATUS_W1C_MASK;
                self.status.reg.set(w1c(self.status.reg.get(), cleared));
                if cleared & STATUS_ERROR != 0 {
                    self.error_code.reg.set(0);
                    if self.state == DmaState::Error {
                        self.set_state(DmaState::Idle);
                    }
                }
            }
            REG_ERROR_CODE | REG_SHA2_DIGEST_0..=REG_SHA2_DIGEST_15 => {
                log::warn!("dma: register {addr:#x} is read-only");
            }
            _ if self.cfg_locked(addr) => {}
            REG_SRC_ADDR_LO => self.src_addr[0] = val,
            REG_SRC_ADDR_HI => self.src_addr[1] = val,
            REG_DST_ADDR_LO => self.dst_addr[0] = val,
            REG_DST_ADDR_HI => self.dst_addr[1] = val,
            REG_ADDR_SPACE_ID => self.addr_space_id = val & 0xff,
            REG_TOTAL_DATA_SIZE => self.total_data_size = val,
            REG_CHUNK_DATA_SIZE => self.chunk_data_size = val,
            REG_TRANSFER_WIDTH => self.transfer_width = val & 0x3,
            REG_SRC_CONFIG => self.src_config = val & 0x3,
            REG_DST_CONFIG => self.dst_config = val & 0x3,
            REG_HANDSHAKE_INTR_ENABLE => self.handshake_intr_enable = val,
            REG_CLEAR_INTR_SRC => self.clear_intr_src = val,
            REG_CLEAR_INTR_BUS => self.clear_intr_bus = val,
            _ => {
                log::warn!("dma: invalid write at {addr:#x}");
                Err(BusError::StoreAccessFault)?
            }
        }
        Ok(())
    }

    fn write_control(&mut self, val: u32) {
        let ctrl = ReadWriteRegister::<Control::Register>::new(val);
        if self.is_busy() {
            if ctrl.reg.is_set(Control::ABORT) {
                self.abort = true;
                self.timer.cancel_opt(&mut self.op_action);
                self.op_action = Some(self.timer.schedule_bh());
            } else {
                log::warn!("dma: CONTROL written while busy");
            }
            return;
        }
        // GO and ABORT are not retained
        self.control.reg.set(val & !(CONTROL_GO | CONTROL_ABORT));
        if ctrl.reg.is_set(Control::GO) {
            self.status
                .reg
                .modify(Status::DONE::CLEAR + Status::ABORTED::CLEAR + Status::ERROR::CLEAR);
            self.error_code.reg.set(0);
            self.go();
        }
    }

    fn poll(&mut self) {
        if self.timer.fired(&mut self.op_action) {
            self.block();
        }
    }

    fn reset(&mut self) {
        self.timer.cancel_opt(&mut self.op_action);
        let irqs = std::mem::take(&mut self.irqs);
        let alert = self.alert.clone();
        *self = Self {
            irqs,
            alert,
            ..Self::from_timer(self.timer.clone(), self.args.clone(), self.spaces.clone())
        };
        self.update_irqs();
    }
}

/// DMA controller peripheral
#[derive(Clone)]
pub struct Dma {
    regs: Rc<RefCell<DmaRegs>>,
}

impl Dma {
    pub fn new(clock: &Clock, args: DmaArgs, spaces: DmaSpaces) -> Self {
        Self {
            regs: Rc::new(RefCell::new(DmaRegs::from_timer(
                Timer::new(clock),
                args,
                spaces,
            ))),
        }
    }

    pub fn mmap_size(&self) -> RvAddr {
        MMAP_SIZE
    }

    /// `DMA_DONE` (0), `DMA_CHUNK_DONE` (1) and `DMA_ERROR` (2) interrupts.
    pub fn irq(&self, n: usize) -> IrqLine {
        self.regs.borrow().irqs[n].clone()
    }

    pub fn alert(&self) -> IrqLine {
        self.regs.borrow().alert.clone()
    }

    pub fn state(&self) -> DmaState {
        self.regs.borrow().state
    }
}

impl Bus for Dma {
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
