/*++

Licensed under the Apache-2.0 license.

File Name:

    spi_device.rs

Abstract:

    File contains the SPI device in flash emulation mode: the chip-select
    framed byte stream, hardware handled read commands served from the
    internal buffer, and the upload FIFOs for firmware handled commands.

--*/

mod cmd_info;
mod framing;

pub use cmd_info::{CmdInfo, CmdKind, SLOT_COUNT};
pub use framing::{encode_header, CsWord, HEADER_SIZE};

use crate::mubi::w1c;
use cmd_info::{default_slots, default_special_slots, SPECIAL_MASK};
use framing::HeaderParser;
use ot_emu_bus::{ActionHandle, Bus, BusError, CharBackend, CharFrontend, Clock, IrqLine, Timer};
use ot_emu_types::{RvAddr, RvData, RvSize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

const REG_INTR_STATE: RvAddr = 0x00;
const REG_INTR_ENABLE: RvAddr = 0x04;
const REG_INTR_TEST: RvAddr = 0x08;
const REG_ALERT_TEST: RvAddr = 0x0c;
const REG_CONTROL: RvAddr = 0x10;
const REG_CFG: RvAddr = 0x14;
const REG_STATUS: RvAddr = 0x20;
const REG_LAST_READ_ADDR: RvAddr = 0x38;
const REG_FLASH_STATUS: RvAddr = 0x3c;
const REG_JEDEC_CC: RvAddr = 0x40;
const REG_JEDEC_ID: RvAddr = 0x44;
const REG_READ_THRESHOLD: RvAddr = 0x48;
const REG_MAILBOX_ADDR: RvAddr = 0x4c;
const REG_UPLOAD_STATUS: RvAddr = 0x50;
const REG_UPLOAD_STATUS2: RvAddr = 0x54;
const REG_UPLOAD_CMDFIFO: RvAddr = 0x58;
const REG_UPLOAD_ADDRFIFO: RvAddr = 0x5c;
const REG_CMD_FILTER_0: RvAddr = 0x60;
const REG_CMD_FILTER_7: RvAddr = 0x7c;
const REG_ADDR_SWAP_MASK: RvAddr = 0x80;
const REG_PAYLOAD_SWAP_DATA: RvAddr = 0x8c;
const REG_CMD_INFO_0: RvAddr = 0x90;
const REG_CMD_INFO_23: RvAddr = 0xec;
const REG_CMD_INFO_EN4B: RvAddr = 0xf0;
const REG_CMD_INFO_WRDI: RvAddr = 0xfc;
const BUF_WINDOW: RvAddr = 0x1000;
const MMAP_SIZE: RvAddr = 0x2000;

pub const BUF_READ0: usize = 0x000;
pub const BUF_READ1: usize = 0x400;
pub const BUF_MAILBOX: usize = 0x800;
pub const BUF_SFDP: usize = 0xc00;
pub const BUF_PAYLOAD: usize = 0xd00;
pub const BUF_CMD_FIFO: usize = 0xe00;
pub const BUF_ADDR_FIFO: usize = 0xe40;
const BUF_SIZE: usize = 0x1000;

const READ_BUF_SIZE: u32 = 0x800;
const READ_PAGE_SIZE: u32 = 0x400;
const MAILBOX_SIZE: u32 = 0x400;
const SFDP_SIZE: u32 = 0x100;
const PAYLOAD_SIZE: usize = 0x100;
const FIFO_DEPTH: usize = 16;

pub const INTR_UPLOAD_CMDFIFO_NOT_EMPTY: u32 = 1 << 0;
pub const INTR_UPLOAD_PAYLOAD_NOT_EMPTY: u32 = 1 << 1;
pub const INTR_UPLOAD_PAYLOAD_OVERFLOW: u32 = 1 << 2;
pub const INTR_READBUF_WATERMARK: u32 = 1 << 3;
pub const INTR_READBUF_FLIP: u32 = 1 << 4;
const INTR_MASK: u32 = 0x1f;
const INTR_PACING: u32 = INTR_READBUF_WATERMARK | INTR_READBUF_FLIP;

const CONTROL_MODE_SHIFT: u32 = 4;
const CONTROL_MODE_MASK: u32 = 0x3 << CONTROL_MODE_SHIFT;
pub const MODE_GENERIC: u32 = 0;
pub const MODE_FLASH: u32 = 1;
pub const MODE_PASSTHROUGH: u32 = 2;

const CFG_MODE_MASK: u32 = 0xf;
pub const CFG_ADDR_4B_EN: u32 = 1 << 16;
pub const CFG_MAILBOX_EN: u32 = 1 << 24;
const CFG_MASK: u32 = CFG_MODE_MASK | CFG_ADDR_4B_EN | CFG_MAILBOX_EN;

const STATUS_CSB: u32 = 1 << 5;
const STATUS_TPM_CSB: u32 = 1 << 6;

pub const FLASH_STATUS_BUSY: u32 = 1 << 0;
pub const FLASH_STATUS_WEL: u32 = 1 << 1;
const FLASH_STATUS_MASK: u32 = 0x00ff_ffff;

/// Device configuration.
#[derive(Debug, Clone)]
pub struct SpiDeviceArgs {
    /// Reset value of JEDEC_CC
    pub jedec_cc: u32,
    /// Reset value of JEDEC_ID
    pub jedec_id: u32,
    /// How long the bus is held after a read buffer event
    pub pacing_ns: u64,
}

impl Default for SpiDeviceArgs {
    fn default() -> Self {
        Self {
            jedec_cc: 0x7f,
            jedec_id: 0,
            pacing_ns: 100_000_000,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum BusState {
    Idle,
    Generic,
    Flash,
    Discard,
    Error,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum FlashState {
    Idle,
    Collect,
    Buffer,
    Read,
    UpAddr,
    UpDummy,
    UpPayload,
    Done,
    Error,
}

#[derive(Debug, Copy, Clone)]
struct Command {
    kind: CmdKind,
    info: CmdInfo,
}

pub struct SpiDeviceRegs {
    args: SpiDeviceArgs,

    intr_state: u32,
    intr_enable: u32,
    control: u32,
    cfg: u32,
    last_read_addr: u32,
    flash_status: u32,
    jedec_cc: u32,
    jedec_id: u32,
    read_threshold: u32,
    mailbox_addr: u32,
    cmd_filter: [u32; 8],
    swap: [u32; 4],
    cmd_info: [u32; SLOT_COUNT],
    cmd_info_special: [u32; 4],
    buffer: Vec<u8>,

    // framing
    header: HeaderParser,
    remaining: u16,
    release: bool,
    invert: bool,
    cs_active: bool,

    // engine
    bus: BusState,
    flash: FlashState,
    cmd: Option<Command>,
    hdr_len: usize,
    addr_len: usize,
    hdr_pos: usize,
    addr: u32,
    src: Vec<u8>,
    src_pos: usize,
    src_wrap: bool,
    last_read: Option<u32>,
    watermark_armed: bool,

    // upload
    cmd_fifo: VecDeque<u8>,
    addr_fifo: VecDeque<u32>,
    cmd_wr: usize,
    addr_wr: usize,
    uploaded: bool,
    payload_pos: usize,
    payload_overflow: bool,
    payload_depth: u32,
    payload_start: u32,

    pacing: bool,
    pace_action: Option<ActionHandle>,

    miso: Box<dyn CharBackend>,
    irqs: [IrqLine; 5],
    alert: IrqLine,
    timer: Timer,
}

impl SpiDeviceRegs {
    fn from_timer(timer: Timer, args: SpiDeviceArgs, miso: Box<dyn CharBackend>) -> Self {
        Self {
            intr_state: 0,
            intr_enable: 0,
            control: 0,
            cfg: 0,
            last_read_addr: 0,
            flash_status: 0,
            jedec_cc: args.jedec_cc & 0xffff,
            jedec_id: args.jedec_id & 0x00ff_ffff,
            read_threshold: 0,
            mailbox_addr: 0,
            cmd_filter: [0; 8],
            swap: [0; 4],
            cmd_info: default_slots(),
            cmd_info_special: default_special_slots(),
            buffer: vec![0; BUF_SIZE],
            header: HeaderParser::default(),
            remaining: 0,
            release: false,
            invert: false,
            cs_active: false,
            bus: BusState::Idle,
            flash: FlashState::Idle,
            cmd: None,
            hdr_len: 0,
            addr_len: 0,
            hdr_pos: 0,
            addr: 0,
            src: vec![],
            src_pos: 0,
            src_wrap: false,
            last_read: None,
            watermark_armed: false,
            cmd_fifo: VecDeque::new(),
            addr_fifo: VecDeque::new(),
            cmd_wr: 0,
            addr_wr: 0,
            uploaded: false,
            payload_pos: 0,
            payload_overflow: false,
            payload_depth: 0,
            payload_start: 0,
            pacing: false,
            pace_action: None,
            args,
            miso,
            irqs: Default::default(),
            alert: IrqLine::new(),
            timer,
        }
    }

    fn mode(&self) -> u32 {
        (self.control & CONTROL_MODE_MASK) >> CONTROL_MODE_SHIFT
    }

    fn addr_4b(&self) -> bool {
        self.cfg & CFG_ADDR_4B_EN != 0
    }

    fn update_irqs(&self) {
        let level = self.intr_state & self.intr_enable;
        for (n, irq) in self.irqs.iter().enumerate() {
            irq.set_bool(level & (1 << n) != 0);
        }
    }

    fn raise_intr(&mut self, intr: u32) {
        self.intr_state |= intr;
        self.update_irqs();
        if intr & INTR_PACING != 0 {
            self.start_pacing();
        }
    }

    fn start_pacing(&mut self) {
        log::debug!("spi_device: pacing bus");
        self.pacing = true;
        self.timer.cancel_opt(&mut self.pace_action);
        self.pace_action = Some(self.timer.schedule_poll_in(self.args.pacing_ns));
    }

    fn stop_pacing(&mut self) {
        self.pacing = false;
        self.timer.cancel_opt(&mut self.pace_action);
    }

    fn can_receive(&self) -> usize {
        if self.pacing {
            0
        } else if self.remaining == 0 {
            self.header.missing()
        } else {
            1
        }
    }

    fn receive(&mut self, buf: &[u8]) {
        for &byte in buf {
            if self.remaining == 0 {
                match self.header.push(byte) {
                    Ok(Some(word)) => self.start_frame(word),
                    Ok(None) => {}
                    Err(err) => {
                        log::error!("spi_device: invalid header {err:?}");
                        self.bus = BusState::Error;
                    }
                }
            } else {
                self.payload_byte(byte);
            }
        }
    }

    fn start_frame(&mut self, word: CsWord) {
        log::trace!("spi_device: frame {word:?}");
        let cfg_mode = (self.cfg & CFG_MODE_MASK) as u8;
        self.invert = word.mode() != cfg_mode;
        if self.invert {
            log::warn!(
                "spi_device: host mode {:#x} differs from CFG {cfg_mode:#x}",
                word.mode()
            );
        }
        if !self.cs_active {
            self.bus = BusState::Idle;
            self.cs_active = true;
        }
        self.remaining = word.byte_count();
        self.release = word.release();
        if self.remaining == 0 && self.release {
            self.cs_release();
        }
    }

    fn payload_byte(&mut self, byte: u8) {
        let mask = if self.invert { 0xff } else { 0 };
        let tx = self.transfer(byte ^ mask) ^ mask;
        self.miso.write_all(&[tx]);
        self.remaining -= 1;
        if self.remaining == 0 && self.release {
            self.cs_release();
        }
    }

    fn transfer(&mut self, rx: u8) -> u8 {
        match self.bus {
            BusState::Idle => match self.mode() {
                MODE_FLASH => {
                    self.bus = BusState::Flash;
                    self.flash_command(rx)
                }
                MODE_GENERIC => {
                    log::info!("spi_device: generic mode unimplemented");
                    self.bus = BusState::Generic;
                    0xff
                }
                mode => {
                    log::info!("spi_device: mode {mode} unimplemented");
                    self.bus = BusState::Discard;
                    0xff
                }
            },
            BusState::Flash => self.flash_byte(rx),
            BusState::Generic | BusState::Discard | BusState::Error => 0xff,
        }
    }

    fn decode(&self, opcode: u8) -> Option<Command> {
        let slot = self.cmd_info.iter().position(|&info| {
            let info = CmdInfo(info);
            info.valid() && info.opcode() == opcode
        });
        if let Some(slot) = slot {
            return Some(Command {
                kind: CmdKind::for_slot(slot),
                info: CmdInfo(self.cmd_info[slot]),
            });
        }
        let special = [CmdKind::En4b, CmdKind::Ex4b, CmdKind::Wren, CmdKind::Wrdi];
        self.cmd_info_special
            .iter()
            .zip(special)
            .find(|&(&info, _)| {
                let info = CmdInfo(info);
                info.valid() && info.opcode() == opcode
            })
            .map(|(&info, kind)| Command {
                kind,
                info: CmdInfo(info),
            })
    }

    fn flash_command(&mut self, opcode: u8) -> u8 {
        let Some(cmd) = self.decode(opcode) else {
            log::warn!("spi_device: unknown command {opcode:#04x}");
            self.bus = BusState::Discard;
            return 0xff;
        };
        log::debug!("spi_device: command {opcode:#04x} {:?}", cmd.kind);
        self.cmd = Some(cmd);
        self.flash = FlashState::Done;
        match cmd.kind {
            CmdKind::ReadStatus(n) => {
                self.src = vec![(self.flash_status >> (8 * n)) as u8];
                self.src_pos = 0;
                self.src_wrap = true;
                self.flash = FlashState::Buffer;
            }
            CmdKind::ReadJedec => {
                let num_cc = ((self.jedec_cc >> 8) & 0xff) as usize;
                let mut src = vec![self.jedec_cc as u8; num_cc];
                src.extend_from_slice(&self.jedec_id.to_be_bytes()[1..]);
                self.src = src;
                self.src_pos = 0;
                self.src_wrap = false;
                self.flash = FlashState::Buffer;
            }
            CmdKind::ReadSfdp | CmdKind::ReadData => {
                self.addr_len = match cmd.kind {
                    CmdKind::ReadSfdp => 3,
                    _ => cmd.info.addr_bytes(self.addr_4b()),
                };
                if self.addr_len == 0 {
                    log::warn!("spi_device: read command {opcode:#04x} without address");
                    self.flash = FlashState::Error;
                    return 0xff;
                }
                self.hdr_len =
                    self.addr_len + cmd.info.mbyte_en() as usize + cmd.info.dummy_en() as usize;
                self.hdr_pos = 0;
                self.addr = 0;
                self.watermark_armed = true;
                self.flash = if self.hdr_len == 0 {
                    FlashState::Read
                } else {
                    FlashState::Collect
                };
            }
            CmdKind::Upload => self.upload_command(opcode, cmd.info),
            CmdKind::En4b => self.cfg |= CFG_ADDR_4B_EN,
            CmdKind::Ex4b => self.cfg &= !CFG_ADDR_4B_EN,
            CmdKind::Wren => self.flash_status |= FLASH_STATUS_WEL,
            CmdKind::Wrdi => self.flash_status &= !FLASH_STATUS_WEL,
        }
        0xff
    }

    fn flash_byte(&mut self, rx: u8) -> u8 {
        match self.flash {
            FlashState::Collect => {
                self.hdr_pos += 1;
                if self.hdr_pos <= self.addr_len {
                    self.addr = (self.addr << 8) | rx as u32;
                }
                if self.hdr_pos < self.hdr_len {
                    return 0xff;
                }
                // the last header byte already carries the first data byte
                self.flash = FlashState::Read;
                self.read_byte()
            }
            FlashState::Buffer => {
                if self.src_pos >= self.src.len() {
                    if !self.src_wrap || self.src.is_empty() {
                        return 0xff;
                    }
                    self.src_pos = 0;
                }
                let byte = self.src[self.src_pos];
                self.src_pos += 1;
                byte
            }
            FlashState::Read => self.read_byte(),
            FlashState::UpAddr => {
                self.hdr_pos += 1;
                self.addr = (self.addr << 8) | rx as u32;
                if self.hdr_pos == self.addr_len {
                    self.push_addr(self.addr);
                    if let Some(cmd) = self.cmd {
                        self.flash = Self::after_upload_addr(cmd.info);
                    }
                }
                0xff
            }
            FlashState::UpDummy => {
                self.flash = match self.cmd {
                    Some(cmd) if Self::has_payload(cmd.info) => FlashState::UpPayload,
                    _ => FlashState::Done,
                };
                0xff
            }
            FlashState::UpPayload => {
                self.buffer[BUF_PAYLOAD + self.payload_pos % PAYLOAD_SIZE] = rx;
                self.payload_pos += 1;
                if self.payload_pos > PAYLOAD_SIZE && !self.payload_overflow {
                    log::warn!("spi_device: payload overflow");
                    self.payload_overflow = true;
                }
                0xff
            }
            FlashState::Done => {
                log::warn!("spi_device: byte past the end of the command");
                self.flash = FlashState::Error;
                0xff
            }
            FlashState::Idle | FlashState::Error => 0xff,
        }
    }

    fn mailbox_hit(&self, addr: u32) -> bool {
        let upper = !(MAILBOX_SIZE - 1);
        self.cfg & CFG_MAILBOX_EN != 0 && addr & upper == self.mailbox_addr & upper
    }

    fn read_byte(&mut self) -> u8 {
        let addr = self.addr;
        self.addr = addr.wrapping_add(1);
        if let Some(Command {
            kind: CmdKind::ReadSfdp,
            ..
        }) = self.cmd
        {
            return self.buffer[BUF_SFDP + (addr % SFDP_SIZE) as usize];
        }
        let byte = if self.mailbox_hit(addr) {
            self.buffer[BUF_MAILBOX + (addr % MAILBOX_SIZE) as usize]
        } else {
            self.last_read = Some(addr);
            self.buffer[BUF_READ0 + (addr % READ_BUF_SIZE) as usize]
        };
        self.read_events(addr);
        byte
    }

    fn read_events(&mut self, addr: u32) {
        let threshold = self.read_threshold;
        if threshold != 0 && self.watermark_armed && addr % READ_PAGE_SIZE >= threshold {
            self.watermark_armed = false;
            log::debug!("spi_device: watermark at {addr:#x}");
            self.raise_intr(INTR_READBUF_WATERMARK);
        }
        if self.addr % READ_PAGE_SIZE == 0 {
            self.watermark_armed = true;
            log::debug!("spi_device: read buffer flip at {:#x}", self.addr);
            self.raise_intr(INTR_READBUF_FLIP);
        }
    }

    fn has_payload(info: CmdInfo) -> bool {
        info.payload_en() != 0 && !info.payload_dir()
    }

    fn after_upload_addr(info: CmdInfo) -> FlashState {
        if info.dummy_en() {
            FlashState::UpDummy
        } else if Self::has_payload(info) {
            FlashState::UpPayload
        } else {
            FlashState::Done
        }
    }

    fn upload_command(&mut self, opcode: u8, info: CmdInfo) {
        if !info.upload() {
            log::info!("spi_device: command {opcode:#04x} without upload unimplemented");
            return;
        }
        if self.cmd_fifo.len() >= FIFO_DEPTH {
            log::warn!("spi_device: command FIFO full, {opcode:#04x} dropped");
        } else {
            self.cmd_fifo.push_back(opcode);
            let off = BUF_CMD_FIFO + 4 * (self.cmd_wr % FIFO_DEPTH);
            self.buffer[off..off + 4].copy_from_slice(&(opcode as u32).to_le_bytes());
            self.cmd_wr += 1;
        }
        if info.busy() {
            self.flash_status |= FLASH_STATUS_BUSY;
        }
        self.uploaded = true;
        self.payload_pos = 0;
        self.payload_overflow = false;
        self.addr_len = info.addr_bytes(self.addr_4b());
        self.hdr_pos = 0;
        self.addr = 0;
        self.flash = if self.addr_len > 0 {
            FlashState::UpAddr
        } else {
            Self::after_upload_addr(info)
        };
    }

    fn push_addr(&mut self, addr: u32) {
        if self.addr_fifo.len() >= FIFO_DEPTH {
            log::warn!("spi_device: address FIFO full, {addr:#x} dropped");
            return;
        }
        self.addr_fifo.push_back(addr);
        let off = BUF_ADDR_FIFO + 4 * (self.addr_wr % FIFO_DEPTH);
        self.buffer[off..off + 4].copy_from_slice(&addr.to_le_bytes());
        self.addr_wr += 1;
    }

    fn cs_release(&mut self) {
        log::trace!("spi_device: /CS released");
        if let (Some(cmd), Some(addr)) = (self.cmd, self.last_read) {
            if cmd.kind == CmdKind::ReadData {
                self.last_read_addr = addr;
            }
        }
        if self.uploaded {
            let mut intr = 0;
            if !self.cmd_fifo.is_empty() {
                intr |= INTR_UPLOAD_CMDFIFO_NOT_EMPTY;
            }
            if self.payload_pos > 0 {
                intr |= INTR_UPLOAD_PAYLOAD_NOT_EMPTY;
            }
            if self.payload_overflow {
                intr |= INTR_UPLOAD_PAYLOAD_OVERFLOW;
            }
            self.payload_depth = self.payload_pos.min(PAYLOAD_SIZE) as u32;
            self.payload_start = if self.payload_overflow {
                (self.payload_pos % PAYLOAD_SIZE) as u32
            } else {
                0
            };
            if intr != 0 {
                self.raise_intr(intr);
            }
        }
        self.cs_active = false;
        self.bus = BusState::Idle;
        self.flash = FlashState::Idle;
        self.cmd = None;
        self.uploaded = false;
        self.last_read = None;
    }

    fn upload_status(&self) -> u32 {
        let cmd = self.cmd_fifo.len() as u32;
        let addr = self.addr_fifo.len() as u32;
        cmd | ((cmd != 0) as u32) << 7 | addr << 8 | ((addr != 0) as u32) << 15
    }

    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        let val = match addr {
            REG_INTR_STATE => self.intr_state,
            REG_INTR_ENABLE => self.intr_enable,
            REG_INTR_TEST | REG_ALERT_TEST => 0,
            REG_CONTROL => self.control,
            REG_CFG => self.cfg,
            REG_STATUS => {
                STATUS_TPM_CSB | if self.cs_active { 0 } else { STATUS_CSB }
            }
            REG_LAST_READ_ADDR => self.last_read_addr,
            REG_FLASH_STATUS => self.flash_status,
            REG_JEDEC_CC => self.jedec_cc,
            REG_JEDEC_ID => self.jedec_id,
            REG_READ_THRESHOLD => self.read_threshold,
            REG_MAILBOX_ADDR => self.mailbox_addr,
            REG_UPLOAD_STATUS => self.upload_status(),
            REG_UPLOAD_STATUS2 => self.payload_depth | self.payload_start << 16,
            REG_UPLOAD_CMDFIFO => match self.cmd_fifo.pop_front() {
                Some(op) => op as u32,
                None => {
                    log::warn!("spi_device: command FIFO empty");
                    0
                }
            },
            REG_UPLOAD_ADDRFIFO => match self.addr_fifo.pop_front() {
                Some(addr) => addr,
                None => {
                    log::warn!("spi_device: address FIFO empty");
                    0
                }
            },
            REG_CMD_FILTER_0..=REG_CMD_FILTER_7 if addr & 3 == 0 => {
                self.cmd_filter[((addr - REG_CMD_FILTER_0) / 4) as usize]
            }
            REG_ADDR_SWAP_MASK..=REG_PAYLOAD_SWAP_DATA if addr & 3 == 0 => {
                self.swap[((addr - REG_ADDR_SWAP_MASK) / 4) as usize]
            }
            REG_CMD_INFO_0..=REG_CMD_INFO_23 if addr & 3 == 0 => {
                self.cmd_info[((addr - REG_CMD_INFO_0) / 4) as usize]
            }
            REG_CMD_INFO_EN4B..=REG_CMD_INFO_WRDI if addr & 3 == 0 => {
                self.cmd_info_special[((addr - REG_CMD_INFO_EN4B) / 4) as usize]
            }
            BUF_WINDOW..=0x1ffc if addr & 3 == 0 => {
                let off = (addr - BUF_WINDOW) as usize;
                u32::from_le_bytes([
                    self.buffer[off],
                    self.buffer[off + 1],
                    self.buffer[off + 2],
                    self.buffer[off + 3],
                ])
            }
            _ => {
                log::warn!("spi_device: invalid read at {addr:#x}");
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
                if self.pacing && self.intr_state & INTR_PACING == 0 {
                    log::debug!("spi_device: pacing released by guest");
                    self.stop_pacing();
                }
            }
            REG_INTR_ENABLE => {
                self.intr_enable = val & INTR_MASK;
                self.update_irqs();
            }
            REG_INTR_TEST => self.raise_intr(val & INTR_MASK),
            REG_ALERT_TEST => {
                if val & 1 != 0 {
                    self.alert.raise();
                    self.alert.lower();
                }
            }
            REG_CONTROL => {
                if self.cs_active && (val ^ self.control) & CONTROL_MODE_MASK != 0 {
                    log::warn!("spi_device: mode changed during a transaction");
                }
                self.control = val & CONTROL_MODE_MASK;
            }
            REG_CFG => self.cfg = val & CFG_MASK,
            REG_FLASH_STATUS => {
                // firmware can only clear BUSY and WEL
                let sticky = FLASH_STATUS_BUSY | FLASH_STATUS_WEL;
                self.flash_status =
                    (val & FLASH_STATUS_MASK & !sticky) | (self.flash_status & val & sticky);
            }
            REG_JEDEC_CC => self.jedec_cc = val & 0xffff,
            REG_JEDEC_ID => self.jedec_id = val & 0x00ff_ffff,
            REG_READ_THRESHOLD => self.read_threshold = val & (READ_PAGE_SIZE - 1),
            REG_MAILBOX_ADDR => self.mailbox_addr = val & !(MAILBOX_SIZE - 1),
            REG_STATUS
            | REG_LAST_READ_ADDR
            | REG_UPLOAD_STATUS
            | REG_UPLOAD_STATUS2
            | REG_UPLOAD_CMDFIFO
            | REG_UPLOAD_ADDRFIFO => {
                log::warn!("spi_device: register {addr:#x} is read-only");
            }
            REG_CMD_FILTER_0..=REG_CMD_FILTER_7 if addr & 3 == 0 => {
                self.cmd_filter[((addr - REG_CMD_FILTER_0) / 4) as usize] = val;
            }
            REG_ADDR_SWAP_MASK..=REG_PAYLOAD_SWAP_DATA if addr & 3 == 0 => {
                self.swap[((addr - REG_ADDR_SWAP_MASK) / 4) as usize] = val;
            }
            REG_CMD_INFO_0..=REG_CMD_INFO_23 if addr & 3 == 0 => {
                self.cmd_info[((addr - REG_CMD_INFO_0) / 4) as usize] = val;
            }
            REG_CMD_INFO_EN4B..=REG_CMD_INFO_WRDI if addr & 3 == 0 => {
                self.cmd_info_special[((addr - REG_CMD_INFO_EN4B) / 4) as usize] =
                    val & SPECIAL_MASK;
            }
            BUF_WINDOW..=0x1ffc if addr & 3 == 0 => {
                let off = (addr - BUF_WINDOW) as usize;
                self.buffer[off..off + 4].copy_from_slice(&val.to_le_bytes());
            }
            _ => {
                log::warn!("spi_device: invalid write at {addr:#x}");
                Err(BusError::StoreAccessFault)?
            }
        }
        Ok(())
    }

    fn poll(&mut self) {
        if self.timer.fired(&mut self.pace_action) {
            log::debug!("spi_device: pacing timeout");
            self.pacing = false;
        }
    }

    fn reset(&mut self) {
        self.timer.cancel_opt(&mut self.pace_action);
        let buffer = std::mem::take(&mut self.buffer);
        let miso = std::mem::replace(&mut self.miso, Box::new(NullBackend));
        let irqs = std::mem::take(&mut self.irqs);
        let alert = self.alert.clone();
        *self = Self {
            buffer,
            irqs,
            alert,
            ..Self::from_timer(self.timer.clone(), self.args.clone(), miso)
        };
        self.update_irqs();
    }
}

struct NullBackend;

impl CharBackend for NullBackend {
    fn write_all(&mut self, _buf: &[u8]) {}
}

/// SPI device peripheral
#[derive(Clone)]
pub struct SpiDevice {
    regs: Rc<RefCell<SpiDeviceRegs>>,
}

impl SpiDevice {
    /// `miso` receives one response byte per payload byte.
    pub fn new(clock: &Clock, args: SpiDeviceArgs, miso: Box<dyn CharBackend>) -> Self {
        Self {
            regs: Rc::new(RefCell::new(SpiDeviceRegs::from_timer(
                Timer::new(clock),
                args,
                miso,
            ))),
        }
    }

    pub fn mmap_size(&self) -> RvAddr {
        MMAP_SIZE
    }

    pub fn irq(&self, n: usize) -> IrqLine {
        self.regs.borrow().irqs[n].clone()
    }

    pub fn alert(&self) -> IrqLine {
        self.regs.borrow().alert.clone()
    }

    /// Whether the bus is held after a read buffer event.
    pub fn is_pacing(&self) -> bool {
        self.regs.borrow().pacing
    }
}

impl Bus for SpiDevice {
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

impl CharFrontend for SpiDevice {
    fn can_receive(&self) -> usize {
        self.regs.borrow().can_receive()
    }

    fn receive(&mut self, buf: &[u8]) {
        self.regs.borrow_mut().receive(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_emu_bus::{pump, CharPipe};

    struct Fixture {
        clock: Clock,
        dev: SpiDevice,
        miso: CharPipe,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Clock::new();
            let miso = CharPipe::new();
            let dev = SpiDevice::new(&clock, SpiDeviceArgs::default(), Box::new(miso.clone()));
            let mut f = Self { clock, dev, miso };
            f.w(REG_CONTROL, MODE_FLASH << CONTROL_MODE_SHIFT);
            f.w(REG_INTR_ENABLE, INTR_MASK);
            f.fill_read_buffer();
            f
        }

        fn w(&mut self, addr: RvAddr, val: u32) {
            self.dev.write(RvSize::Word, addr, val).unwrap();
        }

        fn r(&mut self, addr: RvAddr) -> u32 {
            self.dev.read(RvSize::Word, addr).unwrap()
        }

        fn fill(&mut self, off: usize, bytes: &[u8]) {
            for (i, chunk) in bytes.chunks(4).enumerate() {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                self.w(BUF_WINDOW + (off + 4 * i) as u32, u32::from_le_bytes(word));
            }
        }

        fn fill_read_buffer(&mut self) {
            let data: Vec<u8> = (0..READ_BUF_SIZE as usize)
                .map(|i| pattern(i as u32))
                .collect();
            self.fill(BUF_READ0, &data);
        }

        /// Sends one frame and returns the bytes consumed so far.
        fn send(&mut self, payload: &[u8], release: bool) -> usize {
            let mut input: VecDeque<u8> = encode_header(payload.len() as u16, release, 0)
                .into_iter()
                .chain(payload.iter().copied())
                .collect();
            pump(&mut self.dev, &mut input)
        }

        fn resume(&mut self, rest: &[u8]) -> usize {
            let mut input: VecDeque<u8> = rest.iter().copied().collect();
            pump(&mut self.dev, &mut input)
        }
    }

    fn pattern(addr: u32) -> u8 {
        (addr as u8) ^ ((addr >> 8) as u8).wrapping_mul(0x35)
    }

    #[test]
    fn test_fast_read_first_byte() {
        let mut f = Fixture::new();
        f.w(REG_READ_THRESHOLD, 0x200);
        let n = f.send(&[0x0b, 0x00, 0x02, 0x00, 0xff], true);
        assert_eq!(n, HEADER_SIZE + 5);
        assert_eq!(f.miso.take(), vec![0xff, 0xff, 0xff, 0xff, pattern(0x200)]);
        assert_eq!(f.r(REG_INTR_STATE), INTR_READBUF_WATERMARK);
        assert_eq!(f.r(REG_LAST_READ_ADDR), 0x200);
        assert_eq!(f.r(REG_STATUS) & STATUS_CSB, STATUS_CSB);
    }

    #[test]
    fn test_read_flip_paces_bus() {
        let mut f = Fixture::new();
        let payload = [0x03, 0x00, 0x03, 0xfe, 0, 0, 0, 0];
        let n = f.send(&payload, true);
        // opcode, two address bytes, then data for 0x3fe and 0x3ff
        assert_eq!(n, HEADER_SIZE + 5);
        assert_eq!(
            f.miso.take(),
            vec![0xff, 0xff, 0xff, pattern(0x3fe), pattern(0x3ff)]
        );
        assert_eq!(f.r(REG_INTR_STATE), INTR_READBUF_FLIP);
        assert!(f.dev.irq(4).is_high());
        assert!(f.dev.is_pacing());
        assert_eq!(f.dev.can_receive(), 0);
        assert_eq!(f.r(REG_STATUS) & STATUS_CSB, 0);

        f.w(REG_INTR_STATE, INTR_READBUF_FLIP);
        assert!(!f.dev.is_pacing());
        assert_eq!(f.resume(&payload[5..]), 3);
        assert_eq!(
            f.miso.take(),
            vec![pattern(0x400), pattern(0x401), pattern(0x402)]
        );
        assert_eq!(f.r(REG_LAST_READ_ADDR), 0x402);
    }

    #[test]
    fn test_pacing_times_out() {
        let mut f = Fixture::new();
        f.send(&[0x03, 0x00, 0x07, 0xff, 0, 0], true);
        assert!(f.dev.is_pacing());
        f.clock
            .increment_and_process_timer_actions(50_000_000, &mut f.dev);
        assert!(f.dev.is_pacing());
        f.clock
            .increment_and_process_timer_actions(50_000_000, &mut f.dev);
        assert!(!f.dev.is_pacing());
        // the read wraps around the two pages
        assert_eq!(f.resume(&[0]), 1);
        assert_eq!(
            f.miso.take(),
            vec![0xff, 0xff, 0xff, pattern(0x7ff), pattern(0x000)]
        );
        // the flip interrupt stays pending
        assert_eq!(f.r(REG_INTR_STATE), INTR_READBUF_FLIP);
    }

    #[test]
    fn test_mailbox_window() {
        let mut f = Fixture::new();
        f.fill(BUF_MAILBOX, &[0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7]);
        f.w(REG_CFG, CFG_MAILBOX_EN);
        f.w(REG_MAILBOX_ADDR, 0x0010_0000);
        f.send(&[0x03, 0x10, 0x00, 0x04, 0, 0], true);
        assert_eq!(f.miso.take(), vec![0xff, 0xff, 0xff, 0xa4, 0xa5, 0xa6]);
        assert_eq!(f.r(REG_LAST_READ_ADDR), 0);

        f.w(REG_CFG, 0);
        f.send(&[0x03, 0x10, 0x00, 0x04, 0], true);
        assert_eq!(f.miso.take(), vec![0xff, 0xff, 0xff, pattern(4), pattern(5)]);
        assert_eq!(f.r(REG_LAST_READ_ADDR), 0x10_0005);
    }

    #[test]
    fn test_status_jedec_and_config_commands() {
        let mut f = Fixture::new();
        f.w(REG_JEDEC_CC, (2 << 8) | 0x7f);
        f.w(REG_JEDEC_ID, 0x00ef_4019);
        f.send(&[0x9f, 0, 0, 0, 0, 0, 0], true);
        assert_eq!(
            f.miso.take(),
            vec![0xff, 0x7f, 0x7f, 0xef, 0x40, 0x19, 0xff]
        );

        f.send(&[0x06], true);
        f.send(&[0x05, 0, 0], true);
        assert_eq!(f.miso.take(), vec![0xff, 0xff, 0x02, 0x02]);
        f.send(&[0x04], true);
        assert_eq!(f.r(REG_FLASH_STATUS) & FLASH_STATUS_WEL, 0);

        f.send(&[0xb7], true);
        assert_eq!(f.r(REG_CFG) & CFG_ADDR_4B_EN, CFG_ADDR_4B_EN);
        f.miso.take();
        f.send(&[0x03, 0x00, 0x00, 0x01, 0x23, 0], true);
        assert_eq!(
            f.miso.take(),
            vec![0xff, 0xff, 0xff, 0xff, pattern(0x123), pattern(0x124)]
        );
        f.send(&[0xe9], true);
        assert_eq!(f.r(REG_CFG) & CFG_ADDR_4B_EN, 0);
    }

    #[test]
    fn test_flash_error_state() {
        let mut f = Fixture::new();
        let flash = |f: &Fixture| f.dev.regs.borrow().flash;

        // WREN takes no byte after its opcode
        f.send(&[0x06, 0x00], false);
        assert_eq!(flash(&f), FlashState::Error);
        f.send(&[0x00], true);
        assert_eq!(f.miso.take(), vec![0xff; 3]);
        assert_eq!(flash(&f), FlashState::Idle);
        assert_ne!(f.r(REG_FLASH_STATUS) & FLASH_STATUS_WEL, 0);

        // READ with its address phase disabled
        let mut info = CmdInfo(f.r(REG_CMD_INFO_0 + 4 * 5));
        info.set_addr_mode(cmd_info::ADDR_MODE_DISABLED);
        f.w(REG_CMD_INFO_0 + 4 * 5, info.0);
        f.send(&[0x03, 0x00], false);
        assert_eq!(flash(&f), FlashState::Error);
        f.send(&[0x00, 0x00], true);
        assert_eq!(f.miso.take(), vec![0xff; 4]);
        assert_eq!(flash(&f), FlashState::Idle);
    }

    #[test]
    fn test_sfdp() {
        let mut f = Fixture::new();
        f.fill(BUF_SFDP, b"SFDP");
        f.send(&[0x5a, 0, 0, 0, 0, 0, 0, 0], true);
        assert_eq!(
            f.miso.take(),
            vec![0xff, 0xff, 0xff, 0xff, b'S', b'F', b'D', b'P']
        );
    }

    fn program_upload_slot(f: &mut Fixture) {
        let mut info = CmdInfo(0);
        info.set_opcode(0x02);
        info.set_addr_mode(cmd_info::ADDR_MODE_3B);
        info.set_payload_en(1);
        info.set_upload(true);
        info.set_busy(true);
        info.set_valid(true);
        f.w(REG_CMD_INFO_0 + 4 * 11, info.0);
    }

    #[test]
    fn test_upload() {
        let mut f = Fixture::new();
        program_upload_slot(&mut f);
        f.send(&[0x02, 0x12, 0x34, 0x56, 1, 2, 3, 4], true);
        assert_eq!(f.miso.take(), vec![0xff; 8]);
        assert_eq!(
            f.r(REG_INTR_STATE),
            INTR_UPLOAD_CMDFIFO_NOT_EMPTY | INTR_UPLOAD_PAYLOAD_NOT_EMPTY
        );
        assert_eq!(f.r(REG_UPLOAD_STATUS), 1 | 1 << 7 | 1 << 8 | 1 << 15);
        assert_eq!(f.r(REG_UPLOAD_STATUS2), 4);
        assert_eq!(f.r(REG_FLASH_STATUS) & FLASH_STATUS_BUSY, FLASH_STATUS_BUSY);
        assert_eq!(f.r(BUF_WINDOW + BUF_PAYLOAD as u32), 0x0403_0201);
        assert_eq!(f.r(BUF_WINDOW + BUF_CMD_FIFO as u32), 0x02);
        assert_eq!(f.r(BUF_WINDOW + BUF_ADDR_FIFO as u32), 0x12_3456);
        assert_eq!(f.r(REG_UPLOAD_CMDFIFO), 0x02);
        assert_eq!(f.r(REG_UPLOAD_ADDRFIFO), 0x12_3456);
        assert_eq!(f.r(REG_UPLOAD_STATUS), 0);

        f.w(REG_FLASH_STATUS, 0);
        assert_eq!(f.r(REG_FLASH_STATUS), 0);
    }

    #[test]
    fn test_upload_overflow() {
        let mut f = Fixture::new();
        program_upload_slot(&mut f);
        let mut payload = vec![0x02, 0, 0, 0];
        payload.extend((0..260u32).map(|i| i as u8));
        f.send(&payload, true);
        assert_eq!(
            f.r(REG_INTR_STATE),
            INTR_UPLOAD_CMDFIFO_NOT_EMPTY
                | INTR_UPLOAD_PAYLOAD_NOT_EMPTY
                | INTR_UPLOAD_PAYLOAD_OVERFLOW
        );
        assert_eq!(f.r(REG_UPLOAD_STATUS2), 0x100 | 4 << 16);
        // the ring holds the last 256 bytes
        assert_eq!(f.r(BUF_WINDOW + BUF_PAYLOAD as u32), 0x0302_0100);
        assert_eq!(f.r(BUF_WINDOW + BUF_PAYLOAD as u32 + 4), 0x0706_0504);
    }

    #[test]
    fn test_unknown_command_and_generic_mode() {
        let mut f = Fixture::new();
        f.send(&[0x42, 0x03, 0, 0], true);
        assert_eq!(f.miso.take(), vec![0xff; 4]);
        assert_eq!(f.r(REG_INTR_STATE), 0);

        f.w(REG_CONTROL, MODE_GENERIC << CONTROL_MODE_SHIFT);
        f.send(&[0x03, 0, 0, 0, 0], true);
        assert_eq!(f.miso.take(), vec![0xff; 5]);
    }

    #[test]
    fn test_frames_share_chip_select() {
        let mut f = Fixture::new();
        f.send(&[0x03, 0x00], false);
        f.send(&[0x01, 0x10], false);
        assert_eq!(f.r(REG_STATUS) & STATUS_CSB, 0);
        f.send(&[0], true);
        assert_eq!(
            f.miso.take(),
            vec![0xff, 0xff, 0xff, pattern(0x110), pattern(0x111)]
        );
        assert_eq!(f.r(REG_STATUS) & STATUS_CSB, STATUS_CSB);
    }

    #[test]
    fn test_mode_mismatch_inverts() {
        let mut f = Fixture::new();
        let mut input: VecDeque<u8> = encode_header(5, true, 0x3)
            .into_iter()
            .chain([!0x03u8, 0xff, 0xff, !0x10, 0xff])
            .collect();
        pump(&mut f.dev, &mut input);
        assert_eq!(
            f.miso.take(),
            vec![0, 0, 0, !pattern(0x10), !pattern(0x11)]
        );
    }
}
