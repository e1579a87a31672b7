/*++

Licensed under the Apache-2.0 license.

File Name:

    dev_proxy.rs

Abstract:

    File contains the device proxy: a packet protocol served over a byte
    stream that lets an external client enumerate, access and observe the
    emulated devices.

--*/

mod protocol;
mod watcher;

pub use protocol::{Header, ProxyError, HEADER_SIZE, PROTO_MAJOR, PROTO_MINOR, UID_INITIATOR};
pub use watcher::{WATCH_READ, WATCH_WRITE};

use crate::mbx::{
    SYS_CONTROL, SYS_CONTROL_GO, SYS_READ_DATA, SYS_STATUS, SYS_STATUS_BUSY, SYS_STATUS_ERROR,
    SYS_STATUS_READY, SYS_WRITE_DATA,
};
use ot_emu_bus::{
    AddressSpace, Bus, BusError, CharBackend, CharFrontend, GpioIn, GpioSink, IrqLine, Ram,
    RunControl,
};
use ot_emu_types::{MemTxAttrs, RvAddr, RvSize};
use protocol::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use watcher::Watcher;

/// Longest response object drained by one `RX`
const MBX_MAX_WORDS: usize = 1024;

/// Group ids of input lines carry this flag in `IE` replies.
pub const IRQ_GROUP_INPUT: u16 = 1 << 15;

#[derive(Debug, Clone, Default)]
pub struct DevProxyArgs {
    /// Keep the machine stopped until the client sends `CX`
    pub start_stopped: bool,
}

/// What a registered device gives access to.
#[derive(Clone)]
pub enum ProxyTarget {
    /// Register file
    Device(Rc<RefCell<dyn Bus>>),
    /// System face of a DOE mailbox
    Mailbox(Rc<RefCell<dyn Bus>>),
    SocProxy(Rc<RefCell<dyn Bus>>),
    /// SRAM controller registers plus the memory behind them
    SramCtrl {
        regs: Rc<RefCell<dyn Bus>>,
        mem: Rc<RefCell<Ram>>,
    },
    Memory(Rc<RefCell<Ram>>),
}

impl ProxyTarget {
    fn kind(&self) -> u16 {
        match self {
            ProxyTarget::Device(_) | ProxyTarget::Memory(_) => 1,
            ProxyTarget::Mailbox(_) => 2,
            ProxyTarget::SocProxy(_) => 3,
            ProxyTarget::SramCtrl { .. } => 4,
        }
    }

    fn read(&self, offset: RvAddr, attrs: MemTxAttrs) -> Result<u32, BusError> {
        match self {
            ProxyTarget::Device(dev)
            | ProxyTarget::Mailbox(dev)
            | ProxyTarget::SocProxy(dev)
            | ProxyTarget::SramCtrl { regs: dev, .. } => {
                dev.borrow_mut().read_attrs(RvSize::Word, offset, attrs)
            }
            ProxyTarget::Memory(ram) => ram.borrow_mut().read_attrs(RvSize::Word, offset, attrs),
        }
    }

    fn write(&self, offset: RvAddr, val: u32, attrs: MemTxAttrs) -> Result<(), BusError> {
        match self {
            ProxyTarget::Device(dev)
            | ProxyTarget::Mailbox(dev)
            | ProxyTarget::SocProxy(dev)
            | ProxyTarget::SramCtrl { regs: dev, .. } => {
                dev.borrow_mut().write_attrs(RvSize::Word, offset, val, attrs)
            }
            ProxyTarget::Memory(ram) => {
                ram.borrow_mut().write_attrs(RvSize::Word, offset, val, attrs)
            }
        }
    }

    fn memory(&self) -> Option<&Rc<RefCell<Ram>>> {
        match self {
            ProxyTarget::SramCtrl { mem, .. } | ProxyTarget::Memory(mem) => Some(mem),
            _ => None,
        }
    }
}

enum IrqLines {
    Out(Vec<IrqLine>),
    In(Vec<GpioIn>),
}

struct IrqGroup {
    name: String,
    lines: IrqLines,
}

/// A device as seen by the proxy client.
pub struct ProxyDevice {
    name: String,
    base: u32,
    size: u32,
    target: ProxyTarget,
    groups: Vec<IrqGroup>,
}

impl ProxyDevice {
    pub fn new(name: &str, base: u32, size: u32, target: ProxyTarget) -> Self {
        Self {
            name: name.into(),
            base,
            size,
            target,
            groups: vec![],
        }
    }

    /// Adds a group of output lines the client may intercept.
    pub fn with_out_irqs(mut self, name: &str, lines: Vec<IrqLine>) -> Self {
        self.groups.push(IrqGroup {
            name: name.into(),
            lines: IrqLines::Out(lines),
        });
        self
    }

    /// Adds a group of input lines the client may drive.
    pub fn with_in_irqs(mut self, name: &str, lines: Vec<GpioIn>) -> Self {
        self.groups.push(IrqGroup {
            name: name.into(),
            lines: IrqLines::In(lines),
        });
        self
    }
}

struct ProxySpace {
    name: String,
    base: u32,
    size: u32,
    space: AddressSpace,
}

fn irq_key(devix: u16, group: u16, channel: u16) -> usize {
    (usize::from(devix) << 16) | (usize::from(group) << 8) | usize::from(channel)
}

/// Receives the intercepted lines and reports their edges.
struct IrqSink {
    chan: Channel,
    levels: HashMap<usize, i32>,
}

impl GpioSink for IrqSink {
    fn set_level(&mut self, input: usize, level: i32) {
        if self.levels.insert(input, level) == Some(level) {
            return;
        }
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&((input >> 16) as u16).to_le_bytes());
        payload.extend_from_slice(&(((input >> 8) & 0xff) as u16).to_le_bytes());
        payload.extend_from_slice(&((input & 0xff) as u16).to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&level.to_le_bytes());
        self.chan.notify(NOTIFY_IRQ, &payload);
    }
}

pub struct DevProxy {
    devices: Vec<ProxyDevice>,
    spaces: Vec<ProxySpace>,
    watchers: Vec<Rc<RefCell<Watcher>>>,
    next_wid: u32,
    chan: Channel,
    irq_sink: Rc<RefCell<IrqSink>>,
    run: RunControl,
    rx: Vec<u8>,
    connected: bool,
    last_uid: Option<u32>,
}

impl DevProxy {
    pub fn new(args: DevProxyArgs, out: Box<dyn CharBackend>, run: RunControl) -> Self {
        let chan = Channel::new(out);
        if args.start_stopped {
            run.stop();
        }
        Self {
            devices: vec![],
            spaces: vec![],
            watchers: vec![],
            next_wid: 0,
            irq_sink: Rc::new(RefCell::new(IrqSink {
                chan: chan.clone(),
                levels: HashMap::new(),
            })),
            chan,
            run,
            rx: vec![],
            connected: false,
            last_uid: None,
        }
    }

    /// Registers a device; returns its index.
    pub fn add_device(&mut self, dev: ProxyDevice) -> u16 {
        self.devices.push(dev);
        (self.devices.len() - 1) as u16
    }

    /// Registers a memory space watchers may be installed in; returns its
    /// index.
    pub fn add_space(&mut self, name: &str, base: u32, size: u32, space: AddressSpace) -> u32 {
        self.spaces.push(ProxySpace {
            name: name.into(),
            base,
            size,
            space,
        });
        (self.spaces.len() - 1) as u32
    }

    /// Drops the session state: intercepted lines go back to their
    /// devices and watchers are removed.
    pub fn disconnect(&mut self) {
        for grp in self.devices.iter().flat_map(|dev| dev.groups.iter()) {
            if let IrqLines::Out(lines) = &grp.lines {
                Self::release(lines, u32::MAX);
            }
        }
        self.irq_sink.borrow_mut().levels.clear();
        for watcher in self.watchers.drain(..) {
            watcher.borrow().remove();
        }
        self.rx.clear();
        self.connected = false;
        self.last_uid = None;
        log::info!("dev_proxy: client disconnected");
    }

    fn device(&self, devix: u16) -> Result<&ProxyDevice, ProxyError> {
        self.devices
            .get(usize::from(devix))
            .ok_or(ProxyError::InvalidDeviceId)
    }

    fn irq_group(&self, devix: u16, group: u16) -> Result<&IrqGroup, ProxyError> {
        self.device(devix)?
            .groups
            .get(usize::from(group & !IRQ_GROUP_INPUT))
            .ok_or(ProxyError::InvalidSpecifierId)
    }

    fn check_range(dev: &ProxyDevice, offset: u32, count: u32) -> Result<(), ProxyError> {
        let end = u64::from(offset) + 4 * u64::from(count);
        if offset % 4 != 0 || end > u64::from(dev.size) {
            Err(ProxyError::InvalidRegisterAddress)
        } else {
            Ok(())
        }
    }

    fn process(&mut self, hdr: Header, payload: &[u8]) {
        if hdr.is_initiator() {
            log::warn!("dev_proxy: request with initiator uid {:#x}", hdr.uid);
            self.chan
                .reply_error(hdr.uid, ProxyError::InvalidRequestId, "initiator uid");
            return;
        }
        if hdr.cmd == CMD_HANDSHAKE {
            self.connected = true;
            self.chan.reset_uid();
        } else if !self.connected {
            self.chan
                .reply_error(hdr.uid, ProxyError::InvalidRequestId, "no handshake");
            return;
        } else if self.last_uid.is_some_and(|last| hdr.uid <= last) {
            log::warn!("dev_proxy: out of order uid {:#x}", hdr.uid);
            self.chan
                .reply_error(hdr.uid, ProxyError::InvalidRequestId, "uid not increasing");
            return;
        }
        self.last_uid = Some(hdr.uid);
        match self.handle(hdr.cmd, payload) {
            Ok(reply) => self.chan.send(hdr.cmd, hdr.uid, &reply),
            Err(err) => {
                log::debug!(
                    "dev_proxy: {} failed: {err}",
                    String::from_utf8_lossy(&hdr.cmd)
                );
                self.chan.reply_error(hdr.uid, err, &err.to_string());
            }
        }
    }

    fn handle(&mut self, cmd: Cmd, payload: &[u8]) -> Result<Vec<u8>, ProxyError> {
        let mut r = Reader::new(payload);
        match cmd {
            CMD_HANDSHAKE => Ok((PROTO_MINOR | PROTO_MAJOR << 16).to_le_bytes().to_vec()),
            CMD_ENUM_DEVICES => {
                r.end()?;
                Ok(self.enum_devices())
            }
            CMD_ENUM_SPACES => {
                r.end()?;
                Ok(self.enum_spaces())
            }
            CMD_ENUM_IRQS => {
                let devix = r.u16()?;
                r.u16()?;
                r.end()?;
                self.enum_irqs(devix)
            }
            CMD_READ_REG => {
                let (devix, attrs) = (r.u16()?, Self::attrs(&mut r)?);
                let offset = r.u32()?;
                r.end()?;
                let dev = self.device(devix)?;
                Self::check_range(dev, offset, 1)?;
                let val = dev
                    .target
                    .read(offset, attrs)
                    .map_err(|_| ProxyError::CannotReadDevice)?;
                Ok(val.to_le_bytes().to_vec())
            }
            CMD_WRITE_REG => {
                let (devix, attrs) = (r.u16()?, Self::attrs(&mut r)?);
                let (offset, val, mask) = (r.u32()?, r.u32()?, r.u32()?);
                r.end()?;
                let dev = self.device(devix)?;
                Self::check_range(dev, offset, 1)?;
                let val = if mask == u32::MAX {
                    val
                } else {
                    let old = dev
                        .target
                        .read(offset, attrs)
                        .map_err(|_| ProxyError::CannotReadDevice)?;
                    (old & !mask) | (val & mask)
                };
                dev.target
                    .write(offset, val, attrs)
                    .map_err(|_| ProxyError::CannotWriteDevice)?;
                Ok(vec![])
            }
            CMD_READ_SEQ => {
                let (devix, attrs) = (r.u16()?, Self::attrs(&mut r)?);
                let (offset, count) = (r.u32()?, r.u32()?);
                r.end()?;
                let dev = self.device(devix)?;
                Self::check_range(dev, offset, count)?;
                let mut out = vec![];
                for i in 0..count {
                    let val = dev
                        .target
                        .read(offset + 4 * i, attrs)
                        .map_err(|_| ProxyError::CannotReadDevice)?;
                    out.extend_from_slice(&val.to_le_bytes());
                }
                Ok(out)
            }
            CMD_WRITE_SEQ => {
                let (devix, attrs) = (r.u16()?, Self::attrs(&mut r)?);
                let offset = r.u32()?;
                let words = r.words()?;
                let dev = self.device(devix)?;
                Self::check_range(dev, offset, words.len() as u32)?;
                for (i, word) in words.iter().enumerate() {
                    dev.target
                        .write(offset + 4 * i as u32, *word, attrs)
                        .map_err(|_| ProxyError::CannotWriteDevice)?;
                }
                Ok(vec![])
            }
            CMD_READ_MBX => {
                let devix = r.u16()?;
                r.u16()?;
                r.end()?;
                self.read_mailbox(devix)
            }
            CMD_WRITE_MBX => {
                let devix = r.u16()?;
                r.u16()?;
                let words = r.words()?;
                self.write_mailbox(devix, &words)?;
                Ok(vec![])
            }
            CMD_READ_MEM => {
                let devix = r.u16()?;
                r.u16()?;
                let (offset, count) = (r.u32()?, r.u32()?);
                r.end()?;
                let ram = self.memory(devix)?;
                let ram = ram.borrow();
                let range = Self::mem_range(ram.data().len(), offset, count as usize)?;
                Ok(ram.data()[range].to_vec())
            }
            CMD_WRITE_MEM => {
                let devix = r.u16()?;
                r.u16()?;
                let offset = r.u32()?;
                let words = r.words()?;
                let ram = self.memory(devix)?;
                let mut ram = ram.borrow_mut();
                let range = Self::mem_range(ram.data().len(), offset, words.len())?;
                let mut bytes = vec![];
                put_words(&mut bytes, &words);
                ram.data_mut()[range].copy_from_slice(&bytes);
                Ok(vec![])
            }
            CMD_INTERCEPT_IRQ | CMD_RELEASE_IRQ => {
                let (devix, group, mask) = (r.u16()?, r.u16()?, r.u32()?);
                r.end()?;
                let IrqLines::Out(lines) = &self.irq_group(devix, group)?.lines else {
                    return Err(ProxyError::InvalidIrq);
                };
                if lines.len() < 32 && mask >> lines.len() != 0 {
                    return Err(ProxyError::InvalidIrq);
                }
                if cmd == CMD_INTERCEPT_IRQ {
                    self.intercept(devix, group & !IRQ_GROUP_INPUT, lines, mask);
                } else {
                    Self::release(lines, mask);
                }
                Ok(vec![])
            }
            CMD_SET_IRQ => {
                let (devix, group, channel) = (r.u16()?, r.u16()?, r.u16()?);
                r.u16()?;
                let level = r.i32()?;
                r.end()?;
                let IrqLines::In(lines) = &self.irq_group(devix, group)?.lines else {
                    return Err(ProxyError::InvalidIrq);
                };
                let line = lines
                    .get(usize::from(channel))
                    .ok_or(ProxyError::InvalidIrq)?;
                line.set(level);
                Ok(vec![])
            }
            CMD_WATCH_INSTALL => {
                let (asix, address, size) = (r.u32()?, r.u32()?, r.u32()?);
                let (stop, priority, flags) = (r.u16()?, r.u8()?, r.u8()?);
                r.end()?;
                let wid = self.install_watcher(asix, address, size, stop, priority, flags)?;
                Ok(wid.to_le_bytes().to_vec())
            }
            CMD_WATCH_REMOVE => {
                let wid = r.u32()?;
                r.end()?;
                let pos = self
                    .watchers
                    .iter()
                    .position(|w| w.borrow().wid() == wid)
                    .ok_or(ProxyError::InvalidSpecifierId)?;
                self.watchers.remove(pos).borrow().remove();
                Ok(vec![])
            }
            CMD_RESUME => {
                r.end()?;
                self.run.resume();
                Ok(vec![])
            }
            CMD_QUIT => {
                let code = r.u32()?;
                r.end()?;
                self.run.shutdown(code as i32);
                Ok(vec![])
            }
            _ => Err(ProxyError::UnknownCommand),
        }
    }

    /// Role byte plus reserved byte of the register commands.
    fn attrs(r: &mut Reader) -> Result<MemTxAttrs, ProxyError> {
        let role = r.u8()?;
        r.u8()?;
        Ok(MemTxAttrs::with_role(role))
    }

    fn enum_devices(&self) -> Vec<u8> {
        let mut out = vec![];
        for (devix, dev) in self.devices.iter().enumerate() {
            out.extend_from_slice(&(devix as u16).to_le_bytes());
            out.extend_from_slice(&dev.target.kind().to_le_bytes());
            out.extend_from_slice(&dev.base.to_le_bytes());
            out.extend_from_slice(&dev.size.to_le_bytes());
            put_name(&mut out, &dev.name);
        }
        out
    }

    fn enum_spaces(&self) -> Vec<u8> {
        let mut out = vec![];
        for (asix, sp) in self.spaces.iter().enumerate() {
            out.extend_from_slice(&(asix as u32).to_le_bytes());
            out.extend_from_slice(&sp.base.to_le_bytes());
            out.extend_from_slice(&sp.size.to_le_bytes());
            put_name(&mut out, &sp.name);
        }
        out
    }

    fn enum_irqs(&self, devix: u16) -> Result<Vec<u8>, ProxyError> {
        let mut out = vec![];
        for (group, grp) in self.device(devix)?.groups.iter().enumerate() {
            let (count, flag) = match &grp.lines {
                IrqLines::Out(lines) => (lines.len(), 0),
                IrqLines::In(lines) => (lines.len(), IRQ_GROUP_INPUT),
            };
            out.extend_from_slice(&(count as u16).to_le_bytes());
            out.extend_from_slice(&(group as u16 | flag).to_le_bytes());
            put_name(&mut out, &grp.name);
        }
        Ok(out)
    }

    fn mailbox(&self, devix: u16) -> Result<&Rc<RefCell<dyn Bus>>, ProxyError> {
        match &self.device(devix)?.target {
            ProxyTarget::Mailbox(mbx) => Ok(mbx),
            _ => Err(ProxyError::InvalidDeviceId),
        }
    }

    fn memory(&self, devix: u16) -> Result<Rc<RefCell<Ram>>, ProxyError> {
        self.device(devix)?
            .target
            .memory()
            .cloned()
            .ok_or(ProxyError::InvalidDeviceId)
    }

    fn mem_range(
        len: usize,
        offset: u32,
        words: usize,
    ) -> Result<std::ops::Range<usize>, ProxyError> {
        let start = offset as usize;
        let end = start + 4 * words;
        if offset % 4 != 0 || end > len {
            Err(ProxyError::InvalidRegisterAddress)
        } else {
            Ok(start..end)
        }
    }

    /// Drains the pending response object, if any.
    fn read_mailbox(&self, devix: u16) -> Result<Vec<u8>, ProxyError> {
        let mbx = self.mailbox(devix)?;
        let mut mbx = mbx.borrow_mut();
        let status = |mbx: &mut dyn Bus| {
            mbx.read(RvSize::Word, SYS_STATUS)
                .map_err(|_| ProxyError::CannotReadDevice)
        };
        if status(&mut *mbx)? & SYS_STATUS_ERROR != 0 {
            return Err(ProxyError::DeviceInError);
        }
        let mut words = vec![];
        while status(&mut *mbx)? & SYS_STATUS_READY != 0 {
            if words.len() == MBX_MAX_WORDS {
                return Err(ProxyError::Timeout);
            }
            let word = mbx
                .read(RvSize::Word, SYS_READ_DATA)
                .map_err(|_| ProxyError::CannotReadDevice)?;
            words.push(word);
        }
        let mut out = vec![];
        put_words(&mut out, &words);
        Ok(out)
    }

    /// Writes a request object and hands it to the responder.
    fn write_mailbox(&self, devix: u16, words: &[u32]) -> Result<(), ProxyError> {
        let mbx = self.mailbox(devix)?;
        let mut mbx = mbx.borrow_mut();
        let read = |mbx: &mut dyn Bus, addr| {
            mbx.read(RvSize::Word, addr)
                .map_err(|_| ProxyError::CannotReadDevice)
        };
        if read(&mut *mbx, SYS_STATUS)? & (SYS_STATUS_BUSY | SYS_STATUS_ERROR) != 0 {
            return Err(ProxyError::DeviceInError);
        }
        for word in words {
            mbx.write(RvSize::Word, SYS_WRITE_DATA, *word)
                .map_err(|_| ProxyError::CannotWriteDevice)?;
        }
        if read(&mut *mbx, SYS_STATUS)? & SYS_STATUS_ERROR != 0 {
            return Err(ProxyError::DeviceInError);
        }
        let ctrl = read(&mut *mbx, SYS_CONTROL)?;
        mbx.write(RvSize::Word, SYS_CONTROL, ctrl | SYS_CONTROL_GO)
            .map_err(|_| ProxyError::CannotWriteDevice)
    }

    fn intercept(&self, devix: u16, group: u16, lines: &[IrqLine], mask: u32) {
        for (channel, line) in lines.iter().enumerate() {
            if channel >= 32 || mask & (1 << channel) == 0 {
                continue;
            }
            let key = irq_key(devix, group, channel as u16);
            self.irq_sink.borrow_mut().levels.insert(key, line.level());
            line.intercept(GpioIn::new(&self.irq_sink, key));
        }
    }

    fn release(lines: &[IrqLine], mask: u32) {
        for (channel, line) in lines.iter().enumerate() {
            if channel < 32 && mask & (1 << channel) != 0 && line.is_intercepted() {
                line.release_intercept();
                // resync the real target with the current level
                line.set(line.level());
            }
        }
    }

    fn install_watcher(
        &mut self,
        asix: u32,
        address: u32,
        size: u32,
        stop: u16,
        priority: u8,
        flags: u8,
    ) -> Result<u32, ProxyError> {
        let sp = self
            .spaces
            .get(asix as usize)
            .ok_or(ProxyError::InvalidSpecifierId)?;
        let end = u64::from(address) + u64::from(size);
        if size == 0 || address < sp.base || end > u64::from(sp.base) + u64::from(sp.size) {
            return Err(ProxyError::InvalidRegisterAddress);
        }
        if flags & (WATCH_READ | WATCH_WRITE) == 0 {
            return Err(ProxyError::InvalidSpecifierId);
        }
        let wid = self.next_wid;
        self.next_wid += 1;
        let watcher = Watcher::install(
            wid,
            &sp.space,
            u64::from(address),
            u64::from(size),
            i32::from(priority),
            flags,
            stop,
            self.chan.clone(),
        );
        self.watchers.push(watcher);
        Ok(wid)
    }
}

impl CharFrontend for DevProxy {
    fn can_receive(&self) -> usize {
        HEADER_SIZE + usize::from(u16::MAX)
    }

    fn receive(&mut self, buf: &[u8]) {
        self.rx.extend_from_slice(buf);
        while self.rx.len() >= HEADER_SIZE {
            let mut raw = [0u8; HEADER_SIZE];
            raw.copy_from_slice(&self.rx[..HEADER_SIZE]);
            let hdr = Header::parse(&raw);
            let total = HEADER_SIZE + usize::from(hdr.len);
            if self.rx.len() < total {
                break;
            }
            let payload: Vec<u8> = self.rx.drain(..total).skip(HEADER_SIZE).collect();
            self.process(hdr, &payload);
        }
    }
}
