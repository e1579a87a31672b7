/*++

Licensed under the Apache-2.0 license.

File Name:

    mbx.rs

Abstract:

    File contains the DOE mailbox: a host register face used by the
    OpenTitan firmware and a system face used by the SoC requester, both
    moving message words through the host address space.

--*/

use crate::mubi::{mubi4_test_true_strict, w1c, MB4_FALSE, MB4_TRUE};
use ot_emu_bus::{AddressSpace, Bus, BusError, IrqLine};
use ot_emu_types::{MemTxAttrs, MemTxError, RvAddr, RvData, RvSize};
use std::cell::RefCell;
use std::rc::Rc;

// host face
const REG_INTR_STATE: RvAddr = 0x00;
const REG_INTR_ENABLE: RvAddr = 0x04;
const REG_INTR_TEST: RvAddr = 0x08;
const REG_ALERT_TEST: RvAddr = 0x0c;
const REG_CONTROL: RvAddr = 0x10;
const REG_STATUS: RvAddr = 0x14;
const REG_ADDRESS_RANGE_REGWEN: RvAddr = 0x18;
const REG_ADDRESS_RANGE_VALID: RvAddr = 0x1c;
const REG_INBOUND_BASE: RvAddr = 0x20;
const REG_INBOUND_LIMIT: RvAddr = 0x24;
const REG_INBOUND_WRITE_PTR: RvAddr = 0x28;
const REG_OUTBOUND_BASE: RvAddr = 0x2c;
const REG_OUTBOUND_LIMIT: RvAddr = 0x30;
const REG_OUTBOUND_READ_PTR: RvAddr = 0x34;
const REG_OUTBOUND_OBJECT_SIZE: RvAddr = 0x38;
const REG_DOE_INTR_MSG_ADDR: RvAddr = 0x3c;
const REG_DOE_INTR_MSG_DATA: RvAddr = 0x40;
pub const HOST_MMAP_SIZE: RvAddr = 0x80;

// system face
pub const SYS_INTR_MSG_ADDR: RvAddr = 0x00;
pub const SYS_INTR_MSG_DATA: RvAddr = 0x04;
pub const SYS_CONTROL: RvAddr = 0x08;
pub const SYS_STATUS: RvAddr = 0x0c;
pub const SYS_WRITE_DATA: RvAddr = 0x10;
pub const SYS_READ_DATA: RvAddr = 0x14;
pub const SYS_MMAP_SIZE: RvAddr = 0x20;

pub const INTR_MBX_READY: u32 = 1 << 0;
pub const INTR_MBX_ABORT: u32 = 1 << 1;
pub const INTR_MBX_ERROR: u32 = 1 << 2;
const INTR_MASK: u32 = 0x7;

const ALERT_FATAL: usize = 0;
const ALERT_RECOV: usize = 1;

const HOST_CONTROL_ABORT: u32 = 1 << 0;
const HOST_CONTROL_ERROR: u32 = 1 << 1;
const HOST_CONTROL_SYS_ASYNC_MSG: u32 = 1 << 3;

pub const SYS_CONTROL_ABORT: u32 = 1 << 0;
pub const SYS_CONTROL_INT_EN: u32 = 1 << 1;
pub const SYS_CONTROL_ASYNC_MSG_EN: u32 = 1 << 3;
pub const SYS_CONTROL_GO: u32 = 1 << 31;

pub const SYS_STATUS_BUSY: u32 = 1 << 0;
pub const SYS_STATUS_INTR_STATE: u32 = 1 << 1;
pub const SYS_STATUS_ERROR: u32 = 1 << 2;
pub const SYS_STATUS_ASYNC_MSG: u32 = 1 << 3;
pub const SYS_STATUS_READY: u32 = 1 << 31;

const OBJECT_SIZE_MASK: u32 = 0x7ff;

/// Device configuration.
#[derive(Debug, Clone)]
pub struct MailboxArgs {
    /// Initiator role used for accesses to the host address space
    pub role: u8,
}

impl Default for MailboxArgs {
    fn default() -> Self {
        Self { role: 0x1 }
    }
}

/// Guest memory access the mailbox has to perform once its registers are
/// released.
enum Pending {
    Fetch(RvAddr),
    Store(RvAddr, u32),
    Message(RvAddr, u32),
}

pub struct MailboxRegs {
    args: MailboxArgs,

    intr_state: u32,
    intr_enable: u32,
    abort: bool,
    error: bool,
    async_msg: bool,
    busy: bool,
    range_regwen: u32,
    range_valid: bool,
    in_base: u32,
    in_limit: u32,
    in_write_ptr: u32,
    out_base: u32,
    out_limit: u32,
    out_read_ptr: u32,
    out_object_size: u32,

    sys_intr_msg_addr: u32,
    sys_intr_msg_data: u32,
    sys_int_en: bool,
    sys_async_en: bool,
    sys_intr_state: bool,

    host_as: AddressSpace,
    sys_as: AddressSpace,
    irqs: [IrqLine; 3],
    alerts: [IrqLine; 2],
}

impl MailboxRegs {
    fn new(args: MailboxArgs, host_as: AddressSpace, sys_as: AddressSpace) -> Self {
        Self {
            args,
            intr_state: 0,
            intr_enable: 0,
            abort: false,
            error: false,
            async_msg: false,
            busy: false,
            range_regwen: MB4_TRUE,
            range_valid: false,
            in_base: 0,
            in_limit: 0,
            in_write_ptr: 0,
            out_base: 0,
            out_limit: 0,
            out_read_ptr: 0,
            out_object_size: 0,
            sys_intr_msg_addr: 0,
            sys_intr_msg_data: 0,
            sys_int_en: false,
            sys_async_en: false,
            sys_intr_state: false,
            host_as,
            sys_as,
            irqs: Default::default(),
            alerts: Default::default(),
        }
    }

    fn attrs(&self) -> MemTxAttrs {
        MemTxAttrs::with_role(self.args.role)
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
    }

    fn pulse_alert(&self, n: usize) {
        self.alerts[n].raise();
        self.alerts[n].lower();
    }

    fn reset_pointers(&mut self) {
        self.in_write_ptr = self.in_base;
        self.out_read_ptr = self.out_base;
    }

    fn set_error(&mut self) {
        self.error = true;
        self.raise_intr(INTR_MBX_ERROR);
    }

    fn sys_status(&self) -> u32 {
        let mut val = 0;
        if self.busy {
            val |= SYS_STATUS_BUSY;
        }
        if self.sys_intr_state {
            val |= SYS_STATUS_INTR_STATE;
        }
        if self.error {
            val |= SYS_STATUS_ERROR;
        }
        if self.async_msg {
            val |= SYS_STATUS_ASYNC_MSG;
        }
        if self.out_object_size != 0 {
            val |= SYS_STATUS_READY;
        }
        val
    }

    /// Latches the system interrupt and returns the message to deliver, if
    /// any.
    fn notify_sys(&mut self) -> Option<Pending> {
        if !self.sys_int_en {
            return None;
        }
        self.sys_intr_state = true;
        (self.sys_intr_msg_addr != 0)
            .then(|| Pending::Message(self.sys_intr_msg_addr, self.sys_intr_msg_data))
    }

    fn range_locked(&self, addr: RvAddr) -> bool {
        if !mubi4_test_true_strict(self.range_regwen) {
            log::warn!("mbx: range register {addr:#x} is locked");
            return true;
        }
        false
    }

    fn host_read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        let val = match addr {
            REG_INTR_STATE => self.intr_state,
            REG_INTR_ENABLE => self.intr_enable,
            REG_INTR_TEST | REG_ALERT_TEST => 0,
            REG_CONTROL => {
                let mut val = 0;
                if self.abort {
                    val |= HOST_CONTROL_ABORT;
                }
                if self.error {
                    val |= HOST_CONTROL_ERROR;
                }
                if self.async_msg {
                    val |= HOST_CONTROL_SYS_ASYNC_MSG;
                }
                val
            }
            REG_STATUS => {
                (self.busy as u32)
                    | (self.sys_intr_state as u32) << 1
                    | (self.sys_int_en as u32) << 2
                    | (self.sys_async_en as u32) << 3
            }
            REG_ADDRESS_RANGE_REGWEN => self.range_regwen,
            REG_ADDRESS_RANGE_VALID => self.range_valid as u32,
            REG_INBOUND_BASE => self.in_base,
            REG_INBOUND_LIMIT => self.in_limit,
            REG_INBOUND_WRITE_PTR => self.in_write_ptr,
            REG_OUTBOUND_BASE => self.out_base,
            REG_OUTBOUND_LIMIT => self.out_limit,
            REG_OUTBOUND_READ_PTR => self.out_read_ptr,
            REG_OUTBOUND_OBJECT_SIZE => self.out_object_size,
            REG_DOE_INTR_MSG_ADDR => self.sys_intr_msg_addr,
            REG_DOE_INTR_MSG_DATA => self.sys_intr_msg_data,
            _ => {
                log::warn!("mbx: invalid host read at {addr:#x}");
                Err(BusError::LoadAccessFault)?
            }
        };
        Ok(val)
    }

    fn host_write(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        val: RvData,
    ) -> Result<Option<Pending>, BusError> {
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
            REG_INTR_TEST => self.raise_intr(val & INTR_MASK),
            REG_ALERT_TEST => {
                if val & 1 != 0 {
                    self.pulse_alert(ALERT_FATAL);
                }
                if val & 2 != 0 {
                    self.pulse_alert(ALERT_RECOV);
                }
            }
            REG_CONTROL => return Ok(self.host_control(val)),
            REG_STATUS | REG_INBOUND_WRITE_PTR | REG_OUTBOUND_READ_PTR => {
                log::warn!("mbx: host register {addr:#x} is read-only");
            }
            REG_DOE_INTR_MSG_ADDR | REG_DOE_INTR_MSG_DATA => {
                log::warn!("mbx: host register {addr:#x} is read-only");
            }
            REG_ADDRESS_RANGE_REGWEN => {
                if val & 0xf == MB4_FALSE {
                    self.range_regwen = MB4_FALSE;
                }
            }
            REG_ADDRESS_RANGE_VALID if !self.range_locked(addr) => {
                self.range_valid = val & 1 != 0;
                if !self.range_valid {
                    self.busy = false;
                }
                self.reset_pointers();
            }
            REG_INBOUND_BASE if !self.range_locked(addr) => {
                self.in_base = val & !3;
                self.in_write_ptr = self.in_base;
            }
            REG_INBOUND_LIMIT if !self.range_locked(addr) => self.in_limit = val & !3,
            REG_OUTBOUND_BASE if !self.range_locked(addr) => {
                self.out_base = val & !3;
                self.out_read_ptr = self.out_base;
            }
            REG_OUTBOUND_LIMIT if !self.range_locked(addr) => self.out_limit = val & !3,
            REG_ADDRESS_RANGE_VALID
            | REG_INBOUND_BASE
            | REG_INBOUND_LIMIT
            | REG_OUTBOUND_BASE
            | REG_OUTBOUND_LIMIT => {}
            REG_OUTBOUND_OBJECT_SIZE => return Ok(self.publish(val & OBJECT_SIZE_MASK)),
            _ => {
                log::warn!("mbx: invalid host write at {addr:#x}");
                Err(BusError::StoreAccessFault)?
            }
        }
        Ok(None)
    }

    fn host_control(&mut self, val: u32) -> Option<Pending> {
        if val & HOST_CONTROL_ABORT != 0 && self.abort {
            // abort acknowledged
            self.abort = false;
            self.busy = false;
            self.reset_pointers();
            log::debug!("mbx: abort done");
        }
        if val & HOST_CONTROL_ERROR != 0 && !self.error {
            log::debug!("mbx: host signals error");
            self.set_error();
        }
        let async_msg = val & HOST_CONTROL_SYS_ASYNC_MSG != 0;
        if async_msg && !self.async_msg {
            self.async_msg = true;
            if self.sys_async_en {
                return self.notify_sys();
            }
        }
        None
    }

    /// Makes a response object of `size` words available to the system.
    fn publish(&mut self, size: u32) -> Option<Pending> {
        if size == 0 {
            self.out_object_size = 0;
            return None;
        }
        if !self.range_valid {
            log::warn!("mbx: response published while disabled");
            return None;
        }
        let end = self.out_base as u64 + 4 * size as u64;
        if end > self.out_limit as u64 {
            log::warn!(
                "mbx: object of {size} words overflows outbound limit {:#x}",
                self.out_limit
            );
            self.set_error();
            return None;
        }
        self.out_object_size = size;
        self.out_read_ptr = self.out_base;
        self.notify_sys()
    }

    fn sys_read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        let val = match addr {
            SYS_INTR_MSG_ADDR => self.sys_intr_msg_addr,
            SYS_INTR_MSG_DATA => self.sys_intr_msg_data,
            SYS_CONTROL => {
                let mut val = 0;
                if self.sys_int_en {
                    val |= SYS_CONTROL_INT_EN;
                }
                if self.sys_async_en {
                    val |= SYS_CONTROL_ASYNC_MSG_EN;
                }
                val
            }
            SYS_STATUS => self.sys_status(),
            SYS_WRITE_DATA => 0,
            _ => {
                log::warn!("mbx: invalid sys read at {addr:#x}");
                Err(BusError::LoadAccessFault)?
            }
        };
        Ok(val)
    }

    fn sys_write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word {
            Err(BusError::StoreAccessFault)?
        }
        match addr {
            SYS_INTR_MSG_ADDR => self.sys_intr_msg_addr = val & !3,
            SYS_INTR_MSG_DATA => self.sys_intr_msg_data = val,
            SYS_CONTROL => self.sys_control(val),
            SYS_STATUS => {
                if val & SYS_STATUS_INTR_STATE != 0 {
                    self.sys_intr_state = false;
                }
                if val & SYS_STATUS_ASYNC_MSG != 0 {
                    self.async_msg = false;
                }
            }
            SYS_READ_DATA => log::warn!("mbx: READ_DATA is read-only"),
            _ => {
                log::warn!("mbx: invalid sys write at {addr:#x}");
                Err(BusError::StoreAccessFault)?
            }
        }
        Ok(())
    }

    fn sys_control(&mut self, val: u32) {
        self.sys_int_en = val & SYS_CONTROL_INT_EN != 0;
        self.sys_async_en = val & SYS_CONTROL_ASYNC_MSG_EN != 0;
        if val & SYS_CONTROL_ABORT != 0 {
            log::debug!("mbx: abort requested");
            self.abort = true;
            self.out_object_size = 0;
            self.busy = true;
            self.error = false;
            self.raise_intr(INTR_MBX_ABORT);
        } else if val & SYS_CONTROL_GO != 0 {
            if !self.range_valid || self.error || self.busy {
                log::warn!("mbx: GO ignored");
                return;
            }
            log::debug!(
                "mbx: request of {} words",
                self.in_write_ptr.wrapping_sub(self.in_base) / 4
            );
            self.busy = true;
            self.raise_intr(INTR_MBX_READY);
        }
    }

    /// Starts a READ_DATA access; returns the address to fetch from.
    fn begin_read(&mut self) -> Option<Pending> {
        if self.out_object_size == 0 {
            log::warn!("mbx: READ_DATA with no response object");
            return None;
        }
        Some(Pending::Fetch(self.out_read_ptr))
    }

    fn end_read(&mut self, res: Result<u32, MemTxError>) -> u32 {
        let val = match res {
            Ok(val) => val,
            Err(err) => {
                log::warn!("mbx: cannot read {:#x}: {err:?}", self.out_read_ptr);
                self.set_error();
                self.pulse_alert(ALERT_RECOV);
                return 0;
            }
        };
        self.out_read_ptr += 4;
        self.out_object_size -= 1;
        if self.out_object_size == 0 {
            self.out_read_ptr = self.out_base;
            self.busy = false;
        }
        val
    }

    /// Starts a WRITE_DATA access; returns the address to store to.
    fn begin_write(&mut self, val: u32) -> Option<Pending> {
        if !self.range_valid || self.error || self.busy {
            log::warn!("mbx: WRITE_DATA rejected");
            return None;
        }
        if self.in_write_ptr as u64 + 4 > self.in_limit as u64 {
            log::warn!("mbx: inbound buffer full at {:#x}", self.in_write_ptr);
            self.set_error();
            return None;
        }
        Some(Pending::Store(self.in_write_ptr, val))
    }

    fn end_write(&mut self, res: Result<(), MemTxError>) {
        match res {
            Ok(()) => self.in_write_ptr += 4,
            Err(err) => {
                log::warn!("mbx: cannot write {:#x}: {err:?}", self.in_write_ptr);
                self.set_error();
                self.pulse_alert(ALERT_RECOV);
            }
        }
    }

    fn reset(&mut self) {
        let irqs = std::mem::take(&mut self.irqs);
        let alerts = std::mem::take(&mut self.alerts);
        *self = Self {
            irqs,
            alerts,
            ..Self::new(
                self.args.clone(),
                self.host_as.clone(),
                self.sys_as.clone(),
            )
        };
        self.update_irqs();
    }
}

/// DOE mailbox. Clones share the same state.
#[derive(Clone)]
pub struct Mailbox {
    regs: Rc<RefCell<MailboxRegs>>,
}

impl Mailbox {
    /// `host_as` holds the message buffers, `sys_as` receives interrupt
    /// messages.
    pub fn new(args: MailboxArgs, host_as: AddressSpace, sys_as: AddressSpace) -> Self {
        Self {
            regs: Rc::new(RefCell::new(MailboxRegs::new(args, host_as, sys_as))),
        }
    }

    /// Register face of the OpenTitan side.
    pub fn host(&self) -> MailboxHost {
        MailboxHost { mbx: self.clone() }
    }

    /// Register face of the SoC side.
    pub fn sys(&self) -> MailboxSys {
        MailboxSys { mbx: self.clone() }
    }

    /// `MBX_READY` (0), `MBX_ABORT` (1) and `MBX_ERROR` (2) interrupts.
    pub fn irq(&self, n: usize) -> IrqLine {
        self.regs.borrow().irqs[n].clone()
    }

    /// Fatal (0) and recoverable (1) alerts.
    pub fn alert(&self, n: usize) -> IrqLine {
        self.regs.borrow().alerts[n].clone()
    }

    // Guest memory is accessed with the registers released so the target
    // may be any device, this one included.
    fn run(&self, pending: Option<Pending>) -> u32 {
        match pending {
            None => 0,
            Some(Pending::Fetch(addr)) => {
                let (space, attrs) = {
                    let regs = self.regs.borrow();
                    (regs.host_as.clone(), regs.attrs())
                };
                let res = space.read_u32(addr as u64, attrs);
                self.regs.borrow_mut().end_read(res)
            }
            Some(Pending::Store(addr, val)) => {
                let (space, attrs) = {
                    let regs = self.regs.borrow();
                    (regs.host_as.clone(), regs.attrs())
                };
                let res = space.write_u32(addr as u64, val, attrs);
                self.regs.borrow_mut().end_write(res);
                0
            }
            Some(Pending::Message(addr, val)) => {
                let space = self.regs.borrow().sys_as.clone();
                if let Err(err) = space.write_u32(addr as u64, val, MemTxAttrs::default()) {
                    log::warn!("mbx: cannot deliver interrupt message to {addr:#x}: {err:?}");
                }
                0
            }
        }
    }
}

/// Host register face.
pub struct MailboxHost {
    mbx: Mailbox,
}

impl Bus for MailboxHost {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        self.mbx.regs.borrow_mut().host_read(size, addr)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        let pending = self.mbx.regs.borrow_mut().host_write(size, addr, val)?;
        self.mbx.run(pending);
        Ok(())
    }

    fn warm_reset(&mut self) {
        self.mbx.regs.borrow_mut().reset()
    }
}

/// System register face.
pub struct MailboxSys {
    mbx: Mailbox,
}

impl Bus for MailboxSys {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size == RvSize::Word && addr == SYS_READ_DATA {
            let pending = self.mbx.regs.borrow_mut().begin_read();
            return Ok(self.mbx.run(pending));
        }
        self.mbx.regs.borrow_mut().sys_read(size, addr)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size == RvSize::Word && addr == SYS_WRITE_DATA {
            let pending = self.mbx.regs.borrow_mut().begin_write(val);
            self.mbx.run(pending);
            return Ok(());
        }
        self.mbx.regs.borrow_mut().sys_write(size, addr, val)
    }
}
