/*++

Licensed under the Apache-2.0 license.

File Name:

    watcher.rs

Abstract:

    File contains the MMIO watcher: an overlay region that forwards every
    access to the region it covers and reports it to the proxy client.

--*/

use super::protocol::{Channel, NOTIFY_ACCESS};
use ot_emu_bus::{AddressSpace, Bus, BusError, MappingId, MemoryRegion};
use ot_emu_types::{MemTxAttrs, RvAddr, RvData, RvSize};
use std::cell::RefCell;
use std::rc::Rc;

pub const WATCH_READ: u8 = 1 << 0;
pub const WATCH_WRITE: u8 = 1 << 1;

pub struct Watcher {
    wid: u32,
    space: AddressSpace,
    base: u64,
    flags: u8,
    /// Notifications left; `None` when unlimited
    budget: Option<u16>,
    mapping: MappingId,
    chan: Channel,
}

impl Watcher {
    /// Maps a watcher over `size` bytes at `base` in `space`. A `stop` of 0
    /// never exhausts.
    #[allow(clippy::too_many_arguments)]
    pub fn install(
        wid: u32,
        space: &AddressSpace,
        base: u64,
        size: u64,
        priority: i32,
        flags: u8,
        stop: u16,
        chan: Channel,
    ) -> Rc<RefCell<Watcher>> {
        let watcher = Rc::new(RefCell::new(Watcher {
            wid,
            space: space.clone(),
            base,
            flags,
            budget: (stop != 0).then_some(stop),
            mapping: 0,
            chan,
        }));
        let dev: Rc<RefCell<dyn Bus>> = watcher.clone();
        let id = space.map(&format!("watch{wid}"), base, size, MemoryRegion::io(dev), priority);
        watcher.borrow_mut().mapping = id;
        log::debug!("dev_proxy: watcher {wid} on {base:#x}+{size:#x}");
        watcher
    }

    pub fn wid(&self) -> u32 {
        self.wid
    }

    pub fn remove(&self) {
        self.space.unmap(self.mapping);
        log::debug!("dev_proxy: watcher {} removed", self.wid);
    }

    /// Performs the access on whatever the watcher hides.
    fn forward(
        &self,
        addr: RvAddr,
        buf: &mut [u8],
        attrs: MemTxAttrs,
        is_write: bool,
    ) -> Result<(), BusError> {
        self.space.set_enabled(self.mapping, false);
        let res = self
            .space
            .rw(self.base + u64::from(addr), attrs, buf, is_write);
        self.space.set_enabled(self.mapping, true);
        res.map_err(|_| {
            if is_write {
                BusError::StoreAccessFault
            } else {
                BusError::LoadAccessFault
            }
        })
    }

    fn report(&mut self, addr: RvAddr, size: RvSize, attrs: MemTxAttrs, write: bool, val: u32) {
        let wanted = if write { WATCH_WRITE } else { WATCH_READ };
        if self.flags & wanted == 0 {
            return;
        }
        match &mut self.budget {
            Some(0) => return,
            Some(left) => *left -= 1,
            None => {}
        }
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&self.wid.to_le_bytes());
        payload.extend_from_slice(&((self.base + u64::from(addr)) as u32).to_le_bytes());
        payload.push(attrs.role);
        payload.push(usize::from(size) as u8);
        payload.push(write as u8);
        payload.push(0);
        payload.extend_from_slice(&val.to_le_bytes());
        self.chan.notify(NOTIFY_ACCESS, &payload);
    }
}

impl Bus for Watcher {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        self.read_attrs(size, addr, MemTxAttrs::default())
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        self.write_attrs(size, addr, val, MemTxAttrs::default())
    }

    fn read_attrs(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        attrs: MemTxAttrs,
    ) -> Result<RvData, BusError> {
        let mut buf = [0u8; 4];
        self.forward(addr, &mut buf[..usize::from(size)], attrs, false)?;
        let val = u32::from_le_bytes(buf);
        self.report(addr, size, attrs, false, val);
        Ok(val)
    }

    fn write_attrs(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        val: RvData,
        attrs: MemTxAttrs,
    ) -> Result<(), BusError> {
        let len = usize::from(size);
        let mut buf = val.to_le_bytes();
        self.forward(addr, &mut buf[..len], attrs, true)?;
        self.report(addr, size, attrs, true, val);
        Ok(())
    }
}
