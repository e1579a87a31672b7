/*++

Licensed under the Apache-2.0 license.

File Name:

    address_space.rs

Abstract:

    File contains the AddressSpace type: a prioritized set of memory region
    mappings with alias windows and transactional updates, used by bus
    masters (DMA, mailboxes, the device proxy) and by the CPU-side root bus.

--*/

use crate::{Bus, Ram};
use ot_emu_types::{MemTxAttrs, MemTxError, MemTxResult, RvAddr, RvSize};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Backing object of a mapping.
#[derive(Clone)]
pub enum MemoryRegion {
    /// Plain memory, accessed by copy.
    Ram(Rc<RefCell<Ram>>),

    /// Register or trapped region, accessed through the `Bus` trait.
    Io {
        dev: Rc<RefCell<dyn Bus>>,
        min_access: RvSize,
        max_access: RvSize,
    },

    /// Window into another address space starting at `base`.
    Alias { space: WeakAddressSpace, base: u64 },
}

impl MemoryRegion {
    pub fn ram(ram: Rc<RefCell<Ram>>) -> Self {
        MemoryRegion::Ram(ram)
    }

    /// I/O region accepting any access size from a byte to a word.
    pub fn io(dev: Rc<RefCell<dyn Bus>>) -> Self {
        MemoryRegion::Io {
            dev,
            min_access: RvSize::Byte,
            max_access: RvSize::Word,
        }
    }

    /// I/O region accepting word accesses only (register blocks).
    pub fn io_words(dev: Rc<RefCell<dyn Bus>>) -> Self {
        MemoryRegion::Io {
            dev,
            min_access: RvSize::Word,
            max_access: RvSize::Word,
        }
    }

    pub fn is_ram(&self) -> bool {
        matches!(self, MemoryRegion::Ram(_))
    }

    /// Whether the region accepts accesses of `size`.
    pub fn supports(&self, size: RvSize) -> bool {
        match self {
            MemoryRegion::Io {
                min_access,
                max_access,
                ..
            } => {
                let size = usize::from(size);
                size >= usize::from(*min_access) && size <= usize::from(*max_access)
            }
            _ => true,
        }
    }
}

/// Resolved target of an access: the region and the offset inside it.
#[derive(Clone)]
pub struct Section {
    /// Name of the mapping that decoded the address
    pub name: String,

    /// Absolute base of the mapping in the address space
    pub base: u64,

    pub region: MemoryRegion,

    /// Offset of the accessed address within `region`
    pub offset: u64,

    /// Bytes available in the region from `offset`
    pub size: u64,
}

#[derive(Clone)]
struct Mapping {
    id: u64,
    name: String,
    base: u64,
    size: u64,
    priority: i32,
    region: MemoryRegion,
    enabled: bool,
}

impl Mapping {
    fn contains(&self, addr: u64) -> bool {
        self.enabled && addr >= self.base && addr - self.base < self.size
    }
}

struct AddressSpaceImpl {
    name: String,
    mappings: Vec<Mapping>,
    pending: Option<Vec<Mapping>>,
    depth: usize,
    next_id: u64,
}

impl AddressSpaceImpl {
    fn staging(&mut self) -> &mut Vec<Mapping> {
        match self.pending {
            Some(ref mut pending) => pending,
            None => &mut self.mappings,
        }
    }

    fn lookup(&self, addr: u64) -> Option<&Mapping> {
        // highest priority wins, the most recent mapping breaks ties
        self.mappings
            .iter()
            .filter(|m| m.contains(addr))
            .fold(None, |best: Option<&Mapping>, m| match best {
                Some(b) if b.priority > m.priority => Some(b),
                _ => Some(m),
            })
    }
}

/// Non-owning reference to an address space, used by alias windows.
#[derive(Clone)]
pub struct WeakAddressSpace {
    inner: Weak<RefCell<AddressSpaceImpl>>,
}

impl WeakAddressSpace {
    pub fn upgrade(&self) -> Option<AddressSpace> {
        self.inner.upgrade().map(|inner| AddressSpace { inner })
    }
}

/// Identifies a mapping in an address space.
pub type MappingId = u64;

#[derive(Clone)]
pub struct AddressSpace {
    inner: Rc<RefCell<AddressSpaceImpl>>,
}

impl AddressSpace {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Rc::new(RefCell::new(AddressSpaceImpl {
                name: name.into(),
                mappings: Vec::new(),
                pending: None,
                depth: 0,
                next_id: 1,
            })),
        }
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn downgrade(&self) -> WeakAddressSpace {
        WeakAddressSpace {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Opens a transaction: mapping changes are staged until the matching
    /// [`AddressSpace::commit`].
    pub fn begin(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.pending.is_none() {
            inner.pending = Some(inner.mappings.clone());
        }
        inner.depth += 1;
    }

    /// Closes a transaction; staged changes become visible when the
    /// outermost transaction is committed.
    pub fn commit(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.depth = inner.depth.saturating_sub(1);
        if inner.depth == 0 {
            if let Some(pending) = inner.pending.take() {
                inner.mappings = pending;
            }
        }
    }

    /// Runs `f` inside a transaction.
    pub fn transaction<R>(&self, f: impl FnOnce(&AddressSpace) -> R) -> R {
        self.begin();
        let result = f(self);
        self.commit();
        result
    }

    /// Maps `region` at `base`. On overlap the highest `priority` wins.
    pub fn map(
        &self,
        name: &str,
        base: u64,
        size: u64,
        region: MemoryRegion,
        priority: i32,
    ) -> MappingId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.staging().push(Mapping {
            id,
            name: name.into(),
            base,
            size,
            priority,
            region,
            enabled: true,
        });
        id
    }

    /// Maps a window of `size` bytes at `base` onto `target` starting at
    /// `target_base`.
    pub fn map_alias(
        &self,
        name: &str,
        base: u64,
        size: u64,
        target: &AddressSpace,
        target_base: u64,
        priority: i32,
    ) -> MappingId {
        let region = MemoryRegion::Alias {
            space: target.downgrade(),
            base: target_base,
        };
        self.map(name, base, size, region, priority)
    }

    pub fn set_enabled(&self, id: MappingId, enabled: bool) {
        let mut inner = self.inner.borrow_mut();
        if let Some(m) = inner.staging().iter_mut().find(|m| m.id == id) {
            m.enabled = enabled;
        }
    }

    /// Replaces the backing region of an existing mapping.
    pub fn set_region(&self, id: MappingId, region: MemoryRegion) {
        let mut inner = self.inner.borrow_mut();
        if let Some(m) = inner.staging().iter_mut().find(|m| m.id == id) {
            m.region = region;
        }
    }

    pub fn unmap(&self, id: MappingId) {
        self.inner.borrow_mut().staging().retain(|m| m.id != id);
    }

    /// Returns the mapped (name, base, size) triplets in mapping order.
    pub fn regions(&self) -> Vec<(String, u64, u64)> {
        self.inner
            .borrow()
            .mappings
            .iter()
            .filter(|m| m.enabled)
            .map(|m| (m.name.clone(), m.base, m.size))
            .collect()
    }

    /// Finds the section decoding `addr`, following alias windows. Returns
    /// `None` when nothing decodes the address or when the section is
    /// shorter than `len`.
    pub fn find_region(&self, addr: u64, len: u64) -> Option<Section> {
        self.find_region_depth(addr, len, 0)
    }

    fn find_region_depth(&self, addr: u64, len: u64, depth: usize) -> Option<Section> {
        if depth > 8 {
            log::error!("{}: alias loop at {addr:#x}", self.name());
            return None;
        }
        let (mapping_name, mapping_base, region, offset, avail) = {
            let inner = self.inner.borrow();
            let m = inner.lookup(addr)?;
            let offset = addr - m.base;
            (
                m.name.clone(),
                m.base,
                m.region.clone(),
                offset,
                m.size - offset,
            )
        };
        if avail < len {
            return None;
        }
        match region {
            MemoryRegion::Alias { space, base } => {
                let target = space.upgrade()?;
                let mut section = target.find_region_depth(base + offset, len, depth + 1)?;
                section.size = section.size.min(avail);
                Some(section)
            }
            region => Some(Section {
                name: mapping_name,
                base: mapping_base,
                region,
                offset,
                size: avail,
            }),
        }
    }

    /// Reads `buf.len()` bytes starting at `addr`.
    pub fn read(&self, addr: u64, buf: &mut [u8], attrs: MemTxAttrs) -> MemTxResult {
        let mut done = 0usize;
        while done < buf.len() {
            let cur = addr + done as u64;
            let section = self.find_region(cur, 1).ok_or(MemTxError::Decode)?;
            let chunk = (buf.len() - done).min(section.size as usize);
            read_section(&section, &mut buf[done..done + chunk], attrs)?;
            done += chunk;
        }
        Ok(())
    }

    /// Writes `buf` starting at `addr`.
    pub fn write(&self, addr: u64, buf: &[u8], attrs: MemTxAttrs) -> MemTxResult {
        let mut done = 0usize;
        while done < buf.len() {
            let cur = addr + done as u64;
            let section = self.find_region(cur, 1).ok_or(MemTxError::Decode)?;
            let chunk = (buf.len() - done).min(section.size as usize);
            write_section(&section, &buf[done..done + chunk], attrs)?;
            done += chunk;
        }
        Ok(())
    }

    /// Reads or writes depending on `is_write`.
    pub fn rw(&self, addr: u64, attrs: MemTxAttrs, buf: &mut [u8], is_write: bool) -> MemTxResult {
        if is_write {
            self.write(addr, buf, attrs)
        } else {
            self.read(addr, buf, attrs)
        }
    }

    pub fn read_u32(&self, addr: u64, attrs: MemTxAttrs) -> Result<u32, MemTxError> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf, attrs)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u32(&self, addr: u64, val: u32, attrs: MemTxAttrs) -> MemTxResult {
        self.write(addr, &val.to_le_bytes(), attrs)
    }
}

fn io_size(region: &MemoryRegion, offset: u64, remaining: usize) -> RvSize {
    let size = RvSize::for_access(offset, remaining);
    match region {
        MemoryRegion::Io {
            min_access,
            max_access,
            ..
        } => {
            if usize::from(size) > usize::from(*max_access) {
                *max_access
            } else if usize::from(size) < usize::from(*min_access) {
                *min_access
            } else {
                size
            }
        }
        _ => size,
    }
}

fn read_section(section: &Section, buf: &mut [u8], attrs: MemTxAttrs) -> MemTxResult {
    match &section.region {
        MemoryRegion::Ram(ram) => {
            let ram = ram.borrow();
            let start = section.offset as usize;
            let src = ram
                .data()
                .get(start..start + buf.len())
                .ok_or(MemTxError::Access)?;
            buf.copy_from_slice(src);
            Ok(())
        }
        MemoryRegion::Io { dev, .. } => {
            let mut dev = dev.try_borrow_mut().map_err(|_| {
                log::warn!("{}: re-entrant access rejected", section.name);
                MemTxError::Access
            })?;
            let mut pos = 0usize;
            while pos < buf.len() {
                let offset = section.offset + pos as u64;
                let size = io_size(&section.region, offset, buf.len() - pos);
                let len = usize::from(size);
                if pos + len > buf.len() {
                    return Err(MemTxError::Access);
                }
                let val = dev
                    .read_attrs(size, offset as RvAddr, attrs)
                    .map_err(|_| MemTxError::Access)?;
                buf[pos..pos + len].copy_from_slice(&val.to_le_bytes()[..len]);
                pos += len;
            }
            Ok(())
        }
        MemoryRegion::Alias { .. } => Err(MemTxError::Decode),
    }
}

fn write_section(section: &Section, buf: &[u8], attrs: MemTxAttrs) -> MemTxResult {
    match &section.region {
        MemoryRegion::Ram(ram) => {
            let mut ram = ram.borrow_mut();
            let start = section.offset as usize;
            let dst = ram
                .data_mut()
                .get_mut(start..start + buf.len())
                .ok_or(MemTxError::Access)?;
            dst.copy_from_slice(buf);
            Ok(())
        }
        MemoryRegion::Io { dev, .. } => {
            let mut dev = dev.try_borrow_mut().map_err(|_| {
                log::warn!("{}: re-entrant access rejected", section.name);
                MemTxError::Access
            })?;
            let mut pos = 0usize;
            while pos < buf.len() {
                let offset = section.offset + pos as u64;
                let size = io_size(&section.region, offset, buf.len() - pos);
                let len = usize::from(size);
                if pos + len > buf.len() {
                    return Err(MemTxError::Access);
                }
                let mut word = [0u8; 4];
                word[..len].copy_from_slice(&buf[pos..pos + len]);
                dev.write_attrs(size, offset as RvAddr, u32::from_le_bytes(word), attrs)
                    .map_err(|_| MemTxError::Access)?;
                pos += len;
            }
            Ok(())
        }
        MemoryRegion::Alias { .. } => Err(MemTxError::Decode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBus;

    fn ram(size: usize) -> Rc<RefCell<Ram>> {
        Rc::new(RefCell::new(Ram::zeroed(size)))
    }

    #[test]
    fn test_ram_read_write() {
        let space = AddressSpace::new("test");
        let mem = ram(0x100);
        space.map("ram", 0x1000, 0x100, MemoryRegion::ram(mem.clone()), 0);
        assert_eq!(
            space.write(0x1010, &[1, 2, 3, 4, 5], MemTxAttrs::default()),
            Ok(())
        );
        assert_eq!(&mem.borrow().data()[0x10..0x15], &[1, 2, 3, 4, 5]);
        assert_eq!(
            space.read_u32(0x1010, MemTxAttrs::default()),
            Ok(0x0403_0201)
        );
        assert_eq!(
            space.read_u32(0x2000, MemTxAttrs::default()),
            Err(MemTxError::Decode)
        );
    }

    #[test]
    fn test_priority_overlap() {
        let space = AddressSpace::new("test");
        let low = ram(0x100);
        let high = ram(0x10);
        high.borrow_mut().data_mut()[0] = 0xaa;
        space.map("low", 0, 0x100, MemoryRegion::ram(low), 0);
        let id = space.map("high", 0x20, 0x10, MemoryRegion::ram(high), 1);
        let mut b = [0u8; 1];
        space.read(0x20, &mut b, MemTxAttrs::default()).unwrap();
        assert_eq!(b[0], 0xaa);
        space.set_enabled(id, false);
        space.read(0x20, &mut b, MemTxAttrs::default()).unwrap();
        assert_eq!(b[0], 0);
        assert_eq!(space.find_region(0x20, 1).unwrap().name, "low");
    }

    #[test]
    fn test_transaction_defers_changes() {
        let space = AddressSpace::new("test");
        space.begin();
        space.map("ram", 0, 0x10, MemoryRegion::ram(ram(0x10)), 0);
        assert!(space.find_region(0, 4).is_none());
        space.commit();
        assert!(space.find_region(0, 4).is_some());
        assert!(space.find_region(0xe, 4).is_none());
    }

    #[test]
    fn test_alias_window() {
        let space = AddressSpace::new("test");
        let mem = ram(0x100);
        mem.borrow_mut().data_mut()[0x80] = 0x5a;
        space.map("ram", 0x1000, 0x100, MemoryRegion::ram(mem), 0);
        space.map_alias("remap", 0x0, 0x40, &space, 0x1080, 1);
        let mut b = [0u8; 1];
        space.read(0x0, &mut b, MemTxAttrs::default()).unwrap();
        assert_eq!(b[0], 0x5a);
        let section = space.find_region(0x0, 4).unwrap();
        assert_eq!(section.offset, 0x80);
        assert_eq!(section.size, 0x40);
    }

    #[test]
    fn test_io_region_word_split() {
        let space = AddressSpace::new("test");
        let bus = Rc::new(RefCell::new(FakeBus::new()));
        bus.borrow_mut().read_result = Ok(0x11223344);
        space.map("io", 0x100, 0x10, MemoryRegion::io_words(bus.clone()), 0);
        let mut buf = [0u8; 8];
        space.read(0x100, &mut buf, MemTxAttrs::default()).unwrap();
        assert_eq!(buf, [0x44, 0x33, 0x22, 0x11, 0x44, 0x33, 0x22, 0x11]);
        assert_eq!(
            bus.borrow().log.take(),
            "read(RvSize::Word, 0x0)\nread(RvSize::Word, 0x4)\n"
        );
        assert!(!space.find_region(0x100, 4).unwrap().region.supports(RvSize::Byte));
    }
}
