/*++

Licensed under the Apache-2.0 license.

File Name:

    bus.rs

Abstract:

    File contains definition of the Bus trait.

--*/

use ot_emu_types::{MemTxAttrs, RvAddr, RvData, RvSize};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BusError {
    /// Load address misaligned exception
    LoadAddrMisaligned,

    /// Load access fault exception
    LoadAccessFault,

    /// Store address misaligned exception
    StoreAddrMisaligned,

    /// Store access fault exception
    StoreAccessFault,
}

/// Represents an abstract memory bus. Used to read and write from RAM and
/// peripheral addresses.
pub trait Bus {
    /// Read data of specified size from given address
    ///
    /// # Arguments
    ///
    /// * `size` - Size of the read
    /// * `addr` - Address to read from
    ///
    /// # Error
    ///
    /// * `BusError` - Exception with cause `BusError::LoadAccessFault` or `BusError::LoadAddrMisaligned`
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError>;

    /// Write data of specified size to given address
    ///
    /// # Arguments
    ///
    /// * `size` - Size of the write
    /// * `addr` - Address to write
    /// * `val` - Data to write
    ///
    /// # Error
    ///
    /// * `BusError` - Exception with cause `BusError::StoreAccessFault` or `BusError::StoreAddrMisaligned`
    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError>;

    /// Read carrying the initiator's transaction attributes. Devices that do
    /// not care about the initiator keep the default.
    fn read_attrs(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        _attrs: MemTxAttrs,
    ) -> Result<RvData, BusError> {
        self.read(size, addr)
    }

    /// Write carrying the initiator's transaction attributes.
    fn write_attrs(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        val: RvData,
        _attrs: MemTxAttrs,
    ) -> Result<(), BusError> {
        self.write(size, addr, val)
    }

    /// This method is used to notify peripherals of the passage of time. The
    /// owner of this bus MAY call this function periodically, or in response to
    /// a previously scheduled timer event.
    fn poll(&mut self) {
        // By default, do nothing
    }

    /// Restore the power-on register state.
    fn warm_reset(&mut self) {
        // By default, do nothing
    }
}

impl<T: Bus + ?Sized> Bus for Box<T> {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        T::read(self, size, addr)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        T::write(self, size, addr, val)
    }

    fn read_attrs(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        attrs: MemTxAttrs,
    ) -> Result<RvData, BusError> {
        T::read_attrs(self, size, addr, attrs)
    }

    fn write_attrs(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        val: RvData,
        attrs: MemTxAttrs,
    ) -> Result<(), BusError> {
        T::write_attrs(self, size, addr, val, attrs)
    }

    fn poll(&mut self) {
        T::poll(self)
    }

    fn warm_reset(&mut self) {
        T::warm_reset(self)
    }
}

/// Shared devices are reachable from several owners (root bus, address
/// spaces, the device proxy). Each access borrows the device for its
/// duration only.
impl<T: Bus + ?Sized> Bus for Rc<RefCell<T>> {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        self.borrow_mut().read(size, addr)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        self.borrow_mut().write(size, addr, val)
    }

    fn read_attrs(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        attrs: MemTxAttrs,
    ) -> Result<RvData, BusError> {
        self.borrow_mut().read_attrs(size, addr, attrs)
    }

    fn write_attrs(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        val: RvData,
        attrs: MemTxAttrs,
    ) -> Result<(), BusError> {
        self.borrow_mut().write_attrs(size, addr, val, attrs)
    }

    fn poll(&mut self) {
        self.borrow_mut().poll()
    }

    fn warm_reset(&mut self) {
        self.borrow_mut().warm_reset()
    }
}
