/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the OpenTitan Emulator Bus library.

--*/
mod address_space;
mod bus;
mod chardev;
mod clock;
mod irq;
mod ram;
mod register;
mod run_control;
pub mod testing;

pub use crate::address_space::{AddressSpace, MappingId, MemoryRegion, Section, WeakAddressSpace};
pub use crate::bus::{Bus, BusError};
pub use crate::chardev::{pump, CharBackend, CharFrontend, CharPipe};
pub use crate::clock::{cycles_to_ns, ActionHandle, Clock, Timer, TimerAction, NANOS_PER_SEC};
pub use crate::irq::{GpioIn, GpioSink, IrqLine};
pub use crate::ram::Ram;
pub use crate::register::{ReadOnlyRegister, ReadWriteRegister};
pub use crate::run_control::{RunControl, RunRequest};
