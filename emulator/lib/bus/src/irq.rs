/*++

Licensed under the Apache-2.0 license.

File Name:

    irq.rs

Abstract:

    File contains level-carrying signal lines (IRQs, alerts, escalations,
    pad attributes) connecting device outputs to device inputs.

--*/

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Receiver of input line levels. `input` identifies the line within the
/// receiving device.
pub trait GpioSink {
    fn set_level(&mut self, input: usize, level: i32);
}

/// A device input: non-owning reference to the sink plus the input index.
#[derive(Clone)]
pub struct GpioIn {
    sink: Weak<RefCell<dyn GpioSink>>,
    input: usize,
}

impl GpioIn {
    pub fn new<T: GpioSink + 'static>(sink: &Rc<RefCell<T>>, input: usize) -> Self {
        let sink: Rc<RefCell<dyn GpioSink>> = sink.clone();
        Self {
            sink: Rc::downgrade(&sink),
            input,
        }
    }

    pub fn from_dyn(sink: &Rc<RefCell<dyn GpioSink>>, input: usize) -> Self {
        Self {
            sink: Rc::downgrade(sink),
            input,
        }
    }

    /// Drives the input directly. Dropped silently once the sink is gone;
    /// logged if the sink is busy (a line looping back into its own device).
    pub fn set(&self, level: i32) {
        if let Some(sink) = self.sink.upgrade() {
            match sink.try_borrow_mut() {
                Ok(mut sink) => sink.set_level(self.input, level),
                Err(_) => log::error!("gpio input {} re-entered", self.input),
            };
        }
    }

    pub fn input(&self) -> usize {
        self.input
    }
}

#[derive(Default)]
struct IrqLineImpl {
    level: Cell<i32>,
    target: RefCell<Option<GpioIn>>,
    intercept: RefCell<Option<GpioIn>>,
}

/// Output line of a device. Clones share the same line.
#[derive(Clone, Default)]
pub struct IrqLine {
    inner: Rc<IrqLineImpl>,
}

impl IrqLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the line level and forwards it to the connected input (or to the
    /// interceptor, when one is installed).
    pub fn set(&self, level: i32) {
        self.inner.level.set(level);
        let target = match self.inner.intercept.borrow().as_ref() {
            Some(intercept) => Some(intercept.clone()),
            None => self.inner.target.borrow().clone(),
        };
        if let Some(target) = target {
            target.set(level);
        }
    }

    pub fn raise(&self) {
        self.set(1)
    }

    pub fn lower(&self) {
        self.set(0)
    }

    /// Convenience for boolean lines.
    pub fn set_bool(&self, level: bool) {
        self.set(level as i32)
    }

    pub fn level(&self) -> i32 {
        self.inner.level.get()
    }

    pub fn is_high(&self) -> bool {
        self.level() != 0
    }

    pub fn connect(&self, input: GpioIn) {
        *self.inner.target.borrow_mut() = Some(input);
    }

    pub fn disconnect(&self) {
        *self.inner.target.borrow_mut() = None;
    }

    /// Redirects the line to `input` until [`IrqLine::release_intercept`].
    pub fn intercept(&self, input: GpioIn) {
        *self.inner.intercept.borrow_mut() = Some(input);
    }

    pub fn release_intercept(&self) {
        *self.inner.intercept.borrow_mut() = None;
    }

    pub fn is_intercepted(&self) -> bool {
        self.inner.intercept.borrow().is_some()
    }
}
