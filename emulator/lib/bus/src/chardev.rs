/*++

Licensed under the Apache-2.0 license.

File Name:

    chardev.rs

Abstract:

    File contains the character device interfaces: byte-stream frontends
    (devices consuming host input) and backends (sinks for device output).

--*/

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A device that consumes a host byte stream.
pub trait CharFrontend {
    /// Number of bytes the device is willing to accept right now. Zero
    /// pauses the stream until a later poll.
    fn can_receive(&self) -> usize;

    /// Delivers at most `can_receive()` bytes.
    fn receive(&mut self, buf: &[u8]);
}

/// Output side of a character channel.
pub trait CharBackend {
    fn write_all(&mut self, buf: &[u8]);
}

/// In-memory character channel. Clones share the same buffer so a test (or
/// the host loop) can drain what a device wrote.
#[derive(Clone, Default)]
pub struct CharPipe {
    buf: Rc<RefCell<VecDeque<u8>>>,
}

impl CharPipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every pending byte.
    pub fn take(&self) -> Vec<u8> {
        self.buf.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.buf.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.borrow().is_empty()
    }
}

impl CharBackend for CharPipe {
    fn write_all(&mut self, buf: &[u8]) {
        self.buf.borrow_mut().extend(buf.iter().copied());
    }
}

/// Feeds `input` into `frontend` for as long as the frontend accepts bytes.
/// Returns the number of bytes consumed.
pub fn pump(frontend: &mut dyn CharFrontend, input: &mut VecDeque<u8>) -> usize {
    let mut consumed = 0;
    loop {
        let n = frontend.can_receive().min(input.len());
        if n == 0 {
            break;
        }
        let chunk: Vec<u8> = input.drain(..n).collect();
        frontend.receive(&chunk);
        consumed += n;
    }
    consumed
}
