/*++

Licensed under the Apache-2.0 license.

File Name:

    log.rs

Abstract:

    File contains a shared text log for recording device activity in unit
    tests.

--*/
use std::{cell::RefCell, fmt::Write, rc::Rc};

/// Append-only text log writable through a shared reference. Clones share
/// the same buffer, so fakes can record into a log that the test inspects.
///
/// * Example
///
/// ```
/// use ot_emu_bus::testing::Log;
/// use std::fmt::Write;
///
/// let log = Log::new();
/// writeln!(log.w(), "poll()").unwrap();
/// writeln!(log.w(), "poll()").unwrap();
/// assert_eq!(log.take_lines(), vec!["poll()", "poll()"]);
/// assert!(log.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct Log {
    text: Rc<RefCell<String>>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current content.
    pub fn contents(&self) -> String {
        self.text.borrow().clone()
    }

    /// Empties the log and returns what it held.
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.text.borrow_mut())
    }

    /// Empties the log and returns its lines.
    pub fn take_lines(&self) -> Vec<String> {
        self.take().lines().map(str::to_owned).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.text.borrow().is_empty()
    }

    /// Writer usable with `write!()` and `writeln!()`.
    pub fn w(&self) -> impl Write + '_ {
        LogWriter { text: &self.text }
    }
}

struct LogWriter<'a> {
    text: &'a RefCell<String>,
}

impl Write for LogWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.text.borrow_mut().push_str(s);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_buffer() {
        let log = Log::new();
        writeln!(log.clone().w(), "Line 1").unwrap();
        write!(log.w(), "Line {}", 2).unwrap();
        assert_eq!(log.contents(), "Line 1\nLine 2");
        assert_eq!(log.take(), "Line 1\nLine 2");
        assert_eq!(log.take(), "");
    }
}
