/*++

Licensed under the Apache-2.0 license.

File Name:

    shadow.rs

Abstract:

    File contains the shadow register: a configuration register that only
    takes a new value after two identical consecutive writes.

--*/

/// Outcome of a write to a shadow register.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShadowWrite {
    /// First write of a pair, value held in the staged half.
    Staged,

    /// Second write matched the staged value and was committed.
    Committed,

    /// Second write differed from the staged value; nothing was committed.
    Mismatch,
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct ShadowReg {
    committed: u32,
    staged: u32,
    staged_present: bool,
}

impl ShadowReg {
    pub fn new(value: u32) -> Self {
        Self {
            committed: value,
            staged: 0,
            staged_present: false,
        }
    }

    /// Resets the register to `value` and drops any staged write.
    pub fn init(&mut self, value: u32) {
        *self = Self::new(value);
    }

    pub fn write(&mut self, value: u32) -> ShadowWrite {
        if !self.staged_present {
            self.staged = value;
            self.staged_present = true;
            return ShadowWrite::Staged;
        }
        self.staged_present = false;
        if self.staged == value {
            self.committed = value;
            ShadowWrite::Committed
        } else {
            ShadowWrite::Mismatch
        }
    }

    /// Guest read: returns the committed value and discards the staged half.
    pub fn read(&mut self) -> u32 {
        self.staged_present = false;
        self.committed
    }

    /// Committed value, leaving the staged half untouched.
    pub fn peek(&self) -> u32 {
        self.committed
    }

    pub fn is_staged(&self) -> bool {
        self.staged_present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_writes_commit() {
        let mut reg = ShadowReg::new(7);
        assert_eq!(reg.write(0x55), ShadowWrite::Staged);
        assert_eq!(reg.peek(), 7);
        assert_eq!(reg.write(0x55), ShadowWrite::Committed);
        assert_eq!(reg.read(), 0x55);
    }

    #[test]
    fn test_mismatch_keeps_previous_value() {
        let mut reg = ShadowReg::new(7);
        reg.write(1);
        assert_eq!(reg.write(2), ShadowWrite::Mismatch);
        assert_eq!(reg.read(), 7);
        // the rejected pair leaves nothing staged
        assert_eq!(reg.write(3), ShadowWrite::Staged);
    }

    #[test]
    fn test_read_discards_staged_value_but_peek_does_not() {
        let mut reg = ShadowReg::new(0);
        reg.write(9);
        assert_eq!(reg.peek(), 0);
        assert!(reg.is_staged());
        assert_eq!(reg.read(), 0);
        assert!(!reg.is_staged());
        assert_eq!(reg.write(9), ShadowWrite::Staged);
    }
}
