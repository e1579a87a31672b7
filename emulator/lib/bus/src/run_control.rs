/*++

Licensed under the Apache-2.0 license.

File Name:

    run_control.rs

Abstract:

    File contains the run control shared between the host loop and the
    devices that can stop, reset or resume the machine.

--*/

use std::cell::RefCell;
use std::rc::Rc;

/// Pending request made by a device to the host loop.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RunRequest {
    /// Terminate the emulator with the given exit code.
    Shutdown(i32),

    /// Reset the whole system.
    Reset,
}

#[derive(Default)]
struct RunState {
    request: Option<RunRequest>,
    stopped: bool,
}

#[derive(Clone, Default)]
pub struct RunControl {
    state: Rc<RefCell<RunState>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests termination. The first shutdown request wins.
    pub fn shutdown(&self, code: i32) {
        let mut state = self.state.borrow_mut();
        if !matches!(state.request, Some(RunRequest::Shutdown(_))) {
            log::info!("shutdown requested, exit code {code}");
            state.request = Some(RunRequest::Shutdown(code));
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.borrow_mut();
        if state.request.is_none() {
            state.request = Some(RunRequest::Reset);
        }
    }

    /// Removes and returns the pending request.
    pub fn take_request(&self) -> Option<RunRequest> {
        self.state.borrow_mut().request.take()
    }

    pub fn pending(&self) -> Option<RunRequest> {
        self.state.borrow().request
    }

    pub fn stop(&self) {
        self.state.borrow_mut().stopped = true;
    }

    pub fn resume(&self) {
        self.state.borrow_mut().stopped = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.state.borrow().stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_shutdown_wins() {
        let rc = RunControl::new();
        rc.reset();
        rc.shutdown(3);
        rc.clone().shutdown(5);
        assert_eq!(rc.take_request(), Some(RunRequest::Shutdown(3)));
        assert_eq!(rc.take_request(), None);
    }

    #[test]
    fn test_stop_resume() {
        let rc = RunControl::new();
        rc.stop();
        assert!(rc.is_stopped());
        rc.resume();
        assert!(!rc.is_stopped());
    }
}
