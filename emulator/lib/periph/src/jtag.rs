/*++

Licensed under the Apache-2.0 license.

File Name:

    jtag.rs

Abstract:

    File contains the JTAG bit-bang server: the OpenOCD remote_bitbang
    character protocol driving a TAP controller.

--*/

mod tap;

pub use tap::{DataRegister, TapController, TapCtrlArgs, TapState, IR_BYPASS, IR_IDCODE};

use ot_emu_bus::{CharBackend, CharFrontend, RunControl};

pub struct JtagServer {
    tap: TapController,
    out: Box<dyn CharBackend>,
    run: RunControl,
    srst: bool,
}

impl JtagServer {
    pub fn new(tap: TapController, out: Box<dyn CharBackend>, run: RunControl) -> Self {
        Self {
            tap,
            out,
            run,
            srst: false,
        }
    }

    pub fn tap(&self) -> &TapController {
        &self.tap
    }

    pub fn tap_mut(&mut self) -> &mut TapController {
        &mut self.tap
    }

    fn command(&mut self, cmd: u8) {
        match cmd {
            b'0'..=b'7' => {
                let bits = cmd - b'0';
                self.tap
                    .write(bits & 0b100 != 0, bits & 0b010 != 0, bits & 0b001 != 0);
            }
            b'R' => {
                let tdo = if self.tap.tdo() { b'1' } else { b'0' };
                self.out.write_all(&[tdo]);
            }
            b'r'..=b'u' => {
                let bits = cmd - b'r';
                self.tap.set_trst(bits & 0b10 != 0);
                let srst = bits & 0b01 != 0;
                if srst && !self.srst {
                    log::info!("jtag: system reset requested");
                    self.run.reset();
                }
                self.srst = srst;
            }
            b'B' | b'b' => {}
            b'Q' => {
                log::info!("jtag: quit requested");
                self.run.shutdown(0);
            }
            b'\n' | b'\r' => {}
            _ => log::warn!("jtag: unknown bitbang command {cmd:#04x}"),
        }
    }
}

impl CharFrontend for JtagServer {
    fn can_receive(&self) -> usize {
        4096
    }

    fn receive(&mut self, buf: &[u8]) {
        for &cmd in buf {
            self.command(cmd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_emu_bus::{CharPipe, RunRequest};

    fn server() -> (JtagServer, CharPipe, RunControl) {
        let out = CharPipe::new();
        let run = RunControl::new();
        let tap = TapController::new(TapCtrlArgs {
            ir_length: 5,
            idcode: 0x1122_3344,
        })
        .unwrap();
        (
            JtagServer::new(tap, Box::new(out.clone()), run.clone()),
            out,
            run,
        )
    }

    /// Encodes one TCK cycle the way OpenOCD does: falling edge, optional
    /// TDO sample, rising edge.
    fn cycle(tms: bool, tdi: bool, sample: bool) -> Vec<u8> {
        let low = b'0' + ((tms as u8) << 1) + tdi as u8;
        let mut cmds = vec![low];
        if sample {
            cmds.push(b'R');
        }
        cmds.push(low + 4);
        cmds
    }

    #[test]
    fn test_idcode_scan() {
        let (mut jtag, out, _) = server();
        jtag.receive(b"tr");
        assert_eq!(jtag.tap().state(), TapState::TestLogicReset);
        for tms in [false, true, false, false] {
            jtag.receive(&cycle(tms, false, false));
        }
        assert_eq!(jtag.tap().state(), TapState::ShiftDr);
        for _ in 0..32 {
            jtag.receive(&cycle(false, false, true));
        }
        let bits = out.take();
        assert_eq!(bits.len(), 32);
        let idcode = bits
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | (u32::from(*b == b'1') << i));
        assert_eq!(idcode, 0x1122_3344);
    }

    #[test]
    fn test_reset_and_quit() {
        let (mut jtag, out, run) = server();
        jtag.receive(b"s");
        assert_eq!(run.take_request(), Some(RunRequest::Reset));
        jtag.receive(b"sr");
        assert_eq!(run.take_request(), None);

        // trst holds the TAP in reset
        jtag.receive(b"t");
        jtag.receive(&cycle(false, false, false));
        assert_eq!(jtag.tap().state(), TapState::TestLogicReset);
        jtag.receive(b"r");
        jtag.receive(&cycle(false, false, false));
        assert_eq!(jtag.tap().state(), TapState::RunTestIdle);

        jtag.receive(b"Bb\nQ");
        assert!(out.is_empty());
        assert_eq!(run.take_request(), Some(RunRequest::Shutdown(0)));
    }
}
