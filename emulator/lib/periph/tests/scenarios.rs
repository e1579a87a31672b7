/*++

Licensed under the Apache-2.0 license.

File Name:

    scenarios.rs

Abstract:

    End-to-end scenarios driven through the reference machine.

--*/

use ot_emu_bus::{pump, Bus, CharFrontend, CharPipe, Clock, RunControl, RunRequest};
use ot_emu_periph::dev_proxy::{Header, HEADER_SIZE};
use ot_emu_periph::spi_device::{encode_header, HEADER_SIZE as SPI_HEADER_SIZE};
use ot_emu_periph::{
    ClassState, DevProxy, DevProxyArgs, JtagServer, OtRootBus, OtRootBusArgs, TapController,
    TapCtrlArgs, TapState,
};
use ot_emu_types::{MemTxAttrs, RvSize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

struct Machine {
    clock: Clock,
    bus: OtRootBus,
    run: RunControl,
}

impl Machine {
    fn new() -> Self {
        let clock = Clock::new();
        let run = RunControl::new();
        let bus = OtRootBus::new(
            &clock,
            OtRootBusArgs {
                entropy_seed: Some(0x5eed),
                ..Default::default()
            },
            run.clone(),
        )
        .unwrap();
        Self { clock, bus, run }
    }

    fn w(&mut self, addr: u32, val: u32) {
        self.bus.write(RvSize::Word, addr, val).unwrap();
    }

    fn r(&mut self, addr: u32) -> u32 {
        self.bus.read(RvSize::Word, addr).unwrap()
    }

    /// Double write committing a shadowed register.
    fn shadow(&mut self, addr: u32, val: u32) {
        self.w(addr, val);
        self.w(addr, val);
    }

    fn advance(&mut self, ns: u64) {
        let end = self.clock.now() + ns;
        while self.clock.now() < end {
            self.clock.step(end - self.clock.now(), &mut self.bus);
        }
    }
}

#[test]
fn alert_escalation_reaches_terminal() {
    const N_ALERTS: u32 = 65;
    const CLASS_A_CTRL: u32 = 0x1 | 0x3c | (1 << 8) | (2 << 10) | (3 << 12);
    let mut m = Machine::new();
    let base = OtRootBus::ALERT_HANDLER_BASE;
    let class_a = base + m.bus.alert_handler.class_offset(0);

    m.shadow(base + 0x18 + 4 * N_ALERTS, 1);
    m.shadow(base + 0x18 + 8 * N_ALERTS, 0);
    m.shadow(class_a + 4, CLASS_A_CTRL);
    m.shadow(class_a + 4 * 5, 0);
    for (k, cyc) in [10, 20, 30, 40].into_iter().enumerate() {
        m.shadow(class_a + 4 * (8 + k as u32), cyc);
    }

    m.w(OtRootBus::SRAM_BASE, 0x1234_5678);
    assert_eq!(m.r(OtRootBus::SRAM_BASE), 0x1234_5678);

    let esc = |m: &Machine| [0, 1, 2, 3].map(|k| m.bus.alert_handler.esc(k).is_high());
    m.bus.alert_handler.alert_input(0).set(1);
    assert_eq!(m.bus.alert_handler.class_state(0), ClassState::Phase(0));
    assert_eq!(esc(&m), [true, false, false, false]);

    // 10 cycles at 50 MHz
    m.advance(200);
    assert_eq!(m.bus.alert_handler.class_state(0), ClassState::Phase(1));
    m.advance(1);
    assert_eq!(esc(&m), [false, true, false, false]);
    // escalation 1 disables the main SRAM
    assert_eq!(
        m.bus.read(RvSize::Word, OtRootBus::SRAM_BASE).err(),
        Some(ot_emu_bus::BusError::LoadAccessFault)
    );

    m.advance(20 * 20 + 30 * 20);
    assert_eq!(m.bus.alert_handler.class_state(0), ClassState::Phase(3));
    m.advance(40 * 20);
    assert_eq!(m.bus.alert_handler.class_state(0), ClassState::Terminal);
    assert_eq!(esc(&m), [false, false, false, true]);
    assert!(!m.bus.alert_handler.has_pending_timer(0));
}

#[test]
fn sram_access_during_init_completes_it() {
    let mut m = Machine::new();
    let ctrl = OtRootBus::SRAM_CTRL_BASE;
    m.w(ctrl + 0x14, 0x3);
    assert!(!m.bus.sram.is_initialized());

    let byte = m.bus.read(RvSize::Byte, OtRootBus::SRAM_BASE).unwrap();
    assert!(m.bus.sram.is_initialized());
    assert_eq!(byte, u32::from(m.bus.sram.ram().borrow().data()[0]));
    // INIT_DONE
    assert_ne!(m.r(ctrl + 0x4) & (1 << 5), 0);
}

#[test]
fn dma_copy_with_sha256() {
    let mut m = Machine::new();
    let dma = OtRootBus::DMA_BASE;
    let src = OtRootBus::SRAM_BASE;
    let dst = OtRootBus::SRAM_BASE + 0x100;
    let data: Vec<u8> = (0..64).collect();
    for (i, word) in data.chunks(4).enumerate() {
        m.w(src + 4 * i as u32, u32::from_le_bytes(word.try_into().unwrap()));
    }

    m.w(dma + 0x04, 0x7);
    m.w(dma + 0x10, src);
    m.w(dma + 0x14, 0);
    m.w(dma + 0x18, dst);
    m.w(dma + 0x1c, 0);
    m.w(dma + 0x20, 0x77);
    m.w(dma + 0x38, 64);
    m.w(dma + 0x3c, 64);
    m.w(dma + 0x40, 2);
    m.w(dma + 0x2c, 1);
    m.w(dma + 0x44, 1 | (1 << 8) | (1 << 31));

    m.clock.increment_and_process_timer_actions(1000, &mut m.bus);
    assert_eq!(m.r(dma), 1);
    assert!(m.bus.dma.irq(0).is_high());

    let copied: Vec<u8> = (0..16)
        .flat_map(|i| m.r(dst + 4 * i).to_le_bytes())
        .collect();
    assert_eq!(copied, data);
    let digest: Vec<u8> = (0..8)
        .flat_map(|i| m.r(dma + 0x58 + 4 * i).to_be_bytes())
        .collect();
    assert_eq!(digest, Sha256::digest(&data).to_vec());
}

#[test]
fn doe_mailbox_round_trip() {
    const SYS_CONTROL: u32 = 0x08;
    const SYS_STATUS: u32 = 0x0c;
    const SYS_WRITE_DATA: u32 = 0x10;
    const SYS_READ_DATA: u32 = 0x14;
    const READY: u32 = 1 << 31;
    let mut m = Machine::new();
    let host = OtRootBus::MBX_BASE;
    let sram = OtRootBus::SRAM_BASE;
    let soc = m.bus.soc.clone();
    let sys = |off: u32| u64::from(OtRootBus::SOC_MBX_BASE + off);
    let attrs = MemTxAttrs::default();

    m.w(host + 0x20, sram);
    m.w(host + 0x24, sram + 1024);
    m.w(host + 0x2c, sram + 1024);
    m.w(host + 0x30, sram + 2048);
    m.w(host + 0x1c, 1);
    m.w(host + 0x04, 0x7);

    for i in 0..4 {
        soc.write_u32(sys(SYS_WRITE_DATA), 0xdead_0000 + i, attrs)
            .unwrap();
    }
    soc.write_u32(sys(SYS_CONTROL), 1 << 31, attrs).unwrap();
    assert!(m.bus.mbx.irq(0).is_high());
    for i in 0..4 {
        assert_eq!(m.r(sram + 4 * i), 0xdead_0000 + i);
    }

    for i in 0..4 {
        m.w(sram + 1024 + 4 * i, 0xbeef_0000 + i);
    }
    m.w(host + 0x38, 4);
    let mut got = vec![];
    for _ in 0..4 {
        let status = soc.read_u32(sys(SYS_STATUS), attrs).unwrap();
        assert_ne!(status & READY, 0);
        got.push(soc.read_u32(sys(SYS_READ_DATA), attrs).unwrap());
    }
    assert_eq!(got, [0xbeef_0000, 0xbeef_0001, 0xbeef_0002, 0xbeef_0003]);
    assert_eq!(soc.read_u32(sys(SYS_STATUS), attrs).unwrap() & READY, 0);
}

#[test]
fn spi_fast_read_and_flip() {
    const INTR_READBUF_FLIP: u32 = 1 << 4;
    let mut m = Machine::new();
    let spi = OtRootBus::SPI_DEVICE_BASE;
    let pattern = |addr: u32| (addr as u8) ^ ((addr >> 8) as u8).wrapping_mul(0x35);
    // flash mode
    m.w(spi + 0x10, 1 << 4);
    m.w(spi + 0x48, 0x200);
    for i in 0..0x200u32 {
        let word = [0, 1, 2, 3].map(|b| pattern(4 * i + b));
        m.w(spi + 0x1000 + 4 * i, u32::from_le_bytes(word));
    }

    let send = |m: &mut Machine, payload: &[u8]| -> usize {
        let mut input: VecDeque<u8> = encode_header(payload.len() as u16, true, 0)
            .into_iter()
            .chain(payload.iter().copied())
            .collect();
        pump(&mut m.bus.spi, &mut input)
    };

    send(&mut m, &[0x0b, 0x00, 0x02, 0x00, 0xff]);
    assert_eq!(m.bus.spi_miso.take()[4], pattern(0x200));

    let consumed = send(&mut m, &[0x0b, 0x00, 0x03, 0xfe, 0xff, 0, 0, 0, 0]);
    assert_eq!(consumed, SPI_HEADER_SIZE + 6);
    assert_eq!(
        m.bus.spi_miso.take(),
        vec![0xff, 0xff, 0xff, 0xff, pattern(0x3fe), pattern(0x3ff)]
    );
    assert_ne!(m.r(spi) & INTR_READBUF_FLIP, 0);
    assert_eq!(m.bus.spi.can_receive(), 0);
}

#[test]
fn jtag_idcode_scan() {
    let out = CharPipe::new();
    let run = RunControl::new();
    let tap = TapController::new(TapCtrlArgs {
        ir_length: 5,
        idcode: 0x1122_3344,
    })
    .unwrap();
    let mut jtag = JtagServer::new(tap, Box::new(out.clone()), run);

    // assert then release TRST
    jtag.receive(b"tr");
    assert_eq!(jtag.tap().state(), TapState::TestLogicReset);
    // falling edge, optional sample, rising edge
    let cycle = |tms: u8, sample: bool| -> Vec<u8> {
        let low = b'0' + (tms << 1);
        if sample {
            vec![low, b'R', low + 4]
        } else {
            vec![low, low + 4]
        }
    };
    for tms in [0, 1, 0, 0] {
        jtag.receive(&cycle(tms, false));
    }
    assert_eq!(jtag.tap().state(), TapState::ShiftDr);
    for _ in 0..32 {
        jtag.receive(&cycle(0, true));
    }
    let idcode = out
        .take()
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, b)| acc | (u32::from(*b == b'1') << i));
    assert_eq!(idcode, 0x1122_3344);
}

#[test]
fn proxy_drives_the_machine() {
    let m = Machine::new();
    let out = CharPipe::new();
    let mut proxy = DevProxy::new(DevProxyArgs::default(), Box::new(out.clone()), m.run.clone());
    m.bus.register_proxy(&mut proxy);

    let mut uid = 0;
    let mut req = |proxy: &mut DevProxy, cmd: [u8; 2], payload: &[u8]| -> (Header, Vec<u8>) {
        uid += 1;
        let hdr = Header {
            cmd,
            len: payload.len() as u16,
            uid,
        };
        let mut bytes = hdr.to_bytes().to_vec();
        bytes.extend_from_slice(payload);
        proxy.receive(&bytes);
        let reply = out.take();
        let hdr = Header::parse(reply[..HEADER_SIZE].try_into().unwrap());
        (hdr, reply[HEADER_SIZE..].to_vec())
    };

    let (hdr, _) = req(&mut proxy, *b"HS", &[]);
    assert_eq!(hdr.cmd, *b"HS");

    let (_, devices) = req(&mut proxy, *b"ED", &[]);
    assert_eq!(devices.len(), 12 * 28);
    let names: Vec<String> = devices
        .chunks(28)
        .map(|d| {
            String::from_utf8_lossy(&d[12..28])
                .trim_end_matches('\0')
                .to_string()
        })
        .collect();
    assert_eq!(names[10], "plic_ext");
    assert_eq!(devices[10 * 28 + 4..10 * 28 + 8], OtRootBus::PLIC_EXT_BASE.to_le_bytes());

    // MSIP0 of the PLIC extension
    let mut ww = vec![10, 0, 0, 0];
    for w in [0u32, 1, u32::MAX] {
        ww.extend_from_slice(&w.to_le_bytes());
    }
    let (hdr, _) = req(&mut proxy, *b"WW", &ww);
    assert_eq!(hdr.cmd, *b"WW");
    assert!(m.bus.plic_ext.borrow().msip().is_high());

    let (hdr, _) = req(&mut proxy, *b"QT", &7u32.to_le_bytes());
    assert_eq!(hdr.cmd, *b"QT");
    assert_eq!(m.run.take_request(), Some(RunRequest::Shutdown(7)));
}
