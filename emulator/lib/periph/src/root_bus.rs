/*++

Licensed under the Apache-2.0 license.

File Name:

    root_bus.rs

Abstract:

    File contains the root Bus implementation of the reference OpenTitan
    machine: one instance of every device wired into the OpenTitan, SoC
    and CTN address spaces.

--*/

use crate::alert_handler::{AlertHandler, AlertHandlerArgs};
use crate::dev_proxy::{DevProxy, ProxyDevice, ProxyTarget};
use crate::dma::{Dma, DmaArgs, DmaSpaces};
use crate::entropy::{EntropySource, RandomEntropy};
use crate::gpio::{Gpio, GpioArgs, GPIO_PINS};
use crate::ibex_wrapper::{
    IbexWrapper, IbexWrapperArgs, INPUT_CPU_EN_LC, INPUT_CPU_EN_PWRMGR, INPUT_ESCALATE_RX,
};
use crate::mbx::{Mailbox, MailboxArgs, HOST_MMAP_SIZE, SYS_MMAP_SIZE};
use crate::otp_ctrl::{OtpCtrl, OtpCtrlArgs};
use crate::pinmux::{Pinmux, PinmuxArgs};
use crate::plic_ext::PlicExt;
use crate::soc_proxy::{SocProxy, SocProxyArgs};
use crate::spi_device::{SpiDevice, SpiDeviceArgs};
use crate::sram_ctrl::{SramCtrl, SramCtrlArgs};
use crate::ConfigError;
use ot_emu_bus::{
    AddressSpace, Bus, BusError, CharPipe, Clock, IrqLine, MemoryRegion, Ram, RunControl,
};
use ot_emu_types::{MemTxAttrs, RvAddr, RvData, RvSize};
use std::cell::RefCell;
use std::rc::Rc;

/// Configuration of the reference machine.
#[derive(Default)]
pub struct OtRootBusArgs {
    /// Boot ROM contents, zero-padded to [`OtRootBus::ROM_SIZE`]
    pub rom: Vec<u8>,
    /// Seeds every entropy source for reproducible runs
    pub entropy_seed: Option<u64>,
    pub alert_handler: AlertHandlerArgs,
    pub otp: OtpCtrlArgs,
    pub sram: SramCtrlArgs,
    pub dma: DmaArgs,
    pub mbx: MailboxArgs,
    pub spi: SpiDeviceArgs,
    pub ibex: IbexWrapperArgs,
    pub gpio: GpioArgs,
    pub pinmux: PinmuxArgs,
    pub soc_proxy: SocProxyArgs,
}

pub struct OtRootBus {
    /// Address space seen by the core, remap windows included
    pub cpu: AddressSpace,
    /// OpenTitan bus
    pub ot: AddressSpace,
    /// SoC system bus reached by the mailbox and the DMA
    pub soc: AddressSpace,
    /// Control network bus reached by the DMA
    pub ctn: AddressSpace,

    pub rom: Rc<RefCell<Ram>>,
    pub ctn_ram: Rc<RefCell<Ram>>,
    pub soc_ram: Rc<RefCell<Ram>>,

    pub alert_handler: AlertHandler,
    pub otp: OtpCtrl,
    pub sram: SramCtrl,
    pub dma: Dma,
    pub mbx: Mailbox,
    pub spi: SpiDevice,
    pub ibex: IbexWrapper,
    pub gpio: Gpio,
    pub pinmux: Pinmux,
    pub plic_ext: Rc<RefCell<PlicExt>>,
    pub soc_proxy: SocProxy,

    /// Bytes the SPI device drives on MISO
    pub spi_miso: CharPipe,

    n_classes: usize,
    n_ext_alerts: usize,
}

impl OtRootBus {
    pub const ROM_BASE: RvAddr = 0x0000_8000;
    pub const ROM_SIZE: usize = 0x8000;
    pub const SRAM_BASE: RvAddr = 0x1000_0000;
    pub const MBX_BASE: RvAddr = 0x2200_0000;
    pub const DMA_BASE: RvAddr = 0x2201_0000;
    pub const SOC_PROXY_BASE: RvAddr = 0x2203_0000;
    pub const SRAM_CTRL_BASE: RvAddr = 0x211c_0000;
    pub const IBEX_BASE: RvAddr = 0x211f_0000;
    pub const PLIC_EXT_BASE: RvAddr = 0x2c00_0000;
    pub const GPIO_BASE: RvAddr = 0x3000_0000;
    pub const OTP_BASE: RvAddr = 0x3013_0000;
    pub const ALERT_HANDLER_BASE: RvAddr = 0x3015_0000;
    pub const SPI_DEVICE_BASE: RvAddr = 0x3031_0000;
    pub const PINMUX_BASE: RvAddr = 0x3046_0000;
    /// Window of the OpenTitan bus onto the CTN bus
    pub const CTN_WINDOW_BASE: RvAddr = 0x4000_0000;
    pub const CTN_RAM_SIZE: usize = 0x10000;
    /// Mailbox system face on the SoC bus
    pub const SOC_MBX_BASE: RvAddr = 0x0100_0000;
    pub const SOC_RAM_SIZE: usize = 0x10000;

    pub fn new(clock: &Clock, args: OtRootBusArgs, run: RunControl) -> Result<Self, ConfigError> {
        let seed = args.entropy_seed;
        let entropy = move |salt: u64| -> Box<dyn EntropySource> {
            match seed {
                Some(seed) => Box::new(RandomEntropy::from_seed(seed ^ salt)),
                None => Box::new(RandomEntropy::new()),
            }
        };

        let cpu = AddressSpace::new("cpu");
        let ot = AddressSpace::new("ot");
        let soc = AddressSpace::new("soc");
        let ctn = AddressSpace::new("ctn");

        let mut rom_data = args.rom;
        if rom_data.len() > Self::ROM_SIZE {
            return Err(ConfigError::invalid(
                "rom",
                format!("image of {} bytes exceeds the ROM", rom_data.len()),
            ));
        }
        rom_data.resize(Self::ROM_SIZE, 0);
        let rom = Rc::new(RefCell::new(Ram::new(rom_data)));
        let ctn_ram = Rc::new(RefCell::new(Ram::zeroed(Self::CTN_RAM_SIZE)));
        let soc_ram = Rc::new(RefCell::new(Ram::zeroed(Self::SOC_RAM_SIZE)));

        let n_classes = args.alert_handler.n_classes;
        let n_alerts = args.alert_handler.n_alerts;
        let n_ext_alerts = args.soc_proxy.n_ext_alerts;
        let alert_handler = AlertHandler::new(clock, args.alert_handler);
        let otp = OtpCtrl::new(clock, args.otp, entropy(1))
            .map_err(|err| ConfigError::invalid("otp_ctrl", err.to_string()))?;
        let sram = SramCtrl::new(clock, args.sram, Box::new(otp.clone()))?;
        let dma = Dma::new(
            clock,
            args.dma,
            DmaSpaces {
                ot: ot.clone(),
                ctn: ctn.clone(),
                sys: soc.clone(),
            },
        );
        let mbx = Mailbox::new(args.mbx, ot.clone(), soc.clone());
        let spi_miso = CharPipe::new();
        let spi = SpiDevice::new(clock, args.spi, Box::new(spi_miso.clone()));
        let ibex = IbexWrapper::new(clock, args.ibex, cpu.clone(), ot.clone(), entropy(2), run)?;
        let gpio = Gpio::new(args.gpio);
        let pinmux = Pinmux::new(args.pinmux)?;
        let plic_ext = PlicExt::new();
        let soc_proxy = SocProxy::new(args.soc_proxy)?;

        let plic_ext = Rc::new(RefCell::new(plic_ext));
        let mmio = |name: &str, base: RvAddr, size: RvAddr, dev: Rc<RefCell<dyn Bus>>| {
            ot.map(name, base as u64, size as u64, MemoryRegion::io_words(dev), 0);
        };
        ot.transaction(|ot| {
            let rom_region = MemoryRegion::ram(rom.clone());
            ot.map("rom", Self::ROM_BASE as u64, Self::ROM_SIZE as u64, rom_region, 0);
            let sram_size = sram.mem_size() as u64;
            ot.map_alias("sram", Self::SRAM_BASE as u64, sram_size, &sram.mem(), 0, 0);
            let ctn_size = Self::CTN_RAM_SIZE as u64;
            ot.map_alias("ctn", Self::CTN_WINDOW_BASE as u64, ctn_size, &ctn, 0, 0);
        });
        ot.transaction(|_| {
            mmio("mbx", Self::MBX_BASE, HOST_MMAP_SIZE, Rc::new(RefCell::new(mbx.host())));
            mmio("dma", Self::DMA_BASE, dma.mmap_size(), Rc::new(RefCell::new(dma.clone())));
            mmio(
                "soc_proxy",
                Self::SOC_PROXY_BASE,
                soc_proxy.mmap_size(),
                Rc::new(RefCell::new(soc_proxy.clone())),
            );
            mmio(
                "sram_ctrl",
                Self::SRAM_CTRL_BASE,
                sram.mmap_size(),
                Rc::new(RefCell::new(sram.clone())),
            );
            mmio(
                "ibex_wrapper",
                Self::IBEX_BASE,
                ibex.mmap_size(),
                Rc::new(RefCell::new(ibex.clone())),
            );
            let plic_ext_size = plic_ext.borrow().mmap_size();
            mmio("plic_ext", Self::PLIC_EXT_BASE, plic_ext_size, plic_ext.clone());
            mmio("gpio", Self::GPIO_BASE, gpio.mmap_size(), Rc::new(RefCell::new(gpio.clone())));
            mmio("otp_ctrl", Self::OTP_BASE, otp.mmap_size(), Rc::new(RefCell::new(otp.clone())));
            mmio(
                "alert_handler",
                Self::ALERT_HANDLER_BASE,
                alert_handler.mmap_size(),
                Rc::new(RefCell::new(alert_handler.clone())),
            );
            mmio(
                "spi_device",
                Self::SPI_DEVICE_BASE,
                spi.mmap_size(),
                Rc::new(RefCell::new(spi.clone())),
            );
            mmio(
                "pinmux",
                Self::PINMUX_BASE,
                pinmux.mmap_size(),
                Rc::new(RefCell::new(pinmux.clone())),
            );
        });
        cpu.map_alias("ot", 0, 1 << 32, &ot, 0, 0);
        let ctn_region = MemoryRegion::ram(ctn_ram.clone());
        ctn.map("ctn_ram", 0, Self::CTN_RAM_SIZE as u64, ctn_region, 0);
        soc.transaction(|soc| {
            let soc_region = MemoryRegion::ram(soc_ram.clone());
            soc.map("soc_ram", 0, Self::SOC_RAM_SIZE as u64, soc_region, 0);
            soc.map(
                "mbx",
                Self::SOC_MBX_BASE as u64,
                SYS_MMAP_SIZE as u64,
                MemoryRegion::io_words(Rc::new(RefCell::new(mbx.sys()))),
                0,
            );
        });

        // alert sources in a fixed order
        let mut alerts: Vec<IrqLine> = vec![gpio.alert(), spi.alert(), pinmux.alert()];
        alerts.extend((0..5).map(|n| otp.alert(n)));
        alerts.push(sram.alert());
        alerts.extend((0..2).map(|n| mbx.alert(n)));
        alerts.push(dma.alert());
        alerts.extend((0..=n_ext_alerts).filter_map(|n| soc_proxy.alert(n)));
        alerts.push(plic_ext.borrow().alert());
        alerts.extend((0..4).map(|n| ibex.alert(n)));
        if alerts.len() > n_alerts {
            return Err(ConfigError::invalid(
                "alert_handler",
                format!("{} alert sources need more than {n_alerts} inputs", alerts.len()),
            ));
        }
        for (n, alert) in alerts.iter().enumerate() {
            alert.connect(alert_handler.alert_input(n));
        }

        alert_handler.esc(0).connect(ibex.input(INPUT_ESCALATE_RX));
        alert_handler.esc(1).connect(sram.escalate_input());

        // no life cycle or power manager: the core is released at once
        ibex.input(INPUT_CPU_EN_LC).set(1);
        ibex.input(INPUT_CPU_EN_PWRMGR).set(1);

        Ok(Self {
            cpu,
            ot,
            soc,
            ctn,
            rom,
            ctn_ram,
            soc_ram,
            alert_handler,
            otp,
            sram,
            dma,
            mbx,
            spi,
            ibex,
            gpio,
            pinmux,
            plic_ext,
            soc_proxy,
            spi_miso,
            n_classes,
            n_ext_alerts,
        })
    }

    /// Exposes the devices, their interrupt lines and the bus address
    /// spaces to a device proxy.
    pub fn register_proxy(&self, proxy: &mut DevProxy) {
        fn dev<T: Bus + 'static>(dev: T) -> ProxyTarget {
            ProxyTarget::Device(Rc::new(RefCell::new(dev)))
        }
        let irqs = |count: usize, line: &dyn Fn(usize) -> IrqLine| -> Vec<IrqLine> {
            (0..count).map(line).collect()
        };

        proxy.add_device(ProxyDevice::new(
            "rom",
            Self::ROM_BASE,
            Self::ROM_SIZE as u32,
            ProxyTarget::Memory(self.rom.clone()),
        ));
        proxy.add_device(
            ProxyDevice::new(
                "alert_handler",
                Self::ALERT_HANDLER_BASE,
                self.alert_handler.mmap_size(),
                dev(self.alert_handler.clone()),
            )
            .with_out_irqs("irq", irqs(self.n_classes, &|c| self.alert_handler.irq(c)))
            .with_out_irqs("esc", irqs(4, &|k| self.alert_handler.esc(k))),
        );
        proxy.add_device(
            ProxyDevice::new(
                "otp_ctrl",
                Self::OTP_BASE,
                self.otp.mmap_size(),
                dev(self.otp.clone()),
            )
            .with_out_irqs("irq", irqs(2, &|n| self.otp.irq(n))),
        );
        proxy.add_device(ProxyDevice::new(
            "sram_ctrl",
            Self::SRAM_CTRL_BASE,
            self.sram.mmap_size(),
            ProxyTarget::SramCtrl {
                regs: Rc::new(RefCell::new(self.sram.clone())),
                mem: self.sram.ram(),
            },
        ));
        proxy.add_device(
            ProxyDevice::new("dma", Self::DMA_BASE, self.dma.mmap_size(), dev(self.dma.clone()))
                .with_out_irqs("irq", irqs(3, &|n| self.dma.irq(n))),
        );
        proxy.add_device(
            ProxyDevice::new(
                "mbx",
                Self::SOC_MBX_BASE,
                SYS_MMAP_SIZE,
                ProxyTarget::Mailbox(Rc::new(RefCell::new(self.mbx.sys()))),
            )
            .with_out_irqs("irq", irqs(3, &|n| self.mbx.irq(n))),
        );
        proxy.add_device(
            ProxyDevice::new(
                "spi_device",
                Self::SPI_DEVICE_BASE,
                self.spi.mmap_size(),
                dev(self.spi.clone()),
            )
            .with_out_irqs("irq", irqs(5, &|n| self.spi.irq(n))),
        );
        proxy.add_device(
            ProxyDevice::new(
                "ibex_wrapper",
                Self::IBEX_BASE,
                self.ibex.mmap_size(),
                dev(self.ibex.clone()),
            )
            .with_out_irqs("nmi", vec![self.ibex.nmi(), self.ibex.cpu_enable()]),
        );
        proxy.add_device(
            ProxyDevice::new("gpio", Self::GPIO_BASE, self.gpio.mmap_size(), dev(self.gpio.clone()))
                .with_out_irqs("irq", irqs(GPIO_PINS, &|n| self.gpio.irq(n)))
                .with_out_irqs("out", irqs(GPIO_PINS, &|n| self.gpio.output(n)))
                .with_in_irqs("in", (0..GPIO_PINS).map(|n| self.gpio.input(n)).collect()),
        );
        proxy.add_device(ProxyDevice::new(
            "pinmux",
            Self::PINMUX_BASE,
            self.pinmux.mmap_size(),
            dev(self.pinmux.clone()),
        ));
        proxy.add_device(
            ProxyDevice::new(
                "plic_ext",
                Self::PLIC_EXT_BASE,
                self.plic_ext.borrow().mmap_size(),
                ProxyTarget::Device(self.plic_ext.clone()),
            )
            .with_out_irqs("msip", vec![self.plic_ext.borrow().msip()]),
        );
        let n_irqs = self.soc_proxy.irqs().len();
        proxy.add_device(
            ProxyDevice::new(
                "soc_proxy",
                Self::SOC_PROXY_BASE,
                self.soc_proxy.mmap_size(),
                ProxyTarget::SocProxy(Rc::new(RefCell::new(self.soc_proxy.clone()))),
            )
            .with_out_irqs("irq", self.soc_proxy.irqs())
            .with_in_irqs("ext_irq", (0..n_irqs).map(|n| self.soc_proxy.ext_irq(n)).collect())
            .with_in_irqs(
                "ext_alert",
                (0..self.n_ext_alerts)
                    .map(|n| self.soc_proxy.ext_alert(n))
                    .collect(),
            ),
        );

        proxy.add_space("ot", 0, u32::MAX, self.ot.clone());
        proxy.add_space("soc", 0, u32::MAX, self.soc.clone());
        proxy.add_space("ctn", 0, u32::MAX, self.ctn.clone());
    }

    fn access(
        &self,
        size: RvSize,
        addr: RvAddr,
        buf: &mut [u8; 4],
        attrs: MemTxAttrs,
        is_write: bool,
    ) -> bool {
        let len = usize::from(size);
        if len == 0 || len > 4 {
            return false;
        }
        match self.cpu.rw(addr as u64, attrs, &mut buf[..len], is_write) {
            Ok(()) => true,
            Err(err) => {
                log::debug!("root_bus: {err:?} at {addr:#x}");
                false
            }
        }
    }

    fn devices(&mut self) -> [&mut dyn Bus; 10] {
        [
            &mut self.alert_handler,
            &mut self.otp,
            &mut self.sram,
            &mut self.dma,
            &mut self.spi,
            &mut self.ibex,
            &mut self.gpio,
            &mut self.pinmux,
            &mut self.plic_ext,
            &mut self.soc_proxy,
        ]
    }
}

impl Bus for OtRootBus {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        self.read_attrs(size, addr, MemTxAttrs::default())
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        self.write_attrs(size, addr, val, MemTxAttrs::default())
    }

    fn read_attrs(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        attrs: MemTxAttrs,
    ) -> Result<RvData, BusError> {
        if addr as usize % usize::from(size).max(1) != 0 {
            Err(BusError::LoadAddrMisaligned)?
        }
        let mut buf = [0u8; 4];
        if !self.access(size, addr, &mut buf, attrs, false) {
            Err(BusError::LoadAccessFault)?
        }
        Ok(u32::from_le_bytes(buf))
    }

    fn write_attrs(
        &mut self,
        size: RvSize,
        addr: RvAddr,
        val: RvData,
        attrs: MemTxAttrs,
    ) -> Result<(), BusError> {
        if addr as usize % usize::from(size).max(1) != 0 {
            Err(BusError::StoreAddrMisaligned)?
        }
        let mut buf = val.to_le_bytes();
        if !self.access(size, addr, &mut buf, attrs, true) {
            Err(BusError::StoreAccessFault)?
        }
        Ok(())
    }

    fn poll(&mut self) {
        for dev in self.devices() {
            dev.poll();
        }
    }

    fn warm_reset(&mut self) {
        for dev in self.devices() {
            dev.warm_reset();
        }
        self.mbx.host().warm_reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_emu_bus::RunRequest;

    fn machine() -> (Clock, OtRootBus, RunControl) {
        let clock = Clock::new();
        let run = RunControl::new();
        let bus = OtRootBus::new(
            &clock,
            OtRootBusArgs {
                rom: vec![0x13, 0x00, 0x00, 0x00],
                entropy_seed: Some(1),
                ..Default::default()
            },
            run.clone(),
        )
        .unwrap();
        (clock, bus, run)
    }

    #[test]
    fn test_rom_and_decode() {
        let (_, mut bus, _) = machine();
        assert_eq!(bus.read(RvSize::Word, OtRootBus::ROM_BASE), Ok(0x13));
        assert_eq!(bus.read(RvSize::Byte, OtRootBus::ROM_BASE + 1), Ok(0));
        assert_eq!(
            bus.read(RvSize::Word, OtRootBus::ROM_BASE + 2).err(),
            Some(BusError::LoadAddrMisaligned)
        );
        assert_eq!(
            bus.read(RvSize::Word, 0x0400_0000).err(),
            Some(BusError::LoadAccessFault)
        );
        // register blocks only take words
        assert_eq!(
            bus.read(RvSize::Byte, OtRootBus::GPIO_BASE).err(),
            Some(BusError::LoadAccessFault)
        );
    }

    #[test]
    fn test_ctn_window() {
        let (_, mut bus, _) = machine();
        bus.write(RvSize::Word, OtRootBus::CTN_WINDOW_BASE + 8, 0xcafe_f00d)
            .unwrap();
        assert_eq!(&bus.ctn_ram.borrow().data()[8..12], &[0x0d, 0xf0, 0xfe, 0xca]);
    }

    #[test]
    fn test_dv_status_requests_shutdown() {
        let (_, mut bus, run) = machine();
        bus.write(RvSize::Word, OtRootBus::IBEX_BASE + 0x800, 0x0003_baad)
            .unwrap();
        assert_eq!(run.take_request(), Some(RunRequest::Shutdown(3)));
    }

    #[test]
    fn test_alerts_reach_the_handler() {
        let (_, mut bus, _) = machine();
        // PLIC-ext sits after 21 alert sources
        let base = OtRootBus::ALERT_HANDLER_BASE + 0x18;
        let en = base + 4 * (65 + 21);
        let cause = base + 4 * (3 * 65 + 21);
        bus.write(RvSize::Word, en, 1).unwrap();
        bus.write(RvSize::Word, en, 1).unwrap();
        bus.write(RvSize::Word, OtRootBus::PLIC_EXT_BASE + 4, 1).unwrap();
        assert_eq!(bus.read(RvSize::Word, cause), Ok(1));
        assert_eq!(bus.read(RvSize::Word, cause - 4), Ok(0));
    }

    #[test]
    fn test_oversized_rom_rejected() {
        let result = OtRootBus::new(
            &Clock::new(),
            OtRootBusArgs {
                rom: vec![0; OtRootBus::ROM_SIZE + 1],
                ..Default::default()
            },
            RunControl::new(),
        );
        assert!(result.is_err());
    }
}
