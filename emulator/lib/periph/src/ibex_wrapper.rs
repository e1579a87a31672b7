/*++

Licensed under the Apache-2.0 license.

File Name:

    ibex_wrapper.rs

Abstract:

    File contains the Ibex core wrapper: address remapper, CPU enable
    gating, NMI latching, the entropy endpoint and the DV status and log
    registers.

--*/

mod dv_log;

use crate::entropy::EntropySource;
use crate::mubi::{w0c, w1c, w1s, MB4_FALSE};
use crate::ConfigError;
use dv_log::DvLog;
use ot_emu_bus::{
    ActionHandle, AddressSpace, Bus, BusError, CharBackend, Clock, GpioIn, GpioSink, IrqLine,
    MappingId, RunControl, Timer,
};
use ot_emu_types::{RvAddr, RvData, RvSize};
use std::cell::RefCell;
use std::rc::Rc;

const REG_ALERT_TEST: RvAddr = 0x00;
const REG_SW_RECOV_ERR: RvAddr = 0x04;
const REG_SW_FATAL_ERR: RvAddr = 0x08;
const REG_REMAP_BASE: RvAddr = 0x0c;
const REG_DV_SIM_STATUS: RvAddr = 0x800;
const REG_DV_SIM_LOG: RvAddr = 0x804;
const MMAP_SIZE: RvAddr = 0x1000;

const ALERT_FATAL_SW: usize = 0;
const ALERT_RECOV_SW: usize = 1;
const ALERT_FATAL_HW: usize = 2;
const ALERT_RECOV_HW: usize = 3;
const ALERT_COUNT: usize = 4;

pub const NMI_ALERT: u32 = 1 << 0;
pub const NMI_WDOG: u32 = 1 << 1;

pub const RND_STATUS_VALID: u32 = 1 << 0;
pub const RND_STATUS_FIPS: u32 = 1 << 1;

const ERR_STATUS_MASK: u32 = (1 << 0) | (1 << 8) | (1 << 9) | (1 << 10);

pub const STATUS_IN_BOOT_ROM: u32 = 0xb090;
pub const STATUS_IN_BOOT_ROM_HALT: u32 = 0xb0ba;
pub const STATUS_IN_TEST: u32 = 0x4354;
pub const STATUS_IN_WFI: u32 = 0x1d1e;
pub const STATUS_PASSED: u32 = 0x900d;
pub const STATUS_FAILED: u32 = 0xbaad;

/// Input lines
pub const INPUT_CPU_EN_LC: usize = 0;
pub const INPUT_CPU_EN_PWRMGR: usize = 1;
pub const INPUT_ESCALATE_RX: usize = 2;
pub const INPUT_WDOG_BARK: usize = 3;

/// Priority of the remap aliases over regular mappings, for slot 0
const REMAP_PRIORITY: i32 = 64;

#[derive(Debug, Clone)]
pub struct IbexWrapperArgs {
    /// Number of address translation slots per bus
    pub remap_slots: usize,
    pub fpga_info: u32,
    /// Latency of an entropy request
    pub edn_delay_ns: u64,
}

impl Default for IbexWrapperArgs {
    fn default() -> Self {
        Self {
            remap_slots: 2,
            fpga_info: 0,
            edn_delay_ns: 1_000,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum RemapBus {
    Ibus,
    Dbus,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum RemapField {
    Regwen,
    AddrEn,
    Matching,
    RemapAddr,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Reg {
    AlertTest,
    SwRecovErr,
    SwFatalErr,
    Remap(RemapBus, RemapField, usize),
    NmiEnable,
    NmiState,
    ErrStatus,
    RndData,
    RndStatus,
    FpgaInfo,
    DvSimStatus,
    DvSimLog,
}

impl Reg {
    fn decode(addr: RvAddr, slots: usize) -> Option<Reg> {
        match addr {
            REG_ALERT_TEST => return Some(Reg::AlertTest),
            REG_SW_RECOV_ERR => return Some(Reg::SwRecovErr),
            REG_SW_FATAL_ERR => return Some(Reg::SwFatalErr),
            REG_DV_SIM_STATUS => return Some(Reg::DvSimStatus),
            REG_DV_SIM_LOG => return Some(Reg::DvSimLog),
            _ => {}
        }
        if addr < REG_REMAP_BASE || addr % 4 != 0 {
            return None;
        }
        let idx = ((addr - REG_REMAP_BASE) / 4) as usize;
        let remap_regs = 8 * slots;
        if idx < remap_regs {
            let (group, slot) = (idx / slots, idx % slots);
            let bus = if group < 4 {
                RemapBus::Ibus
            } else {
                RemapBus::Dbus
            };
            let field = [
                RemapField::Regwen,
                RemapField::AddrEn,
                RemapField::Matching,
                RemapField::RemapAddr,
            ][group % 4];
            return Some(Reg::Remap(bus, field, slot));
        }
        match idx - remap_regs {
            0 => Some(Reg::NmiEnable),
            1 => Some(Reg::NmiState),
            2 => Some(Reg::ErrStatus),
            3 => Some(Reg::RndData),
            4 => Some(Reg::RndStatus),
            5 => Some(Reg::FpgaInfo),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct RemapCfg {
    regwen: u32,
    addr_en: u32,
    matching: u32,
    remap_addr: u32,
}

impl Default for RemapCfg {
    fn default() -> Self {
        Self {
            regwen: 1,
            addr_en: 0,
            matching: 0,
            remap_addr: 0,
        }
    }
}

impl RemapCfg {
    fn field(&self, field: RemapField) -> u32 {
        match field {
            RemapField::Regwen => self.regwen,
            RemapField::AddrEn => self.addr_en,
            RemapField::Matching => self.matching,
            RemapField::RemapAddr => self.remap_addr,
        }
    }

    fn enabled(&self) -> bool {
        self.addr_en & 1 != 0
    }
}

#[derive(Default)]
struct RemapSlot {
    ibus: RemapCfg,
    dbus: RemapCfg,
    mapping: Option<MappingId>,
}

impl RemapSlot {
    fn cfg_mut(&mut self, bus: RemapBus) -> &mut RemapCfg {
        match bus {
            RemapBus::Ibus => &mut self.ibus,
            RemapBus::Dbus => &mut self.dbus,
        }
    }
}

/// Size of the naturally aligned window described by a match value whose
/// trailing ones encode the size. Zero when the value encodes no window.
fn remap_window(matching: u32) -> (u32, u32) {
    let size = (matching.wrapping_neg() & matching.wrapping_add(1)).wrapping_shl(1);
    let base = matching & !size.wrapping_sub(1);
    (base, size)
}

pub struct IbexWrapperRegs {
    args: IbexWrapperArgs,
    sw_recov_err: u32,
    sw_fatal_err: u32,
    slots: Vec<RemapSlot>,
    nmi_enable: u32,
    nmi_state: u32,
    err_status: u32,
    rnd_data: u32,
    rnd_status: u32,

    cpu_en_lc: bool,
    cpu_en_pwrmgr: bool,
    escalated: bool,

    cpu_as: AddressSpace,
    sys_as: AddressSpace,
    dv_log: DvLog,
    entropy: Box<dyn EntropySource>,
    run: RunControl,

    alerts: Vec<IrqLine>,
    cpu_en: IrqLine,
    nmi: IrqLine,
    edn_action: Option<ActionHandle>,
    timer: Timer,
}

impl IbexWrapperRegs {
    /// Installs, keeps or removes the alias of `slot` after a
    /// configuration change.
    fn update_remap(&mut self, slot: usize) {
        let RemapSlot {
            ibus,
            dbus,
            mapping,
        } = &mut self.slots[slot];
        if !ibus.enabled() && !dbus.enabled() {
            if let Some(id) = mapping.take() {
                log::debug!("ibex_wrapper: remap slot {slot} disabled");
                self.cpu_as.unmap(id);
            }
            return;
        }
        if !ibus.enabled()
            || !dbus.enabled()
            || ibus.matching != dbus.matching
            || ibus.remap_addr != dbus.remap_addr
        {
            log::info!("ibex_wrapper: remap slot {slot}: I/D configurations differ, waiting");
            return;
        }
        let (src_base, map_size) = remap_window(ibus.matching);
        if map_size == 0 {
            log::warn!(
                "ibex_wrapper: remap slot {slot}: invalid match {:#x}",
                ibus.matching
            );
            return;
        }
        let dst_base = ibus.remap_addr;
        let old = mapping.take();
        let name = format!("remap{slot}");
        let sys_as = self.sys_as.clone();
        let id = self.cpu_as.transaction(|space| {
            if let Some(id) = old {
                space.unmap(id);
            }
            space.map_alias(
                &name,
                u64::from(src_base),
                u64::from(map_size),
                &sys_as,
                u64::from(dst_base),
                REMAP_PRIORITY - slot as i32,
            )
        });
        self.slots[slot].mapping = Some(id);
        log::debug!(
            "ibex_wrapper: remap slot {slot}: {src_base:#x}+{map_size:#x} -> {dst_base:#x}"
        );
    }

    fn remap_write(&mut self, bus: RemapBus, field: RemapField, slot: usize, val: u32) {
        let cfg = self.slots[slot].cfg_mut(bus);
        if field == RemapField::Regwen {
            cfg.regwen = w0c(cfg.regwen, val & 1);
            return;
        }
        if cfg.regwen & 1 == 0 {
            log::warn!("ibex_wrapper: {bus:?} slot {slot} is locked, {field:?} ignored");
            return;
        }
        match field {
            RemapField::AddrEn => cfg.addr_en = val & 1,
            RemapField::Matching => cfg.matching = val,
            RemapField::RemapAddr => cfg.remap_addr = val,
            RemapField::Regwen => {}
        }
        self.update_remap(slot);
    }

    fn update_cpu_enable(&mut self) {
        let enable = self.cpu_en_lc && self.cpu_en_pwrmgr && !self.escalated;
        if enable != self.cpu_en.is_high() {
            log::info!(
                "ibex_wrapper: cpu {}",
                if enable { "released" } else { "halted" }
            );
        }
        self.cpu_en.set_bool(enable);
    }

    fn update_nmi(&mut self) {
        self.nmi.set_bool(self.nmi_state & self.nmi_enable != 0);
    }

    fn update_sw_alerts(&mut self) {
        self.alerts[ALERT_RECOV_SW].set_bool(self.sw_recov_err != MB4_FALSE);
        self.alerts[ALERT_FATAL_SW].set_bool(self.sw_fatal_err != MB4_FALSE);
    }

    fn request_entropy(&mut self) {
        if self.edn_action.is_none() {
            self.edn_action = Some(self.timer.schedule_poll_in(self.args.edn_delay_ns));
        }
    }

    fn dv_status(&mut self, val: u32) {
        let code = val & 0xffff;
        let info = val >> 16;
        match code {
            STATUS_IN_BOOT_ROM => log::info!("ibex_wrapper: in boot ROM"),
            STATUS_IN_BOOT_ROM_HALT => log::info!("ibex_wrapper: halted in boot ROM"),
            STATUS_IN_TEST => log::info!("ibex_wrapper: in test"),
            STATUS_IN_WFI => log::debug!("ibex_wrapper: in WFI"),
            STATUS_PASSED => {
                log::info!("ibex_wrapper: test passed");
                self.run.shutdown(0);
            }
            STATUS_FAILED => {
                let exit = match info & 0x7f {
                    0 => 1,
                    code => code as i32,
                };
                log::error!("ibex_wrapper: test failed, info {info:#x}");
                self.run.shutdown(exit);
            }
            _ => log::debug!("ibex_wrapper: unknown test status {val:#x}"),
        }
    }

    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        let Some(reg) = Reg::decode(addr, self.args.remap_slots) else {
            log::warn!("ibex_wrapper: invalid read at {addr:#x}");
            return Err(BusError::LoadAccessFault);
        };
        let val = match reg {
            Reg::AlertTest | Reg::DvSimStatus | Reg::DvSimLog => 0,
            Reg::SwRecovErr => self.sw_recov_err,
            Reg::SwFatalErr => self.sw_fatal_err,
            Reg::Remap(RemapBus::Ibus, field, slot) => self.slots[slot].ibus.field(field),
            Reg::Remap(RemapBus::Dbus, field, slot) => self.slots[slot].dbus.field(field),
            Reg::NmiEnable => self.nmi_enable,
            Reg::NmiState => self.nmi_state,
            Reg::ErrStatus => self.err_status,
            Reg::RndData => {
                let val = self.rnd_data;
                if self.rnd_status & RND_STATUS_VALID == 0 {
                    log::debug!("ibex_wrapper: entropy read while not valid");
                }
                self.rnd_data = 0;
                self.rnd_status = 0;
                self.request_entropy();
                val
            }
            Reg::RndStatus => self.rnd_status,
            Reg::FpgaInfo => self.args.fpga_info,
        };
        Ok(val)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word {
            Err(BusError::StoreAccessFault)?
        }
        let Some(reg) = Reg::decode(addr, self.args.remap_slots) else {
            log::warn!("ibex_wrapper: invalid write at {addr:#x}");
            return Err(BusError::StoreAccessFault);
        };
        match reg {
            Reg::AlertTest => {
                for (i, alert) in self.alerts.iter().enumerate() {
                    if val & (1 << i) != 0 {
                        alert.raise();
                        alert.lower();
                    }
                }
                self.update_sw_alerts();
            }
            Reg::SwRecovErr => {
                self.sw_recov_err = val & 0xf;
                self.update_sw_alerts();
            }
            Reg::SwFatalErr => {
                // sticky until reset
                if self.sw_fatal_err == MB4_FALSE {
                    self.sw_fatal_err = val & 0xf;
                }
                self.update_sw_alerts();
            }
            Reg::Remap(bus, field, slot) => self.remap_write(bus, field, slot, val),
            Reg::NmiEnable => {
                self.nmi_enable = w1s(self.nmi_enable, val & (NMI_ALERT | NMI_WDOG));
                self.update_nmi();
            }
            Reg::NmiState => {
                self.nmi_state = w1c(self.nmi_state, val);
                self.update_nmi();
            }
            Reg::ErrStatus => self.err_status = w1c(self.err_status, val & ERR_STATUS_MASK),
            Reg::RndData | Reg::RndStatus | Reg::FpgaInfo => {
                log::warn!("ibex_wrapper: {reg:?} is read-only")
            }
            Reg::DvSimStatus => self.dv_status(val),
            Reg::DvSimLog => self.dv_log.write(val),
        }
        Ok(())
    }

    fn poll(&mut self) {
        if self.timer.fired(&mut self.edn_action) {
            let (word, fips) = self.entropy.get_random();
            self.rnd_data = word;
            self.rnd_status = RND_STATUS_VALID | if fips { RND_STATUS_FIPS } else { 0 };
        }
    }

    fn reset(&mut self) {
        self.timer.cancel_opt(&mut self.edn_action);
        for slot in 0..self.slots.len() {
            if let Some(id) = self.slots[slot].mapping.take() {
                self.cpu_as.unmap(id);
            }
            self.slots[slot] = RemapSlot::default();
        }
        self.sw_recov_err = MB4_FALSE;
        self.sw_fatal_err = MB4_FALSE;
        self.nmi_enable = 0;
        self.nmi_state = 0;
        self.err_status = 0;
        self.rnd_data = 0;
        self.rnd_status = 0;
        self.escalated = false;
        self.dv_log.reset();
        self.update_sw_alerts();
        self.update_nmi();
        self.update_cpu_enable();
        self.request_entropy();
    }
}

impl GpioSink for IbexWrapperRegs {
    fn set_level(&mut self, input: usize, level: i32) {
        let high = level > 0;
        match input {
            INPUT_CPU_EN_LC => self.cpu_en_lc = high,
            INPUT_CPU_EN_PWRMGR => self.cpu_en_pwrmgr = high,
            INPUT_ESCALATE_RX => {
                if high && !self.escalated {
                    log::warn!("ibex_wrapper: escalation received");
                    self.nmi_state |= NMI_ALERT;
                }
                self.escalated |= high;
                self.update_nmi();
            }
            INPUT_WDOG_BARK => {
                if high {
                    self.nmi_state |= NMI_WDOG;
                    self.update_nmi();
                }
                return;
            }
            _ => {
                log::error!("ibex_wrapper: unknown input {input}");
                return;
            }
        }
        self.update_cpu_enable();
    }
}

/// Ibex wrapper peripheral
#[derive(Clone)]
pub struct IbexWrapper {
    regs: Rc<RefCell<IbexWrapperRegs>>,
}

impl IbexWrapper {
    /// `cpu_as` is the address space the core fetches from and where the
    /// remap aliases are installed; `sys_as` is the memory they point into.
    pub fn new(
        clock: &Clock,
        args: IbexWrapperArgs,
        cpu_as: AddressSpace,
        sys_as: AddressSpace,
        entropy: Box<dyn EntropySource>,
        run: RunControl,
    ) -> Result<Self, ConfigError> {
        let slots = args.remap_slots;
        if slots == 0 || REG_REMAP_BASE as usize + (8 * slots + 6) * 4 > REG_DV_SIM_STATUS as usize
        {
            return Err(ConfigError::invalid(
                "ibex_wrapper",
                format!("unsupported remap slot count {slots}"),
            ));
        }
        let regs = Rc::new(RefCell::new(IbexWrapperRegs {
            args,
            sw_recov_err: MB4_FALSE,
            sw_fatal_err: MB4_FALSE,
            slots: (0..slots).map(|_| RemapSlot::default()).collect(),
            nmi_enable: 0,
            nmi_state: 0,
            err_status: 0,
            rnd_data: 0,
            rnd_status: 0,
            cpu_en_lc: false,
            cpu_en_pwrmgr: false,
            escalated: false,
            dv_log: DvLog::new(cpu_as.clone()),
            cpu_as,
            sys_as,
            entropy,
            run,
            alerts: (0..ALERT_COUNT).map(|_| IrqLine::new()).collect(),
            cpu_en: IrqLine::new(),
            nmi: IrqLine::new(),
            edn_action: None,
            timer: Timer::new(clock),
        }));
        regs.borrow_mut().request_entropy();
        Ok(Self { regs })
    }

    pub fn mmap_size(&self) -> RvAddr {
        MMAP_SIZE
    }

    /// Input line `n`, see the `INPUT_*` constants.
    pub fn input(&self, n: usize) -> GpioIn {
        GpioIn::new(&self.regs, n)
    }

    /// Alert `n`: 0 fatal sw, 1 recoverable sw, 2 fatal hw, 3 recoverable hw.
    pub fn alert(&self, n: usize) -> IrqLine {
        self.regs.borrow().alerts[n].clone()
    }

    pub fn fatal_hw_alert(&self) -> IrqLine {
        self.alert(ALERT_FATAL_HW)
    }

    pub fn recov_hw_alert(&self) -> IrqLine {
        self.alert(ALERT_RECOV_HW)
    }

    /// High while the core may run.
    pub fn cpu_enable(&self) -> IrqLine {
        self.regs.borrow().cpu_en.clone()
    }

    pub fn nmi(&self) -> IrqLine {
        self.regs.borrow().nmi.clone()
    }

    /// Mirrors the DV log lines to `output`.
    pub fn set_dv_output(&self, output: Box<dyn CharBackend>) {
        self.regs.borrow_mut().dv_log.set_output(output);
    }
}

impl Bus for IbexWrapper {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        self.regs.borrow_mut().read(size, addr)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        self.regs.borrow_mut().write(size, addr, val)
    }

    fn poll(&mut self) {
        self.regs.borrow_mut().poll();
    }

    fn warm_reset(&mut self) {
        self.regs.borrow_mut().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::RandomEntropy;
    use crate::mubi::MB4_TRUE;
    use ot_emu_bus::{CharPipe, MemoryRegion, Ram, RunRequest};
    use ot_emu_types::MemTxAttrs;

    const IBUS_REGWEN0: RvAddr = 0x0c;
    const IBUS_ADDR_EN0: RvAddr = 0x14;
    const IBUS_MATCHING0: RvAddr = 0x1c;
    const IBUS_REMAP0: RvAddr = 0x24;
    const DBUS_ADDR_EN0: RvAddr = 0x34;
    const DBUS_MATCHING0: RvAddr = 0x3c;
    const DBUS_REMAP0: RvAddr = 0x44;
    const NMI_ENABLE: RvAddr = 0x4c;
    const NMI_STATE: RvAddr = 0x50;
    const RND_DATA: RvAddr = 0x58;
    const RND_STATUS: RvAddr = 0x5c;

    const RAM_BASE: u64 = 0x1000_0000;
    const FLASH_BASE: u64 = 0x8000_0000;

    struct Fixture {
        clock: Clock,
        wrapper: IbexWrapper,
        cpu_as: AddressSpace,
        ram: Rc<RefCell<Ram>>,
        run: RunControl,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Clock::new();
            let ram = Rc::new(RefCell::new(Ram::zeroed(0x1000)));
            let flash = Rc::new(RefCell::new(Ram::new(
                (0..0x4000u32).map(|i| i as u8).collect(),
            )));
            let cpu_as = AddressSpace::new("cpu");
            cpu_as.map("ram", RAM_BASE, 0x1000, MemoryRegion::ram(ram.clone()), 0);
            let sys_as = AddressSpace::new("sys");
            sys_as.map("flash", FLASH_BASE, 0x4000, MemoryRegion::ram(flash), 0);
            let run = RunControl::new();
            let wrapper = IbexWrapper::new(
                &clock,
                IbexWrapperArgs::default(),
                cpu_as.clone(),
                sys_as,
                Box::new(RandomEntropy::from_seed(3)),
                run.clone(),
            )
            .unwrap();
            Self {
                clock,
                wrapper,
                cpu_as,
                ram,
                run,
            }
        }

        fn w(&mut self, addr: RvAddr, val: u32) {
            self.wrapper.write(RvSize::Word, addr, val).unwrap();
        }

        fn r(&mut self, addr: RvAddr) -> u32 {
            self.wrapper.read(RvSize::Word, addr).unwrap()
        }

        fn cpu_read(&self, addr: u64) -> Option<u32> {
            self.cpu_as.read_u32(addr, MemTxAttrs::default()).ok()
        }

        fn poke(&self, addr: u64, bytes: &[u8]) {
            let off = (addr - RAM_BASE) as usize;
            self.ram.borrow_mut().data_mut()[off..off + bytes.len()].copy_from_slice(bytes);
        }

        fn program_slot0(&mut self, ibus_match: u32, dbus_match: u32, remap: u32) {
            self.w(IBUS_MATCHING0, ibus_match);
            self.w(IBUS_REMAP0, remap);
            self.w(DBUS_MATCHING0, dbus_match);
            self.w(DBUS_REMAP0, remap);
            self.w(IBUS_ADDR_EN0, 1);
            self.w(DBUS_ADDR_EN0, 1);
        }
    }

    #[test]
    fn test_register_layout() {
        assert_eq!(Reg::decode(0x4c, 2), Some(Reg::NmiEnable));
        assert_eq!(Reg::decode(0x60, 2), Some(Reg::FpgaInfo));
        assert_eq!(Reg::decode(0x64, 2), None);
        assert_eq!(
            Reg::decode(0x30, 2),
            Some(Reg::Remap(RemapBus::Dbus, RemapField::Regwen, 1))
        );
        assert_eq!(remap_window(0x2000_0fff), (0x2000_0000, 0x2000));
        assert_eq!(remap_window(u32::MAX).1, 0);
    }

    #[test]
    fn test_remap_alias() {
        let mut f = Fixture::new();
        assert_eq!(f.cpu_read(0x2000_0004), None);

        f.w(IBUS_MATCHING0, 0x2000_0fff);
        f.w(IBUS_REMAP0, 0x8000_1000);
        f.w(IBUS_ADDR_EN0, 1);
        // D side not configured yet
        assert_eq!(f.cpu_read(0x2000_0004), None);

        f.w(DBUS_MATCHING0, 0x2000_0fff);
        f.w(DBUS_REMAP0, 0x8000_1000);
        f.w(DBUS_ADDR_EN0, 1);
        assert_eq!(f.cpu_read(0x2000_0004), Some(0x0706_0504));
        assert_eq!(f.cpu_read(0x2000_1ffc), Some(0xfffe_fdfc));
        assert_eq!(f.cpu_read(0x2000_2000), None);

        f.w(IBUS_ADDR_EN0, 0);
        f.w(DBUS_ADDR_EN0, 0);
        assert_eq!(f.cpu_read(0x2000_0004), None);
    }

    #[test]
    fn test_remap_mismatch_and_lock() {
        let mut f = Fixture::new();
        f.program_slot0(0x2000_0fff, 0x3000_0fff, 0x8000_0000);
        assert_eq!(f.cpu_read(0x2000_0000), None);
        assert_eq!(f.cpu_read(0x3000_0000), None);

        f.w(DBUS_MATCHING0, 0x2000_0fff);
        assert_eq!(f.cpu_read(0x2000_0000), Some(0x0302_0100));

        f.w(IBUS_REGWEN0, 0);
        f.w(IBUS_ADDR_EN0, 0);
        assert_eq!(f.r(IBUS_ADDR_EN0), 1);
        f.w(IBUS_REGWEN0, 1);
        assert_eq!(f.r(IBUS_REGWEN0), 0);

        f.wrapper.warm_reset();
        assert_eq!(f.cpu_read(0x2000_0000), None);
        assert_eq!(f.r(IBUS_REGWEN0), 1);
    }

    #[test]
    fn test_cpu_enable_gating() {
        let f = Fixture::new();
        let cpu_en = f.wrapper.cpu_enable();
        f.wrapper.input(INPUT_CPU_EN_LC).set(1);
        assert!(!cpu_en.is_high());
        f.wrapper.input(INPUT_CPU_EN_PWRMGR).set(1);
        assert!(cpu_en.is_high());
        f.wrapper.input(INPUT_CPU_EN_PWRMGR).set(0);
        assert!(!cpu_en.is_high());
        f.wrapper.input(INPUT_CPU_EN_PWRMGR).set(1);
        assert!(cpu_en.is_high());

        f.wrapper.input(INPUT_ESCALATE_RX).set(1);
        assert!(!cpu_en.is_high());
        // escalation sticks until reset
        f.wrapper.input(INPUT_ESCALATE_RX).set(0);
        assert!(!cpu_en.is_high());
    }

    #[test]
    fn test_escalation_nmi() {
        let mut f = Fixture::new();
        let nmi = f.wrapper.nmi();
        f.wrapper.input(INPUT_ESCALATE_RX).set(1);
        assert_eq!(f.r(NMI_STATE), NMI_ALERT);
        assert!(!nmi.is_high());

        f.w(NMI_ENABLE, NMI_ALERT);
        assert!(nmi.is_high());
        f.w(NMI_STATE, NMI_ALERT);
        assert!(!nmi.is_high());

        f.w(NMI_ENABLE, NMI_WDOG);
        assert_eq!(f.r(NMI_ENABLE), NMI_ALERT | NMI_WDOG);
        f.wrapper.input(INPUT_WDOG_BARK).set(1);
        assert!(nmi.is_high());
        assert_eq!(f.r(NMI_STATE), NMI_WDOG);
    }

    #[test]
    fn test_entropy_endpoint() {
        let mut f = Fixture::new();
        let mut reference = RandomEntropy::from_seed(3);
        assert_eq!(f.r(RND_STATUS), 0);

        f.clock
            .increment_and_process_timer_actions(1_000, &mut f.wrapper.clone());
        assert_eq!(f.r(RND_STATUS), RND_STATUS_VALID | RND_STATUS_FIPS);
        assert_eq!(f.r(RND_DATA), reference.get_random().0);
        assert_eq!(f.r(RND_STATUS), 0);

        f.clock
            .increment_and_process_timer_actions(1_000, &mut f.wrapper.clone());
        assert_eq!(f.r(RND_STATUS), RND_STATUS_VALID | RND_STATUS_FIPS);
        assert_eq!(f.r(RND_DATA), reference.get_random().0);
    }

    #[test]
    fn test_sw_error_alerts() {
        let mut f = Fixture::new();
        let recov = f.wrapper.alert(ALERT_RECOV_SW);
        let fatal = f.wrapper.alert(ALERT_FATAL_SW);
        f.w(REG_SW_RECOV_ERR, MB4_TRUE);
        assert!(recov.is_high());
        f.w(REG_SW_RECOV_ERR, MB4_FALSE);
        assert!(!recov.is_high());

        f.w(REG_SW_FATAL_ERR, 0x3);
        assert!(fatal.is_high());
        f.w(REG_SW_FATAL_ERR, MB4_FALSE);
        assert!(fatal.is_high());
        assert_eq!(f.r(REG_SW_FATAL_ERR), 0x3);
    }

    #[test]
    fn test_dv_status_shutdown() {
        let mut f = Fixture::new();
        f.w(REG_DV_SIM_STATUS, STATUS_IN_TEST);
        assert_eq!(f.run.pending(), None);
        f.w(REG_DV_SIM_STATUS, STATUS_PASSED);
        assert_eq!(f.run.take_request(), Some(RunRequest::Shutdown(0)));

        f.w(REG_DV_SIM_STATUS, (5 << 16) | STATUS_FAILED);
        assert_eq!(f.run.take_request(), Some(RunRequest::Shutdown(5)));
        f.w(REG_DV_SIM_STATUS, STATUS_FAILED);
        assert_eq!(f.run.take_request(), Some(RunRequest::Shutdown(1)));
    }

    #[test]
    fn test_dv_log() {
        let mut f = Fixture::new();
        let out = CharPipe::new();
        f.wrapper.set_dv_output(Box::new(out.clone()));

        let record = RAM_BASE + 0x100;
        let file = RAM_BASE + 0x200;
        let fmt = RAM_BASE + 0x300;
        let name = RAM_BASE + 0x400;
        f.poke(file, b"test.c\0");
        f.poke(fmt, b"value %d name %-4s|\n\0");
        f.poke(name, b"abc\0");
        let words = [1u32, file as u32, 42, 2, fmt as u32];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        f.poke(record, &bytes);

        f.w(REG_DV_SIM_LOG, record as u32);
        f.w(REG_DV_SIM_LOG, -5i32 as u32);
        assert!(out.is_empty());
        f.w(REG_DV_SIM_LOG, name as u32);
        assert_eq!(out.take(), b"test.c:42: value -5 name abc |\n");

        // a record without arguments is emitted at once
        let words = [0u32, file as u32, 7, 0, name as u32];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        f.poke(record, &bytes);
        f.w(REG_DV_SIM_LOG, record as u32);
        assert_eq!(out.take(), b"test.c:7: abc\n");

        // unreadable record
        f.w(REG_DV_SIM_LOG, 0x4000_0000);
        f.w(REG_DV_SIM_LOG, record as u32);
        assert_eq!(out.take(), b"test.c:7: abc\n");
    }
}
