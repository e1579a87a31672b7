/*++

Licensed under the Apache-2.0 license.

File Name:

    alert_handler.rs

Abstract:

    File contains the alert handler: per-alert classification into classes,
    per-class accumulation and timeout, and the four-phase escalation state
    machine driving the shared escalation lines.

--*/

use crate::mubi::w1c;
use crate::shadow::{ShadowReg, ShadowWrite};
use ot_emu_bus::{
    cycles_to_ns, ActionHandle, Bus, BusError, Clock, GpioIn, GpioSink, IrqLine, Timer,
    NANOS_PER_SEC,
};
use ot_emu_types::{RvAddr, RvData, RvSize};
use std::cell::RefCell;
use std::rc::Rc;
use tock_registers::register_bitfields;
use tock_registers::LocalRegisterCopy;

pub const PARAM_N_ESC_SEV: usize = 4;
pub const PARAM_N_LOC_ALERT: usize = 7;
const CLASS_REG_COUNT: usize = 14;
const ACCUM_CNT_MAX: u32 = 0xffff;

/// Indices of the locally generated alerts.
pub mod local_alert {
    pub const ALERT_PINGFAIL: usize = 0;
    pub const ESC_PINGFAIL: usize = 1;
    pub const ALERT_INTEGFAIL: usize = 2;
    pub const ESC_INTEGFAIL: usize = 3;
    pub const BUS_INTEGFAIL: usize = 4;
    pub const SHADOW_REG_UPDATE_ERROR: usize = 5;
    pub const SHADOW_REG_STORAGE_ERROR: usize = 6;
}

register_bitfields! [
    u32,

    /// Class control
    ClassCtrl [
        EN OFFSET(0) NUMBITS(1) [],
        LOCK OFFSET(1) NUMBITS(1) [],
        EN_E0 OFFSET(2) NUMBITS(1) [],
        EN_E1 OFFSET(3) NUMBITS(1) [],
        EN_E2 OFFSET(4) NUMBITS(1) [],
        EN_E3 OFFSET(5) NUMBITS(1) [],
        MAP_E0 OFFSET(6) NUMBITS(2) [],
        MAP_E1 OFFSET(8) NUMBITS(2) [],
        MAP_E2 OFFSET(10) NUMBITS(2) [],
        MAP_E3 OFFSET(12) NUMBITS(2) [],
    ],
];

const CLASS_CTRL_MASK: u32 = 0x3fff;
const CLASS_CTRL_RESET: u32 = 0x393c;

/// Escalation state of a class, encoded as the STATE register reports it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ClassState {
    Idle,
    Timeout,
    FsmError,
    Terminal,
    Phase(usize),
}

impl ClassState {
    fn encode(self) -> u32 {
        match self {
            ClassState::Idle => 0,
            ClassState::Timeout => 1,
            ClassState::FsmError => 2,
            ClassState::Terminal => 3,
            ClassState::Phase(k) => 4 + k as u32,
        }
    }
}

/// Device configuration.
#[derive(Debug, Clone)]
pub struct AlertHandlerArgs {
    pub n_alerts: usize,
    pub n_classes: usize,
    /// Peripheral clock frequency, used to convert cycle counts to time.
    pub pclk: u64,
}

impl Default for AlertHandlerArgs {
    fn default() -> Self {
        Self {
            n_alerts: 65,
            n_classes: 4,
            pclk: 50_000_000,
        }
    }
}

#[derive(Default)]
struct AlertRegs {
    regwen: u32,
    en: ShadowReg,
    class: ShadowReg,
    cause: u32,
}

impl AlertRegs {
    fn new() -> Self {
        Self {
            regwen: 1,
            ..Default::default()
        }
    }
}

struct ClassRegs {
    regwen: u32,
    ctrl: ShadowReg,
    clr_regwen: u32,
    clr: ShadowReg,
    accum_cnt: u32,
    accum_thresh: ShadowReg,
    timeout_cyc: ShadowReg,
    crashdump_trigger: ShadowReg,
    phase_cyc: [ShadowReg; PARAM_N_ESC_SEV],
    state: ClassState,

    /// Pending timeout or phase timer
    timer_action: Option<ActionHandle>,
    /// Cycle count the pending timer was armed with
    timer_cycles: u32,
    /// Pending release of a previous phase's escalation
    release_action: Option<ActionHandle>,
    release_mask: u8,
    /// Severities currently asserted by this class
    esc_active: u8,
}

impl ClassRegs {
    fn new() -> Self {
        Self {
            regwen: 1,
            ctrl: ShadowReg::new(CLASS_CTRL_RESET),
            clr_regwen: 1,
            clr: ShadowReg::new(0),
            accum_cnt: 0,
            accum_thresh: ShadowReg::new(0),
            timeout_cyc: ShadowReg::new(0),
            crashdump_trigger: ShadowReg::new(0),
            phase_cyc: Default::default(),
            state: ClassState::Idle,
            timer_action: None,
            timer_cycles: 0,
            release_action: None,
            release_mask: 0,
            esc_active: 0,
        }
    }

    fn ctrl(&self) -> LocalRegisterCopy<u32, ClassCtrl::Register> {
        LocalRegisterCopy::new(self.ctrl.peek())
    }

    fn esc_enabled(&self, sev: usize) -> bool {
        self.ctrl().get() & (1 << (2 + sev)) != 0
    }

    fn esc_map(&self, sev: usize) -> usize {
        ((self.ctrl().get() >> (6 + 2 * sev)) & 0x3) as usize
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ClassReg {
    Regwen,
    Ctrl,
    ClrRegwen,
    Clr,
    AccumCnt,
    AccumThresh,
    TimeoutCyc,
    CrashdumpTrigger,
    PhaseCyc(usize),
    EscCnt,
    State,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Reg {
    IntrState,
    IntrEnable,
    IntrTest,
    PingTimerRegwen,
    PingTimeoutCyc,
    PingTimerEn,
    AlertRegwen(usize),
    AlertEn(usize),
    AlertClass(usize),
    AlertCause(usize),
    LocAlertRegwen(usize),
    LocAlertEn(usize),
    LocAlertClass(usize),
    LocAlertCause(usize),
    Class(usize, ClassReg),
}

pub struct AlertHandlerRegs {
    args: AlertHandlerArgs,
    intr_state: u32,
    intr_enable: u32,
    ping_timer_regwen: u32,
    ping_timeout_cyc: ShadowReg,
    ping_timer_en: ShadowReg,
    alerts: Vec<AlertRegs>,
    loc_alerts: Vec<AlertRegs>,
    classes: Vec<ClassRegs>,
    input_levels: Vec<i32>,
    irqs: Vec<IrqLine>,
    esc: [IrqLine; PARAM_N_ESC_SEV],
    timer: Timer,
}

impl AlertHandlerRegs {
    const PING_TIMEOUT_CYC_RESET: u32 = 256;

    fn new(clock: &Clock, args: AlertHandlerArgs) -> Self {
        let mut regs = Self::from_timer(Timer::new(clock), args);
        regs.irqs = (0..regs.classes.len()).map(|_| IrqLine::new()).collect();
        regs
    }

    fn mmap_size(&self) -> RvAddr {
        self.class_base() + (self.classes.len() * CLASS_REG_COUNT * 4) as RvAddr
    }

    fn class_base(&self) -> RvAddr {
        (0x18 + 4 * (4 * self.args.n_alerts + 4 * PARAM_N_LOC_ALERT)) as RvAddr
    }

    fn class_id_mask(&self) -> u32 {
        (self.classes.len() as u32).next_power_of_two().max(2) - 1
    }

    fn decode(&self, addr: RvAddr) -> Option<Reg> {
        if addr & 3 != 0 {
            return None;
        }
        let n = self.args.n_alerts;
        let fixed = match addr {
            0x00 => Some(Reg::IntrState),
            0x04 => Some(Reg::IntrEnable),
            0x08 => Some(Reg::IntrTest),
            0x0c => Some(Reg::PingTimerRegwen),
            0x10 => Some(Reg::PingTimeoutCyc),
            0x14 => Some(Reg::PingTimerEn),
            _ => None,
        };
        if fixed.is_some() {
            return fixed;
        }
        let mut idx = ((addr - 0x18) / 4) as usize;
        let groups: [(usize, fn(usize) -> Reg); 8] = [
            (n, Reg::AlertRegwen),
            (n, Reg::AlertEn),
            (n, Reg::AlertClass),
            (n, Reg::AlertCause),
            (PARAM_N_LOC_ALERT, Reg::LocAlertRegwen),
            (PARAM_N_LOC_ALERT, Reg::LocAlertEn),
            (PARAM_N_LOC_ALERT, Reg::LocAlertClass),
            (PARAM_N_LOC_ALERT, Reg::LocAlertCause),
        ];
        for (count, reg) in groups {
            if idx < count {
                return Some(reg(idx));
            }
            idx -= count;
        }
        let class = idx / CLASS_REG_COUNT;
        if class >= self.classes.len() {
            return None;
        }
        let reg = match idx % CLASS_REG_COUNT {
            0 => ClassReg::Regwen,
            1 => ClassReg::Ctrl,
            2 => ClassReg::ClrRegwen,
            3 => ClassReg::Clr,
            4 => ClassReg::AccumCnt,
            5 => ClassReg::AccumThresh,
            6 => ClassReg::TimeoutCyc,
            7 => ClassReg::CrashdumpTrigger,
            k @ 8..=11 => ClassReg::PhaseCyc(k - 8),
            12 => ClassReg::EscCnt,
            _ => ClassReg::State,
        };
        Some(Reg::Class(class, reg))
    }

    fn update_irqs(&self) {
        let level = self.intr_state & self.intr_enable;
        for (c, irq) in self.irqs.iter().enumerate() {
            irq.set_bool(level & (1 << c) != 0);
        }
    }

    fn update_esc_lines(&self) {
        let mut lines = [false; PARAM_N_ESC_SEV];
        for class in self.classes.iter() {
            for sev in 0..PARAM_N_ESC_SEV {
                if class.esc_active & (1 << sev) != 0 {
                    lines[class.esc_map(sev)] = true;
                }
            }
        }
        for (line, level) in self.esc.iter().zip(lines) {
            if line.is_high() != level {
                line.set_bool(level);
            }
        }
    }

    fn arm_class_timer(&mut self, c: usize, cycles: u32) {
        let ns = cycles_to_ns(cycles as u64, self.args.pclk);
        let class = &mut self.classes[c];
        self.timer.cancel_opt(&mut class.timer_action);
        class.timer_cycles = cycles;
        class.timer_action = Some(self.timer.schedule_poll_in(ns));
    }

    fn esc_cnt(&self, c: usize) -> u32 {
        let class = &self.classes[c];
        match class.timer_action.as_ref() {
            Some(action) => {
                let remaining = action.time().saturating_sub(self.timer.now()) as u128;
                let remaining_cycles = remaining * self.args.pclk as u128 / NANOS_PER_SEC as u128;
                (class.timer_cycles as u128).saturating_sub(remaining_cycles) as u32
            }
            None => 0,
        }
    }

    fn enter_phase0(&mut self, c: usize) {
        let class = &mut self.classes[c];
        class.state = ClassState::Phase(0);
        if class.ctrl().is_set(ClassCtrl::LOCK) {
            class.clr_regwen = 0;
        }
        if class.esc_enabled(0) {
            class.esc_active |= 1;
        }
        let cycles = class.phase_cyc[0].peek();
        log::debug!("alert_handler: class {c} escalates, phase 0");
        self.arm_class_timer(c, cycles);
        self.update_esc_lines();
    }

    /// Steps the escalation state machine of class `c`.
    fn class_fsm_update(&mut self, c: usize, timer_expired: bool) {
        let class = &self.classes[c];
        if !class.ctrl().is_set(ClassCtrl::EN) {
            return;
        }
        let accum_trigger = class.accum_cnt > class.accum_thresh.peek();
        let timeout_cyc = class.timeout_cyc.peek();
        let state = class.state;
        match state {
            ClassState::Idle => {
                if accum_trigger {
                    self.enter_phase0(c);
                } else if timeout_cyc != 0 {
                    let cycles = timeout_cyc;
                    self.classes[c].state = ClassState::Timeout;
                    self.arm_class_timer(c, cycles);
                }
            }
            ClassState::Timeout => {
                if timer_expired || accum_trigger {
                    self.enter_phase0(c);
                }
            }
            ClassState::Phase(k) if timer_expired => {
                if k + 1 < PARAM_N_ESC_SEV {
                    let class = &mut self.classes[c];
                    class.state = ClassState::Phase(k + 1);
                    if class.esc_enabled(k + 1) {
                        class.esc_active |= 1 << (k + 1);
                    }
                    // the previous phase line drops one tick after the next rises
                    class.release_mask |= 1 << k;
                    if class.release_action.is_none() {
                        class.release_action = Some(self.timer.schedule_bh());
                    }
                    let cycles = class.phase_cyc[k + 1].peek();
                    log::debug!("alert_handler: class {c} phase {}", k + 1);
                    self.arm_class_timer(c, cycles);
                    self.update_esc_lines();
                } else {
                    log::info!("alert_handler: class {c} reached terminal state");
                    self.classes[c].state = ClassState::Terminal;
                }
            }
            ClassState::Phase(_) | ClassState::Terminal | ClassState::FsmError => {}
        }
    }

    fn class_clear(&mut self, c: usize) {
        let class = &mut self.classes[c];
        if class.state == ClassState::FsmError {
            log::warn!("alert_handler: class {c} in FSM error, clear ignored");
            return;
        }
        self.timer.cancel_opt(&mut class.timer_action);
        self.timer.cancel_opt(&mut class.release_action);
        class.release_mask = 0;
        class.esc_active = 0;
        class.accum_cnt = 0;
        class.state = ClassState::Idle;
        self.update_esc_lines();
    }

    /// Latches an alert of class `class_id` and runs the class machinery.
    fn process_alert(&mut self, class_id: u32) {
        let c = class_id as usize;
        if c >= self.classes.len() {
            log::warn!("alert_handler: invalid class {class_id}");
            return;
        }
        self.intr_state |= 1 << c;
        let class = &mut self.classes[c];
        if class.ctrl().is_set(ClassCtrl::EN)
            && !matches!(class.state, ClassState::Terminal | ClassState::FsmError)
        {
            class.accum_cnt = (class.accum_cnt + 1).min(ACCUM_CNT_MAX);
        }
        self.class_fsm_update(c, false);
        self.update_irqs();
    }

    fn signal_alert(&mut self, n: usize) {
        let mask = self.class_id_mask();
        let alert = &mut self.alerts[n];
        if alert.en.peek() & 1 == 0 {
            return;
        }
        alert.cause = 1;
        let class_id = alert.class.peek() & mask;
        log::trace!("alert_handler: alert {n} -> class {class_id}");
        self.process_alert(class_id);
    }

    fn signal_local_alert(&mut self, n: usize) {
        let mask = self.class_id_mask();
        let alert = &mut self.loc_alerts[n];
        alert.cause = 1;
        if alert.en.peek() & 1 == 0 {
            return;
        }
        let class_id = alert.class.peek() & mask;
        self.process_alert(class_id);
    }

    fn shadow_write(&mut self, reg: Reg, val: u32) {
        let mask = self.class_id_mask();
        let shadow = match reg {
            Reg::PingTimeoutCyc => &mut self.ping_timeout_cyc,
            Reg::PingTimerEn => &mut self.ping_timer_en,
            Reg::AlertEn(n) => &mut self.alerts[n].en,
            Reg::AlertClass(n) => &mut self.alerts[n].class,
            Reg::LocAlertEn(n) => &mut self.loc_alerts[n].en,
            Reg::LocAlertClass(n) => &mut self.loc_alerts[n].class,
            Reg::Class(c, ClassReg::Ctrl) => &mut self.classes[c].ctrl,
            Reg::Class(c, ClassReg::Clr) => &mut self.classes[c].clr,
            Reg::Class(c, ClassReg::AccumThresh) => &mut self.classes[c].accum_thresh,
            Reg::Class(c, ClassReg::TimeoutCyc) => &mut self.classes[c].timeout_cyc,
            Reg::Class(c, ClassReg::CrashdumpTrigger) => &mut self.classes[c].crashdump_trigger,
            Reg::Class(c, ClassReg::PhaseCyc(k)) => &mut self.classes[c].phase_cyc[k],
            _ => return,
        };
        let val = match reg {
            Reg::PingTimeoutCyc => val & 0xffff,
            Reg::PingTimerEn | Reg::AlertEn(_) | Reg::LocAlertEn(_) => val & 1,
            Reg::AlertClass(_) | Reg::LocAlertClass(_) => val & mask,
            Reg::Class(_, ClassReg::Ctrl) => val & CLASS_CTRL_MASK,
            Reg::Class(_, ClassReg::Clr) => val & 1,
            Reg::Class(_, ClassReg::AccumThresh) => val & ACCUM_CNT_MAX,
            Reg::Class(_, ClassReg::CrashdumpTrigger) => val & 0x3,
            _ => val,
        };
        match shadow.write(val) {
            ShadowWrite::Staged => {}
            ShadowWrite::Committed => {
                if let Reg::Class(c, ClassReg::Clr) = reg {
                    self.classes[c].clr.init(0);
                    if val & 1 != 0 {
                        if self.classes[c].clr_regwen & 1 != 0 {
                            self.class_clear(c);
                        } else {
                            log::warn!("alert_handler: class {c} clear is locked");
                        }
                    }
                }
            }
            ShadowWrite::Mismatch => {
                log::warn!("alert_handler: shadow update mismatch on {reg:?}");
                self.signal_local_alert(local_alert::SHADOW_REG_UPDATE_ERROR);
            }
        }
    }

    fn is_locked(&self, reg: Reg) -> bool {
        match reg {
            Reg::PingTimeoutCyc | Reg::PingTimerEn => self.ping_timer_regwen & 1 == 0,
            Reg::AlertEn(n) | Reg::AlertClass(n) => self.alerts[n].regwen & 1 == 0,
            Reg::LocAlertEn(n) | Reg::LocAlertClass(n) => self.loc_alerts[n].regwen & 1 == 0,
            Reg::Class(c, ClassReg::Clr) => self.classes[c].clr_regwen & 1 == 0,
            Reg::Class(
                c,
                ClassReg::Ctrl
                | ClassReg::AccumThresh
                | ClassReg::TimeoutCyc
                | ClassReg::CrashdumpTrigger
                | ClassReg::PhaseCyc(_),
            ) => self.classes[c].regwen & 1 == 0,
            _ => false,
        }
    }

    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        let reg = self.decode(addr).ok_or_else(|| {
            log::warn!("alert_handler: invalid read at {addr:#x}");
            BusError::LoadAccessFault
        })?;
        let val = match reg {
            Reg::IntrState => self.intr_state,
            Reg::IntrEnable => self.intr_enable,
            Reg::IntrTest => 0,
            Reg::PingTimerRegwen => self.ping_timer_regwen,
            Reg::PingTimeoutCyc => self.ping_timeout_cyc.read(),
            Reg::PingTimerEn => self.ping_timer_en.read(),
            Reg::AlertRegwen(n) => self.alerts[n].regwen,
            Reg::AlertEn(n) => self.alerts[n].en.read(),
            Reg::AlertClass(n) => self.alerts[n].class.read(),
            Reg::AlertCause(n) => self.alerts[n].cause,
            Reg::LocAlertRegwen(n) => self.loc_alerts[n].regwen,
            Reg::LocAlertEn(n) => self.loc_alerts[n].en.read(),
            Reg::LocAlertClass(n) => self.loc_alerts[n].class.read(),
            Reg::LocAlertCause(n) => self.loc_alerts[n].cause,
            Reg::Class(c, creg) => match creg {
                ClassReg::Regwen => self.classes[c].regwen,
                ClassReg::Ctrl => self.classes[c].ctrl.read(),
                ClassReg::ClrRegwen => self.classes[c].clr_regwen,
                ClassReg::Clr => self.classes[c].clr.read(),
                ClassReg::AccumCnt => self.classes[c].accum_cnt,
                ClassReg::AccumThresh => self.classes[c].accum_thresh.read(),
                ClassReg::TimeoutCyc => self.classes[c].timeout_cyc.read(),
                ClassReg::CrashdumpTrigger => self.classes[c].crashdump_trigger.read(),
                ClassReg::PhaseCyc(k) => self.classes[c].phase_cyc[k].read(),
                ClassReg::EscCnt => self.esc_cnt(c),
                ClassReg::State => self.classes[c].state.encode(),
            },
        };
        Ok(val)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word {
            Err(BusError::StoreAccessFault)?
        }
        let reg = self.decode(addr).ok_or_else(|| {
            log::warn!("alert_handler: invalid write at {addr:#x}");
            BusError::StoreAccessFault
        })?;
        if self.is_locked(reg) {
            log::warn!("alert_handler: {reg:?} is write-protected, {val:#x} ignored");
            return Ok(());
        }
        let class_mask = u32::MAX >> (32 - self.classes.len());
        match reg {
            Reg::IntrState => {
                let cleared = val & self.intr_state & class_mask;
                self.intr_state = w1c(self.intr_state, val);
                for c in (0..self.classes.len()).filter(|c| cleared & (1 << c) != 0) {
                    match self.classes[c].state {
                        ClassState::Timeout => {
                            let class = &mut self.classes[c];
                            self.timer.cancel_opt(&mut class.timer_action);
                            class.state = ClassState::Idle;
                        }
                        ClassState::Phase(_) => {
                            log::warn!("alert_handler: class {c} is escalating, clear has no effect");
                        }
                        _ => {}
                    }
                }
            }
            Reg::IntrEnable => self.intr_enable = val & class_mask,
            Reg::IntrTest => self.intr_state |= val & class_mask,
            Reg::PingTimerRegwen => self.ping_timer_regwen &= val & 1,
            Reg::AlertRegwen(n) => self.alerts[n].regwen &= val & 1,
            Reg::LocAlertRegwen(n) => self.loc_alerts[n].regwen &= val & 1,
            Reg::AlertCause(n) => self.alerts[n].cause = w1c(self.alerts[n].cause, val & 1),
            Reg::LocAlertCause(n) => {
                self.loc_alerts[n].cause = w1c(self.loc_alerts[n].cause, val & 1)
            }
            Reg::Class(c, ClassReg::Regwen) => self.classes[c].regwen &= val & 1,
            Reg::Class(c, ClassReg::ClrRegwen) => self.classes[c].clr_regwen &= val & 1,
            Reg::Class(_, ClassReg::AccumCnt | ClassReg::EscCnt | ClassReg::State) => {
                log::warn!("alert_handler: {reg:?} is read-only");
            }
            _ => self.shadow_write(reg, val),
        }
        self.update_irqs();
        Ok(())
    }

    fn poll(&mut self) {
        for c in 0..self.classes.len() {
            let class = &mut self.classes[c];
            if self.timer.fired(&mut class.release_action) {
                class.esc_active &= !class.release_mask;
                class.release_mask = 0;
                self.update_esc_lines();
            }
            if self.timer.fired(&mut self.classes[c].timer_action) {
                self.class_fsm_update(c, true);
            }
        }
    }

    fn reset(&mut self) {
        for class in self.classes.iter_mut() {
            self.timer.cancel_opt(&mut class.timer_action);
            self.timer.cancel_opt(&mut class.release_action);
        }
        let irqs = std::mem::take(&mut self.irqs);
        let esc = std::mem::take(&mut self.esc);
        let timer = self.timer.clone();
        let input_levels = std::mem::take(&mut self.input_levels);
        *self = Self {
            irqs,
            esc,
            input_levels,
            ..Self::from_timer(timer, self.args.clone())
        };
        self.update_irqs();
        self.update_esc_lines();
    }

    fn from_timer(timer: Timer, args: AlertHandlerArgs) -> Self {
        let args = AlertHandlerArgs {
            n_classes: args.n_classes.clamp(1, 32),
            ..args
        };
        Self {
            intr_state: 0,
            intr_enable: 0,
            ping_timer_regwen: 1,
            ping_timeout_cyc: ShadowReg::new(Self::PING_TIMEOUT_CYC_RESET),
            ping_timer_en: ShadowReg::new(0),
            alerts: (0..args.n_alerts).map(|_| AlertRegs::new()).collect(),
            loc_alerts: (0..PARAM_N_LOC_ALERT).map(|_| AlertRegs::new()).collect(),
            classes: (0..args.n_classes).map(|_| ClassRegs::new()).collect(),
            input_levels: vec![0; args.n_alerts],
            irqs: Vec::new(),
            esc: Default::default(),
            timer,
            args,
        }
    }

    #[cfg(test)]
    fn force_fsm_error(&mut self, c: usize) {
        self.classes[c].state = ClassState::FsmError;
    }
}

impl GpioSink for AlertHandlerRegs {
    /// Alert inputs are level lines; a rising edge signals the alert.
    fn set_level(&mut self, input: usize, level: i32) {
        let Some(prev) = self.input_levels.get_mut(input) else {
            log::error!("alert_handler: no alert input {input}");
            return;
        };
        let rising = *prev == 0 && level != 0;
        *prev = level;
        if rising {
            self.signal_alert(input);
        }
    }
}

/// Alert handler peripheral
#[derive(Clone)]
pub struct AlertHandler {
    regs: Rc<RefCell<AlertHandlerRegs>>,
}

impl AlertHandler {
    pub fn new(clock: &Clock, args: AlertHandlerArgs) -> Self {
        Self {
            regs: Rc::new(RefCell::new(AlertHandlerRegs::new(clock, args))),
        }
    }

    pub fn mmap_size(&self) -> RvAddr {
        self.regs.borrow().mmap_size()
    }

    /// Offset of the first register of class `c`.
    pub fn class_offset(&self, c: usize) -> RvAddr {
        self.regs.borrow().class_base() + (c * CLASS_REG_COUNT * 4) as RvAddr
    }

    /// Input line of alert `n`.
    pub fn alert_input(&self, n: usize) -> GpioIn {
        GpioIn::new(&self.regs, n)
    }

    /// Interrupt output of class `c`.
    pub fn irq(&self, c: usize) -> IrqLine {
        self.regs.borrow().irqs[c].clone()
    }

    /// Escalation output `k`.
    pub fn esc(&self, k: usize) -> IrqLine {
        self.regs.borrow().esc[k].clone()
    }

    pub fn class_state(&self, c: usize) -> ClassState {
        self.regs.borrow().classes[c].state
    }

    pub fn accum_cnt(&self, c: usize) -> u32 {
        self.regs.borrow().classes[c].accum_cnt
    }

    pub fn has_pending_timer(&self, c: usize) -> bool {
        self.regs.borrow().classes[c].timer_action.is_some()
    }
}

impl Bus for AlertHandler {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        self.regs.borrow_mut().read(size, addr)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        self.regs.borrow_mut().write(size, addr, val)
    }

    fn poll(&mut self) {
        self.regs.borrow_mut().poll()
    }

    fn warm_reset(&mut self) {
        self.regs.borrow_mut().reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASS_A_CTRL: u32 = 0x1 | 0x3c | (1 << 8) | (2 << 10) | (3 << 12);

    struct Fixture {
        clock: Clock,
        ah: AlertHandler,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Clock::new();
            let ah = AlertHandler::new(
                &clock,
                AlertHandlerArgs {
                    n_alerts: 4,
                    n_classes: 4,
                    pclk: 50_000_000,
                },
            );
            Self { clock, ah }
        }

        fn offsets(&self) -> (RvAddr, RvAddr) {
            // (ALERT_EN_SHADOWED_0, ALERT_CLASS_SHADOWED_0) with 4 alerts
            (0x18 + 4 * 4, 0x18 + 8 * 4)
        }

        fn shadow(&mut self, addr: RvAddr, val: u32) {
            self.ah.write(RvSize::Word, addr, val).unwrap();
            self.ah.write(RvSize::Word, addr, val).unwrap();
        }

        fn class_reg(&self, c: usize, idx: u32) -> RvAddr {
            self.ah.class_offset(c) + idx * 4
        }

        fn setup_class_a(&mut self, phases: [u32; 4]) {
            let (en, class) = self.offsets();
            self.shadow(en, 1);
            self.shadow(class, 0);
            self.shadow(self.class_reg(0, 1), CLASS_A_CTRL);
            self.shadow(self.class_reg(0, 5), 0);
            for (k, cyc) in phases.iter().enumerate() {
                self.shadow(self.class_reg(0, 8 + k as u32), *cyc);
            }
        }

        fn advance(&mut self, ns: u64) {
            let end = self.clock.now() + ns;
            while self.clock.now() < end {
                self.clock.step(end - self.clock.now(), &mut self.ah);
            }
        }

        fn esc_levels(&self) -> [bool; 4] {
            [0, 1, 2, 3].map(|k| self.ah.esc(k).is_high())
        }
    }

    #[test]
    fn test_register_layout() {
        let f = Fixture::new();
        assert_eq!(f.ah.class_offset(0), 0x18 + 4 * (16 + 28));
        assert_eq!(f.ah.mmap_size(), f.ah.class_offset(0) + 4 * 14 * 4);
    }

    #[test]
    fn test_escalation_sequence() {
        let mut f = Fixture::new();
        f.setup_class_a([10, 20, 30, 40]);
        f.ah.alert_input(0).set(1);
        assert_eq!(f.ah.class_state(0), ClassState::Phase(0));
        assert_eq!(f.esc_levels(), [true, false, false, false]);
        assert_eq!(f.ah.accum_cnt(0), 1);

        // 10 cycles at 50 MHz
        f.advance(200);
        assert_eq!(f.ah.class_state(0), ClassState::Phase(1));
        f.advance(1);
        assert_eq!(f.esc_levels(), [false, true, false, false]);

        f.advance(20 * 20 + 30 * 20);
        assert_eq!(f.ah.class_state(0), ClassState::Phase(3));
        f.advance(40 * 20);
        assert_eq!(f.ah.class_state(0), ClassState::Terminal);
        assert_eq!(f.esc_levels(), [false, false, false, true]);
        assert!(!f.ah.has_pending_timer(0));

        // terminal state absorbs further alerts
        f.ah.alert_input(0).set(0);
        f.ah.alert_input(0).set(1);
        assert_eq!(f.ah.accum_cnt(0), 1);
    }

    #[test]
    fn test_clear_returns_to_idle() {
        let mut f = Fixture::new();
        f.setup_class_a([10, 10, 10, 10]);
        f.ah.alert_input(0).set(1);
        assert_eq!(f.ah.class_state(0), ClassState::Phase(0));
        let clr = f.class_reg(0, 3);
        f.shadow(clr, 1);
        assert_eq!(f.ah.class_state(0), ClassState::Idle);
        assert_eq!(f.ah.accum_cnt(0), 0);
        assert_eq!(f.esc_levels(), [false; 4]);
        assert!(!f.ah.has_pending_timer(0));
    }

    #[test]
    fn test_fsm_error_is_immune_to_clear() {
        let mut f = Fixture::new();
        f.setup_class_a([10, 10, 10, 10]);
        f.ah.regs.borrow_mut().force_fsm_error(0);
        let clr = f.class_reg(0, 3);
        f.shadow(clr, 1);
        assert_eq!(f.ah.class_state(0), ClassState::FsmError);
        assert_eq!(f.ah.read(RvSize::Word, f.class_reg(0, 13)), Ok(2));
    }

    #[test]
    fn test_timeout_cancelled_by_interrupt_clear() {
        let mut f = Fixture::new();
        f.setup_class_a([10, 10, 10, 10]);
        f.shadow(f.class_reg(0, 5), 5);
        f.shadow(f.class_reg(0, 6), 100);
        f.ah.write(RvSize::Word, 0x4, 1).unwrap();
        f.ah.alert_input(0).set(1);
        assert_eq!(f.ah.class_state(0), ClassState::Timeout);
        assert!(f.ah.irq(0).is_high());
        f.advance(20 * 50);
        let esc_cnt = f.ah.read(RvSize::Word, f.class_reg(0, 12)).unwrap();
        assert_eq!(esc_cnt, 50);
        f.ah.write(RvSize::Word, 0x0, 1).unwrap();
        assert_eq!(f.ah.class_state(0), ClassState::Idle);
        assert!(!f.ah.irq(0).is_high());
        assert!(!f.ah.has_pending_timer(0));
    }

    #[test]
    fn test_timeout_expiry_escalates() {
        let mut f = Fixture::new();
        f.setup_class_a([10, 10, 10, 10]);
        f.shadow(f.class_reg(0, 5), 5);
        f.shadow(f.class_reg(0, 6), 100);
        f.ah.alert_input(0).set(1);
        f.advance(20 * 100);
        assert_eq!(f.ah.class_state(0), ClassState::Phase(0));
        assert!(f.ah.esc(0).is_high());
    }

    #[test]
    fn test_shadow_mismatch_raises_local_alert() {
        let mut f = Fixture::new();
        // route the local shadow update error alert to class B
        let loc_en = 0x18 + 4 * 16 + 4 * 7 + 4 * local_alert::SHADOW_REG_UPDATE_ERROR as u32;
        let loc_class = loc_en + 4 * 7;
        let loc_cause = loc_class + 4 * 7;
        f.shadow(loc_en, 1);
        f.shadow(loc_class, 1);
        f.shadow(f.class_reg(1, 1), 0x1);
        let thresh = f.class_reg(0, 5);
        f.ah.write(RvSize::Word, thresh, 3).unwrap();
        f.ah.write(RvSize::Word, thresh, 4).unwrap();
        assert_eq!(f.ah.read(RvSize::Word, thresh), Ok(0));
        assert_eq!(f.ah.read(RvSize::Word, loc_cause), Ok(1));
        assert_eq!(f.ah.read(RvSize::Word, 0x0), Ok(0b10));
        assert_eq!(f.ah.accum_cnt(1), 1);
    }

    #[test]
    fn test_regwen_locks_configuration() {
        let mut f = Fixture::new();
        let (en, _) = f.offsets();
        f.ah.write(RvSize::Word, 0x18, 0).unwrap();
        f.shadow(en, 1);
        assert_eq!(f.ah.read(RvSize::Word, en), Ok(0));
        f.ah.write(RvSize::Word, 0x18, 1).unwrap();
        assert_eq!(f.ah.read(RvSize::Word, 0x18), Ok(0));
    }

    #[test]
    fn test_disabled_alert_is_ignored() {
        let mut f = Fixture::new();
        f.ah.alert_input(1).set(1);
        assert_eq!(f.ah.read(RvSize::Word, 0x18 + 12 * 4 + 4), Ok(0));
        assert_eq!(f.ah.read(RvSize::Word, 0x0), Ok(0));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut f = Fixture::new();
        f.setup_class_a([10, 10, 10, 10]);
        f.ah.alert_input(0).set(1);
        f.ah.warm_reset();
        assert_eq!(f.ah.class_state(0), ClassState::Idle);
        assert_eq!(f.esc_levels(), [false; 4]);
        assert_eq!(f.ah.read(RvSize::Word, f.class_reg(0, 1)), Ok(CLASS_CTRL_RESET));
    }
}
