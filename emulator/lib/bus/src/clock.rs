/*++

Licensed under the Apache-2.0 license.

File Name:

    clock.rs

Abstract:

    File contains the virtual Clock and Timer types, used to implement
    timer-based deferred execution for peripherals. Time is counted in
    virtual nanoseconds.

--*/
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeSet, HashSet},
    ptr,
    rc::Rc,
};

use crate::Bus;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Per-device handle on the shared [`Clock`]. A device keeps its pending
/// deadlines as `Option<ActionHandle>` slots and checks them with
/// [`Timer::fired`] from its [`Bus::poll`].
///
/// ```
/// use ot_emu_bus::{ActionHandle, Clock, Timer};
///
/// let clock = Clock::new();
/// let timer = Timer::new(&clock);
/// let mut pace: Option<ActionHandle> = None;
/// timer.anticipate(&mut pace, 500);
/// timer.anticipate(&mut pace, 800);
/// assert_eq!(clock.next_action_time(), Some(500));
/// clock.increment(500);
/// assert!(timer.fired(&mut pace));
/// assert!(pace.is_none());
/// ```
#[derive(Clone)]
pub struct Timer {
    clock: Rc<ClockImpl>,
}
impl Timer {
    /// Binds a handle to `clock`.
    pub fn new(clock: &Clock) -> Self {
        Self {
            clock: Rc::clone(&clock.clock),
        }
    }

    /// Virtual time, in nanoseconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Consumes `action` once its deadline has passed. An empty slot never
    /// fires.
    pub fn fired(&self, action: &mut Option<ActionHandle>) -> bool {
        let has_fired = if let Some(ref action) = action {
            debug_assert_eq!(
                action.0.id.timer_ptr,
                Rc::as_ptr(&self.clock),
                "action belongs to another clock"
            );
            self.clock.has_fired(action.0.time)
        } else {
            false
        };
        if has_fired {
            *action = None;
        }
        has_fired
    }

    /// Requests a [`Bus::poll()`] at the absolute deadline `time`.
    pub fn schedule_poll_at(&self, time: u64) -> ActionHandle {
        self.clock.schedule_action_at(time, TimerAction::Poll)
    }

    /// Requests a [`Bus::poll()`] `ns_from_now` nanoseconds ahead.
    pub fn schedule_poll_in(&self, ns_from_now: u64) -> ActionHandle {
        self.schedule_poll_at(self.now().wrapping_add(ns_from_now))
    }

    /// Schedules a bottom half: a call to [`Bus::poll()`] on the next clock
    /// advance, never from within the current register access.
    pub fn schedule_bh(&self) -> ActionHandle {
        self.schedule_poll_in(0)
    }

    /// Arms `slot` so that it fires no later than `time`. An action already
    /// pending in `slot` with an earlier deadline is kept.
    pub fn anticipate(&self, slot: &mut Option<ActionHandle>, time: u64) {
        if let Some(pending) = slot.as_ref() {
            if self.clock.is_before_or_at(pending.time(), time) {
                return;
            }
        }
        if let Some(pending) = slot.take() {
            self.cancel(pending);
        }
        *slot = Some(self.schedule_poll_at(time));
    }

    /// Cancels the action in `slot`, if any.
    pub fn cancel_opt(&self, slot: &mut Option<ActionHandle>) {
        if let Some(action) = slot.take() {
            self.cancel(action);
        }
    }

    /// Drops a pending deadline. The handle must come from this clock.
    pub fn cancel(&self, handle: ActionHandle) {
        self.clock.cancel(handle)
    }
}

pub struct Clock {
    clock: Rc<ClockImpl>,
}
impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
impl Clock {
    /// Starts virtual time at zero.
    pub fn new() -> Clock {
        Self {
            clock: ClockImpl::new(),
        }
    }

    pub fn timer(&self) -> Timer {
        Timer::new(self)
    }

    /// Virtual time, in nanoseconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Time of the earliest pending action, if any.
    pub fn next_action_time(&self) -> Option<u64> {
        self.clock.next_action_time.get()
    }

    /// Advances time by `delta` and returns the kinds of actions that came
    /// due.
    #[inline]
    pub fn increment(&self, delta: u64) -> HashSet<TimerAction> {
        self.clock.increment(delta)
    }

    /// Advances time by `delta`, polling `bus` once if anything came due.
    #[inline]
    pub fn increment_and_process_timer_actions(
        &self,
        delta: u64,
        bus: &mut impl Bus,
    ) -> HashSet<TimerAction> {
        let fired_actions = self.increment(delta);
        if fired_actions.contains(&TimerAction::Poll) {
            bus.poll();
        }
        fired_actions
    }

    /// Advances to the earliest pending deadline (or by `max_delta` when
    /// nothing is due sooner) and processes the fired actions. Returns the
    /// amount of time that elapsed.
    pub fn step(&self, max_delta: u64, bus: &mut impl Bus) -> u64 {
        let delta = match self.next_action_time() {
            Some(time) => time.wrapping_sub(self.now()).min(max_delta),
            None => max_delta,
        };
        // a due action further in the "past" than half the range never happens
        let delta = if delta >= (u64::MAX >> 1) { 0 } else { delta };
        self.increment_and_process_timer_actions(delta, bus);
        delta
    }
}

/// Pending deadline owned by a device slot.
pub struct ActionHandle(ActionHandleImpl);
impl From<ActionHandleImpl> for ActionHandle {
    fn from(val: ActionHandleImpl) -> Self {
        ActionHandle(val)
    }
}
impl ActionHandle {
    /// Absolute deadline of the action, in nanoseconds.
    pub fn time(&self) -> u64 {
        self.0.time
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
struct ActionHandleImpl {
    time: u64,

    id: TimerActionId,

    action: TimerAction,
}
impl From<ActionHandle> for ActionHandleImpl {
    fn from(val: ActionHandle) -> Self {
        val.0
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
struct TimerActionId {
    /// Owning clock, compared but never dereferenced
    timer_ptr: *const ClockImpl,
    id: u64,
}
impl Default for TimerActionId {
    fn default() -> Self {
        Self {
            timer_ptr: ptr::null(),
            id: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TimerAction {
    Poll,
}

struct ClockImpl {
    now: Cell<u64>,
    next_action_time: Cell<Option<u64>>,
    next_action_id: Cell<u64>,
    action_handles: RefCell<BTreeSet<ActionHandleImpl>>,
}
impl ClockImpl {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            now: Cell::new(0),
            next_action_time: Cell::new(None),
            next_action_id: Cell::new(0),
            action_handles: RefCell::new(BTreeSet::new()),
        })
    }

    #[inline]
    fn now(&self) -> u64 {
        self.now.get()
    }

    #[inline]
    fn increment(&self, delta: u64) -> HashSet<TimerAction> {
        let mut fired_actions: HashSet<TimerAction> = HashSet::new();
        assert!(
            delta < (u64::MAX >> 1),
            "time step over {} ns",
            (u64::MAX >> 1)
        );
        self.now.set(self.now.get().wrapping_add(delta));
        if let Some(next_action_time) = self.next_action_time.get() {
            if self.has_fired(next_action_time) {
                self.remove_fired_actions(&mut fired_actions);
                return fired_actions;
            }
        }
        fired_actions
    }

    fn schedule_action_at(self: &Rc<Self>, time: u64, action: TimerAction) -> ActionHandle {
        assert!(
            time.wrapping_sub(self.now()) < (u64::MAX >> 1),
            "deadline over {} ns ahead",
            (u64::MAX >> 1)
        );
        let new_action = ActionHandleImpl {
            time,
            id: self.next_action_id(),
            action,
        };
        let mut actions = self.action_handles.borrow_mut();
        actions.insert(new_action);
        self.recompute_next_action_time(&actions);
        new_action.into()
    }
    fn cancel(self: &Rc<Self>, action: ActionHandle) {
        let action = ActionHandleImpl::from(action);
        assert_eq!(
            Rc::as_ptr(self),
            action.id.timer_ptr,
            "action belongs to another clock"
        );
        let mut future_actions = self.action_handles.borrow_mut();
        future_actions.remove(&action);
        self.recompute_next_action_time(&future_actions)
    }
    fn next_action_id(self: &Rc<Self>) -> TimerActionId {
        let result = TimerActionId {
            timer_ptr: Rc::as_ptr(self),
            id: self.next_action_id.get(),
        };
        self.next_action_id
            .set(self.next_action_id.get().wrapping_add(1));
        result
    }
    fn has_fired(&self, action_time: u64) -> bool {
        self.now().wrapping_sub(action_time) < (u64::MAX >> 1)
    }
    fn is_before_or_at(&self, a: u64, b: u64) -> bool {
        a.wrapping_sub(self.now()) <= b.wrapping_sub(self.now())
    }
    fn recompute_next_action_time(&self, future_actions: &BTreeSet<ActionHandleImpl>) {
        self.next_action_time
            .set(self.find_next_action(future_actions).map(|a| a.time));
    }
    fn find_next_action<'a>(
        &self,
        future_actions: &'a BTreeSet<ActionHandleImpl>,
    ) -> Option<&'a ActionHandleImpl> {
        let search_start = self.now().wrapping_sub(u64::MAX >> 1);
        let search_action = ActionHandleImpl {
            time: search_start,
            id: TimerActionId::default(),
            action: TimerAction::Poll,
        };
        if let Some(action) = future_actions.range(&search_action..).next() {
            return Some(action);
        }
        future_actions.iter().next()
    }

    #[cold]
    fn remove_fired_actions(&self, fired_actions: &mut HashSet<TimerAction>) {
        let mut future_actions = self.action_handles.borrow_mut();
        while let Some(action) = self.find_next_action(&future_actions) {
            if !self.has_fired(action.time) {
                break;
            }
            let action = *action;
            future_actions.remove(&action);
            fired_actions.insert(action.action);
        }
        self.recompute_next_action_time(&future_actions);
    }
}

/// Converts `cycles` of a clock running at `freq_hz` into nanoseconds,
/// rounding up so that a non-zero cycle count never maps to zero time.
pub fn cycles_to_ns(cycles: u64, freq_hz: u64) -> u64 {
    if freq_hz == 0 {
        return 0;
    }
    let ns = (cycles as u128 * NANOS_PER_SEC as u128).div_ceil(freq_hz as u128);
    ns.min((u64::MAX >> 2) as u128) as u64
}

#[cfg(test)]
mod tests {
    use crate::testing::FakeBus;

    use super::*;

    #[test]
    fn test_clock() {
        let clock = Clock::new();
        assert_eq!(clock.now(), 0);
        assert!(clock.increment(25).is_empty());
        assert_eq!(clock.now(), 25);
        assert!(clock.increment(100).is_empty());
        assert_eq!(clock.now(), 125);
    }

    #[test]
    fn test_timer_fired_and_cancel() {
        let clock = Clock::new();
        let timer = clock.timer();
        let mut action0 = Some(timer.schedule_poll_in(25));
        let mut action1 = Some(timer.schedule_poll_in(40));
        let mut action2 = Option::<ActionHandle>::None;

        assert!(clock.increment(24).is_empty());
        assert!(!timer.fired(&mut action0) && action0.is_some());

        assert!(!clock.increment(1).is_empty());
        assert!(timer.fired(&mut action0) && action0.is_none());
        assert!(!timer.fired(&mut action1) && action1.is_some());
        assert!(!timer.fired(&mut action2) && action2.is_none());

        timer.cancel_opt(&mut action1);
        assert!(action1.is_none());
        assert!(clock.increment(100).is_empty());

        action2 = Some(timer.schedule_poll_in(1));
        assert!(!clock.increment(1).is_empty());
        assert!(timer.fired(&mut action2));
    }

    #[test]
    fn test_bottom_half_fires_on_next_advance() {
        let clock = Clock::new();
        let timer = clock.timer();
        let mut bus = FakeBus::new();
        let _bh = timer.schedule_bh();
        assert_eq!(clock.next_action_time(), Some(0));
        clock.increment_and_process_timer_actions(0, &mut bus);
        assert_eq!(bus.log.take(), "poll()\n");
        assert_eq!(clock.next_action_time(), None);
    }

    #[test]
    fn test_anticipate_keeps_earlier_deadline() {
        let clock = Clock::new();
        let timer = clock.timer();
        let mut slot = None;
        timer.anticipate(&mut slot, 100);
        timer.anticipate(&mut slot, 200);
        assert_eq!(slot.as_ref().map(ActionHandle::time), Some(100));
        timer.anticipate(&mut slot, 50);
        assert_eq!(slot.as_ref().map(ActionHandle::time), Some(50));
        assert_eq!(clock.next_action_time(), Some(50));
    }

    #[test]
    fn test_step_jumps_to_deadline() {
        let clock = Clock::new();
        let timer = clock.timer();
        let mut bus = FakeBus::new();
        let mut action = Some(timer.schedule_poll_in(700));
        assert_eq!(clock.step(1000, &mut bus), 700);
        assert_eq!(bus.log.take(), "poll()\n");
        assert!(timer.fired(&mut action));
        assert_eq!(clock.step(1000, &mut bus), 1000);
        assert_eq!(clock.now(), 1700);
    }

    #[test]
    fn test_timer_schedule_clock_wraparound() {
        let clock = Clock::new();
        clock.clock.now.set(u64::MAX - 10);
        let timer = clock.timer();
        let mut action = Some(timer.schedule_poll_in(20));
        assert!(clock.increment(19).is_empty());
        assert!(!clock.increment(1).is_empty());
        assert!(timer.fired(&mut action));
    }

    #[test]
    fn test_cycles_to_ns() {
        assert_eq!(cycles_to_ns(10, 1_000_000_000), 10);
        assert_eq!(cycles_to_ns(1, 3), 333_333_334);
        assert_eq!(cycles_to_ns(0, 50_000_000), 0);
        assert_eq!(cycles_to_ns(10, 0), 0);
    }

    #[test]
    #[should_panic(expected = "deadline over 9223372036854775807 ns ahead")]
    fn test_schedule_too_far_in_future() {
        let clock = Clock::new();
        clock.increment(123729);
        let timer = Timer::new(&clock);
        timer.schedule_poll_in(0x7fff_ffff_ffff_ffff);
    }

    #[test]
    #[should_panic(expected = "action belongs to another clock")]
    fn test_mixup_timer_actions_on_cancel() {
        let clock0 = Clock::new();
        let clock0_action0 = clock0.timer().schedule_poll_at(50);

        let clock1 = Clock::new();
        let _clock1_action0 = clock1.timer().schedule_poll_at(50);

        clock1.timer().cancel(clock0_action0);
    }
}
