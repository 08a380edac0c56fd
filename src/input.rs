//! Operator input: step events and the hand-off from the slow tick.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;

use crate::config::{
    DEAD_TIME_MAX, DEAD_TIME_MIN, DUTY_MAX, DUTY_MIN, GEOMETRY_STEP, PERIOD_MAX, PERIOD_MIN,
};
use crate::pwm_geometry::PwmGeometry;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputEvent {
    IncreaseFrequency,
    DecreaseFrequency,
    IncreaseDeadTime,
    DecreaseDeadTime,
    IncreaseDuty,
    DecreaseDuty,
    SwitchMode,
    Start,
    Stop,
    Acknowledge,
}

fn step_up(value: u16, max: u16) -> u16 {
    if value < max { value.saturating_add(GEOMETRY_STEP).min(max) } else { value }
}

fn step_down(value: u16, min: u16) -> u16 {
    if value > min { value.saturating_sub(GEOMETRY_STEP).max(min) } else { value }
}

/// Applies one operator step to a geometry and returns the complete new tuple.
/// Events that are not geometry steps return the geometry unchanged.
pub fn step_geometry(geometry: &PwmGeometry, event: InputEvent) -> PwmGeometry {
    let mut next = *geometry;
    match event {
        // a shorter period is a higher frequency
        InputEvent::IncreaseFrequency => next.period = step_down(next.period, PERIOD_MIN),
        InputEvent::DecreaseFrequency => next.period = step_up(next.period, PERIOD_MAX),
        InputEvent::IncreaseDeadTime => next.dead_time = step_up(next.dead_time, DEAD_TIME_MAX),
        InputEvent::DecreaseDeadTime => next.dead_time = step_down(next.dead_time, DEAD_TIME_MIN),
        InputEvent::IncreaseDuty => next.duty = step_up(next.duty, DUTY_MAX),
        InputEvent::DecreaseDuty => next.duty = step_down(next.duty, DUTY_MIN),
        _ => {}
    }
    next
}

pub const MAILBOX_DEPTH: usize = 8;

/// Carries events from the slow tick (interrupt context) to the control cycle.
/// Events are whole values, so the control cycle never sees half an update.
pub struct InputMailbox {
    queue: Mutex<RefCell<Deque<InputEvent, MAILBOX_DEPTH>>>,
}

impl InputMailbox {
    pub const fn new() -> Self {
        InputMailbox { queue: Mutex::new(RefCell::new(Deque::new())) }
    }

    /// Queues an event; when full the event is dropped and handed back.
    pub fn post(&self, event: InputEvent) -> Result<(), InputEvent> {
        critical_section::with(|cs| self.queue.borrow(cs).borrow_mut().push_back(event))
    }

    pub fn take(&self) -> Option<InputEvent> {
        critical_section::with(|cs| self.queue.borrow(cs).borrow_mut().pop_front())
    }

    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| self.queue.borrow(cs).borrow().is_empty())
    }
}

impl Default for InputMailbox {
    fn default() -> Self {
        Self::new()
    }
}
