use buck_boost::config::{timer_reload, CONTROL_TICK_HZ};

use crate::clocks::TIMER_CLOCK_HZ;
use crate::device_access::with_devices_mut;

const COUNTER_HZ: u32 = 10_000_000;

pub fn init() {
    with_devices_mut(|devices, _| {
        devices.TIM3.psc.write(|w| {
            w.psc().variant((TIMER_CLOCK_HZ / COUNTER_HZ - 1) as u16) // 10MHz counter
        });
        devices.TIM3.arr.write(|w| {
            w.arr().variant(timer_reload(COUNTER_HZ, CONTROL_TICK_HZ) as u16) // 1000 counts at 100ns, one control cycle
        });
        devices.TIM3.egr.write(|w| w.ug().set_bit());
        devices.TIM3.sr.modify(|_, w| w.uif().clear_bit());
        devices.TIM3.cr1.modify(|_, w| w.cen().set_bit());
    });
}

/// Spins until the next control tick and consumes it.
pub fn wait() {
    loop {
        let ticked = with_devices_mut(|devices, _| {
            let ticked = devices.TIM3.sr.read().uif().bit_is_set();
            if ticked {
                devices.TIM3.sr.modify(|_, w| w.uif().clear_bit());
            }
            ticked
        });
        if ticked {
            return;
        }
    }
}

/// True when the next tick already fired while this cycle was still running.
pub fn overran() -> bool {
    with_devices_mut(|devices, _| devices.TIM3.sr.read().uif().bit_is_set())
}
