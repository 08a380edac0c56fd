use buck_boost::Indicators;

use crate::device_access::with_devices_mut;

// PB0 green  ready
// PB1 yellow switching
// PB2 red    fault latched
// push-pull, high is lit
//
// PC13 open drain to the LED cathode, low is lit; flips on every mode change

pub fn init() {
    with_devices_mut(|devices, _| {
        devices.GPIOB.odr.modify(|_, w| {
            w
                .odr0().clear_bit()
                .odr1().clear_bit()
                .odr2().clear_bit()
        });
        devices.GPIOB.otyper.modify(|_, w| {
            w
                .ot0().push_pull()
                .ot1().push_pull()
                .ot2().push_pull()
        });
        devices.GPIOB.moder.modify(|_, w| {
            w
                .moder0().output()
                .moder1().output()
                .moder2().output()
        });

        devices.GPIOC.odr.modify(|_, w| w.odr13().set_bit());
        devices.GPIOC.otyper.modify(|_, w| w.ot13().open_drain());
        devices.GPIOC.pupdr.modify(|_, w| w.pupdr13().pull_up());
        devices.GPIOC.moder.modify(|_, w| w.moder13().output());
    })
}

pub fn show(lamps: Indicators) {
    with_devices_mut(|devices, _| {
        devices.GPIOB.odr.modify(|_, w| {
            w
                .odr0().bit(lamps.ready)
                .odr1().bit(lamps.switching)
                .odr2().bit(lamps.fault)
        });
    })
}

/// Flips the test LED, once per operating mode change.
pub fn toggle_mode() {
    with_devices_mut(|devices, _| {
        let lit = devices.GPIOC.odr.read().odr13().bit_is_clear();
        devices.GPIOC.odr.modify(|_, w| w.odr13().bit(lit));
    })
}
