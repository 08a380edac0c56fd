#![no_main]
#![no_std]

#[cfg(not(feature = "defmt"))]
extern crate panic_halt;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use buck_boost::config::{CONTROL_TICK_HZ, INPUT_TICK_HZ};
use buck_boost::{AdcSource, Config, ControllerContext, InputMailbox, StatusSink};
use cortex_m_rt::entry;
use stm32h7::stm32h753;

#[macro_use]
mod fmt;

mod adc_sequence;
mod buttons;
mod clocks;
mod control_tick;
mod debug_led;
mod device_access;
mod power_stage;
mod status_log;

/// Filled by the button scan interrupt, drained by the control loop.
pub static MAILBOX: InputMailbox = InputMailbox::new();

const STATUS_EVERY: u32 = CONTROL_TICK_HZ / INPUT_TICK_HZ;

#[entry]
fn main() -> ! {
    let devices = stm32h753::Peripherals::take().unwrap();
    clocks::init(&devices);
    device_access::set_devices(devices);

    // power stage first so the gate drivers see disabled outputs before anything else runs
    let mut power_stage = power_stage::PowerStage::init();
    let mut adc = adc_sequence::AdcSequence::init();
    debug_led::init();
    control_tick::init();
    buttons::init();

    let mut controller = ControllerContext::new(Config::default());
    let mut status = status_log::StatusLog;
    let mut overruns: u32 = 0;
    let mut mode = controller.mode();

    info!("buck-boost control loop at {} Hz", CONTROL_TICK_HZ);

    loop {
        control_tick::wait();

        while let Some(event) = MAILBOX.take() {
            if let Err(rejected) = controller.handle_event(event) {
                debug!("{} not applied: {}", event, rejected);
            }
        }

        controller.step(adc.read(), &mut power_stage);
        debug_led::show(controller.indicators());
        if controller.mode() != mode {
            mode = controller.mode();
            debug_led::toggle_mode();
        }

        if controller.cycles() % STATUS_EVERY == 0 {
            status.publish(&controller.report());
        }

        if control_tick::overran() {
            overruns = overruns.wrapping_add(1);
            warn!("control cycle overran its tick ({} so far)", overruns);
        }
    }
}
