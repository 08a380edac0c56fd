use core::cell::Cell;

use buck_boost::config::{timer_reload, INPUT_TICK_HZ};
use buck_boost::InputEvent;
use cortex_m::interrupt::Mutex;
use cortex_m::peripheral::NVIC;
use stm32h7::stm32h753::{interrupt, Interrupt, Peripherals};

use crate::clocks::TIMER_CLOCK_HZ;
use crate::device_access::with_devices_mut;
use crate::MAILBOX;

/*
Front panel, all active low with internal pull-ups

  PA6  frequency up       PB4  dead-time up      PB6  duty up
  PA7  frequency down     PB5  dead-time down    PB7  duty down
  PB9  mode toggle
  PC0  start              PC1  stop              PC2  acknowledge fault
*/

#[derive(Copy, Clone)]
enum Port {
    A,
    B,
    C,
}

struct Button {
    port: Port,
    pin: u8,
    event: InputEvent,
}

const BUTTONS: [Button; 10] = [
    Button { port: Port::A, pin: 6, event: InputEvent::IncreaseFrequency },
    Button { port: Port::A, pin: 7, event: InputEvent::DecreaseFrequency },
    Button { port: Port::B, pin: 4, event: InputEvent::IncreaseDeadTime },
    Button { port: Port::B, pin: 5, event: InputEvent::DecreaseDeadTime },
    Button { port: Port::B, pin: 6, event: InputEvent::IncreaseDuty },
    Button { port: Port::B, pin: 7, event: InputEvent::DecreaseDuty },
    Button { port: Port::B, pin: 9, event: InputEvent::SwitchMode },
    Button { port: Port::C, pin: 0, event: InputEvent::Start },
    Button { port: Port::C, pin: 1, event: InputEvent::Stop },
    Button { port: Port::C, pin: 2, event: InputEvent::Acknowledge },
];

const SCAN_COUNTER_HZ: u32 = 10_000_000;

/// Bit i set while BUTTONS[i] was held at the previous scan.
static HELD: Mutex<Cell<u16>> = Mutex::new(Cell::new(0));

pub fn init() {
    with_devices_mut(|devices, _| {
        devices.GPIOA.pupdr.modify(|_, w| {
            w
                .pupdr6().pull_up()
                .pupdr7().pull_up()
        });
        devices.GPIOA.moder.modify(|_, w| {
            w
                .moder6().input()
                .moder7().input()
        });
        devices.GPIOB.pupdr.modify(|_, w| {
            w
                .pupdr4().pull_up()
                .pupdr5().pull_up()
                .pupdr6().pull_up()
                .pupdr7().pull_up()
                .pupdr9().pull_up()
        });
        devices.GPIOB.moder.modify(|_, w| {
            w
                .moder4().input()
                .moder5().input()
                .moder6().input()
                .moder7().input()
                .moder9().input()
        });
        devices.GPIOC.pupdr.modify(|_, w| {
            w
                .pupdr0().pull_up()
                .pupdr1().pull_up()
                .pupdr2().pull_up()
        });
        devices.GPIOC.moder.modify(|_, w| {
            w
                .moder0().input()
                .moder1().input()
                .moder2().input()
        });

        // the slow tick doubles as the debounce interval
        devices.TIM2.psc.write(|w| {
            w.psc().variant((TIMER_CLOCK_HZ / SCAN_COUNTER_HZ - 1) as u16)
        });
        devices.TIM2.arr.write(|w| {
            w.arr().variant(timer_reload(SCAN_COUNTER_HZ, INPUT_TICK_HZ))
        });
        devices.TIM2.egr.write(|w| w.ug().set_bit());
        devices.TIM2.sr.modify(|_, w| w.uif().clear_bit());
        devices.TIM2.dier.modify(|_, w| w.uie().set_bit());
        devices.TIM2.cr1.modify(|_, w| w.cen().set_bit());
    });
    unsafe { NVIC::unmask(Interrupt::TIM2) };
}

fn pressed(devices: &Peripherals) -> u16 {
    let a = devices.GPIOA.idr.read().bits();
    let b = devices.GPIOB.idr.read().bits();
    let c = devices.GPIOC.idr.read().bits();
    BUTTONS.iter().enumerate().fold(0, |held, (i, button)| {
        let level = match button.port {
            Port::A => a,
            Port::B => b,
            Port::C => c,
        };
        if level & (1 << button.pin) == 0 { held | 1 << i } else { held }
    })
}

#[interrupt]
fn TIM2() {
    let (now, before) = with_devices_mut(|devices, cs| {
        devices.TIM2.sr.modify(|_, w| w.uif().clear_bit());
        let now = pressed(devices);
        (now, HELD.borrow(cs).replace(now))
    });

    // one event per press, on the press edge
    let edges = now & !before;
    for (i, button) in BUTTONS.iter().enumerate() {
        if edges & (1 << i) != 0 && MAILBOX.post(button.event).is_err() {
            warn!("input mailbox full, dropped {}", button.event);
        }
    }
}
