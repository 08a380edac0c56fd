use core::{cell::RefCell, mem::MaybeUninit};

use cortex_m::interrupt::{CriticalSection, Mutex};
use stm32h7::stm32h753;

static DEVICES: Mutex<RefCell<MaybeUninit<stm32h753::Peripherals>>> = Mutex::new(RefCell::new(MaybeUninit::uninit()));

/// Runs `f` with exclusive access to the peripherals. Must not be called
/// before `set_devices`.
pub fn with_devices_mut<R, F: FnOnce(&mut stm32h753::Peripherals, &CriticalSection) -> R>(f: F) -> R {
    cortex_m::interrupt::free(|cs| {
        // SAFETY: set_devices runs before interrupts are unmasked or any
        // board module is initialized
        let mut devices = DEVICES.borrow(cs).borrow_mut();
        f(unsafe { devices.assume_init_mut() }, cs)
    })
}

/// Turns on every peripheral the converter uses, parks it in the shared slot.
pub fn set_devices(devices: stm32h753::Peripherals) {
    devices.RCC.apb2enr.modify(|_, w| w.hrtimen().set_bit());
    devices.RCC.apb2rstr.write(|w| w.hrtimrst().set_bit());
    devices.RCC.apb2rstr.write(|w| w.hrtimrst().clear_bit());

    // GPIOA: power stage leg B output 2, analog inputs, buttons
    // GPIOB: buttons, state LEDs
    // GPIOC: power stage outputs, control buttons, fault LED
    devices.RCC.ahb4enr.modify(|_, w| {
        w
            .gpioaen().set_bit()
            .gpioben().set_bit()
            .gpiocen().set_bit()
    });
    devices.RCC.ahb4rstr.write(|w| {
        w
            .gpioarst().set_bit()
            .gpiobrst().set_bit()
            .gpiocrst().set_bit()
    });
    devices.RCC.ahb4rstr.write(|w| {
        w
            .gpioarst().clear_bit()
            .gpiobrst().clear_bit()
            .gpiocrst().clear_bit()
    });

    // TIM3 paces the control cycle, TIM2 the button scan
    devices.RCC.apb1lenr.modify(|_, w| {
        w
            .tim2en().set_bit()
            .tim3en().set_bit()
    });
    devices.RCC.apb1lrstr.modify(|_, w| {
        w
            .tim2rst().set_bit()
            .tim3rst().set_bit()
    });
    devices.RCC.apb1lrstr.modify(|_, w| {
        w
            .tim2rst().clear_bit()
            .tim3rst().clear_bit()
    });

    devices.RCC.ahb1enr.modify(|_, w| w.adc12en().set_bit());
    devices.RCC.ahb1rstr.modify(|_, w| w.adc12rst().set_bit());
    devices.RCC.ahb1rstr.modify(|_, w| w.adc12rst().clear_bit());

    cortex_m::interrupt::free(|cs| {
        DEVICES.borrow(cs).borrow_mut().write(devices);
    });
}
