use cortex_m::asm::nop;
use stm32h7::stm32h753::Peripherals;

/*
Clock tree
----------
HSE 25 MHz -> /2 -> 12.5 MHz into PLL1 -> x64 -> 800 MHz VCO -> /2 -> 400 MHz

  sys_ck   = 400 MHz (PLL1 P), also the HRTIM clock
  hclk     = 200 MHz, feeds ADC12 (divided down again in ADC12_COMMON)
  tim_ker  = 200 MHz for TIM2 and TIM3

400 MHz needs the core at VOS0, so the regulator is raised before anything
switches over.
*/

pub const SYSCLK_HZ: u32 = 400_000_000;
pub const HRTIM_CLOCK_HZ: u32 = SYSCLK_HZ;
pub const TIMER_CLOCK_HZ: u32 = 200_000_000;

pub fn init(devices: &Peripherals) {
    raise_core_voltage(devices);
    start_pll1(devices);
    switch_to_pll1(devices);
}

fn raise_core_voltage(devices: &Peripherals) {
    if devices.PWR.d3cr.read().vos().bits() != 0b11 {
        devices.PWR.cr3.modify(|_, w| w.ldoen().set_bit());
        // VOS1 first, overdrive only exists on top of it
        devices.PWR.d3cr.modify(|_, w| w.vos().variant(0b11));
        settle();
        while devices.PWR.d3cr.read().vosrdy().bit_is_clear() {}
    }

    devices.RCC.apb4enr.modify(|_, w| w.syscfgen().set_bit());
    devices.SYSCFG.pwrcr.modify(|_, w| w.oden().set_bit());
    settle();
    while devices.PWR.d3cr.read().vosrdy().bit_is_clear() {}
}

fn start_pll1(devices: &Peripherals) {
    devices.RCC.cr.modify(|_, w| {
        w
            .pll1on().clear_bit()
            .hseon().set_bit()
    });
    while devices.RCC.cr.read().hserdy().is_not_ready() {}
    while devices.RCC.cr.read().pll1rdy().is_ready() {}

    devices.RCC.pllckselr.modify(|_, w| unsafe {
        w
            .pllsrc().hse()
            .divm1().bits(2)
    });
    devices.RCC.pllcfgr.modify(|_, w| {
        w
            .pll1rge().range8()
            .pll1vcosel().wide_vco()
            .pll1fracen().clear_bit()
            .divp1en().set_bit()
            .divq1en().clear_bit()
            .divr1en().clear_bit()
    });
    devices.RCC.pll1divr.write(|w| unsafe {
        w
            // feedback divider is n + 1
            .divn1().bits(63)
            .divp1().div2()
    });

    devices.RCC.cr.modify(|_, w| w.pll1on().set_bit());
    while devices.RCC.cr.read().pll1rdy().is_not_ready() {}
}

fn switch_to_pll1(devices: &Peripherals) {
    devices.RCC.d1cfgr.modify(|_, w| {
        w
            .d1cpre().div1()
            .hpre().div2()
    });
    devices.RCC.cfgr.modify(|_, w| {
        w
            .sw().pll1()
            // HRTIM counts on the cpu clock, not the APB2 timer clock
            .hrtimsel().set_bit()
    });
    while !devices.RCC.cfgr.read().sws().is_pll1() {}
}

fn settle() {
    for _ in 0..100 {
        nop();
    }
}
