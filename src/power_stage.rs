use buck_boost::config::TICK_CLOCK_HZ;
use buck_boost::pwm_geometry::{PwmCompare, ResetSource};
use buck_boost::PwmOutput;
use stm32h7::stm32h753::Peripherals;

use crate::clocks::HRTIM_CLOCK_HZ;
use crate::device_access::with_devices_mut;

/*
Power stage signal path
-----------------------

The master timer is the single time base. Timer A restarts on master compare 1
and timer B on the master period, so the two legs run half a master cycle
apart and every compare they use is relative to their own restart.

          Master
    *---------------------*
    |             [Cmp 1] | >-------------------*
    |            [Period] | >----*              |
    *---------------------*      |              |
                                 |              v
                                 |        Timer A                    Timer A Output
                                 |   *----------------------*      *----------------*
                                 |   | [Reset]              |      |                |
                                 |   |              [Cmp 1] | >--> | [Reset A1] A1  | >---> * [Leg A high]
                                 |   |              [Cmp 2] | >--> | [Reset A2] A2  | >---> * [Leg A low]
                                 |   |              [Cmp 3] | >--> ADC trigger 1
                                 |   *----------------------*      *----------------*
                                 v
                              Timer B                            Timer B Output
                             *----------------------*      *----------------*
                             | [Reset]              |      |                |
                             |              [Cmp 1] | >--> | [Reset B1] B1  | >---> * [Leg B high]
                             |              [Cmp 2] | >--> | [Reset B2] B2  | >---> * [Leg B low]
                             *----------------------*      *----------------*

Both outputs of a leg are set when the leg restarts. Compare values arrive in
1.6 GHz-equivalent ticks and are divided down to the 400 MHz HRTIM clock here.
All of them sit in preload registers and transfer together on the next
restart, so an update never lands half way through a period.
*/

const HRTIM_PRESCALER_1: u8 = 0b101;

const TICK_DIVIDER: u16 = (TICK_CLOCK_HZ / HRTIM_CLOCK_HZ) as u16;

fn ticks(value: u16) -> u16 {
    value / TICK_DIVIDER
}

pub struct PowerStage {
    _private: (),
}

impl PowerStage {
    /// Brings up the HRTIM with every output disabled. The counters run from
    /// here on; `set_enabled` only gates the pins.
    pub fn init() -> Self {
        with_devices_mut(|devices, _| {
            setup_master(devices);
            setup_legs(devices);
            setup_gpio(devices);

            devices.HRTIM_COMMON.odisr.write(|w| {
                w
                    .ta1odis().set_bit()
                    .ta2odis().set_bit()
                    .tb1odis().set_bit()
                    .tb2odis().set_bit()
            });
            devices.HRTIM_COMMON.cr2.modify(|_, w| {
                w
                    .mrst().set_bit()
                    .tarst().set_bit()
                    .tbrst().set_bit()
                    .mswu().set_bit()
                    .taswu().set_bit()
                    .tbswu().set_bit()
            });
            devices.HRTIM_MASTER.mcr.modify(|_, w| {
                w
                    .mcen().set_bit()
                    .tacen().set_bit()
                    .tbcen().set_bit()
            });
        });
        PowerStage { _private: () }
    }
}

fn setup_master(devices: &mut Peripherals) {
    devices.HRTIM_MASTER.mcr.modify(|_, w| {
        w
            .ck_psc().variant(HRTIM_PRESCALER_1)
            .cont().set_bit()
            .preen().set_bit()
            .mrepu().set_bit()
    });
}

fn setup_legs(devices: &mut Peripherals) {
    devices.HRTIM_TIMA.timacr.modify(|_, w| {
        w
            .ck_pscx().variant(HRTIM_PRESCALER_1)
            .cont().set_bit()
            .preen().set_bit()
            // pick up preloaded compares when the master restarts the leg
            .tx_rstu().set_bit()
    });
    devices.HRTIM_TIMA.rstar.modify(|_, w| w.mstcmp1().set_bit());
    devices.HRTIM_TIMA.seta1r.modify(|_, w| w.resync().set_bit());
    devices.HRTIM_TIMA.rsta1r.modify(|_, w| w.cmp1().set_bit());
    devices.HRTIM_TIMA.seta2r.modify(|_, w| w.resync().set_bit());
    devices.HRTIM_TIMA.rsta2r.modify(|_, w| w.cmp2().set_bit());
    devices.HRTIM_TIMA.outar.modify(|_, w| {
        w
            .idles1().clear_bit()
            .idles2().clear_bit()
            .pol1().clear_bit()
            .pol2().clear_bit()
            .fault1().variant(0b10)
            .fault2().variant(0b10)
    });

    devices.HRTIM_TIMB.timbcr.modify(|_, w| {
        w
            .ck_pscx().variant(HRTIM_PRESCALER_1)
            .cont().set_bit()
            .preen().set_bit()
            .tx_rstu().set_bit()
    });
    devices.HRTIM_TIMB.rstbr.modify(|_, w| w.mstper().set_bit());
    devices.HRTIM_TIMB.setb1r.modify(|_, w| w.resync().set_bit());
    devices.HRTIM_TIMB.rstb1r.modify(|_, w| w.cmp1().set_bit());
    devices.HRTIM_TIMB.setb2r.modify(|_, w| w.resync().set_bit());
    devices.HRTIM_TIMB.rstb2r.modify(|_, w| w.cmp2().set_bit());
    devices.HRTIM_TIMB.outbr.modify(|_, w| {
        w
            .idles1().clear_bit()
            .idles2().clear_bit()
            .pol1().clear_bit()
            .pol2().clear_bit()
            .fault1().variant(0b10)
            .fault2().variant(0b10)
    });

    // timer A compare 3 is the mid-pulse sampling point
    devices.HRTIM_COMMON.adc1r.modify(|_, w| w.ad1tac3().set_bit());
}

fn setup_gpio(devices: &mut Peripherals) {
    /*
        C6, C7, C8 are HRTIM A1, A2, B1 (AF1), A8 is HRTIM B2 (AF2),
        push-pull, very high speed, pulled down until the timer drives them
        */
    devices.GPIOC.afrl.modify(|_, w| {
        w
            .afr6().af1()
            .afr7().af1()
    });
    devices.GPIOC.afrh.modify(|_, w| w.afr8().af1());
    devices.GPIOC.ospeedr.modify(|_, w| {
        w
            .ospeedr6().very_high_speed()
            .ospeedr7().very_high_speed()
            .ospeedr8().very_high_speed()
    });
    devices.GPIOC.pupdr.modify(|_, w| {
        w
            .pupdr6().pull_down()
            .pupdr7().pull_down()
            .pupdr8().pull_down()
    });
    devices.GPIOC.moder.modify(|_, w| {
        w
            .moder6().alternate()
            .moder7().alternate()
            .moder8().alternate()
    });

    devices.GPIOA.afrh.modify(|_, w| w.afr8().af2());
    devices.GPIOA.ospeedr.modify(|_, w| w.ospeedr8().very_high_speed());
    devices.GPIOA.pupdr.modify(|_, w| w.pupdr8().pull_down());
    devices.GPIOA.moder.modify(|_, w| w.moder8().alternate());
}

impl PwmOutput for PowerStage {
    fn apply(&mut self, compare: &PwmCompare) {
        // the reset routing is fixed in setup_legs
        debug_assert_eq!(compare.leg_a.reset_source, ResetSource::MasterCompare1);
        debug_assert_eq!(compare.leg_b.reset_source, ResetSource::MasterPeriod);

        let period = ticks(compare.period);
        with_devices_mut(|devices, _| {
            // hold transfers until the whole set is loaded
            devices.HRTIM_COMMON.cr1.modify(|_, w| {
                w
                    .mudis().set_bit()
                    .taudis().set_bit()
                    .tbudis().set_bit()
            });

            devices.HRTIM_MASTER.mper.write(|w| w.mper().variant(period));
            devices.HRTIM_MASTER.mcmp1r.write(|w| w.mcmp1().variant(ticks(compare.master_compare)));

            devices.HRTIM_TIMA.perar.write(|w| w.perx().variant(period));
            devices.HRTIM_TIMA.cmp1ar.write(|w| w.cmp1x().variant(ticks(compare.leg_a.reset)));
            devices.HRTIM_TIMA.cmp2ar.write(|w| w.cmp2x().variant(ticks(compare.leg_a.duty)));
            devices.HRTIM_TIMA.cmp3ar.write(|w| w.cmp3x().variant(ticks(compare.adc_trigger)));

            devices.HRTIM_TIMB.perbr.write(|w| w.perx().variant(period));
            devices.HRTIM_TIMB.cmp1br.write(|w| w.cmp1x().variant(ticks(compare.leg_b.reset)));
            devices.HRTIM_TIMB.cmp2br.write(|w| w.cmp2x().variant(ticks(compare.leg_b.duty)));

            devices.HRTIM_COMMON.cr1.modify(|_, w| {
                w
                    .mudis().clear_bit()
                    .taudis().clear_bit()
                    .tbudis().clear_bit()
            });
        });
    }

    fn set_enabled(&mut self, enabled: bool) {
        with_devices_mut(|devices, _| {
            if enabled {
                devices.HRTIM_COMMON.oenr.write(|w| {
                    w
                        .ta1oen().set_bit()
                        .ta2oen().set_bit()
                        .tb1oen().set_bit()
                        .tb2oen().set_bit()
                });
            } else {
                devices.HRTIM_COMMON.odisr.write(|w| {
                    w
                        .ta1odis().set_bit()
                        .ta2odis().set_bit()
                        .tb1odis().set_bit()
                        .tb2odis().set_bit()
                });
            }
        });
    }
}
