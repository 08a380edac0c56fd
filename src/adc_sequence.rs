use buck_boost::{AdcSource, RawAdcCodes};

use crate::clocks::SYSCLK_HZ;
use crate::device_access::with_devices_mut;

// PA0 -> ADC1_INP16  input voltage
// PA1 -> ADC1_INP17  input current
// PA2 -> ADC12_INP14 output voltage
// PA3 -> ADC12_INP15 output current
// PA4 -> ADC12_INP18 adjustment potentiometer

const VIN_CHANNEL: u8 = 16;
const IIN_CHANNEL: u8 = 17;
const VOUT_CHANNEL: u8 = 14;
const IOUT_CHANNEL: u8 = 15;
const VADJ_CHANNEL: u8 = 18;

const SEQUENCE_LENGTH: u8 = 5;

fn preselect(channels: &[u8]) -> u32 {
    channels.iter().fold(0, |mask, channel| mask | 1 << channel)
}

fn block_micros(n: u32) {
    cortex_m::asm::delay(SYSCLK_HZ / 1_000_000 * n);
}

/// adc_ext_trg16, wired to HRTIM ADC trigger 1 (timer A compare 3)
const HRTIM_ADC_TRIGGER_1: u8 = 16;

/// ADC1 scanning the five converter channels once per `read`. The scan is
/// armed by `read` and started by the power stage mid-pulse; the HRTIM
/// counters run with the outputs disabled, so the trigger never stops.
pub struct AdcSequence {
    _private: (),
}

impl AdcSequence {
    pub fn init() -> Self {
        with_devices_mut(|devices, _| {
            devices.GPIOA.pupdr.modify(|_, w| {
                w
                    .pupdr0().floating()
                    .pupdr1().floating()
                    .pupdr2().floating()
                    .pupdr3().floating()
                    .pupdr4().floating()
            });
            devices.GPIOA.moder.modify(|_, w| {
                w
                    .moder0().analog()
                    .moder1().analog()
                    .moder2().analog()
                    .moder3().analog()
                    .moder4().analog()
            });
            // hclk is 200 MHz, /4 here and /2 inside the block lands on 25 MHz
            devices.ADC12_COMMON.ccr.modify(|_, w| w.ckmode().sync_div4());
            devices.ADC1.cr.modify(|_, w| {
                w
                    .deeppwd().clear_bit()
                    .boost().set_bit()
            });
            devices.ADC1.cr.modify(|_, w| w.advregen().set_bit());
        });
        // regulator startup
        block_micros(20);
        with_devices_mut(|devices, _| {
            devices.ADC1.cr.modify(|_, w| {
                w
                    .adcaldif().clear_bit()
                    .adcallin().set_bit()
                    .adcal().set_bit()
            });
            while devices.ADC1.cr.read().adcal().bit_is_set() {}

            devices.ADC1.isr.modify(|_, w| w.adrdy().clear());
            devices.ADC1.cr.modify(|_, w| w.aden().set_bit());
            while devices.ADC1.isr.read().adrdy().bit_is_clear() {}

            // one pass over the sequence per trigger, 12 bit, read from DR
            devices.ADC1.cfgr.modify(|_, w| {
                w
                    .cont().clear_bit()
                    .discen().clear_bit()
                    .res().twelve_bit()
                    .dmngt().dr()
                    .ovrmod().overwrite()
                    .exten().rising_edge()
            });
            devices.ADC1.cfgr.modify(|_, w| unsafe { w.extsel().bits(HRTIM_ADC_TRIGGER_1) });
            let mask = preselect(&[VIN_CHANNEL, IIN_CHANNEL, VOUT_CHANNEL, IOUT_CHANNEL, VADJ_CHANNEL]);
            devices.ADC1.pcsel.modify(|_, w| unsafe { w.pcsel().bits(mask) });
            devices.ADC1.sqr1.modify(|_, w| {
                w
                    .l().variant(SEQUENCE_LENGTH - 1)
                    .sq1().variant(VIN_CHANNEL)
                    .sq2().variant(IIN_CHANNEL)
                    .sq3().variant(VOUT_CHANNEL)
                    .sq4().variant(IOUT_CHANNEL)
            });
            devices.ADC1.sqr2.modify(|_, w| w.sq5().variant(VADJ_CHANNEL));
            // five conversions have to fit comfortably inside one control tick
            devices.ADC1.smpr2.modify(|_, w| {
                w
                    .smp14().cycles8_5()
                    .smp15().cycles8_5()
                    .smp16().cycles8_5()
                    .smp17().cycles8_5()
                    .smp18().cycles8_5()
            });
        });
        AdcSequence { _private: () }
    }
}

impl AdcSource for AdcSequence {
    fn read(&mut self) -> RawAdcCodes {
        with_devices_mut(|devices, _| {
            devices.ADC1.isr.write(|w| {
                w
                    .eoc().clear()
                    .eos().clear()
                    .ovr().clear()
            });
            // arm; the next HRTIM trigger starts the sequence
            devices.ADC1.cr.modify(|_, w| w.adstart().set_bit());
            let mut next = || {
                while devices.ADC1.isr.read().eoc().bit_is_clear() {}
                (devices.ADC1.dr.read().rdata().bits() & 0xFFF) as u16
            };
            // conversion order follows the sequence registers
            let vin = next();
            let iin = next();
            let vout = next();
            let iout = next();
            let vadj = next();

            // a triggered scan stays armed, disarm so the next read starts fresh
            devices.ADC1.cr.modify(|_, w| w.adstp().set_bit());
            while devices.ADC1.cr.read().adstart().bit_is_set() {}

            RawAdcCodes { vin, iin, vout, iout, vadj }
        })
    }
}
