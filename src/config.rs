//! Converter configuration.
//!
//! Everything here is fixed at build time; the converter keeps no persisted
//! state and always restarts from these defaults.

use crate::fixed_point::{q12, q8, Q12, Q8};
use crate::protection::{Threshold, Thresholds};
use crate::pwm_geometry::PwmGeometry;
use crate::sampler::{Calibration, ChannelCalibration};

/// The period every geometry value is expressed against.
pub const NOMINAL_PERIOD: u16 = 16000;

/// Tick clock that makes the nominal period a 100 kHz switching frequency.
pub const TICK_CLOCK_HZ: u32 = 1_600_000_000;

/// Fast control tick.
pub const CONTROL_TICK_HZ: u32 = 10_000;
/// Slow tick for input polling and status publishing.
pub const INPUT_TICK_HZ: u32 = 50;

/// Soft-start length in control cycles (20 ms at the control tick rate).
pub const SOFT_START_CYCLES: u16 = 200;

/// Voltage readings below this are treated as zero.
pub const VOLTAGE_FLOOR: i32 = 100;
/// Current channel code that corresponds to zero amps.
pub const ZERO_CURRENT_CODE: i32 = 2048;
/// Moving averages start from mid-scale.
pub const AVERAGE_SEED: i32 = 2048;

pub const CAL_VIN_K: i32 = 4101;
pub const CAL_VIN_B: i32 = 49;
pub const CAL_IIN_K: i32 = 4096;
pub const CAL_IIN_B: i32 = 0;
pub const CAL_VOUT_K: i32 = 4105;
pub const CAL_VOUT_B: i32 = 42;
pub const CAL_IOUT_K: i32 = 4096;
pub const CAL_IOUT_B: i32 = 0;
pub const CAL_VADJ_K: i32 = 4096;
pub const CAL_VADJ_B: i32 = 0;

// buck voltage-mode compensator, Q8
pub const BUCK_B0: i32 = 5203;
pub const BUCK_B1: i32 = -10246;
pub const BUCK_B2: i32 = 5044;

/// Smallest buck duty, also the duty driven while output is disabled (Q12).
pub const MIN_BUCK_DUTY: i32 = 80;
/// Largest buck duty, 45 % (Q12).
pub const MAX_BUCK_DUTY: i32 = 1843;
/// Fixed boost duty while the buck leg is regulating, 7 % (Q12).
pub const FIXED_BOOST_DUTY: i32 = 287;
/// Largest boost duty, 93 % (Q12).
pub const MAX_BOOST_DUTY: i32 = 3809;
/// Closed-loop voltage reference bounds (Q12).
pub const MIN_VOLTAGE_REFERENCE: i32 = 400;
pub const MAX_VOLTAGE_REFERENCE: i32 = 3600;
/// Output current reference reported in the status snapshot (Q12 code).
pub const OUTPUT_CURRENT_REFERENCE: i32 = 2600;

pub const VIN_UVP: i32 = 1000;
pub const VIN_OVP: i32 = 3800;
pub const VOUT_UVP: i32 = 200;
pub const VOUT_OVP: i32 = 3800;
/// Averaged output current trip level (Q12 code, zero current is 2048).
pub const IOUT_OCP: i32 = 3500;
/// Instantaneous output current trip level.
pub const IOUT_SHORT: i32 = 3900;

/// Safe default geometry: 100 kHz, 50 % half period, 48 % duty, 2 % dead-time.
pub const DEFAULT_GEOMETRY: PwmGeometry = PwmGeometry {
    period: 16000,
    half_period: 8000,
    duty: 7680,
    dead_time: 360,
};

/// One operator step, 1 % of the nominal period.
pub const GEOMETRY_STEP: u16 = 160;
/// Period clamps; a shorter period is a higher frequency.
pub const PERIOD_MIN: u16 = 11200;
pub const PERIOD_MAX: u16 = 20800;
/// Dead-time clamps, 2 % to 10 %.
pub const DEAD_TIME_MIN: u16 = 360;
pub const DEAD_TIME_MAX: u16 = 1800;
/// Dead-time ticks per displayed percent.
pub const DEAD_TIME_TICKS_PER_PERCENT: u16 = 180;
/// Duty clamps, 5 % to 45 %.
pub const DUTY_MIN: u16 = 800;
pub const DUTY_MAX: u16 = 7200;

/// ADC reference, used to render the adjustment channel as a voltage.
pub const ADC_REFERENCE_MV: u32 = 3300;
pub const ADC_FULL_SCALE: u32 = 4095;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CompensatorCoefficients {
    pub b0: Q8,
    pub b1: Q8,
    pub b2: Q8,
}

#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub calibration: Calibration,
    pub thresholds: Thresholds,
    pub coefficients: CompensatorCoefficients,
    pub min_buck_duty: Q12,
    pub max_buck_duty: Q12,
    pub fixed_boost_duty: Q12,
    pub max_boost_duty: Q12,
    pub min_voltage_reference: Q12,
    pub max_voltage_reference: Q12,
    pub output_current_reference: Q12,
    /// Averaged output current trip level.
    pub iout_limit: Q12,
    /// Instantaneous output current trip level.
    pub short_circuit_limit: Q12,
    pub default_geometry: PwmGeometry,
    pub soft_start_cycles: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            calibration: Calibration {
                vin: ChannelCalibration::voltage(CAL_VIN_K, CAL_VIN_B),
                iin: ChannelCalibration::current(CAL_IIN_K, CAL_IIN_B),
                vout: ChannelCalibration::voltage(CAL_VOUT_K, CAL_VOUT_B),
                iout: ChannelCalibration::current(CAL_IOUT_K, CAL_IOUT_B),
                vadj: ChannelCalibration::voltage(CAL_VADJ_K, CAL_VADJ_B),
            },
            thresholds: Thresholds {
                vin_uvp: Threshold::Below(q12(VIN_UVP)),
                vin_ovp: Threshold::Above(q12(VIN_OVP)),
                vout_uvp: Threshold::Below(q12(VOUT_UVP)),
                vout_ovp: Threshold::Above(q12(VOUT_OVP)),
                iout_ocp: Threshold::Above(q12(IOUT_OCP)),
                short_circuit: Threshold::Above(q12(IOUT_SHORT)),
            },
            coefficients: CompensatorCoefficients {
                b0: q8(BUCK_B0),
                b1: q8(BUCK_B1),
                b2: q8(BUCK_B2),
            },
            min_buck_duty: q12(MIN_BUCK_DUTY),
            max_buck_duty: q12(MAX_BUCK_DUTY),
            fixed_boost_duty: q12(FIXED_BOOST_DUTY),
            max_boost_duty: q12(MAX_BOOST_DUTY),
            min_voltage_reference: q12(MIN_VOLTAGE_REFERENCE),
            max_voltage_reference: q12(MAX_VOLTAGE_REFERENCE),
            output_current_reference: q12(OUTPUT_CURRENT_REFERENCE),
            iout_limit: q12(IOUT_OCP),
            short_circuit_limit: q12(IOUT_SHORT),
            default_geometry: DEFAULT_GEOMETRY,
            soft_start_cycles: SOFT_START_CYCLES,
        }
    }
}

/// Auto-reload value for a timer counting at `counter_hz` that should
/// update at `tick_hz`; the counter wraps after ARR + 1 counts.
pub const fn timer_reload(counter_hz: u32, tick_hz: u32) -> u32 {
    counter_hz / tick_hz - 1
}
