//! Analog front-end: raw ADC codes to calibrated, smoothed quantities.

use crate::config::{AVERAGE_SEED, VOLTAGE_FLOOR, ZERO_CURRENT_CODE};
use crate::fixed_point::{q12, scale_code, Q12};

/// One conversion sequence, 12-bit codes in `[0, 4095]`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawAdcCodes {
    pub vin: u16,
    pub iin: u16,
    pub vout: u16,
    pub iout: u16,
    pub vadj: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelKind {
    /// Readings under the floor are forced to zero.
    Voltage,
    /// Readings under the zero-current code are forced to it.
    Current,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChannelCalibration {
    pub kind: ChannelKind,
    /// Q12 gain.
    pub gain: Q12,
    /// Offset in Q12 units.
    pub offset: Q12,
}

impl ChannelCalibration {
    pub const fn voltage(gain: i32, offset: i32) -> Self {
        ChannelCalibration { kind: ChannelKind::Voltage, gain: q12(gain), offset: q12(offset) }
    }

    pub const fn current(gain: i32, offset: i32) -> Self {
        ChannelCalibration { kind: ChannelKind::Current, gain: q12(gain), offset: q12(offset) }
    }

    /// `(raw * K) >> 12 + B`, then the sensor floor.
    pub fn apply(&self, raw: u16) -> Q12 {
        let value = scale_code(raw as i32, self.gain).saturating_add(self.offset);
        match self.kind {
            ChannelKind::Voltage if value < q12(VOLTAGE_FLOOR) => Q12::ZERO,
            ChannelKind::Current if value < q12(ZERO_CURRENT_CODE) => q12(ZERO_CURRENT_CODE),
            _ => value,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Calibration {
    pub vin: ChannelCalibration,
    pub iin: ChannelCalibration,
    pub vout: ChannelCalibration,
    pub iout: ChannelCalibration,
    pub vadj: ChannelCalibration,
}

/// Instantaneous and averaged value of one channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Reading {
    pub value: Q12,
    pub average: Q12,
}

impl Reading {
    const fn seeded() -> Self {
        Reading { value: Q12::ZERO, average: q12(AVERAGE_SEED) }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SampledQuantities {
    pub vin: Reading,
    pub iin: Reading,
    pub vout: Reading,
    pub iout: Reading,
    pub vadj: Reading,
}

impl SampledQuantities {
    pub const fn seeded() -> Self {
        SampledQuantities {
            vin: Reading::seeded(),
            iin: Reading::seeded(),
            vout: Reading::seeded(),
            iout: Reading::seeded(),
            vadj: Reading::seeded(),
        }
    }
}

/// Four-sample exponential moving average, `sum += x - sum/4; avg = sum/4`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct MovingAverage {
    sum: i32,
}

impl MovingAverage {
    const SHIFT: u32 = 2;

    const fn seeded(seed: i32) -> Self {
        MovingAverage { sum: seed << Self::SHIFT }
    }

    fn update(&mut self, value: Q12) -> Q12 {
        self.sum = self
            .sum
            .saturating_add(value.to_bits())
            .saturating_sub(self.sum >> Self::SHIFT);
        q12(self.sum >> Self::SHIFT)
    }
}

/// Holds the per-channel filter state. Must be called once per control cycle
/// for the filter time constant to mean four cycles.
pub struct Sampler {
    calibration: Calibration,
    vin: MovingAverage,
    iin: MovingAverage,
    vout: MovingAverage,
    iout: MovingAverage,
    vadj: MovingAverage,
}

impl Sampler {
    pub const fn new(calibration: Calibration) -> Self {
        Sampler {
            calibration,
            vin: MovingAverage::seeded(AVERAGE_SEED),
            iin: MovingAverage::seeded(AVERAGE_SEED),
            vout: MovingAverage::seeded(AVERAGE_SEED),
            iout: MovingAverage::seeded(AVERAGE_SEED),
            vadj: MovingAverage::seeded(AVERAGE_SEED),
        }
    }

    pub fn reset(&mut self) {
        *self = Sampler::new(self.calibration);
    }

    pub fn sample(&mut self, raw: RawAdcCodes) -> SampledQuantities {
        fn channel(cal: &ChannelCalibration, avg: &mut MovingAverage, code: u16) -> Reading {
            let value = cal.apply(code);
            Reading { value, average: avg.update(value) }
        }

        let cal = &self.calibration;
        SampledQuantities {
            vin: channel(&cal.vin, &mut self.vin, raw.vin),
            iin: channel(&cal.iin, &mut self.iin, raw.iin),
            vout: channel(&cal.vout, &mut self.vout, raw.vout),
            iout: channel(&cal.iout, &mut self.iout, raw.iout),
            vadj: channel(&cal.vadj, &mut self.vadj, raw.vadj),
        }
    }
}
