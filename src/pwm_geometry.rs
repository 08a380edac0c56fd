//! Duty/dead-time geometry to timer compare values.
//!
//! One master time base drives two slave timers (legs). Each leg produces a
//! complementary pair: output 1 is set on the leg period and reset on the leg
//! reset compare, output 2 is set on the leg period and reset on the duty
//! compare. Leg A restarts on master compare 1, leg B on the master period, so
//! the two pairs run half a master cycle apart from a single time base.
//!
//! ```text
//!  master   |0 ............ cmp1 ............ per|
//!  leg A                    |0 .. reset-dt .. duty ..|
//!  leg B    |0 .. reset-dt .. duty ..|
//!  adc                      |.. reset/2 ..|
//! ```
//!
//! Geometry is always given against the 16000 tick nominal period so the
//! percentages stay put when the period is stepped.

use crate::config::NOMINAL_PERIOD;
use crate::fixed_point::{fraction_of, Q12};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmGeometry {
    pub period: u16,
    pub half_period: u16,
    pub duty: u16,
    pub dead_time: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GeometryError {
    ZeroPeriod,
    ZeroDuty,
    /// The dead-time would swallow the half period and invert the pulse order.
    DeadTimeTooLong,
    /// The duty edge would land past the half period.
    DutyTooLong,
    /// A compare value does not fit the 16-bit timer registers.
    CompareOverflow,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetSource {
    MasterCompare1,
    MasterPeriod,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LegCompare {
    pub reset_source: ResetSource,
    /// Compare 1, ends output 1 one dead-time before the half period.
    pub reset: u16,
    /// Compare 2, ends output 2.
    pub duty: u16,
}

/// Everything a PWM device needs for one update.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmCompare {
    pub period: u16,
    pub master_compare: u16,
    pub leg_a: LegCompare,
    pub leg_b: LegCompare,
    /// Mid-pulse ADC trigger point on leg A.
    pub adc_trigger: u16,
}

impl PwmGeometry {
    /// `x * period / 16000`
    pub fn scaled(&self, ticks: u16) -> u32 {
        ticks as u32 * self.period as u32 / NOMINAL_PERIOD as u32
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.period == 0 {
            return Err(GeometryError::ZeroPeriod);
        }
        if self.dead_time >= self.half_period {
            return Err(GeometryError::DeadTimeTooLong);
        }
        if self.duty == 0 {
            return Err(GeometryError::ZeroDuty);
        }
        if self.duty >= self.half_period {
            return Err(GeometryError::DutyTooLong);
        }
        Ok(())
    }

    /// Same geometry with the duty replaced by a Q12 fraction of the nominal
    /// period, `duty * 16000 >> 12`.
    pub fn with_duty_command(&self, duty: Q12) -> PwmGeometry {
        let ticks = fraction_of(duty, NOMINAL_PERIOD as u32).clamp(0, u16::MAX as i32);
        PwmGeometry { duty: ticks as u16, ..*self }
    }

    pub fn frequency_hz(&self, tick_clock_hz: u32) -> u32 {
        match self.period {
            0 => 0,
            period => tick_clock_hz / period as u32,
        }
    }
}

fn register(value: u32) -> Result<u16, GeometryError> {
    u16::try_from(value).map_err(|_| GeometryError::CompareOverflow)
}

pub fn map_geometry(geometry: &PwmGeometry) -> Result<PwmCompare, GeometryError> {
    geometry.validate()?;

    let half = geometry.scaled(geometry.half_period);
    let dead_time = geometry.dead_time as u32;
    if dead_time >= half {
        // only reachable when the period is shorter than nominal
        return Err(GeometryError::DeadTimeTooLong);
    }

    let reset = register(half - dead_time)?;
    let duty = register(geometry.scaled(geometry.duty))?;

    Ok(PwmCompare {
        period: geometry.period,
        master_compare: register(half)?,
        leg_a: LegCompare { reset_source: ResetSource::MasterCompare1, reset, duty },
        leg_b: LegCompare { reset_source: ResetSource::MasterPeriod, reset, duty },
        adc_trigger: reset >> 1,
    })
}
