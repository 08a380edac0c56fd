//! Buck voltage-mode compensator.
//!
//! Second order, tuned offline for this plant:
//!
//! ```text
//! e0 = reference - measured
//! u0 = u1 + b0*e0 + b1*e1 + b2*e2
//! duty = u0 >> 8
//! ```
//!
//! The boost leg is not regulated while the buck leg is; it is held at a fixed
//! duty.

use crate::config::CompensatorCoefficients;
use crate::fixed_point::{mul_q12_q8, q20_to_q12, Q12, Q20};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DutyLimits {
    /// Also the duty driven while output is disabled.
    pub min_buck: Q12,
    pub max_buck: Q12,
    pub max_boost: Q12,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DutyCommand {
    pub buck: Q12,
    pub boost: Q12,
}

/// Error and output history of the compensator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ControlState {
    pub error1: Q12,
    pub error2: Q12,
    pub output1: Q20,
    pub duty: Q12,
}

pub struct Compensator {
    coefficients: CompensatorCoefficients,
    fixed_boost: Q12,
    state: ControlState,
}

impl Compensator {
    pub const fn new(coefficients: CompensatorCoefficients, fixed_boost: Q12) -> Self {
        Compensator {
            coefficients,
            fixed_boost,
            state: ControlState {
                error1: Q12::ZERO,
                error2: Q12::ZERO,
                output1: Q20::ZERO,
                duty: Q12::ZERO,
            },
        }
    }

    pub fn reset(&mut self) {
        self.state = ControlState::default();
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// Runs one compensator step. The history always advances, but a disabled
    /// output reports exactly `limits.min_buck`.
    pub fn compute_buck_duty(
        &mut self,
        reference: Q12,
        measured_vout: Q12,
        enabled: bool,
        limits: &DutyLimits,
    ) -> DutyCommand {
        let c = &self.coefficients;
        let s = &mut self.state;

        let error0 = reference.saturating_sub(measured_vout);
        let correction = mul_q12_q8(error0, c.b0)
            .saturating_add(mul_q12_q8(s.error1, c.b1))
            .saturating_add(mul_q12_q8(s.error2, c.b2));
        let output0 = s.output1.saturating_add(correction);

        s.error2 = s.error1;
        s.error1 = error0;
        s.output1 = output0;

        let duty = if enabled {
            q20_to_q12(output0).clamp(limits.min_buck, limits.max_buck)
        } else {
            limits.min_buck
        };
        s.duty = duty;

        DutyCommand {
            buck: duty,
            boost: self.fixed_boost.min(limits.max_boost),
        }
    }
}
