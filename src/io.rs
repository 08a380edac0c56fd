//! What the control path needs from the board.

use crate::pwm_geometry::PwmCompare;
use crate::sampler::RawAdcCodes;
use crate::status::StatusReport;

/// Supplies one conversion sequence per control cycle.
pub trait AdcSource {
    fn read(&mut self) -> RawAdcCodes;
}

/// Drives the two complementary leg pairs from one time base.
pub trait PwmOutput {
    /// Loads a complete compare set; takes effect at the next period boundary.
    fn apply(&mut self, compare: &PwmCompare);
    fn set_enabled(&mut self, enabled: bool);
}

pub trait StatusSink {
    fn publish(&mut self, report: &StatusReport);
}
