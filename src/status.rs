//! Status snapshot for the display and anything else that wants to watch.

use core::fmt::Write;

use heapless::String;

use crate::config::{ADC_FULL_SCALE, ADC_REFERENCE_MV, DEAD_TIME_TICKS_PER_PERCENT, NOMINAL_PERIOD};
use crate::converter::{ConverterState, OperatingMode};
use crate::fixed_point::Q12;
use crate::protection::FaultSet;
use crate::pwm_geometry::PwmGeometry;

pub const LINE_WIDTH: usize = 24;
pub type StatusLine = String<LINE_WIDTH>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub mode: OperatingMode,
    pub state: ConverterState,
    pub faults: FaultSet,
    pub frequency_hz: u32,
    pub duty_permille: u16,
    pub dead_time_permille: u16,
    /// Adjustment channel as a pin voltage.
    pub adjust_mv: u32,
    pub voltage_reference: Q12,
    pub output_current_reference: Q12,
    pub buck_duty: Q12,
    pub boost_duty: Q12,
}

/// Front-panel lamps, one per condition the operator acts on.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Indicators {
    /// Waiting with nothing latched, a start will be accepted.
    pub ready: bool,
    pub switching: bool,
    /// Something is latched and needs an acknowledge.
    pub fault: bool,
}

impl StatusReport {
    pub fn duty_permille_of(geometry: &PwmGeometry) -> u16 {
        (geometry.duty as u32 * 1000 / NOMINAL_PERIOD as u32) as u16
    }

    pub fn dead_time_permille_of(geometry: &PwmGeometry) -> u16 {
        (geometry.dead_time as u32 * 10 / DEAD_TIME_TICKS_PER_PERCENT as u32) as u16
    }

    pub fn millivolts_of(code: Q12) -> u32 {
        let code = code.to_bits().clamp(0, ADC_FULL_SCALE as i32) as u32;
        code * ADC_REFERENCE_MV / ADC_FULL_SCALE
    }

    /// The four lines of the status screen.
    pub fn render(&self) -> [StatusLine; 4] {
        let mut lines: [StatusLine; 4] = Default::default();

        let _ = write!(lines[0], "Mode: {} {}", self.mode.label(), self.state.label());

        let f = self.frequency_hz;
        let _ = write!(lines[1], "Freq: {}.{:02}KHz", f / 1000, f % 1000 / 10);

        let (d, t) = (self.duty_permille, self.dead_time_permille);
        let _ = write!(lines[2], "Du/DT: {}.{}/{}.{}%", d / 10, d % 10, t / 10, t % 10);

        match self.faults.first() {
            Some(fault) => {
                let _ = write!(lines[3], "ERR: {}", fault.label());
            }
            None => {
                let mv = self.adjust_mv;
                let _ = write!(lines[3], "ADC: {}.{:03}V", mv / 1000, mv % 1000);
            }
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_GEOMETRY;
    use crate::fixed_point::q12;
    use crate::protection::FaultKind;

    fn report() -> StatusReport {
        StatusReport {
            mode: OperatingMode::OpenLoop,
            state: ConverterState::Wait,
            faults: FaultSet::EMPTY,
            frequency_hz: DEFAULT_GEOMETRY.frequency_hz(1_600_000_000),
            duty_permille: StatusReport::duty_permille_of(&DEFAULT_GEOMETRY),
            dead_time_permille: StatusReport::dead_time_permille_of(&DEFAULT_GEOMETRY),
            adjust_mv: StatusReport::millivolts_of(q12(2048)),
            voltage_reference: Q12::ZERO,
            output_current_reference: Q12::ZERO,
            buck_duty: Q12::ZERO,
            boost_duty: Q12::ZERO,
        }
    }

    #[test]
    fn default_geometry_renders_like_the_front_panel() {
        let lines = report().render();
        assert_eq!(lines[0].as_str(), "Mode: Open Wait");
        assert_eq!(lines[1].as_str(), "Freq: 100.00KHz");
        assert_eq!(lines[2].as_str(), "Du/DT: 48.0/2.0%");
        assert_eq!(lines[3].as_str(), "ADC: 1.650V");
    }

    #[test]
    fn fault_replaces_the_adc_line() {
        let mut r = report();
        r.mode = OperatingMode::CloseLoop;
        r.state = ConverterState::Err;
        r.faults = FaultKind::IoutOverCurrent.into();
        let lines = r.render();
        assert_eq!(lines[0].as_str(), "Mode: Close Err");
        assert_eq!(lines[3].as_str(), "ERR: IOUT OCP");
    }

    #[test]
    fn odd_frequencies_keep_two_decimals() {
        let mut r = report();
        r.frequency_hz = 76_923;
        r.dead_time_permille = 100;
        let lines = r.render();
        assert_eq!(lines[1].as_str(), "Freq: 76.92KHz");
        assert_eq!(lines[2].as_str(), "Du/DT: 48.0/10.0%");
    }

    #[test]
    fn millivolts_clamp_to_the_adc_range() {
        assert_eq!(StatusReport::millivolts_of(q12(4095)), 3300);
        assert_eq!(StatusReport::millivolts_of(q12(9000)), 3300);
        assert_eq!(StatusReport::millivolts_of(q12(-4)), 0);
    }
}
