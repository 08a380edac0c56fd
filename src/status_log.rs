use buck_boost::{StatusReport, StatusSink};

/// Writes the status screen to the log transport.
pub struct StatusLog;

impl StatusSink for StatusLog {
    fn publish(&mut self, report: &StatusReport) {
        for line in report.render().iter() {
            info!("{=str}", line.as_str());
        }
        debug!(
            "vref={} iref={} buck={} boost={}",
            report.voltage_reference.to_bits(),
            report.output_current_reference.to_bits(),
            report.buck_duty.to_bits(),
            report.boost_duty.to_bits()
        );
    }
}
