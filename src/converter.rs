//! Converter state machine and the per-cycle control pipeline.
//!
//! ```text
//!   Init -> Wait -> Rise -> Run
//!            ^  \     \      |
//!            |   '-----+-----+--> Err   (any fault, same cycle)
//!            '--- acknowledge ----'
//! ```
//!
//! `ControllerContext` owns every piece of converter state. The scheduler
//! hands it each operator event with `handle_event` and runs `step` once per
//! control tick; nothing else mutates it.

use crate::config::{Config, NOMINAL_PERIOD, TICK_CLOCK_HZ};
use crate::control_law::{Compensator, ControlState, DutyLimits};
use crate::fixed_point::{fraction_of, q12, Q12};
use crate::input::{step_geometry, InputEvent};
use crate::io::PwmOutput;
use crate::protection::{evaluate, FaultLatch, FaultSet, Threshold, Thresholds};
use crate::pwm_geometry::{map_geometry, GeometryError, PwmGeometry};
use crate::sampler::{RawAdcCodes, SampledQuantities, Sampler};
use crate::status::{Indicators, StatusReport};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConverterState {
    Init,
    Wait,
    Rise,
    Run,
    Err,
}

impl ConverterState {
    pub const fn label(self) -> &'static str {
        match self {
            ConverterState::Init => "Init",
            ConverterState::Wait => "Wait",
            ConverterState::Rise => "Rise",
            ConverterState::Run => "Run",
            ConverterState::Err => "Err",
        }
    }

    /// States in which the PWM outputs are driven.
    pub const fn is_switching(self) -> bool {
        matches!(self, ConverterState::Rise | ConverterState::Run)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatingMode {
    /// Operator steps the geometry by hand.
    OpenLoop,
    /// The compensator sets the duty from the output voltage.
    CloseLoop,
}

impl OperatingMode {
    pub const fn label(self) -> &'static str {
        match self {
            OperatingMode::OpenLoop => "Open",
            OperatingMode::CloseLoop => "Close",
        }
    }

    const fn toggled(self) -> Self {
        match self {
            OperatingMode::OpenLoop => OperatingMode::CloseLoop,
            OperatingMode::CloseLoop => OperatingMode::OpenLoop,
        }
    }
}

/// Live operating point.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ControlParameters {
    /// Output voltage reference currently fed to the compensator.
    pub voref: Q12,
    /// Output current reference, reported only; there is no current loop.
    pub ioref: Q12,
    /// Instantaneous output current trip level.
    pub ilimit: Q12,
    pub buck_max_duty: Q12,
    pub boost_max_duty: Q12,
    pub buck_duty: Q12,
    pub boost_duty: Q12,
    /// Averaged output current trip level.
    pub ilimit_out: Q12,
}

impl ControlParameters {
    fn from_config(config: &Config) -> Self {
        ControlParameters {
            voref: Q12::ZERO,
            ioref: config.output_current_reference,
            ilimit: config.short_circuit_limit,
            buck_max_duty: config.max_buck_duty,
            boost_max_duty: config.max_boost_duty,
            buck_duty: config.min_buck_duty,
            boost_duty: Q12::ZERO,
            ilimit_out: config.iout_limit,
        }
    }
}

/// Why an operator event was not acted on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventRejected {
    /// Mode changes wait until the fault is acknowledged.
    Faulted,
    /// Buttons that step the geometry only work in open loop.
    ClosedLoop,
    /// The stepped geometry would be invalid; the old one stays.
    Geometry(GeometryError),
}

pub struct ControllerContext {
    config: Config,
    state: ConverterState,
    mode: OperatingMode,
    sampler: Sampler,
    compensator: Compensator,
    params: ControlParameters,
    faults: FaultLatch,
    /// Operator geometry; in closed loop only the duty is replaced.
    geometry: PwmGeometry,
    /// Geometry behind the last compare set sent to the outputs.
    applied: PwmGeometry,
    samples: SampledQuantities,
    output_enabled: bool,
    soft_start: u16,
    start_requested: bool,
    stop_requested: bool,
    acknowledge_requested: bool,
    cycles: u32,
}

impl ControllerContext {
    pub fn new(config: Config) -> Self {
        ControllerContext {
            state: ConverterState::Init,
            mode: OperatingMode::OpenLoop,
            sampler: Sampler::new(config.calibration),
            compensator: Compensator::new(config.coefficients, config.fixed_boost_duty),
            params: ControlParameters::from_config(&config),
            faults: FaultLatch::new(),
            geometry: config.default_geometry,
            applied: config.default_geometry,
            samples: SampledQuantities::seeded(),
            output_enabled: false,
            soft_start: 0,
            start_requested: false,
            stop_requested: false,
            acknowledge_requested: false,
            cycles: 0,
            config,
        }
    }

    pub fn state(&self) -> ConverterState {
        self.state
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn faults(&self) -> FaultSet {
        self.faults.faults()
    }

    pub fn geometry(&self) -> &PwmGeometry {
        &self.geometry
    }

    pub fn parameters(&self) -> &ControlParameters {
        &self.params
    }

    pub fn control_state(&self) -> &ControlState {
        self.compensator.state()
    }

    pub fn samples(&self) -> &SampledQuantities {
        &self.samples
    }

    /// State lamps: ready to start, switching, faults latched.
    pub fn indicators(&self) -> Indicators {
        Indicators {
            ready: self.state == ConverterState::Wait && !self.faults.is_tripped(),
            switching: self.output_enabled,
            fault: self.faults.is_tripped(),
        }
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Applies one operator event. Mode switches and geometry steps take
    /// effect immediately as complete tuples; start, stop and acknowledge are
    /// acted on by the next `step`.
    pub fn handle_event(&mut self, event: InputEvent) -> Result<(), EventRejected> {
        match event {
            InputEvent::SwitchMode => self.switch_mode(),
            InputEvent::Start => {
                self.start_requested = true;
                Ok(())
            }
            InputEvent::Stop => {
                self.stop_requested = true;
                Ok(())
            }
            InputEvent::Acknowledge => {
                self.acknowledge_requested = true;
                Ok(())
            }
            step => self.step_manual_geometry(step),
        }
    }

    fn switch_mode(&mut self) -> Result<(), EventRejected> {
        if self.state == ConverterState::Err {
            warn!("mode switch refused while faulted");
            return Err(EventRejected::Faulted);
        }

        self.mode = self.mode.toggled();
        self.geometry = self.config.default_geometry;
        if self.mode == OperatingMode::CloseLoop {
            self.compensator.reset();
        }
        info!("mode -> {}", self.mode.label());
        Ok(())
    }

    fn step_manual_geometry(&mut self, event: InputEvent) -> Result<(), EventRejected> {
        if self.mode == OperatingMode::CloseLoop {
            debug!("geometry step ignored in closed loop");
            return Err(EventRejected::ClosedLoop);
        }

        let next = step_geometry(&self.geometry, event);
        match map_geometry(&next) {
            Ok(_) => {
                self.geometry = next;
                Ok(())
            }
            Err(e) => {
                warn!("geometry step rejected: {}", e);
                Err(EventRejected::Geometry(e))
            }
        }
    }

    /// One control cycle: sample, evaluate, transition, drive the outputs.
    pub fn step<P: PwmOutput>(&mut self, raw: RawAdcCodes, pwm: &mut P) {
        self.cycles = self.cycles.wrapping_add(1);
        self.samples = self.sampler.sample(raw);
        let detected = evaluate(&self.samples, &self.active_thresholds());

        match self.state {
            ConverterState::Init => {
                self.sampler.reset();
                self.compensator.reset();
                self.faults.clear();
                self.geometry = self.config.default_geometry;
                self.params = ControlParameters::from_config(&self.config);
                self.output_enabled = true;
                self.disable_output(pwm);
                self.transition(ConverterState::Wait);
            }
            ConverterState::Wait => {
                if self.acknowledge_requested && self.faults.is_tripped() {
                    let cleared = self.faults.clear();
                    info!("faults acknowledged: {}", cleared);
                }
                // whatever is still present stays visible and blocks a start
                self.faults.latch(detected);

                if self.start_requested {
                    if self.faults.is_tripped() {
                        warn!("start refused, faults latched: {}", self.faults.faults());
                    } else {
                        self.compensator.reset();
                        self.soft_start = 0;
                        self.transition(ConverterState::Rise);
                        self.drive(pwm);
                    }
                }
            }
            ConverterState::Rise | ConverterState::Run => {
                if !detected.is_empty() {
                    self.trip(detected, pwm);
                } else if self.stop_requested {
                    self.disable_output(pwm);
                    self.transition(ConverterState::Wait);
                } else {
                    self.drive(pwm);
                }
            }
            ConverterState::Err => {
                if self.acknowledge_requested {
                    let cleared = self.faults.clear();
                    info!("faults acknowledged: {}", cleared);
                    self.transition(ConverterState::Wait);
                }
                // faults seen after the trip, or still present through the
                // acknowledge, are recorded too
                let before = self.faults.faults();
                self.faults.latch(detected);
                if self.faults.faults() != before {
                    warn!("faults latched: {}", self.faults.faults());
                }
            }
        }

        self.start_requested = false;
        self.stop_requested = false;
        self.acknowledge_requested = false;
    }

    /// The configured thresholds with the live current limits. Output
    /// undervoltage only means something once closed loop is regulating.
    fn active_thresholds(&self) -> Thresholds {
        let regulating = self.state == ConverterState::Run && self.mode == OperatingMode::CloseLoop;
        Thresholds {
            vout_uvp: if regulating { self.config.thresholds.vout_uvp } else { Threshold::Disabled },
            iout_ocp: Threshold::Above(self.params.ilimit_out),
            short_circuit: Threshold::Above(self.params.ilimit),
            ..self.config.thresholds
        }
    }

    fn transition(&mut self, next: ConverterState) {
        info!("{} -> {}", self.state.label(), next.label());
        self.state = next;
    }

    fn trip<P: PwmOutput>(&mut self, faults: FaultSet, pwm: &mut P) {
        self.faults.latch(faults);
        self.disable_output(pwm);
        error!("converter tripped: {}", faults);
        self.transition(ConverterState::Err);
    }

    fn limits(&self) -> DutyLimits {
        DutyLimits {
            min_buck: self.config.min_buck_duty,
            max_buck: self.params.buck_max_duty,
            max_boost: self.params.boost_max_duty,
        }
    }

    /// Fraction of the soft-start ramp to apply this cycle.
    fn ramp(&self, full: i32, from: i32) -> i32 {
        match self.state {
            ConverterState::Rise => {
                let cycles = self.config.soft_start_cycles.max(1) as i32;
                from + (full - from) * self.soft_start as i32 / cycles
            }
            _ => full,
        }
    }

    fn closed_loop_geometry(&mut self) -> PwmGeometry {
        let target = self
            .samples
            .vadj
            .average
            .clamp(self.config.min_voltage_reference, self.config.max_voltage_reference);
        self.params.voref = q12(self.ramp(target.to_bits(), 0));

        let limits = self.limits();
        let command = self.compensator.compute_buck_duty(
            self.params.voref,
            self.samples.vout.value,
            true,
            &limits,
        );
        self.params.buck_duty = command.buck;
        self.params.boost_duty = command.boost;
        self.geometry.with_duty_command(command.buck)
    }

    fn open_loop_geometry(&mut self) -> PwmGeometry {
        let min_duty = fraction_of(self.config.min_buck_duty, NOMINAL_PERIOD as u32);
        let setpoint = self.geometry.duty as i32;
        let duty = if setpoint > min_duty { self.ramp(setpoint, min_duty) } else { setpoint };
        let geometry = PwmGeometry { duty: duty as u16, ..self.geometry };
        self.params.buck_duty = q12(duty * 4096 / NOMINAL_PERIOD as i32);
        geometry
    }

    fn drive<P: PwmOutput>(&mut self, pwm: &mut P) {
        let geometry = match self.mode {
            OperatingMode::CloseLoop => self.closed_loop_geometry(),
            OperatingMode::OpenLoop => self.open_loop_geometry(),
        };

        match map_geometry(&geometry) {
            Ok(compare) => {
                pwm.apply(&compare);
                self.applied = geometry;
            }
            Err(e) => warn!("geometry rejected, keeping previous: {}", e),
        }

        if !self.output_enabled {
            pwm.set_enabled(true);
            self.output_enabled = true;
        }

        if self.state == ConverterState::Rise {
            self.soft_start += 1;
            if self.soft_start >= self.config.soft_start_cycles {
                self.transition(ConverterState::Run);
            }
        }
    }

    /// Outputs off and the compare set parked on the minimum duty.
    fn disable_output<P: PwmOutput>(&mut self, pwm: &mut P) {
        if self.output_enabled {
            pwm.set_enabled(false);
            self.output_enabled = false;
        }

        let parked = self.geometry.with_duty_command(self.config.min_buck_duty);
        if let Ok(compare) = map_geometry(&parked) {
            pwm.apply(&compare);
            self.applied = parked;
        }
        self.params.buck_duty = self.config.min_buck_duty;
    }

    pub fn report(&self) -> StatusReport {
        let shown = if self.state.is_switching() { &self.applied } else { &self.geometry };
        StatusReport {
            mode: self.mode,
            state: self.state,
            faults: self.faults.faults(),
            frequency_hz: shown.frequency_hz(TICK_CLOCK_HZ),
            duty_permille: StatusReport::duty_permille_of(shown),
            dead_time_permille: StatusReport::dead_time_permille_of(shown),
            adjust_mv: StatusReport::millivolts_of(self.samples.vadj.average),
            voltage_reference: self.params.voref,
            output_current_reference: self.params.ioref,
            buck_duty: self.params.buck_duty,
            boost_duty: self.params.boost_duty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_GEOMETRY, MIN_BUCK_DUTY, SOFT_START_CYCLES};
    use crate::protection::FaultKind;
    use crate::pwm_geometry::PwmCompare;

    #[derive(Default)]
    struct RecordingPwm {
        enabled: bool,
        last: Option<PwmCompare>,
        applies: usize,
        toggles: usize,
    }

    impl PwmOutput for RecordingPwm {
        fn apply(&mut self, compare: &PwmCompare) {
            self.last = Some(*compare);
            self.applies += 1;
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
            self.toggles += 1;
        }
    }

    fn healthy() -> RawAdcCodes {
        RawAdcCodes { vin: 2500, iin: 2100, vout: 1500, iout: 2300, vadj: 1500 }
    }

    fn settled() -> (ControllerContext, RecordingPwm) {
        let mut ctx = ControllerContext::new(Config::default());
        let mut pwm = RecordingPwm::default();
        for _ in 0..40 {
            ctx.step(healthy(), &mut pwm);
        }
        (ctx, pwm)
    }

    fn running() -> (ControllerContext, RecordingPwm) {
        let (mut ctx, mut pwm) = settled();
        ctx.handle_event(InputEvent::Start).unwrap();
        for _ in 0..=SOFT_START_CYCLES {
            ctx.step(healthy(), &mut pwm);
        }
        (ctx, pwm)
    }

    fn min_duty_ticks() -> u16 {
        fraction_of(q12(MIN_BUCK_DUTY), NOMINAL_PERIOD as u32) as u16
    }

    #[test]
    fn init_parks_outputs_and_waits() {
        let mut ctx = ControllerContext::new(Config::default());
        let mut pwm = RecordingPwm { enabled: true, ..Default::default() };
        assert_eq!(ctx.state(), ConverterState::Init);
        ctx.step(healthy(), &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Wait);
        assert!(!pwm.enabled);
        assert_eq!(pwm.last.unwrap().leg_a.duty, min_duty_ticks());
    }

    #[test]
    fn wait_holds_without_a_start_request() {
        let (mut ctx, mut pwm) = settled();
        for _ in 0..100 {
            ctx.step(healthy(), &mut pwm);
        }
        assert_eq!(ctx.state(), ConverterState::Wait);
        assert!(!pwm.enabled);
    }

    #[test]
    fn soft_start_ramps_duty_then_runs() {
        let (mut ctx, mut pwm) = settled();
        ctx.handle_event(InputEvent::Start).unwrap();
        ctx.step(healthy(), &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Rise);
        assert!(pwm.enabled);
        assert_eq!(pwm.last.unwrap().leg_a.duty, min_duty_ticks());

        let mut previous = min_duty_ticks();
        while ctx.state() == ConverterState::Rise {
            ctx.step(healthy(), &mut pwm);
            let duty = pwm.last.unwrap().leg_a.duty;
            assert!(duty >= previous);
            previous = duty;
        }
        assert_eq!(ctx.state(), ConverterState::Run);
        assert!(ctx.cycles() <= 40 + SOFT_START_CYCLES as u32 + 1);

        ctx.step(healthy(), &mut pwm);
        assert_eq!(pwm.last.unwrap().leg_a.duty, DEFAULT_GEOMETRY.duty);
    }

    #[test]
    fn start_is_refused_while_a_fault_is_present() {
        let (mut ctx, mut pwm) = settled();
        ctx.handle_event(InputEvent::Start).unwrap();
        ctx.step(RawAdcCodes { iout: 4095, ..healthy() }, &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Wait);
        assert!(!pwm.enabled);
        assert!(ctx.faults().contains(FaultKind::ShortCircuit));
        // the request does not linger, and the latch keeps refusing
        ctx.step(healthy(), &mut pwm);
        ctx.handle_event(InputEvent::Start).unwrap();
        ctx.step(healthy(), &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Wait);
        assert!(!pwm.enabled);
    }

    #[test]
    fn fault_seen_in_wait_is_latched_and_displayed() {
        let (mut ctx, mut pwm) = settled();
        for _ in 0..50 {
            ctx.step(RawAdcCodes { vin: 4095, ..healthy() }, &mut pwm);
        }
        assert_eq!(ctx.state(), ConverterState::Wait);
        assert!(ctx.faults().contains(FaultKind::VinOverVoltage));
        assert_eq!(ctx.report().render()[3].as_str(), "ERR: VIN OVP");
        assert!(!ctx.indicators().ready);
        assert!(ctx.indicators().fault);

        // still latched once the input recovers
        for _ in 0..50 {
            ctx.step(healthy(), &mut pwm);
        }
        assert!(ctx.faults().contains(FaultKind::VinOverVoltage));
        ctx.handle_event(InputEvent::Start).unwrap();
        ctx.step(healthy(), &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Wait);

        ctx.handle_event(InputEvent::Acknowledge).unwrap();
        ctx.step(healthy(), &mut pwm);
        assert!(ctx.faults().is_empty());
        assert!(ctx.indicators().ready);
        ctx.handle_event(InputEvent::Start).unwrap();
        ctx.step(healthy(), &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Rise);
    }

    #[test]
    fn second_fault_in_err_is_added_to_the_latch() {
        let (mut ctx, mut pwm) = running();
        ctx.step(RawAdcCodes { iout: 4095, ..healthy() }, &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Err);
        assert!(!ctx.faults().contains(FaultKind::VinOverVoltage));

        let applies = pwm.applies;
        for _ in 0..50 {
            ctx.step(RawAdcCodes { vin: 4095, ..healthy() }, &mut pwm);
        }
        assert_eq!(ctx.state(), ConverterState::Err);
        assert!(ctx.faults().contains(FaultKind::ShortCircuit));
        assert!(ctx.faults().contains(FaultKind::VinOverVoltage));
        assert_eq!(pwm.applies, applies);
        assert!(!pwm.enabled);
    }

    #[test]
    fn acknowledge_with_the_fault_still_present_keeps_it_latched() {
        let (mut ctx, mut pwm) = running();
        ctx.step(RawAdcCodes { iout: 4095, ..healthy() }, &mut pwm);
        let overvoltage = RawAdcCodes { vin: 4095, ..healthy() };
        for _ in 0..50 {
            ctx.step(overvoltage, &mut pwm);
        }

        ctx.handle_event(InputEvent::Acknowledge).unwrap();
        ctx.step(overvoltage, &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Wait);
        assert!(ctx.faults().contains(FaultKind::VinOverVoltage));
        assert!(!ctx.faults().contains(FaultKind::ShortCircuit));
        assert_eq!(ctx.report().render()[3].as_str(), "ERR: VIN OVP");

        ctx.handle_event(InputEvent::Start).unwrap();
        ctx.step(overvoltage, &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Wait);
        assert!(!pwm.enabled);
    }

    #[test]
    fn indicators_follow_the_state() {
        let (mut ctx, mut pwm) = settled();
        assert_eq!(ctx.indicators(), Indicators { ready: true, switching: false, fault: false });

        ctx.handle_event(InputEvent::Start).unwrap();
        ctx.step(healthy(), &mut pwm);
        assert_eq!(ctx.indicators(), Indicators { ready: false, switching: true, fault: false });

        ctx.step(RawAdcCodes { iout: 4095, ..healthy() }, &mut pwm);
        assert_eq!(ctx.indicators(), Indicators { ready: false, switching: false, fault: true });
    }

    #[test]
    fn fault_in_run_trips_in_the_same_cycle() {
        let (mut ctx, mut pwm) = running();
        assert_eq!(ctx.state(), ConverterState::Run);
        assert!(pwm.enabled);

        ctx.step(RawAdcCodes { iout: 4095, ..healthy() }, &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Err);
        assert!(!pwm.enabled);
        assert!(ctx.faults().contains(FaultKind::ShortCircuit));
        assert_eq!(pwm.last.unwrap().leg_a.duty, min_duty_ticks());
        assert_eq!(ctx.parameters().buck_duty, q12(MIN_BUCK_DUTY));
    }

    #[test]
    fn fault_during_soft_start_aborts() {
        let (mut ctx, mut pwm) = settled();
        ctx.handle_event(InputEvent::Start).unwrap();
        for _ in 0..10 {
            ctx.step(healthy(), &mut pwm);
        }
        ctx.step(RawAdcCodes { iout: 4095, ..healthy() }, &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Err);
        assert!(!pwm.enabled);
    }

    #[test]
    fn err_is_sticky_until_acknowledged() {
        let (mut ctx, mut pwm) = running();
        ctx.step(RawAdcCodes { iout: 4095, ..healthy() }, &mut pwm);
        let tripped = ctx.faults();

        let applies = pwm.applies;
        for _ in 0..500 {
            ctx.step(healthy(), &mut pwm);
            assert_eq!(ctx.state(), ConverterState::Err);
            assert_eq!(ctx.faults(), tripped);
        }
        assert_eq!(pwm.applies, applies);
        assert!(!pwm.enabled);

        // start and stop do not leave Err
        ctx.handle_event(InputEvent::Start).unwrap();
        ctx.step(healthy(), &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Err);

        ctx.handle_event(InputEvent::Acknowledge).unwrap();
        ctx.step(healthy(), &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Wait);
        assert!(ctx.faults().is_empty());
    }

    #[test]
    fn mode_switch_is_refused_in_err() {
        let (mut ctx, mut pwm) = running();
        ctx.step(RawAdcCodes { iout: 4095, ..healthy() }, &mut pwm);
        assert_eq!(ctx.handle_event(InputEvent::SwitchMode), Err(EventRejected::Faulted));
        assert_eq!(ctx.mode(), OperatingMode::OpenLoop);
    }

    #[test]
    fn mode_switch_resets_geometry_every_time() {
        let (mut ctx, _pwm) = settled();
        ctx.handle_event(InputEvent::IncreaseFrequency).unwrap();
        ctx.handle_event(InputEvent::IncreaseDeadTime).unwrap();
        assert_ne!(*ctx.geometry(), DEFAULT_GEOMETRY);

        ctx.handle_event(InputEvent::SwitchMode).unwrap();
        assert_eq!(ctx.mode(), OperatingMode::CloseLoop);
        assert_eq!(*ctx.geometry(), DEFAULT_GEOMETRY);

        ctx.handle_event(InputEvent::SwitchMode).unwrap();
        assert_eq!(ctx.mode(), OperatingMode::OpenLoop);
        assert_eq!(*ctx.geometry(), DEFAULT_GEOMETRY);
    }

    #[test]
    fn entering_closed_loop_resets_the_compensator() {
        let (mut ctx, mut pwm) = settled();
        ctx.handle_event(InputEvent::SwitchMode).unwrap();
        ctx.handle_event(InputEvent::Start).unwrap();
        for _ in 0..50 {
            ctx.step(healthy(), &mut pwm);
        }
        assert_ne!(*ctx.control_state(), ControlState::default());

        ctx.handle_event(InputEvent::SwitchMode).unwrap();
        ctx.handle_event(InputEvent::SwitchMode).unwrap();
        assert_eq!(*ctx.control_state(), ControlState::default());
    }

    #[test]
    fn closed_loop_steps_are_ignored() {
        let (mut ctx, _pwm) = settled();
        ctx.handle_event(InputEvent::SwitchMode).unwrap();
        assert_eq!(ctx.handle_event(InputEvent::IncreaseDuty), Err(EventRejected::ClosedLoop));
        assert_eq!(*ctx.geometry(), DEFAULT_GEOMETRY);
    }

    #[test]
    fn closed_loop_duty_stays_within_limits() {
        let (mut ctx, mut pwm) = settled();
        ctx.handle_event(InputEvent::SwitchMode).unwrap();
        ctx.handle_event(InputEvent::Start).unwrap();
        let max_ticks = DEFAULT_GEOMETRY.with_duty_command(ctx.parameters().buck_max_duty).duty;
        for cycle in 0..2000u32 {
            // output sags and recovers
            let vout = if cycle % 400 < 200 { 600 } else { 2400 };
            ctx.step(RawAdcCodes { vout, ..healthy() }, &mut pwm);
            let duty = pwm.last.unwrap().leg_a.duty;
            assert!(duty >= min_duty_ticks() && duty <= max_ticks, "cycle {}: {}", cycle, duty);
        }
        assert_eq!(ctx.state(), ConverterState::Run);
        assert_eq!(ctx.parameters().boost_duty.to_bits(), crate::config::FIXED_BOOST_DUTY);
    }

    #[test]
    fn closed_loop_reference_ramps_during_soft_start() {
        let (mut ctx, mut pwm) = settled();
        ctx.handle_event(InputEvent::SwitchMode).unwrap();
        ctx.handle_event(InputEvent::Start).unwrap();
        ctx.step(healthy(), &mut pwm);
        assert_eq!(ctx.parameters().voref, Q12::ZERO);
        for _ in 0..SOFT_START_CYCLES {
            ctx.step(healthy(), &mut pwm);
        }
        assert_eq!(ctx.state(), ConverterState::Run);
        assert_eq!(ctx.parameters().voref, ctx.samples().vadj.average);
    }

    #[test]
    fn vout_undervoltage_only_counts_while_regulating() {
        let (mut ctx, mut pwm) = running();
        // open loop run with a collapsed output is not a fault
        ctx.step(RawAdcCodes { vout: 0, ..healthy() }, &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Run);

        ctx.handle_event(InputEvent::SwitchMode).unwrap();
        for _ in 0..20 {
            ctx.step(RawAdcCodes { vout: 0, ..healthy() }, &mut pwm);
        }
        assert_eq!(ctx.state(), ConverterState::Err);
        assert!(ctx.faults().contains(FaultKind::VoutUnderVoltage));
    }

    #[test]
    fn stop_returns_to_wait_with_outputs_off() {
        let (mut ctx, mut pwm) = running();
        ctx.handle_event(InputEvent::Stop).unwrap();
        ctx.step(healthy(), &mut pwm);
        assert_eq!(ctx.state(), ConverterState::Wait);
        assert!(!pwm.enabled);
        assert!(ctx.faults().is_empty());
    }

    #[test]
    fn manual_steps_reach_the_outputs_as_one_update() {
        let (mut ctx, mut pwm) = running();
        let applies = pwm.applies;
        ctx.handle_event(InputEvent::DecreaseDuty).unwrap();
        ctx.handle_event(InputEvent::DecreaseFrequency).unwrap();
        ctx.step(healthy(), &mut pwm);
        assert_eq!(pwm.applies, applies + 1);
        let expected = map_geometry(&PwmGeometry { period: 16160, duty: 7520, ..DEFAULT_GEOMETRY }).unwrap();
        assert_eq!(pwm.last, Some(expected));
    }

    #[test]
    fn report_reflects_the_front_panel() {
        let (ctx, _pwm) = running();
        let report = ctx.report();
        assert_eq!(report.state, ConverterState::Run);
        assert_eq!(report.frequency_hz, 100_000);
        assert_eq!(report.duty_permille, 480);
        assert_eq!(report.dead_time_permille, 20);
    }
}
