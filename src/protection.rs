//! Protection evaluation and the fault latch.
//!
//! `evaluate` is pure: it looks at one cycle's samples and reports which trip
//! conditions hold right now. Remembering them is the job of `FaultLatch`,
//! which only the converter state machine clears, on acknowledgement.

use crate::fixed_point::Q12;
use crate::sampler::SampledQuantities;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FaultKind {
    VinUnderVoltage = 1 << 0,
    VinOverVoltage = 1 << 1,
    VoutUnderVoltage = 1 << 2,
    VoutOverVoltage = 1 << 3,
    IoutOverCurrent = 1 << 4,
    ShortCircuit = 1 << 5,
}

impl FaultKind {
    pub const ALL: [FaultKind; 6] = [
        FaultKind::VinUnderVoltage,
        FaultKind::VinOverVoltage,
        FaultKind::VoutUnderVoltage,
        FaultKind::VoutOverVoltage,
        FaultKind::IoutOverCurrent,
        FaultKind::ShortCircuit,
    ];

    pub const fn bit(self) -> u8 {
        self as u8
    }

    pub const fn label(self) -> &'static str {
        match self {
            FaultKind::VinUnderVoltage => "VIN UVP",
            FaultKind::VinOverVoltage => "VIN OVP",
            FaultKind::VoutUnderVoltage => "VOUT UVP",
            FaultKind::VoutOverVoltage => "VOUT OVP",
            FaultKind::IoutOverCurrent => "IOUT OCP",
            FaultKind::ShortCircuit => "SHORT",
        }
    }
}

/// A set of fault kinds.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultSet(u8);

impl FaultSet {
    pub const EMPTY: FaultSet = FaultSet(0);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, kind: FaultKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn insert(&mut self, kind: FaultKind) {
        self.0 |= kind.bit();
    }

    pub const fn union(self, other: FaultSet) -> FaultSet {
        FaultSet(self.0 | other.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn iter(self) -> impl Iterator<Item = FaultKind> {
        FaultKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }

    /// The first fault in declaration order, for one-line displays.
    pub fn first(self) -> Option<FaultKind> {
        self.iter().next()
    }
}

impl From<FaultKind> for FaultSet {
    fn from(kind: FaultKind) -> Self {
        FaultSet(kind.bit())
    }
}

impl core::fmt::Debug for FaultSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Faults stay set from the cycle they are seen until acknowledged, even if
/// the condition goes away on its own.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultLatch {
    latched: FaultSet,
}

impl FaultLatch {
    pub const fn new() -> Self {
        FaultLatch { latched: FaultSet::EMPTY }
    }

    pub fn latch(&mut self, faults: FaultSet) {
        self.latched = self.latched.union(faults);
    }

    pub const fn faults(&self) -> FaultSet {
        self.latched
    }

    pub const fn is_tripped(&self) -> bool {
        !self.latched.is_empty()
    }

    // Only the state machine's recovery transition may clear the latch.
    pub(crate) fn clear(&mut self) -> FaultSet {
        core::mem::take(&mut self.latched)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Threshold {
    /// Trips when the reading is strictly below the level.
    Below(Q12),
    /// Trips when the reading is strictly above the level.
    Above(Q12),
    Disabled,
}

impl Threshold {
    pub fn trips(self, reading: Q12) -> bool {
        match self {
            Threshold::Below(level) => reading < level,
            Threshold::Above(level) => reading > level,
            Threshold::Disabled => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Thresholds {
    pub vin_uvp: Threshold,
    pub vin_ovp: Threshold,
    pub vout_uvp: Threshold,
    pub vout_ovp: Threshold,
    /// Compared against the averaged output current.
    pub iout_ocp: Threshold,
    /// Compared against the unfiltered output current.
    pub short_circuit: Threshold,
}

pub fn evaluate(s: &SampledQuantities, thresholds: &Thresholds) -> FaultSet {
    let checks = [
        (FaultKind::VinUnderVoltage, thresholds.vin_uvp, s.vin.average),
        (FaultKind::VinOverVoltage, thresholds.vin_ovp, s.vin.average),
        (FaultKind::VoutUnderVoltage, thresholds.vout_uvp, s.vout.average),
        (FaultKind::VoutOverVoltage, thresholds.vout_ovp, s.vout.average),
        (FaultKind::IoutOverCurrent, thresholds.iout_ocp, s.iout.average),
        (FaultKind::ShortCircuit, thresholds.short_circuit, s.iout.value),
    ];

    let mut faults = FaultSet::EMPTY;
    for (kind, threshold, reading) in checks {
        if threshold.trips(reading) {
            faults.insert(kind);
        }
    }
    faults
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fixed_point::q12;
    use crate::sampler::Reading;

    fn steady(vin: i32, vout: i32, iout: i32) -> SampledQuantities {
        let reading = |v| Reading { value: q12(v), average: q12(v) };
        SampledQuantities {
            vin: reading(vin),
            iin: reading(2048),
            vout: reading(vout),
            iout: reading(iout),
            vadj: reading(2048),
        }
    }

    fn thresholds() -> Thresholds {
        Config::default().thresholds
    }

    #[test]
    fn healthy_operating_point_has_no_faults() {
        assert!(evaluate(&steady(2500, 2000, 2600), &thresholds()).is_empty());
    }

    #[test]
    fn each_threshold_sets_its_own_flag() {
        let t = thresholds();
        let cases = [
            (steady(900, 2000, 2600), FaultKind::VinUnderVoltage),
            (steady(3900, 2000, 2600), FaultKind::VinOverVoltage),
            (steady(2500, 100, 2600), FaultKind::VoutUnderVoltage),
            (steady(2500, 3900, 2600), FaultKind::VoutOverVoltage),
            (steady(2500, 2000, 3600), FaultKind::IoutOverCurrent),
        ];
        for (sample, expected) in cases {
            let faults = evaluate(&sample, &t);
            assert_eq!(faults, FaultSet::from(expected), "{:?}", sample);
        }
    }

    #[test]
    fn short_circuit_uses_the_unfiltered_current() {
        let mut s = steady(2500, 2000, 2600);
        s.iout.value = q12(4000);
        let faults = evaluate(&s, &thresholds());
        assert!(faults.contains(FaultKind::ShortCircuit));
        assert!(!faults.contains(FaultKind::IoutOverCurrent));
    }

    #[test]
    fn simultaneous_faults_are_combined() {
        let mut s = steady(900, 3900, 3600);
        s.iout.value = q12(4000);
        let faults = evaluate(&s, &thresholds());
        assert_eq!(faults.iter().count(), 4);
        assert_eq!(faults.first(), Some(FaultKind::VinUnderVoltage));
    }

    #[test]
    fn disabled_threshold_never_trips() {
        let mut t = thresholds();
        t.vout_uvp = Threshold::Disabled;
        assert!(evaluate(&steady(2500, 0, 2600), &t).is_empty());
    }

    #[test]
    fn latch_holds_until_cleared() {
        let mut latch = FaultLatch::new();
        latch.latch(FaultKind::ShortCircuit.into());
        latch.latch(FaultSet::EMPTY);
        assert!(latch.is_tripped());
        latch.latch(FaultKind::VinOverVoltage.into());
        assert_eq!(latch.faults().bits(), 0b10_0010);
        let cleared = latch.clear();
        assert_eq!(cleared.iter().count(), 2);
        assert!(!latch.is_tripped());
    }
}
