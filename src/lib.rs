//! Control path for a four-switch buck-boost converter.
//!
//! The crate is split so everything between the ADC codes and the timer
//! compare values runs on the host: `sampler` turns raw codes into scaled
//! readings, `protection` decides what is a fault, `control_law` closes the
//! voltage loop, `pwm_geometry` maps the operator geometry onto compare
//! registers and `converter` sequences it all. The board itself sits behind
//! the traits in `io` and is only built with the `hardware` feature.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod config;
pub mod control_law;
pub mod converter;
pub mod fixed_point;
pub mod input;
pub mod io;
pub mod protection;
pub mod pwm_geometry;
pub mod sampler;
pub mod status;

pub use config::Config;
pub use converter::{ControllerContext, ConverterState, EventRejected, OperatingMode};
pub use input::{InputEvent, InputMailbox};
pub use io::{AdcSource, PwmOutput, StatusSink};
pub use protection::{FaultKind, FaultSet};
pub use pwm_geometry::{PwmCompare, PwmGeometry};
pub use sampler::RawAdcCodes;
pub use status::{Indicators, StatusReport};
