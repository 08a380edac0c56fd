//! Fixed-point scales used throughout the control path.
//!
//! Measured quantities and duty fractions are Q12 (`value * 4096`), the
//! compensator coefficients are Q8 (`value * 256`) and the product of the two,
//! which is what the compensator accumulates, is Q20. Every conversion between
//! scales goes through this module so the rounding (towards negative infinity,
//! i.e. an arithmetic right shift) and saturation behaviour lives in one place.

use fixed::types::{I12F20, I20F12, I24F8};

/// Q12: quantities normalised to channel full scale, duty fractions.
pub type Q12 = I20F12;
/// Q8: compensator coefficients.
pub type Q8 = I24F8;
/// Q20: compensator accumulator, the scale of `Q12 * Q8`.
pub type Q20 = I12F20;

/// Builds a Q12 from an integer code that is already in Q12 units.
pub const fn q12(bits: i32) -> Q12 {
    Q12::from_bits(bits)
}

/// Builds a Q8 from an integer that is already in Q8 units.
pub const fn q8(bits: i32) -> Q8 {
    Q8::from_bits(bits)
}

/// Applies a Q12 gain to an integer code: `(code * gain) >> 12`.
pub fn scale_code(code: i32, gain: Q12) -> Q12 {
    Q12::from_bits(gain.saturating_mul_int(code).to_num::<i32>())
}

/// Product of a Q12 sample and a Q8 coefficient, exact up to saturation.
pub fn mul_q12_q8(sample: Q12, coefficient: Q8) -> Q20 {
    Q20::from_bits(sample.to_bits().saturating_mul(coefficient.to_bits()))
}

/// Drops the eight extra fractional bits of a Q20 accumulator: `u >> 8`.
pub fn q20_to_q12(value: Q20) -> Q12 {
    Q12::from_bits(value.to_bits() >> 8)
}

/// Scales a Q12 fraction onto an integer span: `(fraction * span) >> 12`.
pub fn fraction_of(fraction: Q12, span: u32) -> i32 {
    // span never exceeds a 16-bit timer period, so the product fits in i64
    ((fraction.to_bits() as i64 * span as i64) >> 12) as i32
}
