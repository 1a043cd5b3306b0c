//! Approximate float equality measured in units of the last kept mantissa bit.
//!
//! Two values are close when their bit patterns, mapped onto a monotonic integer line, are at
//! most one unit apart at the tolerance bit. `mantissa_bits` counts the implicit leading one, so
//! `24` compares full `f32` precision and `8` compares at bfloat16 precision.
//! Infinities and NaNs are never close to anything, including themselves.

pub const DEFAULT_MANTISSA_BITS: u32 = 8;
pub const DEFAULT_TOLERANCE_BITS: u32 = 2;

/// `f64` comparisons always use the full 53-bit mantissa.
pub const DOUBLE_MANTISSA_BITS: u32 = 53;
pub const DEFAULT_DOUBLE_TOLERANCE_BITS: u32 = 2;

const FLOAT_EXPONENT_BITS: u32 = 8;
const DOUBLE_EXPONENT_BITS: u32 = 11;

fn ordered_f32(bits: u32) -> u32 {
    const SIGN: u32 = 1 << 31;
    if bits & SIGN != 0 {
        (!bits).wrapping_add(1)
    } else {
        bits | SIGN
    }
}

fn ordered_f64(bits: u64) -> u64 {
    const SIGN: u64 = 1 << 63;
    if bits & SIGN != 0 {
        (!bits).wrapping_add(1)
    } else {
        bits | SIGN
    }
}

/// Allowed distance for a `width`-bit float: one unit at bit
/// `width - (sign + exponent + mantissa - 1 - tolerance)`.
fn tolerance_shift(
    width: u32,
    exponent_bits: u32,
    mantissa_bits: u32,
    tolerance_bits: u32,
) -> u32 {
    (width + tolerance_bits).saturating_sub(exponent_bits + mantissa_bits)
}

pub fn close_f(expected: f32, actual: f32, mantissa_bits: u32, tolerance_bits: u32) -> bool {
    if !expected.is_finite() || !actual.is_finite() {
        return false;
    }
    let shift = tolerance_shift(32, FLOAT_EXPONENT_BITS, mantissa_bits, tolerance_bits);
    let tolerance = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
    let distance = ordered_f32(expected.to_bits()).abs_diff(ordered_f32(actual.to_bits()));
    distance <= tolerance
}

pub fn close_f_default(expected: f32, actual: f32) -> bool {
    close_f(expected, actual, DEFAULT_MANTISSA_BITS, DEFAULT_TOLERANCE_BITS)
}

pub fn close_f64(expected: f64, actual: f64, tolerance_bits: u32) -> bool {
    if !expected.is_finite() || !actual.is_finite() {
        return false;
    }
    let shift = tolerance_shift(64, DOUBLE_EXPONENT_BITS, DOUBLE_MANTISSA_BITS, tolerance_bits);
    let tolerance = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    let distance = ordered_f64(expected.to_bits()).abs_diff(ordered_f64(actual.to_bits()));
    distance <= tolerance
}

/// Element-wise [`close_f`]; slices of different length are never close.
pub fn all_close_f(
    expected: &[f32],
    actual: &[f32],
    mantissa_bits: u32,
    tolerance_bits: u32,
) -> bool {
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(&e, &a)| close_f(e, a, mantissa_bits, tolerance_bits))
}

pub fn all_close_f64(expected: &[f64], actual: &[f64], tolerance_bits: u32) -> bool {
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(&e, &a)| close_f64(e, a, tolerance_bits))
}

/// Index of the first element that is not close, for assertion messages.
pub fn first_mismatch(
    expected: &[f32],
    actual: &[f32],
    mantissa_bits: u32,
    tolerance_bits: u32,
) -> Option<usize> {
    if expected.len() != actual.len() {
        return Some(expected.len().min(actual.len()));
    }
    expected
        .iter()
        .zip(actual)
        .position(|(&e, &a)| !close_f(e, a, mantissa_bits, tolerance_bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES_F32: [f32; 14] = [
        0.0, -0.0, 1.0, -1.0, 10.0, -10.0, 0.75, -0.75, 0.5, -0.5, 0.25, -0.25, 0.125, -0.125,
    ];
    const SAMPLES_F64: [f64; 14] = [
        0.0, -0.0, 1.0, -1.0, 10.0, -10.0, 0.75, -0.75, 0.5, -0.5, 0.25, -0.25, 0.125, -0.125,
    ];

    struct Bounds<T> {
        upper: T,
        past_upper: T,
        lower: T,
        past_lower: T,
    }

    fn bounds_f32(expected: f32, step: u32) -> Bounds<u32> {
        let bits = expected.to_bits();
        if expected > 0.0 {
            Bounds {
                upper: bits + step,
                past_upper: bits + step + 1,
                lower: bits - step,
                past_lower: bits - step - 1,
            }
        } else if expected < 0.0 {
            Bounds {
                upper: bits - step,
                past_upper: bits - step - 1,
                lower: bits + step,
                past_lower: bits + step + 1,
            }
        } else {
            Bounds {
                upper: step,
                past_upper: step + 1,
                lower: step | 0x8000_0000,
                past_lower: (step + 1) | 0x8000_0000,
            }
        }
    }

    fn bounds_f64(expected: f64, step: u64) -> Bounds<u64> {
        let bits = expected.to_bits();
        if expected > 0.0 {
            Bounds {
                upper: bits + step,
                past_upper: bits + step + 1,
                lower: bits - step,
                past_lower: bits - step - 1,
            }
        } else if expected < 0.0 {
            Bounds {
                upper: bits - step,
                past_upper: bits - step - 1,
                lower: bits + step,
                past_lower: bits + step + 1,
            }
        } else {
            Bounds {
                upper: step,
                past_upper: step + 1,
                lower: step | (1 << 63),
                past_lower: (step + 1) | (1 << 63),
            }
        }
    }

    #[test]
    fn f32_boundaries_across_precisions() {
        for &expected in &SAMPLES_F32 {
            for mantissa_bits in [8u32, 24] {
                for tolerance_bits in 0u32..5 {
                    let step = 1u32 << (32 - (1 + 8 + (mantissa_bits - 1) - tolerance_bits));
                    let b = bounds_f32(expected, step);
                    let ctx = format!("{expected} m={mantissa_bits} t={tolerance_bits}");
                    let close = |bits: u32| {
                        close_f(expected, f32::from_bits(bits), mantissa_bits, tolerance_bits)
                    };
                    assert!(close(b.upper), "upper bound: {ctx}");
                    assert!(close(b.lower), "lower bound: {ctx}");
                    assert!(!close(b.past_upper), "past upper bound: {ctx}");
                    assert!(!close(b.past_lower), "past lower bound: {ctx}");
                }
            }
        }
    }

    #[test]
    fn f64_boundaries_across_precisions() {
        for &expected in &SAMPLES_F64 {
            for tolerance_bits in 0u32..17 {
                let step = 1u64 << tolerance_bits;
                let b = bounds_f64(expected, step);
                let ctx = format!("{expected} t={tolerance_bits}");
                let close = |bits: u64| close_f64(expected, f64::from_bits(bits), tolerance_bits);
                assert!(close(b.upper), "upper bound: {ctx}");
                assert!(close(b.lower), "lower bound: {ctx}");
                assert!(!close(b.past_upper), "past upper bound: {ctx}");
                assert!(!close(b.past_lower), "past lower bound: {ctx}");
            }
        }
    }

    #[test]
    fn mantissa_8_near_zero_and_one() {
        let at = f32::from_bits;
        assert!(close_f(0.0, at(0x0004_0000), 8, 2));
        assert!(!close_f(0.0, at(0x0004_0001), 8, 2));
        assert!(close_f(0.0, at(0x8004_0000), 8, 2));
        assert!(!close_f(0.0, at(0x8004_0001), 8, 2));

        assert!(close_f(1.0, at(0x3F84_0000), 8, 2));
        assert!(!close_f(1.0, at(0x3F84_0001), 8, 2));
        assert!(close_f(1.0, at(0x3F7C_0000), 8, 2));
        assert!(!close_f(1.0, at(0x3F7B_FFFF), 8, 2));
    }

    #[test]
    fn mantissa_24_near_one_thousand() {
        let at = f32::from_bits;
        assert!(close_f(1000.0, at(0x447A_0004), 24, 2));
        assert!(!close_f(1000.0, at(0x447A_0005), 24, 2));
        assert!(close_f(1000.0, at(0x4479_FFFC), 24, 2));
        assert!(!close_f(1000.0, at(0x4479_FFFB), 24, 2));
    }

    #[test]
    fn non_finite_values_are_never_close() {
        for value in [f32::INFINITY, f32::NEG_INFINITY, f32::NAN] {
            assert!(!close_f_default(0.0, value));
            assert!(!close_f_default(value, value));
            assert!(!all_close_f(&[value], &[value], 8, 2));
        }
        for value in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            assert!(!close_f64(0.0, value, DEFAULT_DOUBLE_TOLERANCE_BITS));
            assert!(!close_f64(value, value, DEFAULT_DOUBLE_TOLERANCE_BITS));
            assert!(!all_close_f64(&[value], &[value], DEFAULT_DOUBLE_TOLERANCE_BITS));
        }
    }

    #[test]
    fn slices_compare_element_wise() {
        assert!(all_close_f(&[1.0, 2.0], &[1.0, 2.0], 24, 0));
        assert!(!all_close_f(&[1.0, 2.0], &[1.0], 24, 0));
        assert_eq!(first_mismatch(&[1.0, 2.0, 3.0], &[1.0, 2.5, 3.0], 24, 2), Some(1));
        assert_eq!(first_mismatch(&[1.0], &[1.0], 24, 2), None);
    }
}
