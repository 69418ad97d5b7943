//! Random sample inputs and tolerance checks against host results.

use rand::{Rng, rngs::StdRng};
use tilegrid::Element;

/// Comparison tolerances per element type. Integers compare exactly.
pub trait Tolerance: Element {
    const RTOL: f64;
    const ATOL: f64;
}

macro_rules! impl_tolerance {
    ($($t:ty => $tol:expr),+ $(,)?) => {
    $(
        impl Tolerance for $t {
            const RTOL: f64 = $tol;
            const ATOL: f64 = $tol;
        }
    )+
    };
}

impl_tolerance!(
    i32 => 0.0,
    i64 => 0.0,
    u32 => 0.0,
    u64 => 0.0,
    f32 => 1e-4,
    f64 => 1e-9,
);

/// Whether `actual` is within tolerance of `expected`.
pub fn within_tolerance<T: Tolerance>(actual: T, expected: T) -> bool {
    let (a, e) = (actual.into_f64(), expected.into_f64());
    (a - e).abs() <= T::ATOL + T::RTOL * e.abs()
}

/// `len` values drawn uniformly from `[start, end)`, truncated for integers.
pub fn random_input<T: Element>(rng: &mut StdRng, len: usize, start: f64, end: f64) -> Vec<T> {
    (0..len)
        .map(|_| T::from_f64(rng.random_range(start..end)))
        .collect()
}

/// Number of positions where `actual` and `expected` disagree.
pub fn count_mismatches<T: Tolerance>(actual: &[T], expected: &[T]) -> usize {
    actual
        .iter()
        .zip(expected)
        .filter(|&(&a, &e)| !within_tolerance(a, e))
        .count()
        + actual.len().abs_diff(expected.len())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_tolerance_per_type() {
        assert!(within_tolerance(1.0f32, 1.00005));
        assert!(!within_tolerance(1.0f32, 1.01));
        assert!(!within_tolerance(3i64, 4));
        assert!(within_tolerance(u64::MAX, u64::MAX));
    }

    #[test]
    fn test_random_input_in_range() {
        let mut rng = StdRng::seed_from_u64(9);
        let v: Vec<i32> = random_input(&mut rng, 200, -5.0, 5.0);
        assert!(v.iter().all(|x| (-5..5).contains(x)));
    }

    #[test]
    fn test_mismatches_count_length_difference() {
        assert_eq!(count_mismatches(&[1.0f64, 2.0], &[1.0, 2.5]), 1);
        assert_eq!(count_mismatches(&[1i32, 2, 3], &[1, 2]), 1);
    }
}
