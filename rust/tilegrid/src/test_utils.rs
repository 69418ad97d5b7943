use std::hash::{DefaultHasher, Hasher};

use rand::{Rng, rngs::StdRng};

use crate::{accelerator::Accelerator, config::AcceleratorConfig, element::Element};

/// Accelerator with barrier checking on and the given wave width.
pub fn accelerator(wave_width: usize) -> Accelerator {
    Accelerator::new(AcceleratorConfig {
        wave_width,
        check_barriers: true,
        ..AcceleratorConfig::default()
    })
    .unwrap()
}

pub fn string_to_seed(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(s.as_bytes());
    hasher.finish()
}

pub fn random_vec<T: Element>(rng: &mut StdRng, len: usize, start: f64, end: f64) -> Vec<T> {
    (0..len)
        .map(|_| T::from_f64(rng.random_range(start..end)))
        .collect()
}

/// Assert two values are approximately equal.
pub fn approx_eq<T: TestElement>(actual: T, expected: T) -> bool {
    let (a, e) = (actual.into_f64(), expected.into_f64());
    let diff = (a - e).abs();
    let tol = T::atol() + T::rtol() * e.abs();
    diff <= tol
}

/// Assert slices are approximately equal.
pub fn slices_eq<T: TestElement>(actual: &[T], expected: &[T], ctx: &str) {
    assert_eq!(actual.len(), expected.len(), "{ctx}: length mismatch");

    let mut passed = true;
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        if !approx_eq(a, e) {
            passed = false;
            println!("{ctx}[{i}] mismatch: expected {e}, got {a}");
        }
    }

    if !passed {
        panic!("{} mismatch", ctx);
    }
}

/// Comparison tolerances per element type. Integers compare exactly.
pub trait TestElement: Element {
    fn rtol() -> f64;
    fn atol() -> f64;
}

macro_rules! impl_test_element {
    ($($t:ty => $tol:expr),+ $(,)?) => {
    $(
        impl TestElement for $t {
            fn rtol() -> f64 {
                $tol
            }
            fn atol() -> f64 {
                $tol
            }
        }
    )+
    };
}

impl_test_element!(
    i32 => 0.0,
    i64 => 0.0,
    u32 => 0.0,
    u64 => 0.0,
    f32 => 1e-4,
    f64 => 1e-9,
);
