//! Scalar types that can move through device memory, group memory and waves.
//!
//! Every slot in the emulated memories is an `AtomicU64`, so an element only
//! needs a lossless 64-bit encoding to be storable, exchangeable and
//! atomically updatable.

use std::{
    fmt::{Debug, Display},
    sync::atomic::{AtomicU64, Ordering},
};

pub trait Element: Copy + Send + Sync + PartialOrd + Debug + Display + 'static {
    const ZERO: Self;
    const ONE: Self;
    /// Identity for `max` (negative infinity for floats).
    const LOWEST: Self;
    /// Identity for `min` (positive infinity for floats).
    const HIGHEST: Self;
    /// Results of integer arithmetic are order independent, float results are not.
    const EXACT: bool;

    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;

    /// Wraps on overflow for integers, IEEE addition for floats.
    fn wrapping_add(self, rhs: Self) -> Self;
    /// Wraps on overflow for integers, IEEE multiplication for floats.
    fn wrapping_mul(self, rhs: Self) -> Self;

    fn from_f64(v: f64) -> Self;
    fn into_f64(self) -> f64;
}

macro_rules! impl_int_element {
    ($($t:ty => $bits:ty),+ $(,)?) => {
    $(
        impl Element for $t {
            const ZERO: Self = 0;
            const ONE: Self = 1;
            const LOWEST: Self = <$t>::MIN;
            const HIGHEST: Self = <$t>::MAX;
            const EXACT: bool = true;

            fn to_bits(self) -> u64 {
                self as $bits as u64
            }

            fn from_bits(bits: u64) -> Self {
                bits as $bits as $t
            }

            fn wrapping_add(self, rhs: Self) -> Self {
                <$t>::wrapping_add(self, rhs)
            }

            fn wrapping_mul(self, rhs: Self) -> Self {
                <$t>::wrapping_mul(self, rhs)
            }

            fn from_f64(v: f64) -> Self {
                v as $t
            }

            fn into_f64(self) -> f64 {
                self as f64
            }
        }
    )+
    };
}

macro_rules! impl_float_element {
    ($($t:ty => $bits:ty),+ $(,)?) => {
    $(
        impl Element for $t {
            const ZERO: Self = 0.0;
            const ONE: Self = 1.0;
            const LOWEST: Self = <$t>::NEG_INFINITY;
            const HIGHEST: Self = <$t>::INFINITY;
            const EXACT: bool = false;

            fn to_bits(self) -> u64 {
                <$t>::to_bits(self) as u64
            }

            fn from_bits(bits: u64) -> Self {
                <$t>::from_bits(bits as $bits)
            }

            fn wrapping_add(self, rhs: Self) -> Self {
                self + rhs
            }

            fn wrapping_mul(self, rhs: Self) -> Self {
                self * rhs
            }

            fn from_f64(v: f64) -> Self {
                v as $t
            }

            fn into_f64(self) -> f64 {
                self as f64
            }
        }
    )+
    };
}

impl_int_element!(i32 => u32, i64 => u64, u32 => u32, u64 => u64);
impl_float_element!(f32 => u32, f64 => u64);

/// Allocates `len` zeroed slots.
pub(crate) fn zeroed_slots(len: usize) -> Box<[AtomicU64]> {
    (0..len).map(|_| AtomicU64::new(0)).collect()
}

/// Atomically replaces the element in `slot` with `f(old)`, returning `old`.
pub(crate) fn atomic_update<T: Element>(slot: &AtomicU64, f: impl Fn(T) -> T) -> T {
    let previous = slot
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            Some(f(T::from_bits(bits)).to_bits())
        })
        .unwrap_or_else(|bits| bits);
    T::from_bits(previous)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_roundtrip_preserves_sign() {
        assert_eq!(i32::from_bits((-7i32).to_bits()), -7);
        assert_eq!(i64::from_bits(i64::MIN.to_bits()), i64::MIN);
        assert_eq!(<f32 as Element>::from_bits(Element::to_bits(-1.5f32)), -1.5);
        assert!(<f64 as Element>::from_bits(Element::to_bits(f64::NAN)).is_nan());
    }

    #[test]
    fn test_integer_addition_wraps() {
        assert_eq!(Element::wrapping_add(i32::MAX, 1), i32::MIN);
        assert_eq!(Element::wrapping_add(u32::MAX, 2), 1);
    }

    #[test]
    fn test_atomic_update_returns_previous() {
        let slot = AtomicU64::new(Element::to_bits(2.0f64));
        let previous = atomic_update(&slot, |v: f64| v * 3.0);
        assert_eq!(previous, 2.0);
        assert_eq!(<f64 as Element>::from_bits(slot.into_inner()), 6.0);
    }
}
