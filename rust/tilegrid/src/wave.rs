//! Cross-lane exchange within a wave.
//!
//! A wave is `W` consecutive work-items of a tile (by local linear id). An
//! exchange is a collective: every live lane of the wave contributes a value
//! and receives the value of the lane its [`LaneMap`] names. No group memory
//! and no tile barrier are involved.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    element::{Element, zeroed_slots},
    sync::{Fence, Rendezvous},
};

/// Chooses which lane each lane reads from.
pub trait LaneMap {
    /// The lane that `lane` reads from in a wave of `width` lanes.
    fn source_lane(&self, lane: usize, width: usize) -> usize;
}

/// Lane `x` reads lane `(x + k) mod W`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotate(pub usize);

impl LaneMap for Rotate {
    fn source_lane(&self, lane: usize, width: usize) -> usize {
        (lane + self.0) % width
    }
}

/// Lane `x` reads lane `f(x)`.
#[derive(Debug, Clone, Copy)]
pub struct Permute<F>(pub F);

impl<F: Fn(usize) -> usize> LaneMap for Permute<F> {
    fn source_lane(&self, lane: usize, _width: usize) -> usize {
        (self.0)(lane)
    }
}

/// Every lane names its own source lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FromLane(pub usize);

impl LaneMap for FromLane {
    fn source_lane(&self, _lane: usize, _width: usize) -> usize {
        self.0
    }
}

/// Exchange state of one wave within a tile execution.
#[derive(Debug)]
pub(crate) struct Wave {
    slots: Box<[AtomicU64]>,
    rendezvous: Rendezvous,
}

impl Wave {
    pub(crate) fn new(width: usize) -> Self {
        Self {
            slots: zeroed_slots(width),
            rendezvous: Rendezvous::new(width),
        }
    }

    /// Publishes `value` for `lane` and returns the value held by `map`'s source lane.
    ///
    /// # Panics
    /// If the source lane lies outside the wave.
    pub(crate) fn exchange<T: Element>(&self, lane: usize, value: T, map: &impl LaneMap) -> T {
        let width = self.slots.len();
        let source = map.source_lane(lane, width);
        assert!(
            source < width,
            "lane {lane} reads lane {source} outside its wave of {width}"
        );

        self.slots[lane].store(value.to_bits(), Ordering::Relaxed);
        self.rendezvous.wait(Fence::Group);
        let bits = self.slots[source].load(Ordering::Relaxed);
        // Nobody overwrites a slot until every lane has read
        self.rendezvous.wait(Fence::Group);
        T::from_bits(bits)
    }

    pub(crate) fn retire(&self) {
        self.rendezvous.retire();
    }
}
