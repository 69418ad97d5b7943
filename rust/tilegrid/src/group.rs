//! Group scratch memory.
//!
//! Each tile execution owns one arena with two segments: the static segment,
//! sized by the kernel's declared byte count, and the dynamic segment, sized
//! by the launch. Slots are 64 bits wide but are accounted at the element's
//! byte size, so the segments hold `bytes / size_of::<T>()` elements of any
//! element type.

use std::{
    marker::PhantomData,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::element::{Element, zeroed_slots};

/// Smallest element size, which bounds how many slots a byte budget needs.
const MIN_ELEMENT_BYTES: usize = 4;

#[derive(Debug)]
pub(crate) struct GroupArena {
    static_bytes: usize,
    static_slots: Box<[AtomicU64]>,
    dynamic_slots: Box<[AtomicU64]>,
    dynamic_bytes: usize,
}

impl GroupArena {
    pub(crate) fn new(static_bytes: usize, dynamic_bytes: usize) -> Self {
        Self {
            static_bytes,
            static_slots: zeroed_slots(static_bytes.div_ceil(MIN_ELEMENT_BYTES)),
            dynamic_slots: zeroed_slots(dynamic_bytes.div_ceil(MIN_ELEMENT_BYTES)),
            dynamic_bytes,
        }
    }

    /// Carves `count` elements from the static segment at `cursor`, advancing it.
    ///
    /// # Panics
    /// If the allocation does not fit in the declared static group memory.
    pub(crate) fn allocate<T: Element>(
        &self,
        cursor: &mut GroupCursor,
        count: usize,
    ) -> GroupSlice<'_, T> {
        let bytes = count * size_of::<T>();
        assert!(
            cursor.bytes + bytes <= self.static_bytes,
            "group allocation of {bytes} bytes overflows the {} bytes declared by the kernel ({} in use)",
            self.static_bytes,
            cursor.bytes,
        );
        let slots = &self.static_slots[cursor.slots..cursor.slots + count];
        cursor.bytes += bytes;
        cursor.slots += count;
        GroupSlice::new(slots)
    }

    /// The dynamic segment viewed as elements of `T`.
    pub(crate) fn dynamic<T: Element>(&self) -> GroupSlice<'_, T> {
        let count = self.dynamic_bytes / size_of::<T>();
        GroupSlice::new(&self.dynamic_slots[..count])
    }
}

/// Per work-item bump position in the static segment.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct GroupCursor {
    bytes: usize,
    slots: usize,
}

/// A region of group scratch memory shared by every work-item of a tile.
///
/// Contents are unspecified until written. Writes become visible to the rest
/// of the tile after the next barrier.
#[derive(Debug, Clone, Copy)]
pub struct GroupSlice<'t, T> {
    slots: &'t [AtomicU64],
    _marker: PhantomData<T>,
}

impl<'t, T: Element> GroupSlice<'t, T> {
    fn new(slots: &'t [AtomicU64]) -> Self {
        Self {
            slots,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, i: usize) -> T {
        T::from_bits(self.slots[i].load(Ordering::Relaxed))
    }

    pub fn set(&self, i: usize, value: T) {
        self.slots[i].store(value.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_sequence_yields_same_region() {
        let arena = GroupArena::new(64, 0);
        let (mut a, mut b) = (GroupCursor::default(), GroupCursor::default());

        let first_a = arena.allocate::<f32>(&mut a, 4);
        let second_a = arena.allocate::<i64>(&mut a, 2);
        let first_b = arena.allocate::<f32>(&mut b, 4);
        let second_b = arena.allocate::<i64>(&mut b, 2);

        first_a.set(3, 1.25);
        second_a.set(1, -9);
        assert_eq!(first_b.get(3), 1.25);
        assert_eq!(second_b.get(1), -9);
        assert_eq!(first_b.len(), 4);
    }

    #[test]
    #[should_panic(expected = "overflows the 16 bytes")]
    fn test_static_overflow_panics() {
        let arena = GroupArena::new(16, 0);
        let mut cursor = GroupCursor::default();
        arena.allocate::<f64>(&mut cursor, 3);
    }

    #[test]
    fn test_dynamic_segment_sized_by_element() {
        let arena = GroupArena::new(0, 256);
        assert_eq!(arena.dynamic::<f32>().len(), 64);
        assert_eq!(arena.dynamic::<f64>().len(), 32);
    }
}
