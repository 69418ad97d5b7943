//! Tile barriers.
//!
//! A barrier is a reusable rendezvous among the live work-items of a tile.
//! Work-items that finish (or fault) retire from it, so siblings still
//! waiting on a barrier the retired item will never reach are released
//! instead of deadlocking. Reaching a different number of barriers is
//! undefined behaviour of the execution model; [`TileBarrier`] records enough
//! to report it when checking is enabled.

use std::sync::{
    Condvar, Mutex, MutexGuard, PoisonError,
    atomic::{self, AtomicUsize, Ordering},
};

/// Which memory a barrier orders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Fence {
    /// Orders group memory only.
    Group,
    /// Orders group memory and device memory.
    All,
}

#[derive(Debug)]
struct RendezvousState {
    live: usize,
    arrived: usize,
    generation: u64,
    fence: Option<Fence>,
    fence_mismatch: bool,
}

/// Generation-counting barrier whose participant count shrinks as members retire.
#[derive(Debug)]
pub(crate) struct Rendezvous {
    state: Mutex<RendezvousState>,
    released: Condvar,
}

impl Rendezvous {
    pub(crate) fn new(participants: usize) -> Self {
        Self {
            state: Mutex::new(RendezvousState {
                live: participants,
                arrived: 0,
                generation: 0,
                fence: None,
                fence_mismatch: false,
            }),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RendezvousState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until every live participant has arrived at this generation.
    pub(crate) fn wait(&self, fence: Fence) {
        if fence == Fence::All {
            atomic::fence(Ordering::SeqCst);
        }

        let mut state = self.lock();
        match state.fence {
            None => state.fence = Some(fence),
            Some(current) if current != fence => state.fence_mismatch = true,
            Some(_) => {}
        }
        state.arrived += 1;
        if state.arrived >= state.live {
            self.release(&mut state);
            return;
        }

        let generation = state.generation;
        while state.generation == generation {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Removes one participant for good.
    pub(crate) fn retire(&self) {
        let mut state = self.lock();
        state.live = state.live.saturating_sub(1);
        if state.arrived > 0 && state.arrived >= state.live {
            self.release(&mut state);
        }
    }

    pub(crate) fn fence_mismatch(&self) -> bool {
        self.lock().fence_mismatch
    }

    fn release(&self, state: &mut RendezvousState) {
        state.arrived = 0;
        state.fence = None;
        state.generation += 1;
        self.released.notify_all();
    }
}

/// The barrier shared by all work-items of one tile.
#[derive(Debug)]
pub(crate) struct TileBarrier {
    rendezvous: Rendezvous,
    /// Per work-item arrival counts, empty when checking is disabled.
    arrivals: Box<[AtomicUsize]>,
}

impl TileBarrier {
    pub(crate) fn new(tile_len: usize, check: bool) -> Self {
        let counters = if check { tile_len } else { 0 };
        Self {
            rendezvous: Rendezvous::new(tile_len),
            arrivals: (0..counters).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    pub(crate) fn wait(&self, local: usize, fence: Fence) {
        if let Some(count) = self.arrivals.get(local) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        self.rendezvous.wait(fence);
    }

    pub(crate) fn retire(&self) {
        self.rendezvous.retire();
    }

    /// Most barriers reached by any work-item (0 when checking is disabled).
    pub(crate) fn max_arrivals(&self) -> usize {
        self.arrivals
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .max()
            .unwrap_or(0)
    }

    /// Describes the first divergence found, if any. Always `None` when
    /// checking is disabled.
    pub(crate) fn divergence(&self) -> Option<String> {
        let first = self.arrivals.first()?.load(Ordering::Relaxed);
        for (local, count) in self.arrivals.iter().enumerate().skip(1) {
            let count = count.load(Ordering::Relaxed);
            if count != first {
                return Some(format!(
                    "work-item 0 reached {first} barriers but work-item {local} reached {count}"
                ));
            }
        }
        if self.rendezvous.fence_mismatch() {
            return Some("work-items waited on the same barrier with different fences".into());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;

    #[test]
    fn test_writes_visible_after_barrier() {
        const N: usize = 8;
        let barrier = TileBarrier::new(N, true);
        let slots: Vec<AtomicU64> = (0..N).map(|_| AtomicU64::new(0)).collect();

        std::thread::scope(|s| {
            for local in 0..N {
                let (barrier, slots) = (&barrier, &slots);
                s.spawn(move || {
                    slots[local].store(local as u64 + 1, Ordering::Relaxed);
                    barrier.wait(local, Fence::Group);
                    let total: u64 = slots.iter().map(|v| v.load(Ordering::Relaxed)).sum();
                    assert_eq!(total, (1..=N as u64).sum());
                    barrier.retire();
                });
            }
        });

        assert_eq!(barrier.max_arrivals(), 1);
        assert!(barrier.divergence().is_none());
    }

    #[test]
    fn test_retired_items_do_not_deadlock() {
        let barrier = TileBarrier::new(4, true);

        std::thread::scope(|s| {
            for local in 0..4 {
                let barrier = &barrier;
                s.spawn(move || {
                    // Odd work-items skip the second barrier
                    barrier.wait(local, Fence::Group);
                    if local % 2 == 0 {
                        barrier.wait(local, Fence::Group);
                    }
                    barrier.retire();
                });
            }
        });

        assert_eq!(barrier.max_arrivals(), 2);
        let detail = barrier.divergence().unwrap();
        assert!(detail.contains("work-item 1 reached 1"), "{detail}");
    }

    #[test]
    fn test_fence_mismatch_reported() {
        let barrier = TileBarrier::new(2, true);

        std::thread::scope(|s| {
            for local in 0..2 {
                let barrier = &barrier;
                s.spawn(move || {
                    let fence = if local == 0 { Fence::Group } else { Fence::All };
                    barrier.wait(local, fence);
                    barrier.retire();
                });
            }
        });

        assert!(barrier.divergence().unwrap().contains("different fences"));
    }

    #[test]
    fn test_unchecked_barrier_reports_nothing() {
        let barrier = TileBarrier::new(1, false);
        barrier.wait(0, Fence::All);
        assert_eq!(barrier.max_arrivals(), 0);
        assert!(barrier.divergence().is_none());
    }
}
