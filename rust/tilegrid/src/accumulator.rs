//! The global accumulator: one device scalar folded into by every tile.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    accelerator::Accelerator,
    buffer::{DeviceBuffer, DeviceView, SyncFlags},
    element::Element,
    error::Result,
};

#[derive(Debug)]
pub struct Accumulator<T> {
    cell: DeviceBuffer<T>,
    publishes: Arc<AtomicUsize>,
}

impl<T: Element> Accumulator<T> {
    pub fn new(accelerator: &Accelerator, initial: T) -> Result<Self> {
        let cell = accelerator.alloc_from(&[initial], SyncFlags::AUTO)?;
        Ok(Self {
            cell,
            publishes: Arc::default(),
        })
    }

    /// A kernel-side handle. Holds a lease on the cell until dropped.
    pub fn handle(&self) -> AccumulatorHandle<T> {
        AccumulatorHandle {
            cell: self.cell.view(),
            publishes: Arc::clone(&self.publishes),
        }
    }

    /// Current value. Waits for running kernels that hold a handle.
    pub fn value(&self) -> Result<T> {
        let mut out = [T::ZERO];
        self.cell.copy_to_host(&mut out)?;
        Ok(out[0])
    }

    /// Number of publishes since creation or the last reset.
    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::Acquire)
    }

    pub fn reset(&self, value: T) -> Result<()> {
        self.cell.copy_from_host(&[value])?;
        self.publishes.store(0, Ordering::Release);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AccumulatorHandle<T> {
    cell: DeviceView<T>,
    publishes: Arc<AtomicUsize>,
}

impl<T: Element> AccumulatorHandle<T> {
    /// Atomically folds `value` into the cell with `combine`.
    pub fn publish(&self, value: T, combine: impl Fn(T, T) -> T) {
        self.cell.fetch_update(0, |old| combine(old, value));
        self.publishes.fetch_add(1, Ordering::AcqRel);
    }
}
