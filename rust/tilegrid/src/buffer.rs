//! Device memory.
//!
//! A [`DeviceBuffer`] is the host's handle to accelerator-resident memory.
//! Kernels never see the buffer itself: they capture [`DeviceView`]s, each of
//! which holds a lease on the buffer until dropped. While any lease is live
//! the accelerator owns the bytes, and host copies either wait for the leases
//! to drain (auto-sync) or fail (explicit sync).

use std::{
    fmt,
    marker::PhantomData,
    ops::BitOr,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use tracing::trace;

use crate::{
    element::{Element, atomic_update},
    error::{GridError, Result},
};

/// Who moves data between host and device.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncFlags(u8);

impl SyncFlags {
    /// Caller-managed: host copies fail while a kernel holds the buffer.
    pub const EXPLICIT: Self = Self(0);
    /// Host-to-device copies wait for running kernels.
    pub const AUTO_SYNC_IN: Self = Self(1);
    /// Device-to-host copies wait for running kernels.
    pub const AUTO_SYNC_OUT: Self = Self(1 << 1);
    pub const AUTO: Self = Self(Self::AUTO_SYNC_IN.0 | Self::AUTO_SYNC_OUT.0);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SyncFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for SyncFlags {
    fn default() -> Self {
        Self::AUTO
    }
}

impl fmt::Debug for SyncFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::EXPLICIT => write!(f, "EXPLICIT"),
            Self::AUTO_SYNC_IN => write!(f, "AUTO_SYNC_IN"),
            Self::AUTO_SYNC_OUT => write!(f, "AUTO_SYNC_OUT"),
            _ => write!(f, "AUTO"),
        }
    }
}

/// Tracks device memory against a fixed budget.
#[derive(Debug)]
pub(crate) struct MemoryTracker {
    limit: usize,
    used: AtomicUsize,
    live: AtomicUsize,
    next_id: AtomicU64,
}

impl MemoryTracker {
    pub(crate) fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            used: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    fn reserve(self: &Arc<Self>, bytes: usize) -> Result<Reservation> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.limit)
            })
            .map_err(|used| GridError::Allocation {
                requested: bytes,
                available: self.limit.saturating_sub(used),
            })?;
        self.live.fetch_add(1, Ordering::Relaxed);
        Ok(Reservation {
            tracker: Arc::clone(self),
            bytes,
        })
    }

    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Reservation {
    tracker: Arc<MemoryTracker>,
    bytes: usize,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.tracker.used.fetch_sub(self.bytes, Ordering::AcqRel);
        self.tracker.live.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct Storage {
    id: u64,
    slots: Box<[AtomicU64]>,
    leases: Mutex<usize>,
    drained: Condvar,
    _reservation: Reservation,
}

impl Storage {
    fn leases(&self) -> MutexGuard<'_, usize> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the lease lock once no kernel holds the buffer. Blocks when
    /// `wait` is set, fails with `BufferInUse` otherwise.
    fn claim(&self, wait: bool) -> Result<MutexGuard<'_, usize>> {
        let mut leases = self.leases();
        if *leases > 0 && !wait {
            return Err(GridError::BufferInUse { id: self.id });
        }
        while *leases > 0 {
            leases = self
                .drained
                .wait(leases)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(leases)
    }
}

/// Host handle to a device allocation of `T` elements.
pub struct DeviceBuffer<T> {
    storage: Arc<Storage>,
    flags: SyncFlags,
    _marker: PhantomData<T>,
}

impl<T: Element> DeviceBuffer<T> {
    pub(crate) fn allocate(
        tracker: &Arc<MemoryTracker>,
        len: usize,
        flags: SyncFlags,
    ) -> Result<Self> {
        let bytes = len.checked_mul(size_of::<T>()).ok_or(GridError::Allocation {
            requested: usize::MAX,
            available: tracker.limit.saturating_sub(tracker.used()),
        })?;
        let reservation = tracker.reserve(bytes)?;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(len)
            .map_err(|_| GridError::Allocation {
                requested: bytes,
                available: tracker.limit.saturating_sub(tracker.used()),
            })?;
        slots.extend((0..len).map(|_| AtomicU64::new(T::ZERO.to_bits())));

        let id = tracker.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(id, len, bytes, ?flags, "allocated device buffer");
        Ok(Self {
            storage: Arc::new(Storage {
                id,
                slots: slots.into_boxed_slice(),
                leases: Mutex::new(0),
                drained: Condvar::new(),
                _reservation: reservation,
            }),
            flags,
            _marker: PhantomData,
        })
    }

    pub fn id(&self) -> u64 {
        self.storage.id
    }

    pub fn len(&self) -> usize {
        self.storage.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sync_flags(&self) -> SyncFlags {
        self.flags
    }

    /// Whether a kernel currently holds this buffer.
    pub fn is_leased(&self) -> bool {
        *self.storage.leases() > 0
    }

    /// Leases the buffer to a kernel. The lease ends when the view (and all
    /// its clones) are dropped.
    pub fn view(&self) -> DeviceView<T> {
        *self.storage.leases() += 1;
        DeviceView {
            storage: Arc::clone(&self.storage),
            _marker: PhantomData,
        }
    }

    /// Copies `src` into the front of the buffer.
    pub fn copy_from_host(&self, src: &[T]) -> Result<()> {
        self.check_len(src.len())?;
        let _claim = self
            .storage
            .claim(self.flags.contains(SyncFlags::AUTO_SYNC_IN))?;
        for (slot, &v) in self.storage.slots.iter().zip(src) {
            slot.store(v.to_bits(), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copies the front of the buffer into `dst`.
    pub fn copy_to_host(&self, dst: &mut [T]) -> Result<()> {
        self.check_len(dst.len())?;
        let _claim = self
            .storage
            .claim(self.flags.contains(SyncFlags::AUTO_SYNC_OUT))?;
        for (v, slot) in dst.iter_mut().zip(self.storage.slots.iter()) {
            *v = T::from_bits(slot.load(Ordering::Relaxed));
        }
        Ok(())
    }

    /// Reads back the whole buffer.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut out = vec![T::ZERO; self.len()];
        self.copy_to_host(&mut out)?;
        Ok(out)
    }

    /// Copies the whole of `src` into the front of this buffer.
    pub fn copy_from_device(&self, src: &DeviceBuffer<T>) -> Result<()> {
        self.check_len(src.len())?;
        if Arc::ptr_eq(&self.storage, &src.storage) {
            return Ok(());
        }
        let src_wait = src.flags.contains(SyncFlags::AUTO_SYNC_OUT);
        let dst_wait = self.flags.contains(SyncFlags::AUTO_SYNC_IN);
        // Claim in id order so opposing copies cannot deadlock
        let _claims = if src.id() < self.id() {
            (src.storage.claim(src_wait)?, self.storage.claim(dst_wait)?)
        } else {
            let dst = self.storage.claim(dst_wait)?;
            (src.storage.claim(src_wait)?, dst)
        };
        for (d, s) in self.storage.slots.iter().zip(src.storage.slots.iter()) {
            d.store(s.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.len() {
            return Err(GridError::CopyOutOfBounds {
                len,
                capacity: self.len(),
            });
        }
        Ok(())
    }
}

impl<T> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.storage.id)
            .field("len", &self.storage.slots.len())
            .field("flags", &self.flags)
            .finish()
    }
}

/// A kernel's leased view of a device buffer.
///
/// Element accesses index the buffer directly; an out-of-range index panics,
/// which aborts the launch with a kernel fault.
pub struct DeviceView<T> {
    storage: Arc<Storage>,
    _marker: PhantomData<T>,
}

impl<T: Element> DeviceView<T> {
    pub fn len(&self) -> usize {
        self.storage.slots.len()
    }

    pub fn get(&self, i: usize) -> T {
        T::from_bits(self.storage.slots[i].load(Ordering::Relaxed))
    }

    /// Element `i`, or `fallback` when `i` is past the end.
    pub fn get_or(&self, i: usize, fallback: T) -> T {
        self.storage
            .slots
            .get(i)
            .map_or(fallback, |slot| T::from_bits(slot.load(Ordering::Relaxed)))
    }

    pub fn set(&self, i: usize, value: T) {
        self.storage.slots[i].store(value.to_bits(), Ordering::Relaxed);
    }

    /// Atomically replaces element `i` with `f(old)`, returning `old`.
    pub fn fetch_update(&self, i: usize, f: impl Fn(T) -> T) -> T {
        atomic_update(&self.storage.slots[i], f)
    }

    pub fn fetch_add(&self, i: usize, value: T) -> T {
        self.fetch_update(i, |old| old.wrapping_add(value))
    }
}

impl<T> Clone for DeviceView<T> {
    fn clone(&self) -> Self {
        *self.storage.leases() += 1;
        Self {
            storage: Arc::clone(&self.storage),
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for DeviceView<T> {
    fn drop(&mut self) {
        let mut leases = self.storage.leases();
        *leases -= 1;
        if *leases == 0 {
            self.storage.drained.notify_all();
        }
    }
}

impl<T> fmt::Debug for DeviceView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceView")
            .field("id", &self.storage.id)
            .field("len", &self.storage.slots.len())
            .finish()
    }
}
