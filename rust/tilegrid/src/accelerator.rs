//! The emulated accelerator: device memory plus a grid scheduler.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use tracing::{debug, error, trace, warn};

use crate::{
    buffer::{DeviceBuffer, MemoryTracker, SyncFlags},
    config::AcceleratorConfig,
    element::Element,
    error::{ConfigurationError, GridError, Result},
    exec::{self, TilePlan},
    index::{Extent, Index, TiledExtent},
    kernel::{Kernel, TileKernel},
    signal::{CompletionSignal, LaunchReport, Outcome},
};

pub struct Accelerator {
    config: AcceleratorConfig,
    pool: ThreadPool,
    memory: Arc<MemoryTracker>,
    launches: AtomicU64,
}

impl Accelerator {
    pub fn new(config: AcceleratorConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = ThreadPoolBuilder::new()
            .thread_name(|i| format!("tilegrid-worker-{i}"))
            .panic_handler(|_| error!("tile dispatch worker panicked"));
        if let Some(n) = config.worker_threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| ConfigurationError::WorkerPool(e.to_string()))?;

        debug!(
            wave_width = config.wave_width,
            workers = pool.current_num_threads(),
            device_memory_bytes = config.device_memory_bytes,
            "accelerator ready"
        );
        Ok(Self {
            memory: MemoryTracker::new(config.device_memory_bytes),
            pool,
            launches: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    pub fn wave_width(&self) -> usize {
        self.config.wave_width
    }

    /// Allocates `len` zeroed elements of device memory.
    pub fn alloc<T: Element>(&self, len: usize, flags: SyncFlags) -> Result<DeviceBuffer<T>> {
        DeviceBuffer::allocate(&self.memory, len, flags)
    }

    /// Allocates a buffer holding a copy of `data`.
    pub fn alloc_from<T: Element>(&self, data: &[T], flags: SyncFlags) -> Result<DeviceBuffer<T>> {
        let buffer = self.alloc(data.len(), flags)?;
        buffer.copy_from_host(data)?;
        Ok(buffer)
    }

    /// Device-to-device copy of all of `src` into the front of `dst`.
    pub fn copy<T: Element>(&self, src: &DeviceBuffer<T>, dst: &DeviceBuffer<T>) -> Result<()> {
        dst.copy_from_device(src)
    }

    /// Releases a buffer. Memory held by a running kernel is reclaimed once
    /// that kernel's leases drop.
    pub fn free<T: Element>(&self, buffer: DeviceBuffer<T>) {
        trace!(id = buffer.id(), "freeing device buffer");
        drop(buffer);
    }

    /// Bytes of device memory currently allocated.
    pub fn allocated_bytes(&self) -> usize {
        self.memory.used()
    }

    pub fn live_buffers(&self) -> usize {
        self.memory.live()
    }

    /// Launches `kernel` over every work-item of `tiled`.
    ///
    /// Configuration problems are returned here, before anything runs. Faults
    /// and barrier divergence surface through the returned signal.
    pub fn launch<const D: usize, K>(&self, tiled: TiledExtent<D>, kernel: K) -> Result<CompletionSignal>
    where
        K: TileKernel<D> + 'static,
    {
        let tile_len = tiled.tile_len();
        if tile_len > self.config.max_tile_len {
            return Err(ConfigurationError::TileTooLarge {
                tile_len,
                limit: self.config.max_tile_len,
            }
            .into());
        }
        let wave_width = self.wave_width();
        if kernel.uses_wave_exchange() && tile_len % wave_width != 0 {
            return Err(ConfigurationError::NotWaveMultiple {
                tile_len,
                wave_width,
            }
            .into());
        }
        let static_group_bytes = kernel.static_group_memory(&tiled);
        let requested = static_group_bytes.saturating_add(tiled.dynamic_group_memory());
        if requested > self.config.max_group_memory_bytes {
            return Err(GridError::ResourceExhaustion {
                requested,
                limit: self.config.max_group_memory_bytes,
            });
        }

        let plan = TilePlan {
            tiled,
            static_group_bytes,
            wave_width,
            stack_bytes: self.config.work_item_stack_bytes,
            check_barriers: self.config.check_barriers,
        };
        let slots = (self.config.max_resident_work_items / tile_len)
            .clamp(1, self.pool.current_num_threads())
            .min(tiled.num_tiles());

        let launch = self.launches.fetch_add(1, Ordering::Relaxed);
        debug!(
            launch,
            tiles = tiled.num_tiles(),
            tile_len,
            slots,
            group_bytes = requested,
            "launching tiled kernel"
        );

        let (tx, signal) = CompletionSignal::pending();
        self.pool.spawn(move || {
            let start = Instant::now();
            let outcome = exec::run_grid(&plan, &kernel, slots).map(|barriers| LaunchReport {
                tiles: tiled.num_tiles(),
                work_items: tiled.len(),
                barriers_per_item: barriers,
                elapsed: start.elapsed(),
            });
            // Leases held by the kernel end before the host can observe completion
            drop(kernel);
            finish(launch, tx, outcome);
        });
        Ok(signal)
    }

    /// Launches `kernel` over every point of `extent`, with no tiles.
    pub fn launch_untiled<const D: usize, K>(&self, extent: Extent<D>, kernel: K) -> Result<CompletionSignal>
    where
        K: Kernel<D> + 'static,
    {
        let launch = self.launches.fetch_add(1, Ordering::Relaxed);
        debug!(launch, work_items = extent.len(), "launching untiled kernel");

        let (tx, signal) = CompletionSignal::pending();
        self.pool.spawn(move || {
            let start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                (0..extent.len()).into_par_iter().for_each(|linear| {
                    kernel.run(Index {
                        global: extent.unravel(linear),
                        linear,
                    });
                });
            }));
            let outcome = match result {
                Ok(()) => Ok(LaunchReport {
                    tiles: 0,
                    work_items: extent.len(),
                    barriers_per_item: 0,
                    elapsed: start.elapsed(),
                }),
                Err(payload) => Err(GridError::KernelFault {
                    site: "untiled launch".to_string(),
                    message: exec::panic_message(payload),
                }),
            };
            drop(kernel);
            finish(launch, tx, outcome);
        });
        Ok(signal)
    }
}

fn finish(launch: u64, tx: futures::channel::oneshot::Sender<Outcome>, outcome: Outcome) {
    match &outcome {
        Ok(report) => debug!(launch, elapsed = ?report.elapsed, "launch complete"),
        Err(e) => warn!(launch, error = %e, "launch failed"),
    }
    if tx.send(outcome).is_err() {
        trace!(launch, "completion signal dropped before the launch finished");
    }
}

impl std::fmt::Debug for Accelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accelerator")
            .field("config", &self.config)
            .field("workers", &self.pool.current_num_threads())
            .field("allocated_bytes", &self.memory.used())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;
    use crate::{
        buffer::DeviceView,
        kernel::{WaveKernel, WorkItem},
        sync::Fence,
        test_utils::accelerator,
    };

    /// Reverses each tile through group memory.
    struct ReverseTile {
        out: DeviceView<u64>,
    }

    impl TileKernel<1> for ReverseTile {
        fn static_group_memory(&self, tiled: &TiledExtent<1>) -> usize {
            tiled.tile_len() * size_of::<u64>()
        }

        fn run(&self, item: &mut WorkItem<'_, 1>) {
            let scratch = item.group_alloc::<u64>(item.tile_len());
            let l = item.local_linear();
            scratch.set(l, item.global_linear() as u64);
            item.barrier_with_group_fence();
            self.out.set(item.global_linear(), scratch.get(item.tile_len() - 1 - l));
        }
    }

    /// Records which lanes' tags each lane saw over a full turn of rotations.
    struct RotateTags {
        seen: DeviceView<u64>,
    }

    impl TileKernel<1> for RotateTags {
        fn uses_wave_exchange(&self) -> bool {
            true
        }

        fn run(&self, item: &mut WorkItem<'_, 1>) {
            let mut tag = item.lane_id() as u64;
            let mut mask = 0u64;
            for _ in 0..item.wave_width() {
                mask |= 1 << tag;
                tag = item.rotate(tag, 1);
            }
            self.seen.set(item.global_linear(), mask);
        }
    }

    fn tiled(len: usize, tile: usize) -> TiledExtent<1> {
        Extent::new([len]).unwrap().tile([tile]).unwrap()
    }

    #[test]
    fn test_group_memory_shared_across_tile() {
        let acc = accelerator(64);
        let out = acc.alloc::<u64>(256, SyncFlags::AUTO).unwrap();
        let report = acc
            .launch(tiled(256, 64), ReverseTile { out: out.view() })
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(report.tiles, 4);
        assert_eq!(report.barriers_per_item, 1);

        let got = out.to_vec().unwrap();
        assert_eq!(got[0], 63);
        assert_eq!(got[64], 127);
        assert_eq!(got[255], 192);
    }

    #[test]
    fn test_rotate_completeness() {
        let acc = accelerator(8);
        let seen = acc.alloc::<u64>(32, SyncFlags::AUTO).unwrap();
        acc.launch(tiled(32, 16), RotateTags { seen: seen.view() })
            .unwrap()
            .wait()
            .unwrap();
        assert!(seen.to_vec().unwrap().iter().all(|&m| m == 0xff));
    }

    #[test]
    fn test_barrier_count_reported() {
        let acc = accelerator(4);
        let report = acc
            .launch(tiled(16, 4), |item: &mut WorkItem<'_, 1>| {
                item.barrier();
                item.barrier_with_group_fence();
                item.barrier_with(Fence::All);
            })
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(report.work_items, 16);
        assert_eq!(report.barriers_per_item, 3);
    }

    #[test]
    fn test_divergent_barrier_detected() {
        let acc = accelerator(4);
        let signal = acc
            .launch(tiled(8, 8), |item: &mut WorkItem<'_, 1>| {
                if item.local_linear() != 0 {
                    item.barrier();
                }
            })
            .unwrap();
        match signal.wait() {
            Err(GridError::Divergence { tile: 0, detail }) => {
                assert!(detail.contains("work-item 0 reached 0"), "{detail}");
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn test_permute_outside_wave_faults() {
        let acc = accelerator(4);
        let signal = acc
            .launch(tiled(8, 8), |item: &mut WorkItem<'_, 1>| {
                item.permute(1u32, 9);
            })
            .unwrap();
        match signal.wait() {
            Err(GridError::KernelFault { site, message }) => {
                assert!(site.starts_with("tile 0"), "{site}");
                assert!(message.contains("outside its wave"), "{message}");
            }
            other => panic!("expected kernel fault, got {other:?}"),
        }
        // Repeat waits report the same outcome
        assert!(matches!(signal.wait(), Err(GridError::KernelFault { .. })));
    }

    #[test]
    fn test_exchange_needs_whole_waves() {
        let acc = accelerator(4);
        let err = acc
            .launch(tiled(12, 6), RotateTags {
                seen: acc.alloc::<u64>(12, SyncFlags::AUTO).unwrap().view(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            GridError::Configuration(ConfigurationError::NotWaveMultiple {
                tile_len: 6,
                wave_width: 4
            })
        );
    }

    #[test]
    fn test_wave_closure_needs_whole_waves() {
        let acc = accelerator(4);
        let err = acc
            .launch(
                tiled(12, 6),
                WaveKernel(|item: &mut WorkItem<'_, 1>| {
                    item.rotate(1u32, 1);
                }),
            )
            .unwrap_err();
        assert_eq!(
            err,
            GridError::Configuration(ConfigurationError::NotWaveMultiple {
                tile_len: 6,
                wave_width: 4
            })
        );

        let report = acc
            .launch(
                tiled(16, 8),
                WaveKernel(|item: &mut WorkItem<'_, 1>| {
                    item.rotate(1u32, 1);
                }),
            )
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(report.work_items, 16);
    }

    #[test]
    fn test_tile_too_large() {
        let acc = Accelerator::new(AcceleratorConfig {
            max_tile_len: 64,
            ..AcceleratorConfig::default()
        })
        .unwrap();
        let err = acc
            .launch(tiled(256, 128), |_: &mut WorkItem<'_, 1>| {})
            .unwrap_err();
        assert_eq!(
            err,
            GridError::Configuration(ConfigurationError::TileTooLarge {
                tile_len: 128,
                limit: 64
            })
        );
    }

    #[test]
    fn test_untiled_fault() {
        let acc = accelerator(64);
        let signal = acc
            .launch_untiled(Extent::new([16]).unwrap(), |idx: Index<1>| {
                assert!(idx.linear != 5, "bad element {}", idx.linear);
            })
            .unwrap();
        assert_eq!(
            signal.wait(),
            Err(GridError::KernelFault {
                site: "untiled launch".into(),
                message: "bad element 5".into()
            })
        );
    }

    #[test]
    fn test_allocation_failure_and_free() {
        let acc = Accelerator::new(AcceleratorConfig {
            device_memory_bytes: 1024,
            ..AcceleratorConfig::default()
        })
        .unwrap();
        let a = acc.alloc::<f64>(100, SyncFlags::AUTO).unwrap();
        assert_eq!(acc.allocated_bytes(), 800);
        assert!(matches!(
            acc.alloc::<f64>(100, SyncFlags::AUTO),
            Err(GridError::Allocation { requested: 800, available: 224 })
        ));

        acc.free(a);
        assert_eq!(acc.allocated_bytes(), 0);
        assert_eq!(acc.live_buffers(), 0);
    }

    #[test]
    fn test_explicit_buffer_leased_during_launch() {
        let acc = accelerator(64);
        let buf = acc.alloc::<i32>(4, SyncFlags::EXPLICIT).unwrap();
        let gate = Arc::new(Barrier::new(2));

        let (view, kernel_gate) = (buf.view(), Arc::clone(&gate));
        let signal = acc
            .launch_untiled(Extent::new([1]).unwrap(), move |_: Index<1>| {
                kernel_gate.wait();
                view.set(0, 7);
                kernel_gate.wait();
            })
            .unwrap();

        gate.wait();
        assert_eq!(
            buf.copy_from_host(&[1]),
            Err(GridError::BufferInUse { id: buf.id() })
        );
        gate.wait();

        signal.wait().unwrap();
        assert!(!buf.is_leased());
        assert_eq!(buf.to_vec().unwrap(), vec![7, 0, 0, 0]);
    }

    #[test]
    fn test_auto_buffer_read_waits_for_launch() {
        let acc = accelerator(64);
        let buf = acc.alloc::<i32>(1, SyncFlags::AUTO).unwrap();
        let gate = Arc::new(Barrier::new(2));

        let (view, kernel_gate) = (buf.view(), Arc::clone(&gate));
        let signal = acc
            .launch_untiled(Extent::new([1]).unwrap(), move |_: Index<1>| {
                kernel_gate.wait();
                std::thread::sleep(std::time::Duration::from_millis(20));
                view.set(0, 11);
            })
            .unwrap();

        gate.wait();
        // Blocks until the kernel releases its lease
        assert_eq!(buf.to_vec().unwrap(), vec![11]);
        signal.wait().unwrap();
    }

    #[test]
    fn test_device_to_device_copy() {
        let acc = accelerator(64);
        let src = acc.alloc_from(&[1.5f64, 2.5, 3.5], SyncFlags::AUTO).unwrap();
        let dst = acc.alloc::<f64>(4, SyncFlags::AUTO).unwrap();
        acc.copy(&src, &dst).unwrap();
        assert_eq!(dst.to_vec().unwrap(), vec![1.5, 2.5, 3.5, 0.0]);
        assert!(matches!(
            acc.copy(&dst, &src),
            Err(GridError::CopyOutOfBounds { len: 4, capacity: 3 })
        ));
    }

    #[test]
    fn test_invalid_wave_width_rejected() {
        let err = Accelerator::new(AcceleratorConfig {
            wave_width: 3,
            ..AcceleratorConfig::default()
        })
        .unwrap_err();
        assert_eq!(
            err,
            GridError::Configuration(ConfigurationError::InvalidWaveWidth(3))
        );
    }
}
