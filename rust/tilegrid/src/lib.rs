//! Tilegrid - a tiled data-parallel compute grid on the CPU.
//!
//! Kernels are written once per work-item and launched over an N-dimensional
//! grid partitioned into tiles. Work-items of a tile can share group memory,
//! synchronize on barriers, and exchange values within a wave without either.
//!
//! # Core Abstractions
//!
//! ## Grid (`index` module)
//! - [`Extent`] / [`TiledExtent`] - Launch shape and its partition into tiles
//! - [`TiledIndex`] - Global, local and tile coordinates of one work-item
//!
//! ## Kernels (`kernel` module)
//! - [`TileKernel`] - Body of a tiled launch, run against a [`WorkItem`]
//! - [`WaveKernel`] - Closure body that exchanges values within waves
//! - [`Kernel`] - Body of an untiled launch
//! - [`WorkItem`] - Barriers, group memory and wave exchanges (`rotate`, `permute`)
//!
//! ## Device (`accelerator`, `buffer`, `signal` modules)
//! - [`Accelerator`] - Device memory and the grid scheduler
//! - [`DeviceBuffer`] / [`DeviceView`] - Host handle and kernel lease of device memory
//! - [`CompletionSignal`] - Future-like handle to a running launch
//!
//! ## Kernels shipped with the crate
//! - `reduce` - Tiled reduction into an [`Accumulator`], four tile strategies
//! - `matmul` - Rotate-based tiled matrix multiply, plus the untiled version
//! - `elementwise` - `saxpy` and the tile id probe
//!
//! # Execution Model
//!
//! ```text
//! launch ──► tiles (worker pool, any order)
//!              └─► work-items (one thread each, lockstep only at barriers)
//!                    ├─ group memory   shared by the tile, lives as long as the tile
//!                    ├─ barrier()      collective over the tile
//!                    └─ rotate/permute collective over the wave, no barrier
//! ```
//!
//! Every work-item of a tile must reach the same barriers in the same order.
//! With `check_barriers` enabled, a tile that doesn't fails its launch with
//! [`GridError::Divergence`].
//!
//! # Example
//!
//! ```no_run
//! use tilegrid::prelude::*;
//!
//! let acc = Accelerator::new(AcceleratorConfig::default())?;
//! let input = acc.alloc_from(&vec![1.0f32; 1 << 12], SyncFlags::AUTO)?;
//! let total = Accumulator::new(&acc, 0.0f32)?;
//!
//! reduce::<f32, SumOp>(&acc, &input, &total, 256, ReduceStrategy::GroupMemory)?.wait()?;
//! assert_eq!(total.value()?, 4096.0);
//! # Ok::<(), tilegrid::GridError>(())
//! ```

#![allow(
    clippy::len_without_is_empty,
    reason = "Extents and tiles are never empty, so this method would be confusing"
)]
#![allow(clippy::needless_range_loop)]

pub mod accelerator;
pub mod accumulator;
pub mod buffer;
pub mod config;
pub mod element;
pub mod elementwise;
pub mod error;
mod exec;
pub mod group;
pub mod index;
pub mod kernel;
pub mod matmul;
pub mod reduce;
pub mod signal;
pub mod sync;
pub mod wave;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Wave width of the default accelerator configuration.
pub const DEFAULT_WAVE_WIDTH: usize = 64;

pub use accelerator::Accelerator;
pub use accumulator::{Accumulator, AccumulatorHandle};
pub use buffer::{DeviceBuffer, DeviceView, SyncFlags};
pub use config::{AcceleratorConfig, LoadError};
pub use element::Element;
pub use error::{ConfigurationError, GridError, Result};
pub use index::{Extent, Index, TiledExtent, TiledIndex};
pub use kernel::{Kernel, TileKernel, WaveKernel, WorkItem};
pub use signal::{CompletionSignal, LaunchReport};

pub mod prelude {
    pub use crate::{
        Accelerator, AcceleratorConfig, Accumulator, CompletionSignal, DeviceBuffer, DeviceView,
        Element, Extent, GridError, Index, Kernel, SyncFlags, TileKernel, TiledExtent, WaveKernel,
        WorkItem,
        elementwise::{probe_tile_ids, saxpy},
        matmul::{MatrixDims, matmul_naive, matmul_rotate},
        reduce::{MaxOp, MinOp, ReduceStrategy, ReductionOp, SumOp, reduce, reduce_all},
        sync::Fence,
        wave::{FromLane, LaneMap, Permute, Rotate},
    };
}
