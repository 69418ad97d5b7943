//! Tiled reduction.
//!
//! Each work-item folds two input elements, the tile collapses its values to
//! one, and work-item 0 of the tile folds that into the global accumulator.
//!
//! ```text
//! input:   x[0] .. x[n-1] | x[n] .. x[2n-1]       n = work-items
//! load:    v[g] = x[g] (+) x[g + n]
//! tile:    v[0] (+) v[1] (+) .. (+) v[T-1]         tree of log2(T) steps
//! publish: acc = acc (+) tile value                once per tile
//! ```

use std::{fmt, marker::PhantomData, str::FromStr};

use tracing::debug;

use crate::{
    accelerator::Accelerator,
    accumulator::{Accumulator, AccumulatorHandle},
    buffer::{DeviceBuffer, DeviceView},
    element::Element,
    error::{ConfigurationError, Result},
    group::GroupSlice,
    index::{Extent, TiledExtent},
    kernel::{TileKernel, WorkItem},
    signal::{CompletionSignal, LaunchReport},
};

/// Largest tile [`reduce_all`] picks.
pub const AUTO_TILE: usize = 256;

/// An associative, commutative combine with an identity.
pub trait ReductionOp<T: Element>: Copy + Send + Sync + 'static {
    fn identity() -> T;
    fn combine(a: T, b: T) -> T;
}

macro_rules! impl_reduction_ops {
    {
    $(
        $name:ident<$t:ident> {
            identity => $identity:expr;
            combine($a:ident, $b:ident) => $combine:expr;
        }
    )+
    } => {
    $(
        ::paste::paste! {
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
            pub struct [<$name Op>];

            impl<$t: Element> ReductionOp<$t> for [<$name Op>] {
                fn identity() -> $t {
                    $identity
                }

                fn combine($a: $t, $b: $t) -> $t {
                    $combine
                }
            }
        }
    )+
    };
}

impl_reduction_ops! {
    Sum<T> {
        identity => T::ZERO;
        combine(a, b) => a.wrapping_add(b);
    }
    Max<T> {
        identity => T::LOWEST;
        combine(a, b) => if b > a { b } else { a };
    }
    Min<T> {
        identity => T::HIGHEST;
        combine(a, b) => if b < a { b } else { a };
    }
}

/// How a tile collapses its values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ReduceStrategy {
    /// Tree over static group memory, a barrier after every step.
    #[default]
    GroupMemory,
    /// Same tree over the launch-sized dynamic group memory segment.
    DynamicGroupMemory,
    /// Rotate-and-combine within a single wave. No group memory, no barriers.
    WaveShuffle,
    /// Shuffle within each wave, then combine the wave partials through group memory.
    Hybrid,
}

impl ReduceStrategy {
    pub const ALL: [Self; 4] = [
        Self::GroupMemory,
        Self::DynamicGroupMemory,
        Self::WaveShuffle,
        Self::Hybrid,
    ];

    fn uses_waves(self) -> bool {
        matches!(self, Self::WaveShuffle | Self::Hybrid)
    }
}

impl fmt::Display for ReduceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupMemory => write!(f, "group-memory"),
            Self::DynamicGroupMemory => write!(f, "dynamic-group-memory"),
            Self::WaveShuffle => write!(f, "wave-shuffle"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for ReduceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "group-memory" => Ok(Self::GroupMemory),
            "dynamic-group-memory" => Ok(Self::DynamicGroupMemory),
            "wave-shuffle" => Ok(Self::WaveShuffle),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(format!(
                "unknown reduce strategy '{s}', expected one of: group-memory, dynamic-group-memory, wave-shuffle, hybrid"
            )),
        }
    }
}

/// A validated reduction launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReducePlan {
    /// Input elements.
    pub len: usize,
    /// Work-items that load input. Each loads `x[g]` and `x[g + threads]`.
    pub threads: usize,
    pub strategy: ReduceStrategy,
    pub wave_width: usize,
    /// `None` when there is nothing to reduce.
    pub tiled: Option<TiledExtent<1>>,
}

impl ReducePlan {
    /// Plans a reduction of exactly `len` elements in tiles of `tile`.
    ///
    /// `len` must be even and `tile` a power of two dividing `len / 2`.
    pub fn new<T: Element>(
        len: usize,
        tile: usize,
        strategy: ReduceStrategy,
        wave_width: usize,
    ) -> Result<Self> {
        if len % 2 != 0 {
            return Err(ConfigurationError::OddInput(len).into());
        }
        Self::check_tile(tile, strategy, wave_width)?;

        let threads = len / 2;
        let tiled = if threads == 0 {
            None
        } else {
            Some(Self::tiled::<T>(threads, tile, strategy)?)
        };
        Ok(Self {
            len,
            threads,
            strategy,
            wave_width,
            tiled,
        })
    }

    /// Plans a reduction of any length. The tile is picked automatically and
    /// the grid padded to a whole number of tiles; padding lanes load the identity.
    pub fn padded<T: Element>(
        len: usize,
        strategy: ReduceStrategy,
        wave_width: usize,
        max_tile_len: usize,
    ) -> Result<Self> {
        let threads = len.div_ceil(2);
        let limit = AUTO_TILE.min(prev_power_of_two(max_tile_len));
        let tile = match strategy {
            ReduceStrategy::WaveShuffle => wave_width,
            ReduceStrategy::Hybrid => limit.max(wave_width),
            _ => threads.next_power_of_two().min(limit),
        };
        Self::check_tile(tile, strategy, wave_width)?;

        let tiled = if threads == 0 {
            None
        } else {
            Some(Self::tiled::<T>(threads.next_multiple_of(tile), tile, strategy)?)
        };
        Ok(Self {
            len,
            threads,
            strategy,
            wave_width,
            tiled,
        })
    }

    fn check_tile(tile: usize, strategy: ReduceStrategy, wave_width: usize) -> Result<()> {
        if !tile.is_power_of_two() {
            return Err(ConfigurationError::TileNotPowerOfTwo(tile).into());
        }
        match strategy {
            ReduceStrategy::WaveShuffle if tile != wave_width => {
                Err(ConfigurationError::TileNotOneWave {
                    tile_len: tile,
                    wave_width,
                }
                .into())
            }
            ReduceStrategy::Hybrid if tile % wave_width != 0 => {
                Err(ConfigurationError::NotWaveMultiple {
                    tile_len: tile,
                    wave_width,
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    fn tiled<T: Element>(
        work_items: usize,
        tile: usize,
        strategy: ReduceStrategy,
    ) -> Result<TiledExtent<1>> {
        let tiled = Extent::new([work_items])?.tile([tile])?;
        Ok(match strategy {
            ReduceStrategy::DynamicGroupMemory => {
                tiled.with_dynamic_group_memory(tile * size_of::<T>())
            }
            _ => tiled,
        })
    }
}

fn prev_power_of_two(n: usize) -> usize {
    if n == 0 { 0 } else { 1 << n.ilog2() }
}

/// The reduction kernel body.
pub struct ReduceKernel<T, O> {
    input: DeviceView<T>,
    output: AccumulatorHandle<T>,
    threads: usize,
    strategy: ReduceStrategy,
    wave_width: usize,
    _op: PhantomData<O>,
}

impl<T: Element, O: ReductionOp<T>> ReduceKernel<T, O> {
    pub fn new(input: DeviceView<T>, output: AccumulatorHandle<T>, plan: &ReducePlan) -> Self {
        Self {
            input,
            output,
            threads: plan.threads,
            strategy: plan.strategy,
            wave_width: plan.wave_width,
            _op: PhantomData,
        }
    }

    fn load(&self, g: usize) -> T {
        if g < self.threads {
            O::combine(
                self.input.get_or(g, O::identity()),
                self.input.get_or(g + self.threads, O::identity()),
            )
        } else {
            O::identity()
        }
    }
}

impl<T: Element, O: ReductionOp<T>> TileKernel<1> for ReduceKernel<T, O> {
    fn static_group_memory(&self, tiled: &TiledExtent<1>) -> usize {
        let slots = match self.strategy {
            ReduceStrategy::GroupMemory => tiled.tile_len(),
            ReduceStrategy::Hybrid => tiled.tile_len() / self.wave_width,
            ReduceStrategy::DynamicGroupMemory | ReduceStrategy::WaveShuffle => 0,
        };
        slots * size_of::<T>()
    }

    fn uses_wave_exchange(&self) -> bool {
        self.strategy.uses_waves()
    }

    fn run(&self, item: &mut WorkItem<'_, 1>) {
        let value = self.load(item.global_linear());

        let value = match self.strategy {
            ReduceStrategy::GroupMemory => {
                let scratch = item.group_alloc::<T>(item.tile_len());
                tree_reduce::<T, O>(item, scratch, value)
            }
            ReduceStrategy::DynamicGroupMemory => {
                let scratch = item.dynamic_group_memory::<T>();
                tree_reduce::<T, O>(item, scratch, value)
            }
            ReduceStrategy::WaveShuffle => wave_reduce::<T, O>(item, value),
            ReduceStrategy::Hybrid => {
                let partials = item.group_alloc::<T>(item.tile_len() / item.wave_width());
                let partial = wave_reduce::<T, O>(item, value);
                if item.lane_id() == 0 {
                    partials.set(item.wave_id(), partial);
                }
                item.barrier_with_group_fence();
                if item.local_linear() == 0 {
                    (1..partials.len()).fold(partials.get(0), |acc, w| O::combine(acc, partials.get(w)))
                } else {
                    partial
                }
            }
        };

        if item.local_linear() == 0 {
            self.output.publish(value, O::combine);
        }
    }
}

/// Binary tree over `scratch`. Returns the tile's value at local 0.
fn tree_reduce<T: Element, O: ReductionOp<T>>(
    item: &WorkItem<'_, 1>,
    scratch: GroupSlice<'_, T>,
    value: T,
) -> T {
    let l = item.local_linear();
    scratch.set(l, value);
    item.barrier_with_group_fence();

    let mut w = item.tile_len() / 2;
    while w > 0 {
        if l < w {
            scratch.set(l, O::combine(scratch.get(l), scratch.get(l + w)));
        }
        item.barrier_with_group_fence();
        w /= 2;
    }
    scratch.get(0)
}

/// Every lane ends up holding the combination of the whole wave.
fn wave_reduce<T: Element, O: ReductionOp<T>>(item: &WorkItem<'_, 1>, mut value: T) -> T {
    let mut w = item.wave_width() / 2;
    while w > 0 {
        value = O::combine(value, item.rotate(value, w));
        w /= 2;
    }
    value
}

/// Launches a reduction of all of `input` into `output`.
///
/// `output` is combined into, not reset: start it at the identity for a plain
/// reduction. An empty input completes immediately without launching.
pub fn reduce<T: Element, O: ReductionOp<T>>(
    accelerator: &Accelerator,
    input: &DeviceBuffer<T>,
    output: &Accumulator<T>,
    tile: usize,
    strategy: ReduceStrategy,
) -> Result<CompletionSignal> {
    let plan = ReducePlan::new::<T>(input.len(), tile, strategy, accelerator.wave_width())?;
    launch_plan::<T, O>(accelerator, input, output, &plan)
}

/// Reduces an input of any length with `O` and waits for the result.
pub fn reduce_all<T: Element, O: ReductionOp<T>>(
    accelerator: &Accelerator,
    input: &DeviceBuffer<T>,
    strategy: ReduceStrategy,
) -> Result<T> {
    let config = accelerator.config();
    let plan = ReducePlan::padded::<T>(input.len(), strategy, config.wave_width, config.max_tile_len)?;
    let output = Accumulator::new(accelerator, O::identity())?;
    launch_plan::<T, O>(accelerator, input, &output, &plan)?.wait()?;
    output.value()
}

fn launch_plan<T: Element, O: ReductionOp<T>>(
    accelerator: &Accelerator,
    input: &DeviceBuffer<T>,
    output: &Accumulator<T>,
    plan: &ReducePlan,
) -> Result<CompletionSignal> {
    let Some(tiled) = plan.tiled else {
        debug!("empty reduction, nothing to launch");
        return Ok(CompletionSignal::ready(LaunchReport::default()));
    };
    debug!(
        len = plan.len,
        tile = tiled.tile_len(),
        strategy = %plan.strategy,
        "launching reduction"
    );
    let kernel = ReduceKernel::<T, O>::new(input.view(), output.handle(), plan);
    accelerator.launch(tiled, kernel)
}
