//! Kernel bodies and the work-item context they run against.

use crate::{
    element::Element,
    exec::TileContext,
    group::{GroupCursor, GroupSlice},
    index::{Index, TiledExtent, TiledIndex},
    sync::Fence,
    wave::{FromLane, LaneMap, Rotate},
};

/// A kernel body for tiled launches, run once per work-item.
///
/// Closures taking `&mut WorkItem<'_, D>` implement this directly. A closure
/// that exchanges values across lanes is wrapped in [`WaveKernel`]; kernels
/// that allocate static group memory must be types that declare it.
pub trait TileKernel<const D: usize>: Send + Sync {
    /// Bytes of static group memory each tile needs.
    fn static_group_memory(&self, _tiled: &TiledExtent<D>) -> usize {
        0
    }

    /// Whether the body exchanges values within waves. Launches of such
    /// kernels require the tile length to be a multiple of the wave width.
    fn uses_wave_exchange(&self) -> bool {
        false
    }

    fn run(&self, item: &mut WorkItem<'_, D>);
}

impl<const D: usize, F> TileKernel<D> for F
where
    F: Fn(&mut WorkItem<'_, D>) + Send + Sync,
{
    fn run(&self, item: &mut WorkItem<'_, D>) {
        self(item)
    }
}

/// A closure kernel that exchanges values within waves.
///
/// Launching it checks that the tile is a whole number of waves.
#[derive(Clone, Copy, Debug)]
pub struct WaveKernel<F>(pub F);

impl<const D: usize, F> TileKernel<D> for WaveKernel<F>
where
    F: Fn(&mut WorkItem<'_, D>) + Send + Sync,
{
    fn uses_wave_exchange(&self) -> bool {
        true
    }

    fn run(&self, item: &mut WorkItem<'_, D>) {
        (self.0)(item)
    }
}

/// A kernel body for untiled launches. No group memory, barriers or waves.
pub trait Kernel<const D: usize>: Send + Sync {
    fn run(&self, index: Index<D>);
}

impl<const D: usize, F> Kernel<D> for F
where
    F: Fn(Index<D>) + Send + Sync,
{
    fn run(&self, index: Index<D>) {
        self(index)
    }
}

/// What one work-item of a tiled launch can see and do.
#[derive(Debug)]
pub struct WorkItem<'t, const D: usize> {
    index: TiledIndex<D>,
    grid_len: usize,
    tile: &'t TileContext,
    cursor: GroupCursor,
}

impl<'t, const D: usize> WorkItem<'t, D> {
    pub(crate) fn new(index: TiledIndex<D>, grid_len: usize, tile: &'t TileContext) -> Self {
        Self {
            index,
            grid_len,
            tile,
            cursor: GroupCursor::default(),
        }
    }

    pub fn index(&self) -> &TiledIndex<D> {
        &self.index
    }

    pub fn global(&self) -> [usize; D] {
        self.index.global
    }

    pub fn local(&self) -> [usize; D] {
        self.index.local
    }

    pub fn tile(&self) -> [usize; D] {
        self.index.tile
    }

    pub fn global_linear(&self) -> usize {
        self.index.global_linear
    }

    pub fn local_linear(&self) -> usize {
        self.index.local_linear
    }

    pub fn tile_linear(&self) -> usize {
        self.index.tile_linear
    }

    /// Work-items in this tile.
    pub fn tile_len(&self) -> usize {
        self.tile.tile_len()
    }

    /// Work-items in the whole launch.
    pub fn grid_len(&self) -> usize {
        self.grid_len
    }

    /// Tile barrier with a full fence: group and device memory writes made
    /// before it are visible to the whole tile after it.
    pub fn barrier(&self) {
        self.barrier_with(Fence::All);
    }

    /// Tile barrier that only orders group memory.
    pub fn barrier_with_group_fence(&self) {
        self.barrier_with(Fence::Group);
    }

    pub fn barrier_with(&self, fence: Fence) {
        self.tile.barrier().wait(self.index.local_linear, fence);
    }

    /// Allocates `count` elements of static group memory.
    ///
    /// Every work-item of the tile must make the same sequence of
    /// allocations; the n-th allocation of each names the same region.
    ///
    /// # Panics
    /// If the kernel's declared static group memory is exhausted.
    pub fn group_alloc<T: Element>(&mut self, count: usize) -> GroupSlice<'t, T> {
        let tile = self.tile;
        tile.arena().allocate(&mut self.cursor, count)
    }

    /// The launch-sized dynamic group memory segment.
    pub fn dynamic_group_memory<T: Element>(&self) -> GroupSlice<'t, T> {
        let tile = self.tile;
        tile.arena().dynamic()
    }

    pub fn wave_width(&self) -> usize {
        self.tile.wave_width()
    }

    pub fn wave_id(&self) -> usize {
        self.index.local_linear / self.wave_width()
    }

    pub fn lane_id(&self) -> usize {
        self.index.local_linear % self.wave_width()
    }

    /// Returns the value held by the lane `map` names. Collective over the wave.
    ///
    /// # Panics
    /// If the tile is not a whole number of waves, or `map` names a lane
    /// outside the wave.
    pub fn exchange<T: Element>(&self, value: T, map: impl LaneMap) -> T {
        let Some(wave) = self.tile.wave(self.wave_id()) else {
            panic!(
                "wave exchange in a tile of {} work-items, which is not a multiple of the wave width {}",
                self.tile_len(),
                self.wave_width()
            );
        };
        wave.exchange(self.lane_id(), value, &map)
    }

    /// Lane `x` receives the value of lane `(x + k) mod W`.
    pub fn rotate<T: Element>(&self, value: T, k: usize) -> T {
        self.exchange(value, Rotate(k))
    }

    /// Receives the value of `source_lane`, which each lane picks for itself.
    pub fn permute<T: Element>(&self, value: T, source_lane: usize) -> T {
        self.exchange(value, FromLane(source_lane))
    }
}
