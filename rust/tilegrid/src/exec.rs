//! Tile execution.
//!
//! Tiles are dispatched across the worker pool in strided slots; a slot runs
//! its tiles one after another. Inside a tile every work-item gets its own
//! scoped thread so barriers and wave exchanges can block for real.

use std::{any::Any, thread};

use rayon::prelude::*;
use tracing::{trace, warn};

use crate::{
    error::{GridError, Result},
    group::GroupArena,
    index::TiledExtent,
    kernel::{TileKernel, WorkItem},
    sync::TileBarrier,
    wave::Wave,
};

/// Everything needed to run any tile of one launch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TilePlan<const D: usize> {
    pub(crate) tiled: TiledExtent<D>,
    pub(crate) static_group_bytes: usize,
    pub(crate) wave_width: usize,
    pub(crate) stack_bytes: usize,
    pub(crate) check_barriers: bool,
}

/// Shared state of one tile execution.
#[derive(Debug)]
pub(crate) struct TileContext {
    tile_len: usize,
    wave_width: usize,
    barrier: TileBarrier,
    arena: GroupArena,
    waves: Box<[Wave]>,
}

impl TileContext {
    fn new<const D: usize>(plan: &TilePlan<D>) -> Self {
        let tile_len = plan.tiled.tile_len();
        let w = plan.wave_width;
        let waves = if tile_len % w == 0 {
            (0..tile_len / w).map(|_| Wave::new(w)).collect()
        } else {
            Box::default()
        };
        Self {
            tile_len,
            wave_width: w,
            barrier: TileBarrier::new(tile_len, plan.check_barriers),
            arena: GroupArena::new(plan.static_group_bytes, plan.tiled.dynamic_group_memory()),
            waves,
        }
    }

    pub(crate) fn tile_len(&self) -> usize {
        self.tile_len
    }

    pub(crate) fn wave_width(&self) -> usize {
        self.wave_width
    }

    pub(crate) fn barrier(&self) -> &TileBarrier {
        &self.barrier
    }

    pub(crate) fn arena(&self) -> &GroupArena {
        &self.arena
    }

    pub(crate) fn wave(&self, id: usize) -> Option<&Wave> {
        self.waves.get(id)
    }

    /// Removes a finished (or never started) work-item from every collective.
    fn retire(&self, local: usize) {
        self.barrier.retire();
        if let Some(wave) = self.wave(local / self.wave_width) {
            wave.retire();
        }
    }
}

/// Retires its work-item when dropped, including while unwinding.
struct Retire<'a> {
    tile: &'a TileContext,
    local: usize,
}

impl Drop for Retire<'_> {
    fn drop(&mut self) {
        self.tile.retire(self.local);
    }
}

/// Runs every tile of the launch with at most `slots` tiles in flight.
/// Returns the most barriers any work-item reached.
pub(crate) fn run_grid<const D: usize, K>(plan: &TilePlan<D>, kernel: &K, slots: usize) -> Result<usize>
where
    K: TileKernel<D> + ?Sized,
{
    let num_tiles = plan.tiled.num_tiles();
    (0..slots)
        .into_par_iter()
        .map(|slot| -> Result<usize> {
            let mut barriers = 0;
            for tile in (slot..num_tiles).step_by(slots) {
                barriers = barriers.max(run_tile(plan, kernel, tile)?);
            }
            Ok(barriers)
        })
        .try_reduce(|| 0, |a, b| Ok(a.max(b)))
}

/// Runs one tile to completion.
pub(crate) fn run_tile<const D: usize, K>(plan: &TilePlan<D>, kernel: &K, tile: usize) -> Result<usize>
where
    K: TileKernel<D> + ?Sized,
{
    trace!(tile, "running tile");
    let ctx = TileContext::new(plan);
    let grid_len = plan.tiled.len();

    let (spawn_failure, faults) = thread::scope(|s| {
        let mut spawn_failure = None;
        let mut handles = Vec::with_capacity(ctx.tile_len);
        for local in 0..ctx.tile_len {
            if spawn_failure.is_some() {
                ctx.retire(local);
                continue;
            }
            let ctx = &ctx;
            let spawned = thread::Builder::new()
                .stack_size(plan.stack_bytes)
                .spawn_scoped(s, move || {
                    let _retire = Retire { tile: ctx, local };
                    let index = plan.tiled.index_in_tile(tile, local);
                    let mut item = WorkItem::new(index, grid_len, ctx);
                    kernel.run(&mut item);
                });
            match spawned {
                Ok(handle) => handles.push((local, handle)),
                Err(e) => {
                    ctx.retire(local);
                    spawn_failure = Some((local, e.to_string()));
                }
            }
        }

        let faults: Vec<_> = handles
            .into_iter()
            .filter_map(|(local, handle)| handle.join().err().map(|p| (local, panic_message(p))))
            .collect();
        (spawn_failure, faults)
    });

    if let Some((local, message)) = faults.into_iter().next() {
        warn!(tile, local, %message, "work-item faulted");
        return Err(GridError::KernelFault {
            site: format!("tile {tile}, work-item {local}"),
            message,
        });
    }
    if let Some((local, e)) = spawn_failure {
        return Err(GridError::KernelFault {
            site: format!("tile {tile}, work-item {local}"),
            message: format!("failed to start work-item thread: {e}"),
        });
    }
    if let Some(detail) = ctx.barrier.divergence() {
        warn!(tile, %detail, "barrier divergence");
        return Err(GridError::Divergence { tile, detail });
    }
    Ok(ctx.barrier.max_arrivals())
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "work-item panicked".to_string()
    }
}
