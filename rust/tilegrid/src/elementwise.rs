//! Elementwise kernels and the tile index probe.

use crate::{
    accelerator::Accelerator,
    buffer::{DeviceBuffer, SyncFlags},
    element::Element,
    error::{ConfigurationError, Result},
    index::{Extent, Index, TiledExtent},
    kernel::WorkItem,
    signal::{CompletionSignal, LaunchReport},
};

/// Launches `y = a * x + y`.
pub fn saxpy<T: Element>(
    accelerator: &Accelerator,
    a: T,
    x: &DeviceBuffer<T>,
    y: &DeviceBuffer<T>,
) -> Result<CompletionSignal> {
    if x.len() != y.len() {
        return Err(ConfigurationError::ShapeMismatch {
            name: "y",
            expected: x.len(),
            actual: y.len(),
        }
        .into());
    }
    if x.is_empty() {
        return Ok(CompletionSignal::ready(LaunchReport::default()));
    }

    let (xv, yv) = (x.view(), y.view());
    accelerator.launch_untiled(Extent::new([x.len()])?, move |idx: Index<1>| {
        let i = idx.linear;
        yv.set(i, a.wrapping_mul(xv.get(i)).wrapping_add(yv.get(i)));
    })
}

/// Local and tile coordinates reported by every work-item of a launch,
/// indexed by global linear id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileProbe<const D: usize> {
    pub local: Vec<[usize; D]>,
    pub tile: Vec<[usize; D]>,
}

/// Runs a kernel that records each work-item's coordinates, and reads them back.
pub fn probe_tile_ids<const D: usize>(
    accelerator: &Accelerator,
    tiled: TiledExtent<D>,
) -> Result<TileProbe<D>> {
    let len = tiled.len();
    let local = accelerator.alloc::<u64>(len * D, SyncFlags::AUTO)?;
    let tile = accelerator.alloc::<u64>(len * D, SyncFlags::AUTO)?;

    let (lv, tv) = (local.view(), tile.view());
    accelerator
        .launch(tiled, move |item: &mut WorkItem<'_, D>| {
            let base = item.global_linear() * D;
            for (d, (l, t)) in item.local().into_iter().zip(item.tile()).enumerate() {
                lv.set(base + d, l as u64);
                tv.set(base + d, t as u64);
            }
        })?
        .wait()?;

    let unflatten = |flat: Vec<u64>| -> Vec<[usize; D]> {
        flat.chunks_exact(D.max(1))
            .map(|c| std::array::from_fn(|d| c[d] as usize))
            .collect()
    };
    Ok(TileProbe {
        local: unflatten(local.to_vec()?),
        tile: unflatten(tile.to_vec()?),
    })
}
