//! Grid extents and the coordinate views a work-item sees.
//!
//! All coordinates are row-major: the last dimension varies fastest.
//!
//! ```text
//! extent = [8]       tile = [4]
//!   global:  0 1 2 3 | 4 5 6 7
//!   local:   0 1 2 3 | 0 1 2 3
//!   tile:    0 0 0 0 | 1 1 1 1
//! ```

use crate::error::{ConfigurationError, Result};

/// Shape of a launch: the number of work-items along each dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Extent<const D: usize> {
    dims: [usize; D],
}

impl<const D: usize> Extent<D> {
    pub fn new(dims: [usize; D]) -> Result<Self> {
        if let Some(dim) = dims.iter().position(|&n| n == 0) {
            return Err(ConfigurationError::ZeroExtent { dim }.into());
        }
        if dims.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n)).is_none() {
            return Err(ConfigurationError::ExtentOverflow {
                dims: dims.to_vec(),
            }
            .into());
        }
        Ok(Self { dims })
    }

    pub fn dims(&self) -> [usize; D] {
        self.dims
    }

    /// Total number of work-items.
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    /// Partitions this extent into tiles. Fails unless `tile` evenly divides
    /// the extent in every dimension.
    pub fn tile(self, tile: [usize; D]) -> Result<TiledExtent<D>> {
        TiledExtent::new(self, tile)
    }

    /// Maps a linear ordinal to its coordinates.
    pub fn unravel(&self, ordinal: usize) -> [usize; D] {
        unravel(ordinal, &self.dims)
    }

    /// Maps coordinates to their linear ordinal.
    pub fn ravel(&self, coords: [usize; D]) -> usize {
        ravel(&coords, &self.dims)
    }
}

/// An [`Extent`] partitioned into equally sized tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TiledExtent<const D: usize> {
    extent: Extent<D>,
    tile: [usize; D],
    tile_counts: [usize; D],
    dynamic_group_bytes: usize,
}

impl<const D: usize> TiledExtent<D> {
    pub fn new(extent: Extent<D>, tile: [usize; D]) -> Result<Self> {
        let mut tile_counts = [0; D];
        for dim in 0..D {
            let (n, t) = (extent.dims[dim], tile[dim]);
            if t == 0 {
                return Err(ConfigurationError::ZeroTile { dim }.into());
            }
            if n % t != 0 {
                return Err(ConfigurationError::UnevenTile {
                    dim,
                    extent: n,
                    tile: t,
                }
                .into());
            }
            tile_counts[dim] = n / t;
        }
        Ok(Self {
            extent,
            tile,
            tile_counts,
            dynamic_group_bytes: 0,
        })
    }

    /// Sets the per-tile dynamic group memory segment size.
    #[must_use]
    pub fn with_dynamic_group_memory(mut self, bytes: usize) -> Self {
        self.dynamic_group_bytes = bytes;
        self
    }

    pub fn dynamic_group_memory(&self) -> usize {
        self.dynamic_group_bytes
    }

    pub fn extent(&self) -> Extent<D> {
        self.extent
    }

    pub fn tile_dims(&self) -> [usize; D] {
        self.tile
    }

    /// Number of tiles along each dimension.
    pub fn tile_counts(&self) -> [usize; D] {
        self.tile_counts
    }

    /// Total number of work-items.
    pub fn len(&self) -> usize {
        self.extent.len()
    }

    /// Work-items per tile.
    pub fn tile_len(&self) -> usize {
        self.tile.iter().product()
    }

    pub fn num_tiles(&self) -> usize {
        self.tile_counts.iter().product()
    }

    /// Coordinates of the work-item with the given global linear ordinal.
    ///
    /// # Panics
    /// If `ordinal` is not below [`len`](Self::len).
    pub fn index(&self, ordinal: usize) -> TiledIndex<D> {
        assert!(
            ordinal < self.len(),
            "work-item ordinal {ordinal} out of range for {} work-items",
            self.len()
        );
        let global = self.extent.unravel(ordinal);
        let mut local = [0; D];
        let mut tile = [0; D];
        for dim in 0..D {
            local[dim] = global[dim] % self.tile[dim];
            tile[dim] = global[dim] / self.tile[dim];
        }
        self.assemble(global, local, tile)
    }

    /// Coordinates of the `local_ordinal`-th work-item of the `tile_ordinal`-th tile.
    ///
    /// # Panics
    /// If either ordinal is out of range.
    pub fn index_in_tile(&self, tile_ordinal: usize, local_ordinal: usize) -> TiledIndex<D> {
        assert!(tile_ordinal < self.num_tiles(), "tile ordinal {tile_ordinal} out of range");
        assert!(local_ordinal < self.tile_len(), "local ordinal {local_ordinal} out of range");
        let tile = unravel(tile_ordinal, &self.tile_counts);
        let local = unravel(local_ordinal, &self.tile);
        let mut global = [0; D];
        for dim in 0..D {
            global[dim] = tile[dim] * self.tile[dim] + local[dim];
        }
        self.assemble(global, local, tile)
    }

    fn assemble(&self, global: [usize; D], local: [usize; D], tile: [usize; D]) -> TiledIndex<D> {
        TiledIndex {
            global,
            local,
            tile,
            tile_dim: self.tile,
            global_linear: ravel(&global, &self.extent.dims),
            local_linear: ravel(&local, &self.tile),
            tile_linear: ravel(&tile, &self.tile_counts),
        }
    }
}

/// The three coordinate views of one work-item in a tiled launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TiledIndex<const D: usize> {
    pub global: [usize; D],
    pub local: [usize; D],
    pub tile: [usize; D],
    pub tile_dim: [usize; D],
    pub global_linear: usize,
    /// Lane ordinal within the tile, used for group memory and wave membership.
    pub local_linear: usize,
    pub tile_linear: usize,
}

/// Coordinates of one work-item in an untiled launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Index<const D: usize> {
    pub global: [usize; D],
    pub linear: usize,
}

fn unravel<const D: usize>(mut ordinal: usize, dims: &[usize; D]) -> [usize; D] {
    let mut coords = [0; D];
    for dim in (0..D).rev() {
        coords[dim] = ordinal % dims[dim];
        ordinal /= dims[dim];
    }
    coords
}

fn ravel<const D: usize>(coords: &[usize; D], dims: &[usize; D]) -> usize {
    coords
        .iter()
        .zip(dims)
        .fold(0, |acc, (&c, &n)| acc * n + c)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::error::GridError;

    #[test]
    fn test_ordinal_130_of_256_by_64() {
        let tiled = Extent::new([256]).unwrap().tile([64]).unwrap();
        let idx = tiled.index(130);
        assert_eq!(idx.global, [130]);
        assert_eq!(idx.local, [2]);
        assert_eq!(idx.tile, [2]);
        for _ in 0..4 {
            assert_eq!(tiled.index(130), idx);
        }
    }

    #[test]
    fn test_uneven_tile_rejected() {
        let err = Extent::new([100]).unwrap().tile([64]).unwrap_err();
        assert_eq!(
            err,
            GridError::Configuration(ConfigurationError::UnevenTile {
                dim: 0,
                extent: 100,
                tile: 64
            })
        );
    }

    #[test]
    fn test_zero_extent_rejected() {
        assert!(matches!(
            Extent::new([4, 0]),
            Err(GridError::Configuration(ConfigurationError::ZeroExtent { dim: 1 }))
        ));
        assert!(matches!(
            Extent::new([4]).unwrap().tile([0]),
            Err(GridError::Configuration(ConfigurationError::ZeroTile { dim: 0 }))
        ));
    }

    #[test]
    fn test_overflowing_extent_rejected() {
        assert_eq!(
            Extent::new([usize::MAX, 2]).unwrap_err(),
            GridError::Configuration(ConfigurationError::ExtentOverflow {
                dims: vec![usize::MAX, 2]
            })
        );
        let widest = Extent::new([usize::MAX, 1]).unwrap();
        assert_eq!(widest.len(), usize::MAX);
    }

    #[test]
    fn test_2d_row_major() {
        // 32x32 grid in 4x16 tiles
        let tiled = Extent::new([32, 32]).unwrap().tile([4, 16]).unwrap();
        assert_eq!(tiled.tile_counts(), [8, 2]);
        assert_eq!(tiled.num_tiles(), 16);
        assert_eq!(tiled.tile_len(), 64);

        let idx = tiled.index(5 * 32 + 17);
        assert_eq!(idx.global, [5, 17]);
        assert_eq!(idx.local, [1, 1]);
        assert_eq!(idx.tile, [1, 1]);
        assert_eq!(idx.local_linear, 17);
        assert_eq!(idx.tile_linear, 3);
        assert_eq!(idx.global_linear, 5 * 32 + 17);
    }

    fn check_tile_ordinals<const D: usize>(dims: [usize; D], tile: [usize; D]) {
        let tiled = Extent::new(dims).unwrap().tile(tile).unwrap();
        let mut seen = vec![false; tiled.len()];
        for t in 0..tiled.num_tiles() {
            for l in 0..tiled.tile_len() {
                let idx = tiled.index_in_tile(t, l);
                assert_eq!(idx.tile_linear, t);
                assert_eq!(idx.local_linear, l);
                assert_eq!(tiled.index(idx.global_linear), idx);
                assert!(!seen[idx.global_linear]);
                seen[idx.global_linear] = true;
            }
        }
        assert!(seen.into_iter().all(|s| s));
    }

    #[test]
    fn test_tile_ordinals_cover_grid() {
        check_tile_ordinals([256], [64]);
        check_tile_ordinals([32, 32], [4, 16]);
        check_tile_ordinals([4, 6, 8], [2, 3, 4]);
    }

    #[test_case(256, 64, 4 ; "four_tiles")]
    #[test_case(512, 512, 1 ; "single_tile")]
    #[test_case(3, 1, 3 ; "unit_tiles")]
    fn test_num_tiles(len: usize, tile: usize, expected: usize) {
        let tiled = Extent::new([len]).unwrap().tile([tile]).unwrap();
        assert_eq!(tiled.num_tiles(), expected);
    }

    #[test]
    fn test_dynamic_group_memory_carried() {
        let tiled = Extent::new([128])
            .unwrap()
            .tile([64])
            .unwrap()
            .with_dynamic_group_memory(256);
        assert_eq!(tiled.dynamic_group_memory(), 256);
    }
}
