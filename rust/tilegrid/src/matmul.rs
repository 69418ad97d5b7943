//! Matrix multiply, `C = A * B` over row-major device buffers.
//!
//! The tiled version gives each wave one row of `C` and `W` adjacent columns.
//! The wave walks `K` in chunks of `W`: every lane loads one element of the
//! chunk of `A`'s row, and the lanes pass those elements around the wave with
//! rotations, so each lane sees the whole chunk without reloading it.
//!
//! ```text
//! step j, lane x:  a = A[row, chunk + (x + j) % W]
//!                  c += a * B[chunk + (x + j) % W, col]
//!                  a  = rotate(a, 1)
//! ```

use tracing::debug;

use crate::{
    accelerator::Accelerator,
    buffer::{DeviceBuffer, DeviceView},
    element::Element,
    error::{ConfigurationError, Result},
    index::{Extent, Index},
    kernel::{TileKernel, WorkItem},
    signal::CompletionSignal,
};

/// `A` is `m x k`, `B` is `k x n`, `C` is `m x n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixDims {
    pub m: usize,
    pub k: usize,
    pub n: usize,
}

impl MatrixDims {
    pub fn new(m: usize, k: usize, n: usize) -> Self {
        Self { m, k, n }
    }

    fn check<T: Element>(
        &self,
        a: &DeviceBuffer<T>,
        b: &DeviceBuffer<T>,
        c: &DeviceBuffer<T>,
    ) -> Result<()> {
        let Self { m, k, n } = *self;
        for (name, expected, actual) in [
            ("a", m * k, a.len()),
            ("b", k * n, b.len()),
            ("c", m * n, c.len()),
        ] {
            if expected != actual {
                return Err(ConfigurationError::ShapeMismatch {
                    name,
                    expected,
                    actual,
                }
                .into());
            }
        }
        Ok(())
    }
}

struct RotateMatmul<T> {
    a: DeviceView<T>,
    b: DeviceView<T>,
    c: DeviceView<T>,
    dims: MatrixDims,
}

impl<T: Element> TileKernel<2> for RotateMatmul<T> {
    fn uses_wave_exchange(&self) -> bool {
        true
    }

    fn run(&self, item: &mut WorkItem<'_, 2>) {
        let [row, col] = item.global();
        let MatrixDims { k, n, .. } = self.dims;
        let w = item.wave_width();
        let lane = item.lane_id();

        let mut sum = T::ZERO;
        for chunk in (0..k).step_by(w) {
            let mut a = if chunk + lane < k {
                self.a.get(row * k + chunk + lane)
            } else {
                T::ZERO
            };
            for j in 0..w {
                let kk = chunk + (lane + j) % w;
                // Lanes past the last column still rotate
                let b = if kk < k && col < n {
                    self.b.get(kk * n + col)
                } else {
                    T::ZERO
                };
                sum = sum.wrapping_add(a.wrapping_mul(b));
                a = item.rotate(a, 1);
            }
        }

        if col < n {
            self.c.set(row * n + col, sum);
        }
    }
}

/// Launches the rotate-based tiled multiply.
///
/// The grid is `m x round_up(n, W)` in tiles of `1 x W`.
pub fn matmul_rotate<T: Element>(
    accelerator: &Accelerator,
    a: &DeviceBuffer<T>,
    b: &DeviceBuffer<T>,
    c: &DeviceBuffer<T>,
    dims: MatrixDims,
) -> Result<CompletionSignal> {
    dims.check(a, b, c)?;
    let w = accelerator.wave_width();
    let tiled = Extent::new([dims.m, dims.n.next_multiple_of(w)])?.tile([1, w])?;
    debug!(?dims, wave_width = w, tiles = tiled.num_tiles(), "launching rotate matmul");

    let kernel = RotateMatmul {
        a: a.view(),
        b: b.view(),
        c: c.view(),
        dims,
    };
    accelerator.launch(tiled, kernel)
}

/// Launches the untiled multiply: one work-item per element of `C`.
pub fn matmul_naive<T: Element>(
    accelerator: &Accelerator,
    a: &DeviceBuffer<T>,
    b: &DeviceBuffer<T>,
    c: &DeviceBuffer<T>,
    dims: MatrixDims,
) -> Result<CompletionSignal> {
    dims.check(a, b, c)?;
    let MatrixDims { m, k, n } = dims;
    let (av, bv, cv) = (a.view(), b.view(), c.view());

    accelerator.launch_untiled(Extent::new([m, n])?, move |idx: Index<2>| {
        let [row, col] = idx.global;
        let sum = (0..k).fold(T::ZERO, |acc, i| {
            acc.wrapping_add(av.get(row * k + i).wrapping_mul(bv.get(i * n + col)))
        });
        cv.set(row * n + col, sum);
    })
}

/// Row-major `A * B` on the host.
pub fn matmul_host<T: Element>(a: &[T], b: &[T], dims: MatrixDims) -> Vec<T> {
    let MatrixDims { m, k, n } = dims;
    let mut c = vec![T::ZERO; m * n];
    for row in 0..m {
        for col in 0..n {
            c[row * n + col] = (0..k).fold(T::ZERO, |acc, i| {
                acc.wrapping_add(a[row * k + i].wrapping_mul(b[i * n + col]))
            });
        }
    }
    c
}
