#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

//! Sample programs for the `tilegrid` driver. Each runs a kernel on random
//! input and checks the device result against a host computation.

pub mod verify;

use std::{fmt, time::Instant};

use rand::{SeedableRng, rngs::StdRng};
use tilegrid::{
    Accelerator, AcceleratorConfig, Accumulator, GridError, SyncFlags,
    elementwise::{probe_tile_ids, saxpy},
    index::Extent,
    matmul::{MatrixDims, matmul_host, matmul_naive, matmul_rotate},
    reduce::{ReduceStrategy, SumOp, reduce, reduce_all},
};
use tracing::{debug, info};
use crate::verify::{Tolerance, count_mismatches, random_input, within_tolerance};

/// Element type a sample runs on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Dtype {
    #[default]
    F32,
    F64,
    I32,
    I64,
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
        }
    }
}

/// Calls `$run::<T>($args)` with `T` chosen by a [`Dtype`].
macro_rules! dispatch_dtype {
    ($dtype:expr, $run:ident($($args:expr),*)) => {
        match $dtype {
            Dtype::F32 => $run::<f32>($($args),*),
            Dtype::F64 => $run::<f64>($($args),*),
            Dtype::I32 => $run::<i32>($($args),*),
            Dtype::I64 => $run::<i64>($($args),*),
        }
    };
}

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Command-line settings layered over the configuration file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceOverrides {
    pub wave_width: Option<usize>,
    pub workers: Option<usize>,
    pub check_barriers: Option<bool>,
}

impl DeviceOverrides {
    /// Replaces every field of `config` that has an override.
    pub fn apply(&self, config: &mut AcceleratorConfig) {
        if let Some(w) = self.wave_width {
            config.wave_width = w;
        }
        if self.workers.is_some() {
            config.worker_threads = self.workers;
        }
        if let Some(check) = self.check_barriers {
            config.check_barriers = check;
        }
    }
}

/// Result of one sample run.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub sample: String,
    pub passed: bool,
    pub detail: String,
    pub elapsed_ms: f64,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "passed" } else { "failed" };
        write!(
            f,
            "{}: {status} ({}, {:.2} ms)",
            self.sample, self.detail, self.elapsed_ms
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceParams {
    pub len: usize,
    pub tile: usize,
    pub strategy: ReduceStrategy,
    pub dtype: Dtype,
    pub seed: u64,
    /// Use the automatic, any-length reduction instead of an explicit tile.
    pub any_length: bool,
}

pub fn run_reduce(acc: &Accelerator, params: &ReduceParams) -> Result<Verdict, SampleError> {
    dispatch_dtype!(params.dtype, reduce_sample(acc, params))
}

fn reduce_sample<T: Tolerance>(
    acc: &Accelerator,
    params: &ReduceParams,
) -> Result<Verdict, SampleError> {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let data: Vec<T> = random_input(&mut rng, params.len, 0.0, 100.0);
    let expected = if T::EXACT {
        data.iter().fold(T::ZERO, |acc, &v| acc.wrapping_add(v))
    } else {
        // A sequential float sum drifts further than the tree does
        T::from_f64(data.iter().map(|v| v.into_f64()).sum())
    };
    let input = acc.alloc_from(&data, SyncFlags::AUTO)?;

    let start = Instant::now();
    let actual = if params.any_length {
        reduce_all::<T, SumOp>(acc, &input, params.strategy)?
    } else {
        let output = Accumulator::new(acc, T::ZERO)?;
        let report = reduce::<T, SumOp>(acc, &input, &output, params.tile, params.strategy)?.wait()?;
        debug!(
            tiles = report.tiles,
            publishes = output.publishes(),
            barriers = report.barriers_per_item,
            "reduction finished"
        );
        output.value()?
    };

    Ok(Verdict {
        sample: format!("reduce[{} {}]", params.strategy, params.dtype),
        passed: within_tolerance(actual, expected),
        detail: format!("got {actual}, expected {expected}"),
        elapsed_ms: start.elapsed().as_secs_f64() * 1e3,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulParams {
    pub dims: MatrixDims,
    pub dtype: Dtype,
    pub seed: u64,
    /// Run the untiled kernel instead of the rotate kernel.
    pub naive: bool,
}

pub fn run_matmul(acc: &Accelerator, params: &MatmulParams) -> Result<Verdict, SampleError> {
    dispatch_dtype!(params.dtype, matmul_sample(acc, params))
}

fn matmul_sample<T: Tolerance>(
    acc: &Accelerator,
    params: &MatmulParams,
) -> Result<Verdict, SampleError> {
    let MatrixDims { m, k, n } = params.dims;
    let mut rng = StdRng::seed_from_u64(params.seed);
    let a: Vec<T> = random_input(&mut rng, m * k, -10.0, 10.0);
    let b: Vec<T> = random_input(&mut rng, k * n, -10.0, 10.0);

    let a_dev = acc.alloc_from(&a, SyncFlags::AUTO)?;
    let b_dev = acc.alloc_from(&b, SyncFlags::AUTO)?;
    let c_dev = acc.alloc::<T>(m * n, SyncFlags::AUTO)?;

    let start = Instant::now();
    let signal = if params.naive {
        matmul_naive(acc, &a_dev, &b_dev, &c_dev, params.dims)?
    } else {
        matmul_rotate(acc, &a_dev, &b_dev, &c_dev, params.dims)?
    };
    signal.wait()?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1e3;

    let actual = c_dev.to_vec()?;
    let expected = matmul_host(&a, &b, params.dims);
    let mismatches = count_mismatches(&actual, &expected);

    let kind = if params.naive { "naive" } else { "rotate" };
    Ok(Verdict {
        sample: format!("matmul[{kind} {m}x{k}x{n} {}]", params.dtype),
        passed: mismatches == 0,
        detail: format!("{mismatches} of {} elements differ", actual.len()),
        elapsed_ms,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaxpyParams {
    pub len: usize,
    pub a: f64,
    pub dtype: Dtype,
    pub seed: u64,
}

pub fn run_saxpy(acc: &Accelerator, params: &SaxpyParams) -> Result<Verdict, SampleError> {
    dispatch_dtype!(params.dtype, saxpy_sample(acc, params))
}

fn saxpy_sample<T: Tolerance>(
    acc: &Accelerator,
    params: &SaxpyParams,
) -> Result<Verdict, SampleError> {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let x: Vec<T> = random_input(&mut rng, params.len, -100.0, 100.0);
    let y: Vec<T> = random_input(&mut rng, params.len, -100.0, 100.0);
    let a = T::from_f64(params.a);

    let x_dev = acc.alloc_from(&x, SyncFlags::AUTO)?;
    let y_dev = acc.alloc_from(&y, SyncFlags::AUTO)?;

    let start = Instant::now();
    saxpy(acc, a, &x_dev, &y_dev)?.wait()?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1e3;

    let expected: Vec<T> = x
        .iter()
        .zip(&y)
        .map(|(&xi, &yi)| a.wrapping_mul(xi).wrapping_add(yi))
        .collect();
    let mismatches = count_mismatches(&y_dev.to_vec()?, &expected);

    Ok(Verdict {
        sample: format!("saxpy[{}]", params.dtype),
        passed: mismatches == 0,
        detail: format!("{mismatches} of {} elements differ", params.len),
        elapsed_ms,
    })
}

/// Runs the tile id probe over a 2D grid, printing the coordinates when `print` is set.
pub fn run_tiles(
    acc: &Accelerator,
    extent: [usize; 2],
    tile: [usize; 2],
    print: bool,
) -> Result<Verdict, SampleError> {
    let tiled = Extent::new(extent)?.tile(tile)?;
    let start = Instant::now();
    let probe = probe_tile_ids(acc, tiled)?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1e3;

    let mismatches = (0..tiled.len())
        .filter(|&g| {
            let idx = tiled.index(g);
            probe.local[g] != idx.local || probe.tile[g] != idx.tile
        })
        .count();

    if print {
        let [rows, cols] = extent;
        for row in 0..rows {
            let line: Vec<String> = (0..cols)
                .map(|col| {
                    let g = row * cols + col;
                    let ([tr, tc], [lr, lc]) = (probe.tile[g], probe.local[g]);
                    format!("({tr},{tc}|{lr},{lc})")
                })
                .collect();
            info!("{}", line.join(" "));
        }
    }

    Ok(Verdict {
        sample: format!("tiles[{}x{} in {}x{}]", extent[0], extent[1], tile[0], tile[1]),
        passed: mismatches == 0,
        detail: format!("{} tiles, {mismatches} mismatched work-items", tiled.num_tiles()),
        elapsed_ms,
    })
}
