use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tilegrid::{
    Accelerator, AcceleratorConfig,
    matmul::MatrixDims,
    reduce::ReduceStrategy,
};
use tilegrid_cli::{
    DeviceOverrides, Dtype, MatmulParams, ReduceParams, SaxpyParams, Verdict, run_matmul,
    run_reduce, run_saxpy, run_tiles,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "tilegrid",
    about = "Run the tilegrid sample kernels and verify them against the host"
)]
struct Cli {
    #[command(flatten)]
    device: DeviceArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DeviceArgs {
    /// TOML file with an [accelerator] table
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the wave width
    #[arg(long, global = true)]
    wave_width: Option<usize>,
    /// Override the number of tile dispatch threads
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Count barrier arrivals and fail divergent launches (true or false)
    #[arg(long, global = true)]
    check_barriers: Option<bool>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tiled sum reduction
    Reduce {
        /// Number of input elements
        #[arg(long, default_value = "1048576")]
        len: usize,
        /// Work-items per tile
        #[arg(long, default_value = "256")]
        tile: usize,
        #[arg(long, value_enum, default_value_t = ReduceStrategy::GroupMemory)]
        strategy: ReduceStrategy,
        /// Run every strategy instead of just one
        #[arg(long)]
        all_strategies: bool,
        /// Accept any length and pick the tile automatically
        #[arg(long)]
        any_length: bool,
        #[command(flatten)]
        sample: SampleArgs,
    },
    /// Matrix multiply C = A * B
    Matmul {
        #[arg(long, default_value = "64")]
        m: usize,
        #[arg(long, default_value = "96")]
        k: usize,
        #[arg(long, default_value = "80")]
        n: usize,
        /// Use the untiled kernel
        #[arg(long)]
        naive: bool,
        #[command(flatten)]
        sample: SampleArgs,
    },
    /// y = a * x + y
    Saxpy {
        #[arg(long, default_value = "1048576")]
        len: usize,
        #[arg(long, default_value = "2.5")]
        a: f64,
        #[command(flatten)]
        sample: SampleArgs,
    },
    /// Show the tile and local coordinates of every work-item of a 2D grid
    Tiles {
        #[arg(long, default_value = "8")]
        rows: usize,
        #[arg(long, default_value = "8")]
        cols: usize,
        #[arg(long, default_value = "4")]
        tile_rows: usize,
        #[arg(long, default_value = "2")]
        tile_cols: usize,
    },
}

#[derive(Args)]
struct SampleArgs {
    #[arg(long, value_enum, default_value_t = Dtype::F32)]
    dtype: Dtype,
    #[arg(long, default_value = "42")]
    seed: u64,
}

fn accelerator(args: &DeviceArgs) -> Result<Accelerator, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => AcceleratorConfig::load(path)?,
        None => AcceleratorConfig::default(),
    };
    DeviceOverrides {
        wave_width: args.wave_width,
        workers: args.workers,
        check_barriers: args.check_barriers,
    }
    .apply(&mut config);
    Ok(Accelerator::new(config)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let acc = accelerator(&cli.device)?;

    let verdicts: Vec<Verdict> = match cli.command {
        Commands::Reduce {
            len,
            tile,
            strategy,
            all_strategies,
            any_length,
            sample,
        } => {
            let strategies = if all_strategies {
                ReduceStrategy::ALL.to_vec()
            } else {
                vec![strategy]
            };
            strategies
                .into_iter()
                .map(|strategy| {
                    // A wave-shuffle tile is always exactly one wave
                    let tile = if strategy == ReduceStrategy::WaveShuffle {
                        acc.wave_width()
                    } else {
                        tile
                    };
                    run_reduce(
                        &acc,
                        &ReduceParams {
                            len,
                            tile,
                            strategy,
                            dtype: sample.dtype,
                            seed: sample.seed,
                            any_length,
                        },
                    )
                })
                .collect::<Result<_, _>>()?
        }
        Commands::Matmul {
            m,
            k,
            n,
            naive,
            sample,
        } => vec![run_matmul(
            &acc,
            &MatmulParams {
                dims: MatrixDims::new(m, k, n),
                dtype: sample.dtype,
                seed: sample.seed,
                naive,
            },
        )?],
        Commands::Saxpy { len, a, sample } => vec![run_saxpy(
            &acc,
            &SaxpyParams {
                len,
                a,
                dtype: sample.dtype,
                seed: sample.seed,
            },
        )?],
        Commands::Tiles {
            rows,
            cols,
            tile_rows,
            tile_cols,
        } => vec![run_tiles(&acc, [rows, cols], [tile_rows, tile_cols], true)?],
    };

    let mut failed = false;
    for verdict in &verdicts {
        info!("{verdict}");
        println!("{}", if verdict.passed { "passed" } else { "failed" });
        failed |= !verdict.passed;
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
