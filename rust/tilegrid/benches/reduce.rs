use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tilegrid::{
    Accelerator, AcceleratorConfig, Accumulator, DeviceBuffer, SyncFlags,
    reduce::{ReduceStrategy, ReductionOp, SumOp, reduce},
};

const LEN: usize = 1 << 15;

fn accelerator() -> Accelerator {
    Accelerator::new(AcceleratorConfig {
        check_barriers: false,
        ..AcceleratorConfig::default()
    })
    .unwrap()
}

fn run_once(acc: &Accelerator, input: &DeviceBuffer<f32>, tile: usize, strategy: ReduceStrategy) -> f32 {
    let output = Accumulator::new(acc, <SumOp as ReductionOp<f32>>::identity()).unwrap();
    reduce::<f32, SumOp>(acc, input, &output, tile, strategy)
        .unwrap()
        .wait()
        .unwrap();
    output.value().unwrap()
}

fn bench_strategies(c: &mut Criterion) {
    let acc = accelerator();
    let input = acc.alloc_from(&vec![1.0f32; LEN], SyncFlags::AUTO).unwrap();

    let mut group = c.benchmark_group("reduce_strategies");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);
    group.throughput(Throughput::Elements(LEN as u64));

    for (strategy, tile) in [
        (ReduceStrategy::GroupMemory, 256),
        (ReduceStrategy::DynamicGroupMemory, 256),
        (ReduceStrategy::WaveShuffle, acc.wave_width()),
        (ReduceStrategy::Hybrid, 256),
    ] {
        group.bench_with_input(
            BenchmarkId::new(strategy.to_string(), tile),
            &tile,
            |b, &tile| b.iter(|| run_once(&acc, &input, tile, strategy)),
        );
    }
    group.finish();
}

fn bench_tile_sizes(c: &mut Criterion) {
    let acc = accelerator();
    let input = acc.alloc_from(&vec![1.0f32; LEN], SyncFlags::AUTO).unwrap();

    let mut group = c.benchmark_group("reduce_tile_sizes");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);
    group.throughput(Throughput::Elements(LEN as u64));

    for tile in [64, 128, 256, 512] {
        group.bench_with_input(BenchmarkId::new("group_memory", tile), &tile, |b, &tile| {
            b.iter(|| run_once(&acc, &input, tile, ReduceStrategy::GroupMemory))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_strategies, bench_tile_sizes);
criterion_main!(benches);
