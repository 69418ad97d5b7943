use std::io::Write;

use test_case::test_case;
use tilegrid::{Accelerator, AcceleratorConfig, matmul::MatrixDims, reduce::ReduceStrategy};
use tilegrid_cli::{
    DeviceOverrides, Dtype, MatmulParams, ReduceParams, SaxpyParams, run_matmul, run_reduce,
    run_saxpy, run_tiles,
};

fn accelerator(wave_width: usize) -> Accelerator {
    Accelerator::new(AcceleratorConfig {
        wave_width,
        check_barriers: true,
        ..AcceleratorConfig::default()
    })
    .unwrap()
}

#[test_case(ReduceStrategy::GroupMemory, 128, Dtype::F32 ; "group_memory_f32")]
#[test_case(ReduceStrategy::DynamicGroupMemory, 64, Dtype::F64 ; "dynamic_f64")]
#[test_case(ReduceStrategy::WaveShuffle, 16, Dtype::I32 ; "wave_shuffle_i32")]
#[test_case(ReduceStrategy::Hybrid, 64, Dtype::I64 ; "hybrid_i64")]
fn test_reduce_sample_passes(strategy: ReduceStrategy, tile: usize, dtype: Dtype) {
    let acc = accelerator(16);
    let verdict = run_reduce(
        &acc,
        &ReduceParams {
            len: 4096,
            tile,
            strategy,
            dtype,
            seed: 7,
            any_length: false,
        },
    )
    .unwrap();
    assert!(verdict.passed, "{verdict}");
}

#[test]
fn test_reduce_sample_any_length() {
    let acc = accelerator(16);
    let verdict = run_reduce(
        &acc,
        &ReduceParams {
            len: 3001,
            tile: 0,
            strategy: ReduceStrategy::Hybrid,
            dtype: Dtype::F32,
            seed: 3,
            any_length: true,
        },
    )
    .unwrap();
    assert!(verdict.passed, "{verdict}");
}

#[test]
fn test_reduce_sample_reports_bad_tile() {
    let acc = accelerator(16);
    let result = run_reduce(
        &acc,
        &ReduceParams {
            len: 1000,
            tile: 64,
            strategy: ReduceStrategy::GroupMemory,
            dtype: Dtype::F32,
            seed: 0,
            any_length: false,
        },
    );
    assert!(result.is_err());
}

#[test_case(false ; "rotate")]
#[test_case(true ; "naive")]
fn test_matmul_sample_passes(naive: bool) {
    let acc = accelerator(8);
    let verdict = run_matmul(
        &acc,
        &MatmulParams {
            dims: MatrixDims::new(13, 21, 10),
            dtype: Dtype::F32,
            seed: 11,
            naive,
        },
    )
    .unwrap();
    assert!(verdict.passed, "{verdict}");
}

#[test_case(Dtype::F32 ; "f32")]
#[test_case(Dtype::I64 ; "i64")]
fn test_saxpy_sample_passes(dtype: Dtype) {
    let acc = accelerator(8);
    let verdict = run_saxpy(
        &acc,
        &SaxpyParams {
            len: 1000,
            a: 3.0,
            dtype,
            seed: 5,
        },
    )
    .unwrap();
    assert!(verdict.passed, "{verdict}");
}

#[test]
fn test_tiles_sample_passes() {
    let acc = accelerator(4);
    let verdict = run_tiles(&acc, [6, 8], [3, 2], false).unwrap();
    assert!(verdict.passed, "{verdict}");
    assert!(verdict.detail.starts_with("8 tiles"), "{verdict}");
}

#[test]
fn test_config_file_drives_sample() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tilegrid.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "[accelerator]\nwave_width = 8\ncheck_barriers = true").unwrap();

    let acc = Accelerator::new(AcceleratorConfig::load(&path).unwrap()).unwrap();
    assert_eq!(acc.wave_width(), 8);

    let verdict = run_reduce(
        &acc,
        &ReduceParams {
            len: 512,
            tile: 8,
            strategy: ReduceStrategy::WaveShuffle,
            dtype: Dtype::F64,
            seed: 1,
            any_length: false,
        },
    )
    .unwrap();
    assert!(verdict.passed, "{verdict}");
}

#[test]
fn test_overrides_turn_barrier_checks_off() {
    let mut config =
        AcceleratorConfig::from_toml_str("[accelerator]\ncheck_barriers = true").unwrap();
    DeviceOverrides::default().apply(&mut config);
    assert!(config.check_barriers);

    DeviceOverrides {
        wave_width: Some(16),
        workers: None,
        check_barriers: Some(false),
    }
    .apply(&mut config);
    assert!(!config.check_barriers);
    assert_eq!(config.wave_width, 16);
    assert_eq!(config.worker_threads, None);
}
