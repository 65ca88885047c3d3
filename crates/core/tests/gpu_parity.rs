#![cfg(feature = "gpu")]
//! GPU against host parity
//!
//! Runs the same fuel sequence through both backends and compares snapshots.
//! Without a usable adapter every test returns early (graceful degradation).

use approx::assert_abs_diff_eq;
use fire_plasma_core::{
    ExecutionContext, FireConfig, FireEngine, IntensityGrid, Quality, SequenceFuel,
};

/// Float tolerance between backends; the kernels differ only in summation order
const TOLERANCE: f32 = 1e-3;

const FUEL: [f32; 7] = [64.0, 128.0, 96.0, 71.0, 110.0, 85.0, 127.0];

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn gpu() -> Option<ExecutionContext> {
    match ExecutionContext::gpu() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            println!("Skipping GPU parity test: {e}");
            None
        }
    }
}

fn run(ctx: &ExecutionContext, config: FireConfig, steps: usize) -> IntensityGrid {
    let mut engine =
        FireEngine::with_fuel_source(ctx, config, SequenceFuel::new(FUEL.to_vec())).unwrap();
    engine.init(ctx).unwrap();
    for _ in 0..steps {
        engine.update(ctx).unwrap();
        engine.flush_to_host().unwrap();
    }
    engine.snapshot()
}

fn assert_grids_match(gpu: &IntensityGrid, host: &IntensityGrid) {
    assert_eq!(gpu.dims(), host.dims());
    for (i, (g, h)) in gpu.as_slice().iter().zip(host.as_slice()).enumerate() {
        assert_abs_diff_eq!(*g, *h, epsilon = TOLERANCE);
        assert!(g.is_finite(), "cell {i} is not finite");
    }
}

#[test]
fn test_gpu_self_test() {
    let Some(ctx) = gpu() else { return };
    ctx.self_test().unwrap();
}

#[test]
fn test_basic_matches_host() {
    let Some(gpu_ctx) = gpu() else { return };
    let host_ctx = ExecutionContext::host(None).unwrap();
    let config = FireConfig::new(64, 16, Quality::Basic);

    let gpu_grid = run(&gpu_ctx, config, 50);
    let host_grid = run(&host_ctx, config, 50);
    assert_grids_match(&gpu_grid, &host_grid);
}

#[test]
fn test_supersampled_matches_host() {
    let Some(gpu_ctx) = gpu() else { return };
    let host_ctx = ExecutionContext::host(None).unwrap();
    let config = FireConfig::new(16, 4, Quality::Supersampled);

    let gpu_grid = run(&gpu_ctx, config, 30);
    let host_grid = run(&host_ctx, config, 30);
    assert_grids_match(&gpu_grid, &host_grid);
}

#[test]
fn test_gpu_snapshot_changes_only_on_flush() {
    let Some(ctx) = gpu() else { return };
    let mut engine = FireEngine::with_fuel_source(
        &ctx,
        FireConfig::new(8, 4, Quality::Basic),
        SequenceFuel::new(vec![100.0]),
    )
    .unwrap();
    engine.init(&ctx).unwrap();

    engine.update(&ctx).unwrap();
    engine.update(&ctx).unwrap();
    ctx.drain().unwrap();
    assert!(engine.host_intensity().iter().all(|&v| v == 0.0));

    engine.flush_to_host().unwrap();
    assert_eq!(engine.snapshot().get(2, 0), 100.0);
    assert_abs_diff_eq!(engine.snapshot().get(2, 1), 98.0, epsilon = TOLERANCE);
}

#[test]
fn test_gpu_write_then_read_current() {
    let Some(ctx) = gpu() else { return };
    let mut engine = FireEngine::new(&ctx, FireConfig::new(8, 4, Quality::Basic)).unwrap();
    engine.init(&ctx).unwrap();

    let seed: Vec<f32> = (0..32).map(|i| i as f32).collect();
    engine.write_current(&ctx, &seed).unwrap();
    assert_eq!(engine.read_current(&ctx).unwrap().as_slice(), seed.as_slice());
}
