// benches/gpu_benchmarks.rs — Accelerator vs software flow benchmarks.
//
// Mirrors benchmarks.rs structure. Each software calculator has an
// accelerated counterpart in the same group for direct comparison.
//
//   cargo bench --features gpu --bench gpu_benchmarks
//
// CRITERION + GPU CAVEATS
// ────────────────────────
// Criterion measures wall time including upload, bind group creation,
// submit and the blocking readback. The simulators wait for the flow
// before emitting events, so this is the number that matters.
//
// The first iterations pay pipeline compilation on some drivers, so the
// warm-up time is set explicitly.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use event_simulator::config::{SimulatorConfig, SimulatorType};
use event_simulator::flow::{Backend, DenseFlowCalculator, DenseFlowConfig, DenseFlowPreset, LkDenseFlow};
use event_simulator::flow::{LkSparseFlow, SparseFlowCalculator, SparseFlowConfig};
use event_simulator::gpu::{GpuDenseFlow, GpuSparseFlow};
use event_simulator::image::{Frame, Image};
use event_simulator::simulator::EventSimulator;

// ============================================================
// Shared helpers
// ============================================================

fn make_scene(w: usize, h: usize, dx: usize, dy: usize) -> Frame {
    let mut img = Image::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let base = (((x + dx) * 200 / w) + ((y + dy) * 55 / h)) as u8;
            img.set(x, y, base);
        }
    }
    for rect in 0..6 {
        let rx = (50 + rect * 50 + dx) % w;
        let ry = (30 + (rect % 3) * 70 + dy) % h;
        let bright = 180u8.wrapping_add(rect as u8 * 10);
        for y in ry..(ry + 40).min(h) {
            for x in rx..(rx + 50).min(w) {
                img.set(x, y, bright);
            }
        }
    }
    img
}

// ============================================================
// Sparse flow: software vs accelerator, varying corner count
// ============================================================

fn bench_sparse(c: &mut Criterion) {
    let a = make_scene(346, 260, 0, 0);
    let b2 = make_scene(346, 260, 3, 2);

    let mut group = c.benchmark_group("sparse_flow");
    group.warm_up_time(Duration::from_secs(2));

    for max_corners in [100, 400] {
        let mut config = SparseFlowConfig::default();
        config.detector.max_corners = max_corners;

        group.bench_function(BenchmarkId::new("cpu", max_corners), |b| {
            let mut calc = LkSparseFlow::new(config);
            b.iter(|| calc.calculate(&a, &b2).unwrap())
        });

        group.bench_function(BenchmarkId::new("gpu", max_corners), |b| {
            let mut calc = GpuSparseFlow::new(config).expect("no GPU adapter");
            b.iter(|| calc.calculate(&a, &b2).unwrap())
        });
    }

    group.finish();
}

// ============================================================
// Dense flow: software vs accelerator per preset
// ============================================================

fn bench_dense(c: &mut Criterion) {
    let a = make_scene(346, 260, 0, 0);
    let b2 = make_scene(346, 260, 2, 1);

    let mut group = c.benchmark_group("dense_flow");
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(10);

    for preset in [DenseFlowPreset::Fast, DenseFlowPreset::HighQuality] {
        let label = format!("{preset:?}");
        group.bench_function(BenchmarkId::new("cpu", &label), |b| {
            let mut calc = LkDenseFlow::new(DenseFlowConfig::preset(preset));
            b.iter(|| calc.calculate(&a, &b2).unwrap())
        });
        group.bench_function(BenchmarkId::new("gpu", &label), |b| {
            let mut calc = GpuDenseFlow::with_preset(preset).expect("no GPU adapter");
            b.iter(|| calc.calculate(&a, &b2).unwrap())
        });
    }

    group.finish();
}

// ============================================================
// Whole simulators on one pair
// ============================================================

fn bench_simulators(c: &mut Criterion) {
    let prev = make_scene(346, 260, 0, 0);
    let curr = make_scene(346, 260, 3, 2);

    let mut group = c.benchmark_group("simulate_pair");
    group.warm_up_time(Duration::from_secs(3));
    group.sample_size(10);

    for name in ["dense_farneback_cpu", "dense_farneback_gpu", "sparse_cpu", "sparse_gpu", "difference_cpu", "difference_gpu"] {
        let simulator_type: SimulatorType = name.parse().unwrap();
        // One simulator per benchmark so the device is created once; the
        // reference settles after the first pair, which only removes the
        // event emission cost, not the flow.
        let mut sim = SimulatorConfig::new(simulator_type).build().expect("no GPU adapter");
        sim.setup(prev.size()).unwrap();
        group.bench_function(BenchmarkId::new("get_events", name), |b| {
            b.iter(|| sim.get_events(&prev, &curr, 0, 33_333_333).unwrap())
        });
    }

    group.finish();
}

// ============================================================
// Device setup overhead: new() per pair vs reuse
// ============================================================
// Shows how much keeping the calculator (device, pipelines, buffers)
// alive saves over constructing one for every pair.

fn bench_setup_overhead(c: &mut Criterion) {
    let a = make_scene(346, 260, 0, 0);
    let b2 = make_scene(346, 260, 3, 2);
    let config = SparseFlowConfig::default();

    let mut group = c.benchmark_group("gpu_setup");
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(10);

    group.bench_function("sparse_new_per_pair", |b| {
        b.iter(|| GpuSparseFlow::new(config).unwrap().calculate(&a, &b2).unwrap())
    });

    group.bench_function("sparse_reuse", |b| {
        let mut calc = GpuSparseFlow::new(config).unwrap();
        b.iter(|| calc.calculate(&a, &b2).unwrap())
    });

    let calc = GpuSparseFlow::new(config).unwrap();
    eprintln!("{} ({})", calc.device(), Backend::Accelerator);

    group.finish();
}

criterion_group!(benches, bench_sparse, bench_dense, bench_simulators, bench_setup_overhead);
criterion_main!(benches);
