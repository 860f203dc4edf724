//! Epoch solve cost
//!
//! Every fix re-solves the whole graph, so the cost of one epoch grows with the
//! number of epochs already in the graph. This benchmark measures:
//!
//! - a full Levenberg-Marquardt solve of graphs with 10 to 200 epochs, for both
//!   linear solvers
//! - closing one more epoch on a 50-epoch graph
//! - preintegrating one epoch worth of IMU samples (200 at 5 ms)
//!
//! ## Usage
//!
//! ```bash
//! cargo bench --bench epoch_solve
//! ```

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use imu_gnss_fusion::estimator::{FusionConfig, FusionEstimator};
use imu_gnss_fusion::imu::{ImuBias, InertialFactorKind, PreintegratedImuMeasurements};
use imu_gnss_fusion::linalg::LinearSolverType;
use imu_gnss_fusion::optimizer::{LevenbergMarquardt, LevenbergMarquardtConfig};
use imu_gnss_fusion::{AbsoluteFix, ImuSample, SensorEvent};
use nalgebra::Vector3;
use std::hint::black_box;

const IMU_DT: f64 = 0.005;
const SAMPLES_PER_EPOCH: usize = 200;

/// Estimator after `epochs` fixes along a slow planar curve.
fn build_estimator(epochs: usize, kind: InertialFactorKind) -> FusionEstimator {
    let config = FusionConfig::default().with_inertial_factor(kind);
    let Ok(mut estimator) = FusionEstimator::new(config) else {
        panic!("default configuration must be valid");
    };

    let acc = Vector3::new(0.1, 0.0, 0.0);
    let gyro = Vector3::new(0.0, 0.0, 0.02);
    let mut t = 0.0;
    for k in 1..=epochs {
        for _ in 0..SAMPLES_PER_EPOCH {
            t += IMU_DT;
            let event = SensorEvent::Imu(ImuSample::new(t, acc, gyro));
            if estimator.handle(event).is_err() {
                panic!("IMU sample rejected at t = {t}");
            }
        }
        let s = k as f64;
        let fix = AbsoluteFix::new(t, Vector3::new(0.05 * s * s, 0.002 * s * s * s, 0.0));
        if estimator.handle(SensorEvent::Fix(fix)).is_err() {
            panic!("fix rejected at t = {t}");
        }
    }
    estimator
}

fn bench_graph_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_solve");
    group.sample_size(10);

    for epochs in [10, 50, 100, 200] {
        let estimator = build_estimator(epochs, InertialFactorKind::Standard);
        let start = estimator.values().clone();

        for solver in [LinearSolverType::SparseCholesky, LinearSolverType::DenseCholesky] {
            if solver == LinearSolverType::DenseCholesky && epochs > 100 {
                continue;
            }
            let optimizer = LevenbergMarquardt::with_config(
                LevenbergMarquardtConfig::new().with_linear_solver(solver),
            );
            group.bench_with_input(
                BenchmarkId::new(solver.to_string(), epochs),
                &epochs,
                |b, _| {
                    b.iter(|| black_box(optimizer.optimize(estimator.graph(), &start)));
                },
            );
        }
    }
    group.finish();
}

fn bench_fix_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("fix_epoch");
    group.sample_size(10);

    let epochs = 50;
    for kind in [InertialFactorKind::Standard, InertialFactorKind::Combined] {
        group.bench_function(BenchmarkId::new(kind.to_string(), epochs), |b| {
            b.iter_batched(
                || estimator_with_pending_samples(epochs, kind),
                |(mut estimator, fix)| black_box(estimator.handle(SensorEvent::Fix(fix))),
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Estimator after `epochs` fixes with one more epoch of samples waiting for
/// the next fix.
fn estimator_with_pending_samples(
    epochs: usize,
    kind: InertialFactorKind,
) -> (FusionEstimator, AbsoluteFix) {
    let mut estimator = build_estimator(epochs, kind);
    let mut t = epochs as f64 * SAMPLES_PER_EPOCH as f64 * IMU_DT;
    for _ in 0..SAMPLES_PER_EPOCH {
        t += IMU_DT;
        let _ = estimator.handle(SensorEvent::Imu(ImuSample::stationary(t)));
    }
    let position = estimator.latest().position();
    (estimator, AbsoluteFix::new(t, position))
}

fn bench_preintegration(c: &mut Criterion) {
    let acc = Vector3::new(0.1, -0.05, 0.0);
    let gyro = Vector3::new(0.001, 0.0, 0.02);

    for kind in [InertialFactorKind::Standard, InertialFactorKind::Combined] {
        let config = FusionConfig::default();
        c.bench_function(&format!("preintegrate_{SAMPLES_PER_EPOCH}_{kind}"), |b| {
            b.iter(|| {
                let mut pim = PreintegratedImuMeasurements::new(
                    config.preintegration_params(),
                    kind,
                    ImuBias::zero(),
                );
                for _ in 0..SAMPLES_PER_EPOCH {
                    let _ = pim.integrate(&acc, &gyro, IMU_DT);
                }
                black_box(pim)
            });
        });
    }
}

criterion_group!(benches, bench_graph_solve, bench_fix_epoch, bench_preintegration);
criterion_main!(benches);
