//! Replay from files: log parsing, geodetic conversion, worker thread and
//! trajectory output

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use imu_gnss_fusion::estimator::{EstimatorWorker, FusionConfig, FusionEstimator};
use imu_gnss_fusion::geodetic::{
    FixConverter, FrameAlignment, GeodeticConfig, Llh, ecef_to_enu, llh_to_ecef,
};
use imu_gnss_fusion::imu::{ImuSample, InertialFactorKind};
use imu_gnss_fusion::io::{SensorLog, SensorRecord, TumWriter, load_tum_trajectory};
use imu_gnss_fusion::{AbsoluteFix, SensorEvent};
use nalgebra::Vector3;
use std::f64::consts::PI;
use std::fs;

mod fusion_test_utils;
use fusion_test_utils::*;

#[test]
fn test_frame_alignment_closed_form() {
    let mut theta = -2.0 * PI;
    while theta <= 2.0 * PI {
        let local = FrameAlignment::new(theta).apply(&Vector3::new(1.0, 0.0, 0.0));
        // (1, 0) rotated by θ is (cos θ, sin θ); then (x, y) → (y, −x).
        assert!((local.x - theta.sin()).abs() < 1e-12, "theta {theta}");
        assert!((local.y + theta.cos()).abs() < 1e-12, "theta {theta}");
        assert_eq!(local.z, 0.0);
        theta += 0.1;
    }
}

#[test]
fn test_gnss_offsets_map_through_alignment() {
    let reference = Llh::new(39.7917427, 116.4986266, 22.1).unwrap();
    let converter = FixConverter::new(reference, FrameAlignment::from_degrees(30.0));

    let east =
        Llh::new(reference.latitude, reference.longitude + 1e-4, reference.altitude).unwrap();
    let enu = ecef_to_enu(&reference, &llh_to_ecef(&east));
    let local = converter.to_local(&east);

    let theta = 30.0_f64.to_radians();
    let x = enu.x * theta.cos() - enu.y * theta.sin();
    let y = enu.x * theta.sin() + enu.y * theta.cos();
    assert!((local - Vector3::new(y, -x, 0.0)).norm() < 1e-9);
    assert!((local.norm() - enu.xy().norm()).abs() < 1e-9);
}

#[test]
fn test_log_file_replay_writes_trajectory() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("replay.log");
    let trajectory_path = dir.path().join("trajectory.txt");

    let reference = Llh::new(39.7917427, 116.4986266, 22.1).unwrap();
    let mut records = Vec::new();
    let mut t = 0.0;
    for k in 0..3 {
        for _ in 0..100 {
            t += IMU_DT;
            records.push(SensorRecord::Imu(ImuSample::stationary(t)));
        }
        if k == 1 {
            records.push(SensorRecord::Gnss {
                timestamp: t,
                llh: reference,
            });
        } else {
            records.push(SensorRecord::Fix(AbsoluteFix::new(t, Vector3::zeros())));
        }
    }
    SensorLog::new(records).save(&log_path).unwrap();

    let log = SensorLog::load(&log_path).unwrap();
    assert_eq!(log.imu_count(), 300);
    let geodetic = GeodeticConfig {
        reference,
        alignment_degrees: 211.8,
    };
    let converter = FixConverter::from_config(&geodetic).unwrap();
    let events = log.events(Some(&converter)).unwrap();

    let mut estimator = default_estimator();
    let outputs = replay(&mut estimator, events);
    assert_eq!(outputs.len(), 3);

    let mut writer = TumWriter::create(&trajectory_path).unwrap();
    for output in &outputs {
        writer.write_epoch(output).unwrap();
    }
    writer.flush().unwrap();
    drop(writer);

    let trajectory = load_tum_trajectory(&trajectory_path).unwrap();
    assert_eq!(trajectory.len(), 3);
    for (pose, output) in trajectory.iter().zip(&outputs) {
        assert!((pose.timestamp - output.timestamp).abs() < 1e-6);
        assert!((pose.pose.translation() - output.snapshot.position()).norm() < 1e-5);
    }
}

#[test]
fn test_worker_matches_sequential_replay() {
    let events = constant_reading_stream(3, 50, Vector3::new(0.2, 0.0, 0.0), |k| {
        let t = 0.25 * k as f64;
        Vector3::new(0.1 * t * t, 0.0, 0.0)
    });

    let mut sequential = default_estimator();
    let expected = replay(&mut sequential, events.clone());

    let worker = EstimatorWorker::spawn(default_estimator(), 8).unwrap();
    for event in events {
        worker.submit(event).unwrap();
    }
    let (estimator, results) = worker.shutdown().unwrap();
    let outputs: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(outputs.len(), expected.len());
    for (a, b) in outputs.iter().zip(&expected) {
        assert_eq!(a.epoch, b.epoch);
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.status, b.status);
        assert!((a.snapshot.position() - b.snapshot.position()).norm() < 1e-9);
        assert!((a.snapshot.velocity - b.snapshot.velocity).norm() < 1e-9);
    }
    assert_eq!(estimator.epoch_count(), sequential.epoch_count());
}

#[test]
fn test_toml_configuration_drives_estimator() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fusion.toml");
    fs::write(
        &path,
        r#"
imu_dt = 0.01
inertial_factor = "combined"

[noise]
correction_sigma = 0.5

[optimizer]
max_iterations = 20
linear_solver = "dense_cholesky"
"#,
    )
    .unwrap();

    let config = FusionConfig::load(&path).unwrap();
    assert_eq!(config.imu_dt, 0.01);
    assert_eq!(config.inertial_factor, InertialFactorKind::Combined);
    assert_eq!(config.noise.correction_sigma, 0.5);
    assert_eq!(config.optimizer.max_iterations, 20);

    let mut estimator = FusionEstimator::new(config).unwrap();
    let mut t = 0.0;
    for _ in 0..100 {
        t += 0.01;
        estimator.handle(SensorEvent::Imu(ImuSample::stationary(t))).unwrap();
    }
    let output = estimator
        .handle(SensorEvent::Fix(AbsoluteFix::new(t, Vector3::zeros())))
        .unwrap()
        .unwrap();
    assert_eq!(output.epoch, 1);
    assert!(output.snapshot.position().norm() < 0.5);
}
