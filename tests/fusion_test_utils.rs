//! Shared utilities for estimator integration tests
//!
//! Event streams are deterministic so the scenarios reproduce exactly.

#![allow(dead_code)]

use imu_gnss_fusion::estimator::{FusionConfig, FusionEstimator};
use imu_gnss_fusion::imu::ImuSample;
use imu_gnss_fusion::{AbsoluteFix, EpochOutput, SensorEvent};
use nalgebra::Vector3;

pub const IMU_DT: f64 = 0.005;

/// `count` motionless samples after `start`; returns them and the last timestamp.
pub fn stationary_samples(start: f64, count: usize) -> (Vec<SensorEvent>, f64) {
    let mut t = start;
    let events = (0..count)
        .map(|_| {
            t += IMU_DT;
            SensorEvent::Imu(ImuSample::stationary(t))
        })
        .collect();
    (events, t)
}

/// Repeated blocks of `samples_per_epoch` IMU readings followed by a fix at
/// the origin.
pub fn stationary_stream(epochs: usize, samples_per_epoch: usize) -> Vec<SensorEvent> {
    constant_reading_stream(epochs, samples_per_epoch, Vector3::zeros(), |_| Vector3::zeros())
}

/// Like [`stationary_stream`] but every IMU sample reports `acceleration`, and
/// fix `k` (1-based) is placed at `fix_position(k)`.
pub fn constant_reading_stream(
    epochs: usize,
    samples_per_epoch: usize,
    acceleration: Vector3<f64>,
    fix_position: impl Fn(usize) -> Vector3<f64>,
) -> Vec<SensorEvent> {
    let mut events = Vec::with_capacity(epochs * (samples_per_epoch + 1));
    let mut t = 0.0;
    for k in 1..=epochs {
        for _ in 0..samples_per_epoch {
            t += IMU_DT;
            events.push(SensorEvent::Imu(ImuSample::new(t, acceleration, Vector3::zeros())));
        }
        events.push(SensorEvent::Fix(AbsoluteFix::new(t, fix_position(k))));
    }
    events
}

/// Feed `events` in order and collect every solved epoch.
pub fn replay(estimator: &mut FusionEstimator, events: Vec<SensorEvent>) -> Vec<EpochOutput> {
    events
        .into_iter()
        .filter_map(|event| estimator.handle(event).expect("event should be accepted"))
        .collect()
}

pub fn default_estimator() -> FusionEstimator {
    FusionEstimator::new(FusionConfig::default()).expect("default configuration is valid")
}
