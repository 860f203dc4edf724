//! Properties of IMU preintegration that hold independently of the graph

#![allow(clippy::unwrap_used)]

use imu_gnss_fusion::imu::{
    ImuBias, InertialFactorKind, NavState, PreintegratedImuMeasurements, PreintegrationParams,
};
use imu_gnss_fusion::manifold::{LieGroup, Pose3, SO3};
use nalgebra::Vector3;

const DT: f64 = 0.005;

fn integrate_constant(
    kind: InertialFactorKind,
    acc: Vector3<f64>,
    gyro: Vector3<f64>,
    samples: usize,
) -> PreintegratedImuMeasurements {
    let mut pim =
        PreintegratedImuMeasurements::new(PreintegrationParams::default(), kind, ImuBias::zero());
    for _ in 0..samples {
        pim.integrate(&acc, &gyro, DT).unwrap();
    }
    pim
}

#[test]
fn test_zero_motion_yields_zero_deltas() {
    for kind in [InertialFactorKind::Standard, InertialFactorKind::Combined] {
        let pim = integrate_constant(kind, Vector3::zeros(), Vector3::zeros(), 200);
        let duration = pim.delta_time();
        assert!((duration - 1.0).abs() < 1e-12);

        let delta = pim.bias_corrected_delta(&ImuBias::zero());
        assert!(delta.rotation.angle_to(&SO3::identity()) < 1e-12);
        assert!(delta.velocity.norm() < 1e-12);
        assert!(delta.position.norm() < 1e-12);

        let initial_velocity = Vector3::new(1.5, -0.5, 0.25);
        let start = NavState::new(
            Pose3::new(SO3::from_euler_angles(0.0, 0.0, 0.3), Vector3::new(10.0, 2.0, 0.0)),
            initial_velocity,
        );
        let end = pim.predict(&start, &ImuBias::zero());

        assert!(
            (end.position() - start.position() - initial_velocity * duration).norm() < 1e-9
        );
        assert!((end.velocity - initial_velocity).norm() < 1e-12);
        assert!(end.pose.rotation().angle_to(start.pose.rotation()) < 1e-12);
    }
}

#[test]
fn test_constant_acceleration_matches_kinematics() {
    let acc = Vector3::new(0.3, -0.1, 0.0);
    let pim = integrate_constant(
        InertialFactorKind::Standard,
        acc,
        Vector3::zeros(),
        400,
    );
    let t = pim.delta_time();

    let delta = pim.bias_corrected_delta(&ImuBias::zero());
    assert!((delta.velocity - acc * t).norm() < 1e-9);
    assert!((delta.position - 0.5 * acc * t * t).norm() < 1e-9);
}

#[test]
fn test_constant_yaw_rate_accumulates_rotation() {
    let rate = 0.2;
    let pim = integrate_constant(
        InertialFactorKind::Standard,
        Vector3::zeros(),
        Vector3::new(0.0, 0.0, rate),
        200,
    );
    let expected = SO3::from_euler_angles(0.0, 0.0, rate * pim.delta_time());
    assert!(pim.delta_rotation().angle_to(&expected) < 1e-9);
}

#[test]
fn test_covariance_grows_with_duration() {
    let short =
        integrate_constant(InertialFactorKind::Standard, Vector3::zeros(), Vector3::zeros(), 10);
    let long =
        integrate_constant(InertialFactorKind::Standard, Vector3::zeros(), Vector3::zeros(), 100);

    for i in 0..9 {
        assert!(long.covariance()[(i, i)] > short.covariance()[(i, i)]);
    }
    assert!(short.combined_covariance().is_none());

    let combined =
        integrate_constant(InertialFactorKind::Combined, Vector3::zeros(), Vector3::zeros(), 100);
    let cov = combined.combined_covariance().unwrap();
    assert!((cov - cov.transpose()).norm() < 1e-12);
    assert!((*cov).cholesky().is_some());
}

#[test]
fn test_bias_correction_is_first_order() {
    let acc = Vector3::new(0.2, 0.0, 0.0);
    let pim = integrate_constant(InertialFactorKind::Standard, acc, Vector3::zeros(), 200);

    let offset = Vector3::new(0.01, 0.0, 0.0);
    let corrected = pim.bias_corrected_delta(&ImuBias::new(offset, Vector3::zeros()));
    let reintegrated = integrate_constant(
        InertialFactorKind::Standard,
        acc - offset,
        Vector3::zeros(),
        200,
    );

    let expected = reintegrated.bias_corrected_delta(&ImuBias::zero());
    assert!((corrected.velocity - expected.velocity).norm() < 1e-9);
    assert!((corrected.position - expected.position).norm() < 1e-9);
}

#[test]
fn test_reset_restarts_accumulation() {
    let mut pim = integrate_constant(
        InertialFactorKind::Standard,
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::zeros(),
        20,
    );
    let bias = ImuBias::new(Vector3::new(0.01, 0.0, 0.0), Vector3::zeros());
    pim.reset(bias);

    assert!(pim.is_empty());
    assert_eq!(pim.sample_count(), 0);
    assert_eq!(pim.delta_time(), 0.0);
    assert_eq!(pim.bias_hat(), &bias);
    assert!(pim.integrate(&Vector3::zeros(), &Vector3::zeros(), 0.0).is_err());
    assert!(pim.is_empty());
}
