//! Inertial measurement and navigation state types.

use crate::manifold::{Manifold, Pose3};
use nalgebra::{DMatrix, DVector, Vector3, Vector6};
use std::fmt;

/// A single gravity-compensated IMU reading in the body frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Seconds
    pub timestamp: f64,
    /// m/s²
    pub linear_acceleration: Vector3<f64>,
    /// rad/s
    pub angular_velocity: Vector3<f64>,
}

impl ImuSample {
    pub fn new(
        timestamp: f64,
        linear_acceleration: Vector3<f64>,
        angular_velocity: Vector3<f64>,
    ) -> Self {
        Self {
            timestamp,
            linear_acceleration,
            angular_velocity,
        }
    }

    /// Zero acceleration and zero rotation rate.
    pub fn stationary(timestamp: f64) -> Self {
        Self::new(timestamp, Vector3::zeros(), Vector3::zeros())
    }

    pub fn is_finite(&self) -> bool {
        self.timestamp.is_finite()
            && self.linear_acceleration.iter().all(|v| v.is_finite())
            && self.angular_velocity.iter().all(|v| v.is_finite())
    }
}

/// Accelerometer and gyroscope bias.
///
/// As a 6-vector the order is `[accelerometer, gyroscope]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuBias {
    pub accelerometer: Vector3<f64>,
    pub gyroscope: Vector3<f64>,
}

impl ImuBias {
    pub fn new(accelerometer: Vector3<f64>, gyroscope: Vector3<f64>) -> Self {
        Self {
            accelerometer,
            gyroscope,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_vector(v: &Vector6<f64>) -> Self {
        Self::new(
            Vector3::new(v[0], v[1], v[2]),
            Vector3::new(v[3], v[4], v[5]),
        )
    }

    pub fn to_vector(&self) -> Vector6<f64> {
        let a = self.accelerometer;
        let g = self.gyroscope;
        Vector6::new(a.x, a.y, a.z, g.x, g.y, g.z)
    }

    /// Remove the bias from a raw reading, returning `(acc, gyro)`.
    pub fn correct(
        &self,
        acceleration: &Vector3<f64>,
        angular_velocity: &Vector3<f64>,
    ) -> (Vector3<f64>, Vector3<f64>) {
        (
            acceleration - self.accelerometer,
            angular_velocity - self.gyroscope,
        )
    }
}

impl fmt::Display for ImuBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.accelerometer;
        let g = self.gyroscope;
        write!(
            f,
            "ImuBias(acc: [{:.6}, {:.6}, {:.6}], gyro: [{:.6}, {:.6}, {:.6}])",
            a.x, a.y, a.z, g.x, g.y, g.z
        )
    }
}

impl Manifold for ImuBias {
    const DOF: usize = 6;

    fn retract(&self, delta: &[f64]) -> Self {
        Self::new(
            self.accelerometer + Vector3::new(delta[0], delta[1], delta[2]),
            self.gyroscope + Vector3::new(delta[3], delta[4], delta[5]),
        )
    }

    fn local(&self, other: &Self) -> DVector<f64> {
        let d = other.to_vector() - self.to_vector();
        DVector::from_column_slice(d.as_slice())
    }

    fn local_jacobian(&self, _other: &Self) -> DMatrix<f64> {
        DMatrix::identity(6, 6)
    }
}

/// Pose and velocity of the platform at one instant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NavState {
    pub pose: Pose3,
    pub velocity: Vector3<f64>,
}

impl NavState {
    pub fn new(pose: Pose3, velocity: Vector3<f64>) -> Self {
        Self { pose, velocity }
    }

    pub fn position(&self) -> Vector3<f64> {
        self.pose.translation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bias_vector_order() {
        let bias = ImuBias::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0));
        let v = bias.to_vector();
        assert_eq!(v, Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0));
        assert_eq!(ImuBias::from_vector(&v), bias);
    }

    #[test]
    fn test_bias_correct() {
        let bias = ImuBias::new(Vector3::new(0.1, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.01));
        let (acc, gyro) = bias.correct(&Vector3::new(1.0, 0.0, 0.0), &Vector3::zeros());
        assert_eq!(acc, Vector3::new(0.9, 0.0, 0.0));
        assert_eq!(gyro, Vector3::new(0.0, 0.0, -0.01));
    }

    #[test]
    fn test_bias_retract_local() {
        let a = ImuBias::zero();
        let b = ImuBias::new(Vector3::new(0.1, -0.2, 0.3), Vector3::new(1e-3, 0.0, -1e-3));
        let delta = a.local(&b);
        assert_eq!(delta.len(), 6);
        assert_eq!(a.retract(delta.as_slice()), b);
    }

    #[test]
    fn test_sample_finiteness() {
        assert!(ImuSample::stationary(0.0).is_finite());
        let bad = ImuSample::new(0.0, Vector3::new(f64::NAN, 0.0, 0.0), Vector3::zeros());
        assert!(!bad.is_finite());
    }
}
