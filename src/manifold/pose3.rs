//! Rigid body pose: orientation in SO(3) plus position in R³.
//!
//! The pose is treated as the product manifold SO(3) × R³ rather than SE(3):
//! a tangent step `[δθ, δp]` updates `R ← R·Exp(δθ)` and `p ← p + R·δp`.
//! This is the retraction used by the inertial factors, so the rotation and the
//! body-frame position perturbation stay decoupled in every Jacobian.

use crate::manifold::{LieGroup, Manifold, SO3, SO3Tangent, Tangent};
use nalgebra::{DMatrix, DVector, Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3};
use std::fmt;

/// Pose of the body frame in the navigation frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Pose3 {
    rotation: SO3,
    translation: Vector3<f64>,
}

impl Default for Pose3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for Pose3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.translation;
        let [qx, qy, qz, qw] = self.rotation.coeffs();
        write!(
            f,
            "Pose3(translation: [{:.4}, {:.4}, {:.4}], quaternion: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            t.x, t.y, t.z, qw, qx, qy, qz
        )
    }
}

impl Pose3 {
    pub fn new(rotation: SO3, translation: Vector3<f64>) -> Self {
        Pose3 {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Pose3::new(SO3::identity(), Vector3::zeros())
    }

    /// Build from a quaternion and a translation.
    pub fn from_quaternion_translation(q: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Pose3::new(SO3::new(q), translation)
    }

    pub fn rotation(&self) -> &SO3 {
        &self.rotation
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.rotation_matrix()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            self.rotation.quaternion(),
        )
    }

    /// Transform a point from the body frame into the navigation frame.
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.act(point, None, None) + self.translation
    }
}

impl Manifold for Pose3 {
    const DOF: usize = 6;

    fn retract(&self, delta: &[f64]) -> Self {
        let dtheta = SO3Tangent::from_components(delta[0], delta[1], delta[2]);
        let dp = Vector3::new(delta[3], delta[4], delta[5]);
        Pose3 {
            rotation: self.rotation.right_plus(&dtheta, None, None),
            translation: self.translation + self.rotation.act(&dp, None, None),
        }
    }

    fn local(&self, other: &Self) -> DVector<f64> {
        let dtheta = other.rotation.right_minus(&self.rotation, None, None);
        let dp = self.rotation_matrix().transpose() * (other.translation - self.translation);
        let omega = dtheta.axis_angle();
        DVector::from_column_slice(&[omega.x, omega.y, omega.z, dp.x, dp.y, dp.z])
    }

    fn local_jacobian(&self, other: &Self) -> DMatrix<f64> {
        let dtheta = other.rotation.right_minus(&self.rotation, None, None);
        let mut jacobian = DMatrix::zeros(6, 6);
        jacobian
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&dtheta.right_jacobian_inv());
        jacobian
            .fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&(self.rotation_matrix().transpose() * other.rotation_matrix()));
        jacobian
    }
}
