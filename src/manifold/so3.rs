//! SO(3) - Special Orthogonal Group in 3D
//!
//! Orientation of the body frame with respect to the navigation frame.
//!
//! SO(3) elements are stored as nalgebra's `UnitQuaternion`. Tangent elements are
//! axis-angle vectors in R³: the direction is the rotation axis and the magnitude
//! the angle. The closed forms below follow the
//! [manif](https://github.com/artivis/manif) conventions.

use crate::manifold::{LieGroup, ManifoldError, ManifoldResult, Tangent, skew};
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use std::fmt;

/// Below this squared angle the series expansions are used.
const SMALL_ANGLE_SQUARED: f64 = 1e-10;

const MIN_QUATERNION_NORM_SQUARED: f64 = 1e-12;

/// SO(3) group element representing rotations in 3D.
#[derive(Clone, Debug, PartialEq)]
pub struct SO3 {
    quaternion: UnitQuaternion<f64>,
}

impl fmt::Display for SO3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.quaternion.quaternion();
        write!(
            f,
            "SO3(quaternion: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            q.w, q.i, q.j, q.k
        )
    }
}

/// SO(3) tangent space element (axis-angle vector).
#[derive(Clone, Debug, PartialEq)]
pub struct SO3Tangent {
    data: Vector3<f64>,
}

impl fmt::Display for SO3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "so3(axis-angle: [{:.4}, {:.4}, {:.4}])",
            self.data.x, self.data.y, self.data.z
        )
    }
}

impl Default for SO3 {
    fn default() -> Self {
        SO3::identity()
    }
}

impl SO3 {
    /// Create a new SO(3) element from a unit quaternion.
    pub fn new(quaternion: UnitQuaternion<f64>) -> Self {
        SO3 { quaternion }
    }

    /// Create SO(3) from quaternion coefficients, scalar part last.
    ///
    /// The quaternion is normalized on construction; non-finite or (near) zero
    /// coefficients have no rotation to normalize to and are rejected.
    pub fn from_quaternion_coeffs(x: f64, y: f64, z: f64, w: f64) -> ManifoldResult<Self> {
        let q = Quaternion::new(w, x, y, z);
        let norm_squared = q.norm_squared();
        if !norm_squared.is_finite() || norm_squared < MIN_QUATERNION_NORM_SQUARED {
            return Err(ManifoldError::InvalidElement(format!(
                "quaternion [x: {x}, y: {y}, z: {z}, w: {w}] cannot be normalized"
            )));
        }
        Ok(SO3::new(UnitQuaternion::from_quaternion(q)))
    }

    /// Create SO(3) from Euler angles (roll, pitch, yaw).
    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        SO3::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    /// Create SO(3) from a rotation vector (axis scaled by angle).
    pub fn from_scaled_axis(axis_angle: Vector3<f64>) -> Self {
        SO3::new(UnitQuaternion::from_scaled_axis(axis_angle))
    }

    /// Create SO(3) from a rotation matrix, re-orthonormalizing it.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Self {
        let rotation = nalgebra::Rotation3::from_matrix(matrix);
        SO3::new(UnitQuaternion::from_rotation_matrix(&rotation))
    }

    /// Get the quaternion representation.
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.quaternion
    }

    /// Get the rotation matrix (3x3).
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.quaternion.to_rotation_matrix().into_inner()
    }

    /// Quaternion coefficients as `[x, y, z, w]`.
    pub fn coeffs(&self) -> [f64; 4] {
        let q = self.quaternion.quaternion();
        [q.i, q.j, q.k, q.w]
    }

    /// Angular distance to another rotation, in radians.
    pub fn angle_to(&self, other: &SO3) -> f64 {
        self.quaternion.angle_to(&other.quaternion)
    }
}

impl LieGroup for SO3 {
    type Element = SO3;
    type TangentVector = SO3Tangent;
    type JacobianMatrix = Matrix3<f64>;

    const DOF: usize = 3;

    fn identity() -> Self::Element {
        SO3 {
            quaternion: UnitQuaternion::identity(),
        }
    }

    /// SO3 inverse.
    ///
    /// # Equation 140: Jacobian of Inverse for SO(3)
    /// J_R⁻¹_R = -Adj(R) = -R
    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::Element {
        if let Some(jac) = jacobian {
            *jac = -self.rotation_matrix();
        }

        SO3 {
            quaternion: self.quaternion.inverse(),
        }
    }

    /// SO3 composition.
    ///
    /// # Equation 141 / 142
    /// J_QR_R = Adj(R⁻¹) = Rᵀ, J_QR_Q = I
    fn compose(
        &self,
        other: &Self::Element,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::Element {
        if let Some(jac_self) = jacobian_self {
            *jac_self = other.rotation_matrix().transpose();
        }

        if let Some(jac_other) = jacobian_other {
            *jac_other = Matrix3::identity();
        }

        SO3 {
            quaternion: self.quaternion * other.quaternion,
        }
    }

    /// Logarithmic map.
    ///
    /// # Equation 133: Logarithmic map for unit quaternions (S³)
    /// θu = Log(q) = (2 / ||v||) * v * arctan(||v||, w) ∈ R³
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        let q = self.quaternion.quaternion();
        let sin_angle_squared = q.i * q.i + q.j * q.j + q.k * q.k;

        let log_coeff = if sin_angle_squared > f64::EPSILON {
            let sin_angle = sin_angle_squared.sqrt();
            let cos_angle = q.w;

            // q and -q are the same rotation; keep the angle in [-π, π].
            let two_angle = 2.0
                * if cos_angle < 0.0 {
                    f64::atan2(-sin_angle, -cos_angle)
                } else {
                    f64::atan2(sin_angle, cos_angle)
                };

            two_angle / sin_angle
        } else {
            2.0 / q.w
        };

        let axis_angle = SO3Tangent::new(Vector3::new(
            q.i * log_coeff,
            q.j * log_coeff,
            q.k * log_coeff,
        ));

        if let Some(jac) = jacobian {
            *jac = axis_angle.right_jacobian_inv();
        }

        axis_angle
    }

    /// Right plus: R ⊕ φ = R * exp(φ)
    ///
    /// # Equation 148
    /// J_R⊕θ_R = R(θ)ᵀ, J_R⊕θ_θ = J_r(θ)
    fn right_plus(
        &self,
        tangent: &Self::TangentVector,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_tangent: Option<&mut Self::JacobianMatrix>,
    ) -> Self::Element {
        let exp_tangent = tangent.exp(None);

        if let Some(jac_self) = jacobian_self {
            *jac_self = exp_tangent.rotation_matrix().transpose();
        }

        if let Some(jac_tangent) = jacobian_tangent {
            *jac_tangent = tangent.right_jacobian();
        }

        self.compose(&exp_tangent, None, None)
    }

    /// Right minus: R1 ⊖ R2 = log(R2ᵀ * R1)
    ///
    /// # Equation 149
    /// J_Q⊖R_Q = J_r⁻¹(θ), J_Q⊖R_R = -J_l⁻¹(θ)
    fn right_minus(
        &self,
        other: &Self::Element,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::TangentVector {
        let result = other.inverse(None).compose(self, None, None).log(None);

        if let Some(jac_self) = jacobian_self {
            *jac_self = result.right_jacobian_inv();
        }

        if let Some(jac_other) = jacobian_other {
            *jac_other = -result.left_jacobian_inv();
        }

        result
    }

    fn act(
        &self,
        vector: &Vector3<f64>,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_vector: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        if let Some(jac_self) = jacobian_self {
            // -R [v]×
            *jac_self = -self.rotation_matrix() * skew(vector);
        }

        if let Some(jac_vector) = jacobian_vector {
            *jac_vector = self.rotation_matrix();
        }

        self.quaternion * vector
    }

    fn normalize(&mut self) {
        self.quaternion.renormalize();
    }

    fn is_valid(&self, tolerance: f64) -> bool {
        (self.quaternion.quaternion().norm() - 1.0).abs() < tolerance
    }
}

impl SO3Tangent {
    /// Create a new tangent vector from an axis-angle vector.
    pub fn new(axis_angle: Vector3<f64>) -> Self {
        SO3Tangent { data: axis_angle }
    }

    /// Create SO3Tangent from individual components.
    pub fn from_components(x: f64, y: f64, z: f64) -> Self {
        SO3Tangent::new(Vector3::new(x, y, z))
    }

    /// Get the axis-angle vector.
    pub fn axis_angle(&self) -> Vector3<f64> {
        self.data
    }

    /// Get the angle of rotation.
    pub fn angle(&self) -> f64 {
        self.data.norm()
    }
}

impl Tangent<SO3> for SO3Tangent {
    /// Exponential map.
    ///
    /// # Equation 132: Exponential map for unit quaternions (S³)
    /// q = Exp(θu) = cos(θ/2) + u sin(θ/2) ∈ H
    fn exp(&self, jacobian: Option<&mut Matrix3<f64>>) -> SO3 {
        let theta_sq = self.data.norm_squared();

        let quaternion = if theta_sq > SMALL_ANGLE_SQUARED {
            UnitQuaternion::from_scaled_axis(self.data)
        } else {
            // First-order quaternion, renormalized.
            UnitQuaternion::from_quaternion(Quaternion::new(
                1.0,
                self.data.x / 2.0,
                self.data.y / 2.0,
                self.data.z / 2.0,
            ))
        };

        if let Some(jac) = jacobian {
            *jac = self.right_jacobian();
        }

        SO3 { quaternion }
    }

    /// Right Jacobian: Jr(θ) = Jl(-θ) = Jl(θ)ᵀ
    fn right_jacobian(&self) -> Matrix3<f64> {
        self.left_jacobian().transpose()
    }

    /// Left Jacobian.
    ///
    /// # Equation 145
    /// Jl(θ) = I + (1 - cos θ)/θ² [θ]ₓ + (θ - sin θ)/θ³ [θ]ₓ²
    fn left_jacobian(&self) -> Matrix3<f64> {
        let theta_sq = self.data.norm_squared();
        let k = skew(&self.data);
        let k2 = k * k;

        if theta_sq <= SMALL_ANGLE_SQUARED {
            return Matrix3::identity() + 0.5 * k + k2 / 6.0;
        }

        let theta = theta_sq.sqrt();
        let (sin_theta, cos_theta) = theta.sin_cos();

        Matrix3::identity()
            + ((1.0 - cos_theta) / theta_sq) * k
            + ((theta - sin_theta) / (theta_sq * theta)) * k2
    }

    /// Inverse right Jacobian: Jr⁻¹(θ) = Jl⁻¹(θ)ᵀ
    fn right_jacobian_inv(&self) -> Matrix3<f64> {
        self.left_jacobian_inv().transpose()
    }

    /// Inverse left Jacobian.
    ///
    /// # Equation 146
    /// Jl⁻¹(θ) = I - ½[θ]ₓ + (1/θ² - (1 + cos θ)/(2θ sin θ)) [θ]ₓ²
    fn left_jacobian_inv(&self) -> Matrix3<f64> {
        let theta_sq = self.data.norm_squared();
        let k = skew(&self.data);
        let k2 = k * k;

        if theta_sq <= SMALL_ANGLE_SQUARED {
            return Matrix3::identity() - 0.5 * k + k2 / 12.0;
        }

        let theta = theta_sq.sqrt();
        let (sin_theta, cos_theta) = theta.sin_cos();

        Matrix3::identity() - 0.5 * k
            + (1.0 / theta_sq - (1.0 + cos_theta) / (2.0 * theta * sin_theta)) * k2
    }

    fn zero() -> SO3Tangent {
        SO3Tangent::new(Vector3::zeros())
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}
