//! Manifold representations for optimization on non-Euclidean state spaces.
//!
//! The estimator optimizes three kinds of variables per epoch:
//! - **Pose3**: orientation (SO(3)) and position (R³)
//! - **Velocity**: a plain R³ vector
//! - **ImuBias**: accelerometer and gyroscope bias, R⁶
//!
//! Lie group  | dim | X ∈ M  | Constraint | T_X M    | Exp(T)        | Comp. | Action
//! ---------- | --- | ------ | ---------- | -------- | ------------- | ----- | ------
//! Rⁿ, +      | n   | v ∈ Rⁿ | -          | v ∈ Rⁿ   | v = exp(v)    | v₁+v₂ | v + x
//! SO(3), ·   | 3   | R      | RᵀR = I    | [θ] ∈ R³ | R = exp([θ]x) | R₁R₂  | Rx
//!
//! Rotations are never subtracted component-wise: every orientation residual goes
//! through the logarithmic map into the 3-parameter tangent space.
//!
//! The conventions (right perturbations, optional in/out Jacobians) follow the
//! [manif](https://github.com/artivis/manif) C++ library.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use std::fmt::Debug;
use thiserror::Error;

pub mod pose3;
pub mod so3;

pub use pose3::Pose3;
pub use so3::{SO3, SO3Tangent};

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManifoldError {
    /// Input that cannot be projected onto the manifold
    #[error("Invalid manifold element: {0}")]
    InvalidElement(String),
}

/// Result type for manifold operations.
pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// Core trait for Lie group operations.
///
/// Only the operations the estimator relies on are part of the trait: group
/// composition and inverse, the exp/log pair, right plus/minus and the action on
/// 3D vectors. Jacobians are returned through optional out-parameters so callers
/// only pay for the derivatives they need.
pub trait LieGroup: Clone + Debug + PartialEq {
    /// The Lie group element type
    type Element: Clone + Debug + PartialEq;

    /// The tangent space vector type
    type TangentVector: Tangent<Self>;

    /// The Jacobian matrix type
    type JacobianMatrix: Clone + Debug + PartialEq;

    /// Degrees of freedom - dimension of the tangent space
    const DOF: usize;

    /// Get the identity element of the group.
    fn identity() -> Self::Element;

    /// Compute the inverse g⁻¹, optionally with ∂(g⁻¹)/∂g.
    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::Element;

    /// Compose g₁ ∘ g₂, optionally with both Jacobians.
    fn compose(
        &self,
        other: &Self::Element,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::Element;

    /// Logarithmic map from the group to its tangent space.
    ///
    /// The optional Jacobian is ∂log(g)^∨/∂g, i.e. the inverse right Jacobian.
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector;

    /// Right plus operation: g ⊞ φ = g ∘ exp(φ^∧).
    fn right_plus(
        &self,
        tangent: &Self::TangentVector,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_tangent: Option<&mut Self::JacobianMatrix>,
    ) -> Self::Element;

    /// Right minus operation: g₁ ⊟ g₂ = log(g₂⁻¹ ∘ g₁)^∨.
    fn right_minus(
        &self,
        other: &Self::Element,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::TangentVector;

    /// Act on a vector v: g ⊙ v.
    fn act(
        &self,
        vector: &Vector3<f64>,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_vector: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64>;

    /// Normalize/project the element back onto the manifold.
    fn normalize(&mut self);

    /// Check if the element is approximately on the manifold.
    fn is_valid(&self, tolerance: f64) -> bool;
}

/// Trait for Lie algebra (tangent space) operations.
pub trait Tangent<G: LieGroup>: Clone + Debug + PartialEq {
    /// Dimension of the tangent space (same as Lie group DOF)
    const DIM: usize = G::DOF;

    /// Exponential map to the Lie group, optionally with the right Jacobian.
    fn exp(&self, jacobian: Option<&mut G::JacobianMatrix>) -> G::Element;

    /// Right Jacobian Jr: exp((φ + δφ)^∧) ≈ exp(φ^∧) ∘ exp((Jr δφ)^∧)
    fn right_jacobian(&self) -> G::JacobianMatrix;

    /// Left Jacobian Jl: exp((φ + δφ)^∧) ≈ exp((Jl δφ)^∧) ∘ exp(φ^∧)
    fn left_jacobian(&self) -> G::JacobianMatrix;

    /// Inverse of right Jacobian Jr⁻¹.
    fn right_jacobian_inv(&self) -> G::JacobianMatrix;

    /// Inverse of left Jacobian Jl⁻¹.
    fn left_jacobian_inv(&self) -> G::JacobianMatrix;

    /// Zero tangent vector.
    fn zero() -> G::TangentVector;

    /// Check if the tangent vector is approximately zero.
    fn is_zero(&self, tolerance: f64) -> bool;
}

/// A variable type the optimizer can update through a local retraction.
///
/// `retract` and `local` are inverse to each other around `self`:
/// `x.retract(&x.local(y)) == y`. `local_jacobian` is the derivative of
/// `self.local(other)` with respect to a retraction perturbation of `other`,
/// which is what prior factors need.
pub trait Manifold: Clone + Debug + Send + Sync {
    /// Tangent space dimension.
    const DOF: usize;

    /// Apply a tangent-space step. `delta` must have exactly `DOF` entries.
    fn retract(&self, delta: &[f64]) -> Self;

    /// Tangent vector taking `self` to `other`.
    fn local(&self, other: &Self) -> DVector<f64>;

    /// ∂ local(self, other ⊞ δ) / ∂δ at δ = 0.
    fn local_jacobian(&self, other: &Self) -> DMatrix<f64>;
}

impl Manifold for Vector3<f64> {
    const DOF: usize = 3;

    fn retract(&self, delta: &[f64]) -> Self {
        self + Vector3::new(delta[0], delta[1], delta[2])
    }

    fn local(&self, other: &Self) -> DVector<f64> {
        DVector::from_column_slice((other - self).as_slice())
    }

    fn local_jacobian(&self, _other: &Self) -> DMatrix<f64> {
        DMatrix::identity(3, 3)
    }
}

/// Skew-symmetric matrix [v]ₓ such that [v]ₓ w = v × w.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}
