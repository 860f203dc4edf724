//! Factor implementations for the fusion graph.
//!
//! Every factor maps the current values of a few variables to a residual vector
//! and, when requested, to the Jacobian of that residual with respect to the
//! tangent-space perturbations of those variables. The Jacobian has one column
//! block per key, in the order returned by [`Factor::keys`], each as wide as the
//! variable's degrees of freedom.
//!
//! # Factor Types
//!
//! - [`PriorFactor`]: anchors a pose, velocity or bias to a fixed value
//! - [`ImuFactor`]: preintegrated relative motion between two pose/velocity pairs
//! - [`CombinedImuFactor`]: the same, with the bias estimated jointly
//! - [`BiasBetweenFactor`]: zero-mean random walk between consecutive biases
//! - [`GpsFactor`]: absolute position of one pose
//!
//! Residuals are raw; whitening by the noise model happens in the residual block.

use nalgebra::{DMatrix, DVector};
use std::fmt;

use crate::core::{CoreResult, StateStore, VariableId};

pub mod bias_between;
pub mod gps_factor;
pub mod imu_factor;
pub mod prior;

pub use bias_between::BiasBetweenFactor;
pub use gps_factor::GpsFactor;
pub use imu_factor::{CombinedImuFactor, ImuFactor};
pub use prior::PriorFactor;

/// Category of a factor, used for bookkeeping and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FactorKind {
    Prior,
    Imu,
    CombinedImu,
    BiasBetween,
    Gps,
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FactorKind::Prior => "Prior",
            FactorKind::Imu => "Imu",
            FactorKind::CombinedImu => "CombinedImu",
            FactorKind::BiasBetween => "BiasBetween",
            FactorKind::Gps => "Gps",
        };
        write!(f, "{name}")
    }
}

/// Residual function over a set of state variables.
pub trait Factor: fmt::Debug + Send + Sync {
    fn kind(&self) -> FactorKind;

    /// Variables this factor depends on, in Jacobian column order.
    fn keys(&self) -> &[VariableId];

    /// Residual dimension.
    fn dimension(&self) -> usize;

    /// Residual at `values` and, if `compute_jacobian`, its Jacobian.
    fn linearize(
        &self,
        values: &StateStore,
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)>;
}
