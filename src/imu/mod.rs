//! Inertial measurement handling: samples, biases and on-manifold preintegration.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod preintegration;
pub mod types;

pub use preintegration::{
    Matrix9, Matrix15, PreintegratedDelta, PreintegratedImuMeasurements, PreintegrationParams,
};
pub use types::{ImuBias, ImuSample, NavState};

/// Errors raised while accumulating inertial samples.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImuError {
    /// Integration step must be positive and finite
    #[error("Invalid integration step dt = {0}")]
    InvalidTimeStep(f64),

    /// Sample contains NaN or infinite components
    #[error("Non-finite IMU measurement")]
    NonFiniteMeasurement,
}

/// Which inertial relative-motion constraint the estimator builds per epoch.
///
/// `Standard` adds a 9-dimensional pose/velocity constraint and models the bias
/// drift with a separate continuity factor. `Combined` estimates the bias jointly
/// inside a 15-dimensional constraint whose covariance is propagated together
/// with the bias random walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InertialFactorKind {
    #[default]
    Standard,
    Combined,
}

impl fmt::Display for InertialFactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InertialFactorKind::Standard => write!(f, "Standard"),
            InertialFactorKind::Combined => write!(f, "Combined"),
        }
    }
}
