//! Error types for the imu-gnss-fusion library
//!
//! Every layer has its own `thiserror` enum; they all fold into [`FusionError`]
//! so callers of the estimator deal with a single error type.

use crate::{
    core::CoreError, geodetic::GeodeticError, imu::ImuError, io::IoError, linalg::LinAlgError,
    manifold::ManifoldError, optimizer::OptimizerError,
};
use std::num::ParseFloatError;
use thiserror::Error;

/// Main result type used throughout the library
pub type FusionResult<T> = Result<T, FusionError>;

/// Main error type for the library
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    /// Graph and variable registry errors
    #[error("Graph error: {0}")]
    Graph(String),

    /// Inertial preintegration errors
    #[error("IMU error: {0}")]
    Imu(String),

    /// Manifold operations errors
    #[error("Manifold error: {0}")]
    Manifold(String),

    /// Linear algebra related errors
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// Solver related errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// IO related errors (file loading, parsing, etc.)
    #[error("IO error: {0}")]
    Io(String),

    /// Coordinate conversion errors
    #[error("Geodetic error: {0}")]
    Geodetic(String),

    /// Invalid configuration values
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A sensor measurement that cannot enter the graph (NaN or infinite values)
    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),

    /// A sensor timestamp did not increase
    #[error("Out-of-order {stream} timestamp: {current} does not follow {previous}")]
    OutOfOrder {
        stream: &'static str,
        previous: f64,
        current: f64,
    },

    /// An epoch was requested without any inertial data
    #[error("No inertial samples integrated before epoch {epoch}")]
    EmptyPreintegration { epoch: usize },

    /// Thread synchronization errors
    #[error("Thread synchronization error: {0}")]
    ThreadError(String),
}

impl From<std::io::Error> for FusionError {
    fn from(err: std::io::Error) -> Self {
        FusionError::Io(err.to_string())
    }
}

impl From<ParseFloatError> for FusionError {
    fn from(err: ParseFloatError) -> Self {
        FusionError::InvalidConfig(format!("Failed to parse float: {err}"))
    }
}

impl From<toml::de::Error> for FusionError {
    fn from(err: toml::de::Error) -> Self {
        FusionError::InvalidConfig(err.to_string())
    }
}

impl From<CoreError> for FusionError {
    fn from(err: CoreError) -> Self {
        FusionError::Graph(err.to_string())
    }
}

impl From<ImuError> for FusionError {
    fn from(err: ImuError) -> Self {
        FusionError::Imu(err.to_string())
    }
}

impl From<ManifoldError> for FusionError {
    fn from(err: ManifoldError) -> Self {
        FusionError::Manifold(err.to_string())
    }
}

impl From<LinAlgError> for FusionError {
    fn from(err: LinAlgError) -> Self {
        FusionError::LinearAlgebra(err.to_string())
    }
}

impl From<OptimizerError> for FusionError {
    fn from(err: OptimizerError) -> Self {
        FusionError::Solver(err.to_string())
    }
}

impl From<IoError> for FusionError {
    fn from(err: IoError) -> Self {
        FusionError::Io(err.to_string())
    }
}

impl From<GeodeticError> for FusionError {
    fn from(err: GeodeticError) -> Self {
        FusionError::Geodetic(err.to_string())
    }
}
