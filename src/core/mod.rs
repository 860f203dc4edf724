//! Graph bookkeeping: typed variable registry, noise models, residual blocks
//! and the append-only factor graph.

use thiserror::Error;

pub mod graph;
pub mod noise;
pub mod residual_block;
pub mod variable;

pub use graph::FactorGraph;
pub use noise::{NoiseModel, NoiseModels};
pub use residual_block::ResidualBlock;
pub use variable::{EPOCH_DOF, StateSnapshot, StateStore, StateVariable, VariableId, VariableKind};

/// Errors raised while building or evaluating the factor graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A factor references a variable that is not in the state store
    #[error("Unknown variable: {0}")]
    UnknownVariable(VariableId),

    /// Epochs must be inserted contiguously starting at zero
    #[error("Non-contiguous epoch: expected {expected}, got {actual}")]
    NonContiguousEpoch { expected: usize, actual: usize },

    /// Invalid noise model parameters
    #[error("Invalid noise model: {0}")]
    InvalidNoiseModel(String),

    /// Factor and noise model disagree on the residual dimension
    #[error("Dimension mismatch: factor {factor}, noise model {noise}")]
    DimensionMismatch { factor: usize, noise: usize },

    /// Step vector length does not match the state tangent dimension
    #[error("Invalid step length: expected {expected}, got {actual}")]
    InvalidStepLength { expected: usize, actual: usize },
}

/// Result type for graph operations.
pub type CoreResult<T> = Result<T, CoreError>;
