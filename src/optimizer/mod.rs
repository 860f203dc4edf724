//! Nonlinear least-squares solver for the fusion graph.
//!
//! The graph is solved with Levenberg-Marquardt: every iteration linearizes all
//! residual blocks at the current estimate, solves the damped normal equations,
//! and accepts or rejects the step from the ratio of actual to predicted cost
//! reduction. Non-convergence is reported through [`SolverStatus`], never hidden.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::core::{CoreError, StateStore};
use crate::linalg::LinAlgError;

pub mod levenberg_marquardt;

pub use levenberg_marquardt::{
    LevenbergMarquardt, LevenbergMarquardtConfig, LevenbergMarquardtSummary,
};

/// Errors that abort a solve before it can produce an estimate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizerError {
    /// Graph and values are inconsistent
    #[error("Graph error: {0}")]
    Graph(#[from] CoreError),

    /// Normal equations could not be assembled
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(#[from] LinAlgError),

    /// A factor returned no Jacobian when one was requested
    #[error("Residual block {0} returned no Jacobian")]
    MissingJacobian(usize),
}

/// Which termination criterion fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceReason {
    /// Relative cost decrease below tolerance
    RelativeErrorDecrease,
    /// Absolute cost decrease below tolerance
    AbsoluteErrorDecrease,
    /// Step norm below tolerance
    StepNorm,
    /// Cost below the error threshold
    ErrorThreshold,
}

impl fmt::Display for ConvergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceReason::RelativeErrorDecrease => write!(f, "relative error decrease"),
            ConvergenceReason::AbsoluteErrorDecrease => write!(f, "absolute error decrease"),
            ConvergenceReason::StepNorm => write!(f, "step norm"),
            ConvergenceReason::ErrorThreshold => write!(f, "error threshold"),
        }
    }
}

/// Outcome of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Converged(ConvergenceReason),
    /// Maximum iteration count reached
    NotConverged,
    /// Cost became non-finite or no damping could reduce it
    Diverged,
}

impl SolverStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, SolverStatus::Converged(_))
    }
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverStatus::Converged(reason) => write!(f, "Converged ({reason})"),
            SolverStatus::NotConverged => write!(f, "Maximum iterations reached"),
            SolverStatus::Diverged => write!(f, "Diverged"),
        }
    }
}

/// Detailed convergence information.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceInfo {
    pub final_gradient_norm: f64,
    pub final_parameter_update_norm: f64,
    pub cost_evaluations: usize,
    pub jacobian_evaluations: usize,
}

impl fmt::Display for ConvergenceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Final gradient norm: {:.2e}, Final parameter update norm: {:.2e}, Cost evaluations: {}, Jacobian evaluations: {}",
            self.final_gradient_norm,
            self.final_parameter_update_norm,
            self.cost_evaluations,
            self.jacobian_evaluations
        )
    }
}

/// Solved values plus solve statistics.
///
/// `values` always holds the last accepted iterate, whatever the status.
#[derive(Debug, Clone)]
pub struct SolverResult {
    pub values: StateStore,
    pub status: SolverStatus,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Number of linearizations performed
    pub iterations: usize,
    pub elapsed: Duration,
    pub convergence_info: ConvergenceInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(
            SolverStatus::Converged(ConvergenceReason::StepNorm).to_string(),
            "Converged (step norm)"
        );
        assert_eq!(SolverStatus::NotConverged.to_string(), "Maximum iterations reached");
        assert!(!SolverStatus::Diverged.is_converged());
    }

    #[test]
    fn test_optimizer_error_from_linalg() {
        let err: OptimizerError = LinAlgError::NonFiniteSolution.into();
        assert_eq!(err.to_string(), "Linear algebra error: Non-finite solution");
    }
}
