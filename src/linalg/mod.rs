//! Damped normal-equation assembly and solvers.
//!
//! The optimizer linearizes every residual block into whitened `(r, J)` pairs
//! and accumulates them into [`NormalEquations`]:
//!
//! ```text
//! H = Σ JᵀJ      g = Σ Jᵀr
//! (H + λI) δ = −g
//! ```
//!
//! Two interchangeable solvers are provided behind [`LinearSolver`]:
//! - [`SparseCholeskySolver`]: faer sparse LLᵀ with the symbolic analysis cached
//!   across iterations of one solve (the sparsity pattern never changes)
//! - [`DenseCholeskySolver`]: nalgebra dense LLᵀ, useful for small graphs and as
//!   a reference in tests

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod cholesky;
pub mod dense;

pub use cholesky::SparseCholeskySolver;
pub use dense::DenseCholeskySolver;

/// Linear algebra errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinAlgError {
    /// Cholesky factorization failed (matrix not positive definite)
    #[error("Factorization failed: {0}")]
    FactorizationFailed(String),

    /// Sparse matrix could not be assembled
    #[error("Matrix construction failed: {0}")]
    MatrixConstruction(String),

    /// Vector or matrix sizes disagree
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Solution contains NaN or infinite values
    #[error("Non-finite solution")]
    NonFiniteSolution,
}

pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Available linear solvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearSolverType {
    #[default]
    SparseCholesky,
    DenseCholesky,
}

impl LinearSolverType {
    pub fn create(self) -> Box<dyn LinearSolver> {
        match self {
            LinearSolverType::SparseCholesky => Box::new(SparseCholeskySolver::new()),
            LinearSolverType::DenseCholesky => Box::new(DenseCholeskySolver::new()),
        }
    }
}

impl fmt::Display for LinearSolverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolverType::SparseCholesky => write!(f, "Sparse Cholesky"),
            LinearSolverType::DenseCholesky => write!(f, "Dense Cholesky"),
        }
    }
}

/// Gauss-Newton normal equations `H = JᵀJ`, `g = Jᵀr`.
///
/// The Hessian is kept as a list of `(row, col, value)` entries; duplicates are
/// summed when a solver builds its matrix.
#[derive(Debug, Clone)]
pub struct NormalEquations {
    dimension: usize,
    gradient: DVector<f64>,
    hessian: Vec<(usize, usize, f64)>,
}

impl NormalEquations {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            gradient: DVector::zeros(dimension),
            hessian: Vec::new(),
        }
    }

    /// Accumulate one whitened residual block.
    ///
    /// `columns` lists `(first column, width)` for each Jacobian column block,
    /// in the same order as the Jacobian's columns.
    pub fn add_block(
        &mut self,
        columns: &[(usize, usize)],
        jacobian: &DMatrix<f64>,
        residual: &DVector<f64>,
    ) -> LinAlgResult<()> {
        let width: usize = columns.iter().map(|(_, w)| w).sum();
        if width != jacobian.ncols() {
            return Err(LinAlgError::DimensionMismatch {
                expected: jacobian.ncols(),
                actual: width,
            });
        }
        if residual.len() != jacobian.nrows() {
            return Err(LinAlgError::DimensionMismatch {
                expected: jacobian.nrows(),
                actual: residual.len(),
            });
        }
        if let Some(&(start, w)) = columns.iter().find(|(start, w)| start + w > self.dimension) {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.dimension,
                actual: start + w,
            });
        }

        let jt_r = jacobian.transpose() * residual;
        let jt_j = jacobian.transpose() * jacobian;

        let mut local_col = 0;
        for &(start, w) in columns {
            let mut rows = self.gradient.rows_mut(start, w);
            rows += jt_r.rows(local_col, w);
            local_col += w;
        }

        let mut local_row = 0;
        for &(row_start, row_w) in columns {
            let mut local_col = 0;
            for &(col_start, col_w) in columns {
                for i in 0..row_w {
                    for j in 0..col_w {
                        let value = jt_j[(local_row + i, local_col + j)];
                        if value != 0.0 {
                            self.hessian.push((row_start + i, col_start + j, value));
                        }
                    }
                }
                local_col += col_w;
            }
            local_row += row_w;
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn gradient(&self) -> &DVector<f64> {
        &self.gradient
    }

    pub fn hessian_entries(&self) -> &[(usize, usize, f64)] {
        &self.hessian
    }

    /// `H x` without forming `H`.
    pub fn hessian_times(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.dimension);
        for &(r, c, v) in &self.hessian {
            out[r] += v * x[c];
        }
        out
    }

    /// Dense `H`.
    pub fn dense_hessian(&self) -> DMatrix<f64> {
        let mut h = DMatrix::zeros(self.dimension, self.dimension);
        for &(r, c, v) in &self.hessian {
            h[(r, c)] += v;
        }
        h
    }
}

/// Solver for the damped system `(H + λI) δ = −g`.
pub trait LinearSolver: Send {
    fn solve_damped(&mut self, system: &NormalEquations, lambda: f64) -> LinAlgResult<DVector<f64>>;

    /// Drop any cached analysis (the sparsity pattern changed).
    fn reset(&mut self);
}

pub(crate) fn check_finite(solution: DVector<f64>) -> LinAlgResult<DVector<f64>> {
    if solution.iter().all(|v| v.is_finite()) {
        Ok(solution)
    } else {
        Err(LinAlgError::NonFiniteSolution)
    }
}
