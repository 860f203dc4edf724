//! Gaussian noise models.
//!
//! A noise model is stored as its square-root information matrix `W` with
//! `WᵀW = Σ⁻¹`, so that `‖W r‖²` is the squared Mahalanobis norm of a residual.
//! Whitening is applied to both the residual and its Jacobian before they reach
//! the normal equations.

use crate::core::{CoreError, CoreResult};
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq)]
pub enum NoiseModel {
    /// Independent components: `W = diag(1/σ)`
    Diagonal { inv_sigmas: DVector<f64> },
    /// Correlated components: `W = L⁻¹` with `Σ = L Lᵀ`
    Gaussian { sqrt_information: DMatrix<f64> },
}

impl NoiseModel {
    /// Independent components with the given standard deviations.
    pub fn diagonal(sigmas: &[f64]) -> CoreResult<Self> {
        if sigmas.is_empty() {
            return Err(CoreError::InvalidNoiseModel(
                "diagonal noise model needs at least one sigma".to_string(),
            ));
        }
        if let Some(bad) = sigmas.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return Err(CoreError::InvalidNoiseModel(format!(
                "sigma must be positive and finite, got {bad}"
            )));
        }
        Ok(NoiseModel::Diagonal {
            inv_sigmas: DVector::from_iterator(sigmas.len(), sigmas.iter().map(|s| 1.0 / s)),
        })
    }

    /// Same standard deviation on every component.
    pub fn isotropic(dimension: usize, sigma: f64) -> CoreResult<Self> {
        Self::diagonal(&vec![sigma; dimension])
    }

    /// Full covariance matrix; must be symmetric positive definite.
    pub fn from_covariance(covariance: &DMatrix<f64>) -> CoreResult<Self> {
        let n = covariance.nrows();
        if n == 0 || covariance.ncols() != n {
            return Err(CoreError::InvalidNoiseModel(format!(
                "covariance must be square and non-empty, got {}x{}",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::InvalidNoiseModel(
                "covariance contains non-finite entries".to_string(),
            ));
        }

        let symmetric = (covariance + covariance.transpose()) * 0.5;
        let cholesky = symmetric.cholesky().ok_or_else(|| {
            CoreError::InvalidNoiseModel("covariance is not positive definite".to_string())
        })?;
        let lower = cholesky.l();
        let sqrt_information = lower
            .solve_lower_triangular(&DMatrix::identity(n, n))
            .ok_or_else(|| {
                CoreError::InvalidNoiseModel("covariance factor is singular".to_string())
            })?;

        Ok(NoiseModel::Gaussian { sqrt_information })
    }

    pub fn dimension(&self) -> usize {
        match self {
            NoiseModel::Diagonal { inv_sigmas } => inv_sigmas.len(),
            NoiseModel::Gaussian { sqrt_information } => sqrt_information.nrows(),
        }
    }

    /// Whiten a residual in place.
    pub fn whiten_residual(&self, residual: &mut DVector<f64>) {
        match self {
            NoiseModel::Diagonal { inv_sigmas } => residual.component_mul_assign(inv_sigmas),
            NoiseModel::Gaussian { sqrt_information } => *residual = sqrt_information * &*residual,
        }
    }

    /// Whiten the rows of a Jacobian in place.
    pub fn whiten_jacobian(&self, jacobian: &mut DMatrix<f64>) {
        match self {
            NoiseModel::Diagonal { inv_sigmas } => {
                for (mut row, w) in jacobian.row_iter_mut().zip(inv_sigmas.iter()) {
                    row *= *w;
                }
            }
            NoiseModel::Gaussian { sqrt_information } => *jacobian = sqrt_information * &*jacobian,
        }
    }
}

/// The fixed set of noise models the estimator attaches to its factors.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseModels {
    /// Pose prior, ordered `[rotation(3), position(3)]`
    pub prior_pose: NoiseModel,
    pub prior_velocity: NoiseModel,
    pub prior_bias: NoiseModel,
    /// Absolute position fix
    pub correction: NoiseModel,
    /// Zero-mean bias random walk between consecutive epochs
    pub bias_between: NoiseModel,
}

impl NoiseModels {
    pub fn new(
        prior_pose_sigmas: &[f64; 6],
        prior_velocity_sigma: f64,
        prior_bias_sigma: f64,
        correction_sigma: f64,
        bias_between_sigma: f64,
    ) -> CoreResult<Self> {
        Ok(Self {
            prior_pose: NoiseModel::diagonal(prior_pose_sigmas)?,
            prior_velocity: NoiseModel::isotropic(3, prior_velocity_sigma)?,
            prior_bias: NoiseModel::isotropic(6, prior_bias_sigma)?,
            correction: NoiseModel::isotropic(3, correction_sigma)?,
            bias_between: NoiseModel::isotropic(6, bias_between_sigma)?,
        })
    }
}
