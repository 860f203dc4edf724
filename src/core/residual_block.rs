use nalgebra::{DMatrix, DVector};

use crate::core::{CoreResult, NoiseModel, StateStore, VariableId};
use crate::factors::{Factor, FactorKind};

/// One factor together with its noise model and its rows in the stacked residual.
#[derive(Debug)]
pub struct ResidualBlock {
    pub residual_block_id: usize,
    pub residual_row_start_idx: usize,
    pub factor: Box<dyn Factor>,
    pub noise: NoiseModel,
}

impl ResidualBlock {
    pub fn new(
        residual_block_id: usize,
        residual_row_start_idx: usize,
        factor: Box<dyn Factor>,
        noise: NoiseModel,
    ) -> Self {
        ResidualBlock {
            residual_block_id,
            residual_row_start_idx,
            factor,
            noise,
        }
    }

    pub fn kind(&self) -> FactorKind {
        self.factor.kind()
    }

    pub fn keys(&self) -> &[VariableId] {
        self.factor.keys()
    }

    pub fn dimension(&self) -> usize {
        self.factor.dimension()
    }

    /// Whitened residual and, when requested, whitened Jacobian.
    pub fn residual_and_jacobian(
        &self,
        values: &StateStore,
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let (mut residual, mut jacobian) = self.factor.linearize(values, compute_jacobian)?;
        self.noise.whiten_residual(&mut residual);
        if let Some(jac) = jacobian.as_mut() {
            self.noise.whiten_jacobian(jac);
        }
        Ok((residual, jacobian))
    }

    /// `½‖W r‖²` at `values`.
    pub fn cost(&self, values: &StateStore) -> CoreResult<f64> {
        let (residual, _) = self.residual_and_jacobian(values, false)?;
        Ok(0.5 * residual.norm_squared())
    }
}
