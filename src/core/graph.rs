//! Append-only factor graph.
//!
//! Residual blocks are only ever added. Each block records the row at which its
//! whitened residual starts in the stacked residual vector.

use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::core::{CoreError, CoreResult, NoiseModel, ResidualBlock, StateStore};
use crate::factors::{Factor, FactorKind};

#[derive(Debug, Default)]
pub struct FactorGraph {
    residual_blocks: Vec<ResidualBlock>,
    total_residual_dimension: usize,
    kind_counts: BTreeMap<FactorKind, usize>,
}

impl FactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factor with its noise model and return the residual block id.
    pub fn add_factor(&mut self, factor: Box<dyn Factor>, noise: NoiseModel) -> CoreResult<usize> {
        if factor.dimension() != noise.dimension() {
            return Err(CoreError::DimensionMismatch {
                factor: factor.dimension(),
                noise: noise.dimension(),
            });
        }

        let block_id = self.residual_blocks.len();
        let dimension = factor.dimension();
        *self.kind_counts.entry(factor.kind()).or_insert(0) += 1;
        self.residual_blocks.push(ResidualBlock::new(
            block_id,
            self.total_residual_dimension,
            factor,
            noise,
        ));
        self.total_residual_dimension += dimension;
        Ok(block_id)
    }

    pub fn len(&self) -> usize {
        self.residual_blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residual_blocks.is_empty()
    }

    pub fn count(&self, kind: FactorKind) -> usize {
        self.kind_counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_residual_dimension(&self) -> usize {
        self.total_residual_dimension
    }

    pub fn residual_blocks(&self) -> &[ResidualBlock] {
        &self.residual_blocks
    }

    /// Check that every referenced variable exists in `values`.
    pub fn validate(&self, values: &StateStore) -> CoreResult<()> {
        for block in &self.residual_blocks {
            if let Some(missing) = block.keys().iter().find(|key| !values.contains(key)) {
                return Err(CoreError::UnknownVariable(*missing));
            }
        }
        Ok(())
    }

    /// Total cost `½ Σ ‖W r‖²` at `values`, summed in block order so repeated
    /// evaluations are bit-identical.
    pub fn cost(&self, values: &StateStore) -> CoreResult<f64> {
        let costs = self
            .residual_blocks
            .par_iter()
            .map(|block| block.cost(values))
            .collect::<CoreResult<Vec<f64>>>()?;
        Ok(costs.into_iter().sum())
    }
}
