//! Bias continuity between consecutive epochs.
//!
//! The bias is modelled as a random walk with a zero-mean increment, so the
//! residual is simply `b_j − b_i` in the `[acc, gyro]` order.

use nalgebra::{DMatrix, DVector};

use crate::core::{CoreResult, StateStore, VariableId};
use crate::factors::{Factor, FactorKind};

#[derive(Debug, Clone)]
pub struct BiasBetweenFactor {
    keys: [VariableId; 2],
}

impl BiasBetweenFactor {
    pub fn new(epoch_i: usize, epoch_j: usize) -> Self {
        Self {
            keys: [VariableId::bias(epoch_i), VariableId::bias(epoch_j)],
        }
    }
}

impl Factor for BiasBetweenFactor {
    fn kind(&self) -> FactorKind {
        FactorKind::BiasBetween
    }

    fn keys(&self) -> &[VariableId] {
        &self.keys
    }

    fn dimension(&self) -> usize {
        6
    }

    fn linearize(
        &self,
        values: &StateStore,
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let b_i = values.bias(self.keys[0].epoch)?.to_vector();
        let b_j = values.bias(self.keys[1].epoch)?.to_vector();
        let residual = DVector::from_column_slice((b_j - b_i).as_slice());

        let jacobian = compute_jacobian.then(|| {
            let mut jac = DMatrix::zeros(6, 12);
            jac.view_mut((0, 0), (6, 6)).fill_with_identity();
            jac.view_mut((0, 0), (6, 6)).neg_mut();
            jac.view_mut((0, 6), (6, 6)).fill_with_identity();
            jac
        });
        Ok((residual, jacobian))
    }
}
