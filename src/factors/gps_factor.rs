//! Absolute position constraint on a single pose.
//!
//! ```text
//! r(T) = p − z
//! ```
//! With the body-frame position retraction `p ← p + R δp`, the Jacobian is
//! `[0₃ₓ₃ | R]`.

use nalgebra::{DMatrix, DVector, Vector3};

use crate::core::{CoreResult, StateStore, VariableId};
use crate::factors::{Factor, FactorKind};

#[derive(Debug, Clone)]
pub struct GpsFactor {
    keys: [VariableId; 1],
    measured_position: Vector3<f64>,
}

impl GpsFactor {
    pub fn new(epoch: usize, measured_position: Vector3<f64>) -> Self {
        Self {
            keys: [VariableId::pose(epoch)],
            measured_position,
        }
    }

    pub fn measured_position(&self) -> &Vector3<f64> {
        &self.measured_position
    }
}

impl Factor for GpsFactor {
    fn kind(&self) -> FactorKind {
        FactorKind::Gps
    }

    fn keys(&self) -> &[VariableId] {
        &self.keys
    }

    fn dimension(&self) -> usize {
        3
    }

    fn linearize(
        &self,
        values: &StateStore,
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let pose = values.pose(self.keys[0].epoch)?;
        let residual = pose.translation() - self.measured_position;

        let jacobian = compute_jacobian.then(|| {
            let mut jac = DMatrix::zeros(3, 6);
            jac.fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&pose.rotation_matrix());
            jac
        });
        Ok((DVector::from_column_slice(residual.as_slice()), jacobian))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::test_utils::numerical_jacobian;
    use crate::imu::ImuBias;
    use crate::manifold::{LieGroup, Pose3, SO3};

    #[test]
    fn test_gps_residual() {
        let mut store = StateStore::new();
        store.push_epoch(
            Pose3::new(SO3::identity(), Vector3::new(1.0, 2.0, 0.0)),
            Vector3::zeros(),
            ImuBias::zero(),
        );
        let factor = GpsFactor::new(0, Vector3::new(1.0, 1.5, 0.0));
        let (residual, _) = factor.linearize(&store, false).unwrap();
        assert_eq!(residual, DVector::from_vec(vec![0.0, 0.5, 0.0]));
    }

    #[test]
    fn test_gps_jacobian_numerical() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = StateStore::new();
        store.push_epoch(
            Pose3::new(SO3::from_euler_angles(0.3, -0.2, 1.2), Vector3::new(4.0, -2.0, 1.0)),
            Vector3::zeros(),
            ImuBias::zero(),
        );
        let factor = GpsFactor::new(0, Vector3::new(3.0, -1.0, 0.0));
        let (_, jacobian) = factor.linearize(&store, true)?;
        let jacobian = jacobian.ok_or("Jacobian should be Some when compute_jacobian=true")?;
        let numeric = numerical_jacobian(&factor, &store, 1e-7);
        let diff_norm = (jacobian - numeric).norm();
        assert!(diff_norm < 1e-6, "Jacobian difference norm: {}", diff_norm);
        Ok(())
    }
}
