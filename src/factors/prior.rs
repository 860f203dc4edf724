//! Prior factor anchoring a single variable to a fixed value.
//!
//! ```text
//! r(x) = target ⊟ x        (Log(R₀ᵀR), R₀ᵀ(p − p₀) for a pose)
//! ```
//! Orientation is compared on the manifold, never component-wise.

use nalgebra::{DMatrix, DVector};

use crate::core::{CoreResult, StateStore, StateVariable, VariableId};
use crate::factors::{Factor, FactorKind};

#[derive(Debug, Clone)]
pub struct PriorFactor<T: StateVariable> {
    keys: [VariableId; 1],
    target: T,
}

impl<T: StateVariable> PriorFactor<T> {
    pub fn new(epoch: usize, target: T) -> Self {
        Self {
            keys: [VariableId::new(T::KIND, epoch)],
            target,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }
}

impl<T: StateVariable> Factor for PriorFactor<T> {
    fn kind(&self) -> FactorKind {
        FactorKind::Prior
    }

    fn keys(&self) -> &[VariableId] {
        &self.keys
    }

    fn dimension(&self) -> usize {
        T::DOF
    }

    fn linearize(
        &self,
        values: &StateStore,
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let current = T::lookup(values, self.keys[0].epoch)?;
        let residual = self.target.local(current);
        let jacobian = compute_jacobian.then(|| self.target.local_jacobian(current));
        Ok((residual, jacobian))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::test_utils::numerical_jacobian;
    use crate::imu::ImuBias;
    use crate::manifold::{Pose3, SO3};
    use nalgebra::Vector3;

    fn store_with(pose: Pose3, velocity: Vector3<f64>, bias: ImuBias) -> StateStore {
        let mut store = StateStore::new();
        store.push_epoch(pose, velocity, bias);
        store
    }

    #[test]
    fn test_prior_zero_at_target() {
        let pose = Pose3::new(SO3::from_euler_angles(0.1, 0.2, 0.3), Vector3::new(1.0, 2.0, 3.0));
        let store = store_with(pose.clone(), Vector3::zeros(), ImuBias::zero());
        let factor = PriorFactor::new(0, pose);
        let (residual, jacobian) = factor.linearize(&store, true).unwrap();
        assert!(residual.norm() < 1e-12);
        assert!((jacobian.unwrap() - DMatrix::<f64>::identity(6, 6)).norm() < 1e-12);
        assert_eq!(factor.keys(), &[VariableId::pose(0)]);
    }

    #[test]
    fn test_pose_prior_jacobian_numerical() -> Result<(), Box<dyn std::error::Error>> {
        let target = Pose3::new(
            SO3::from_euler_angles(0.1, -0.1, 0.4),
            Vector3::new(0.5, 0.0, -1.0),
        );
        let current = Pose3::new(
            SO3::from_euler_angles(0.3, 0.05, 0.1),
            Vector3::new(1.0, 0.2, -0.7),
        );
        let store = store_with(current, Vector3::zeros(), ImuBias::zero());
        let factor = PriorFactor::new(0, target);

        let (_, jacobian) = factor.linearize(&store, true)?;
        let jacobian = jacobian.ok_or("Jacobian should be Some when compute_jacobian=true")?;
        let numeric = numerical_jacobian(&factor, &store, 1e-7);
        let diff_norm = (jacobian - numeric).norm();
        assert!(diff_norm < 1e-5, "Jacobian difference norm: {}", diff_norm);
        Ok(())
    }

    #[test]
    fn test_velocity_and_bias_priors() {
        let bias = ImuBias::new(Vector3::new(0.01, 0.0, 0.0), Vector3::zeros());
        let store = store_with(Pose3::identity(), Vector3::new(1.0, 0.0, 0.0), bias);

        let velocity_prior = PriorFactor::new(0, Vector3::<f64>::zeros());
        let (r, _) = velocity_prior.linearize(&store, false).unwrap();
        assert_eq!(r, DVector::from_vec(vec![1.0, 0.0, 0.0]));
        assert_eq!(velocity_prior.dimension(), 3);
        assert_eq!(velocity_prior.keys()[0], VariableId::velocity(0));

        let bias_prior = PriorFactor::new(0, ImuBias::zero());
        let (r, j) = bias_prior.linearize(&store, true).unwrap();
        assert!((r[0] - 0.01).abs() < 1e-15);
        assert_eq!(j.unwrap(), DMatrix::identity(6, 6));
    }

    #[test]
    fn test_prior_missing_variable() {
        let factor = PriorFactor::new(3, Pose3::identity());
        assert!(factor.linearize(&StateStore::new(), true).is_err());
    }
}
