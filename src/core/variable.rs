//! Strongly typed variable keys and the per-epoch state arenas.
//!
//! Each epoch owns exactly one pose, one velocity and one bias. Variables are
//! addressed by `(kind, epoch)` and resolved by plain indexing into three
//! typed vectors. In the optimizer's tangent space every epoch occupies
//! [`EPOCH_DOF`] consecutive columns laid out as `[pose(6), velocity(3), bias(6)]`.

use crate::core::{CoreError, CoreResult};
use crate::imu::{ImuBias, NavState};
use crate::manifold::{Manifold, Pose3};
use nalgebra::{DVector, Vector3};
use std::fmt;

/// Tangent columns per epoch.
pub const EPOCH_DOF: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariableKind {
    Pose,
    Velocity,
    Bias,
}

impl VariableKind {
    /// Tangent dimension of this kind of variable.
    pub fn dof(self) -> usize {
        match self {
            VariableKind::Pose => Pose3::DOF,
            VariableKind::Velocity => <Vector3<f64> as Manifold>::DOF,
            VariableKind::Bias => ImuBias::DOF,
        }
    }

    /// Column offset inside an epoch block.
    pub fn offset(self) -> usize {
        match self {
            VariableKind::Pose => 0,
            VariableKind::Velocity => 6,
            VariableKind::Bias => 9,
        }
    }
}

/// Key of one optimization variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId {
    pub kind: VariableKind,
    pub epoch: usize,
}

impl VariableId {
    pub fn new(kind: VariableKind, epoch: usize) -> Self {
        Self { kind, epoch }
    }

    pub fn pose(epoch: usize) -> Self {
        Self::new(VariableKind::Pose, epoch)
    }

    pub fn velocity(epoch: usize) -> Self {
        Self::new(VariableKind::Velocity, epoch)
    }

    pub fn bias(epoch: usize) -> Self {
        Self::new(VariableKind::Bias, epoch)
    }

    pub fn dof(&self) -> usize {
        self.kind.dof()
    }

    /// First column of this variable in the stacked tangent vector.
    pub fn column(&self) -> usize {
        self.epoch * EPOCH_DOF + self.kind.offset()
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            VariableKind::Pose => 'x',
            VariableKind::Velocity => 'v',
            VariableKind::Bias => 'b',
        };
        write!(f, "{}{}", tag, self.epoch)
    }
}

/// A variable type that lives in one of the [`StateStore`] arenas.
pub trait StateVariable: Manifold + 'static {
    const KIND: VariableKind;

    fn lookup(values: &StateStore, epoch: usize) -> CoreResult<&Self>;
}

impl StateVariable for Pose3 {
    const KIND: VariableKind = VariableKind::Pose;

    fn lookup(values: &StateStore, epoch: usize) -> CoreResult<&Self> {
        values.pose(epoch)
    }
}

impl StateVariable for Vector3<f64> {
    const KIND: VariableKind = VariableKind::Velocity;

    fn lookup(values: &StateStore, epoch: usize) -> CoreResult<&Self> {
        values.velocity(epoch)
    }
}

impl StateVariable for ImuBias {
    const KIND: VariableKind = VariableKind::Bias;

    fn lookup(values: &StateStore, epoch: usize) -> CoreResult<&Self> {
        values.bias(epoch)
    }
}

/// Immutable copy of one epoch's solved state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub epoch: usize,
    pub pose: Pose3,
    pub velocity: Vector3<f64>,
    pub bias: ImuBias,
}

impl StateSnapshot {
    pub fn nav_state(&self) -> NavState {
        NavState::new(self.pose.clone(), self.velocity)
    }

    pub fn position(&self) -> Vector3<f64> {
        self.pose.translation()
    }
}

/// Values of every variable, one entry per epoch in each arena.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateStore {
    poses: Vec<Pose3>,
    velocities: Vec<Vector3<f64>>,
    biases: Vec<ImuBias>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next epoch and return its index.
    pub fn push_epoch(&mut self, pose: Pose3, velocity: Vector3<f64>, bias: ImuBias) -> usize {
        self.poses.push(pose);
        self.velocities.push(velocity);
        self.biases.push(bias);
        self.poses.len() - 1
    }

    /// Insert `epoch`, which must be exactly the next index.
    pub fn insert_epoch(
        &mut self,
        epoch: usize,
        pose: Pose3,
        velocity: Vector3<f64>,
        bias: ImuBias,
    ) -> CoreResult<()> {
        let expected = self.epoch_count();
        if epoch != expected {
            return Err(CoreError::NonContiguousEpoch {
                expected,
                actual: epoch,
            });
        }
        self.push_epoch(pose, velocity, bias);
        Ok(())
    }

    pub fn epoch_count(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn contains(&self, id: &VariableId) -> bool {
        id.epoch < self.epoch_count()
    }

    /// Length of the stacked tangent vector.
    pub fn tangent_dimension(&self) -> usize {
        self.epoch_count() * EPOCH_DOF
    }

    pub fn pose(&self, epoch: usize) -> CoreResult<&Pose3> {
        self.poses
            .get(epoch)
            .ok_or(CoreError::UnknownVariable(VariableId::pose(epoch)))
    }

    pub fn velocity(&self, epoch: usize) -> CoreResult<&Vector3<f64>> {
        self.velocities
            .get(epoch)
            .ok_or(CoreError::UnknownVariable(VariableId::velocity(epoch)))
    }

    pub fn bias(&self, epoch: usize) -> CoreResult<&ImuBias> {
        self.biases
            .get(epoch)
            .ok_or(CoreError::UnknownVariable(VariableId::bias(epoch)))
    }

    pub fn snapshot(&self, epoch: usize) -> CoreResult<StateSnapshot> {
        Ok(StateSnapshot {
            epoch,
            pose: self.pose(epoch)?.clone(),
            velocity: *self.velocity(epoch)?,
            bias: *self.bias(epoch)?,
        })
    }

    pub fn latest(&self) -> Option<StateSnapshot> {
        self.epoch_count()
            .checked_sub(1)
            .and_then(|epoch| self.snapshot(epoch).ok())
    }

    /// Apply a stacked tangent step to every variable.
    pub fn retract_all(&self, step: &DVector<f64>) -> CoreResult<StateStore> {
        if step.len() != self.tangent_dimension() {
            return Err(CoreError::InvalidStepLength {
                expected: self.tangent_dimension(),
                actual: step.len(),
            });
        }

        let s = step.as_slice();
        let mut next = StateStore::new();
        for epoch in 0..self.epoch_count() {
            let base = epoch * EPOCH_DOF;
            let slice = |kind: VariableKind| {
                let start = base + kind.offset();
                &s[start..start + kind.dof()]
            };
            next.push_epoch(
                self.poses[epoch].retract(slice(VariableKind::Pose)),
                self.velocities[epoch].retract(slice(VariableKind::Velocity)),
                self.biases[epoch].retract(slice(VariableKind::Bias)),
            );
        }
        Ok(next)
    }

    pub fn poses(&self) -> &[Pose3] {
        &self.poses
    }

    pub fn velocities(&self) -> &[Vector3<f64>] {
        &self.velocities
    }

    pub fn biases(&self) -> &[ImuBias] {
        &self.biases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::{LieGroup, SO3};

    #[test]
    fn test_variable_columns() {
        assert_eq!(VariableId::pose(0).column(), 0);
        assert_eq!(VariableId::velocity(0).column(), 6);
        assert_eq!(VariableId::bias(0).column(), 9);
        assert_eq!(VariableId::pose(2).column(), 30);
        assert_eq!(VariableId::bias(2).column(), 39);
        assert_eq!(VariableId::bias(1).dof(), 6);
        assert_eq!(VariableId::velocity(4).to_string(), "v4");
    }

    #[test]
    fn test_insert_epoch_must_be_contiguous() {
        let mut store = StateStore::new();
        store
            .insert_epoch(0, Pose3::identity(), Vector3::zeros(), ImuBias::zero())
            .unwrap();
        let err = store.insert_epoch(2, Pose3::identity(), Vector3::zeros(), ImuBias::zero());
        assert_eq!(
            err,
            Err(CoreError::NonContiguousEpoch {
                expected: 1,
                actual: 2
            })
        );
        assert_eq!(store.epoch_count(), 1);
    }

    #[test]
    fn test_unknown_variable_lookup() {
        let store = StateStore::new();
        assert_eq!(
            store.pose(0),
            Err(CoreError::UnknownVariable(VariableId::pose(0)))
        );
        assert!(store.latest().is_none());
    }

    #[test]
    fn test_retract_all_updates_each_block() {
        let mut store = StateStore::new();
        store.push_epoch(Pose3::identity(), Vector3::zeros(), ImuBias::zero());
        store.push_epoch(
            Pose3::new(SO3::identity(), Vector3::new(1.0, 0.0, 0.0)),
            Vector3::new(0.5, 0.0, 0.0),
            ImuBias::zero(),
        );

        let mut step = DVector::zeros(store.tangent_dimension());
        step[EPOCH_DOF + 3] = 0.25; // epoch 1 position x
        step[EPOCH_DOF + 6] = -0.5; // epoch 1 velocity x
        step[9] = 0.01; // epoch 0 accelerometer bias x

        let next = store.retract_all(&step).unwrap();
        assert!((next.pose(1).unwrap().translation().x - 1.25).abs() < 1e-12);
        assert!(next.velocity(1).unwrap().norm() < 1e-12);
        assert!((next.bias(0).unwrap().accelerometer.x - 0.01).abs() < 1e-12);
        assert_eq!(next.pose(0).unwrap(), store.pose(0).unwrap());
    }

    #[test]
    fn test_retract_all_rejects_bad_length() {
        let mut store = StateStore::new();
        store.push_epoch(Pose3::identity(), Vector3::zeros(), ImuBias::zero());
        let err = store.retract_all(&DVector::zeros(3));
        assert_eq!(
            err,
            Err(CoreError::InvalidStepLength {
                expected: 15,
                actual: 3
            })
        );
    }

    #[test]
    fn test_snapshot_copies_epoch() {
        let mut store = StateStore::new();
        store.push_epoch(Pose3::identity(), Vector3::new(1.0, 2.0, 3.0), ImuBias::zero());
        let snap = store.latest().unwrap();
        assert_eq!(snap.epoch, 0);
        assert_eq!(snap.velocity, Vector3::new(1.0, 2.0, 3.0));
    }
}
