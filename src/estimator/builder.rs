//! Incremental construction of the fusion graph.
//!
//! Epoch 0 is anchored by three priors. Every later epoch adds exactly three
//! factors (inertial, bias continuity, absolute position), so after `N`
//! corrections the graph holds `3 + 3N` factors over `N + 1` epochs.

use nalgebra::{DMatrix, Vector3};
use tracing::debug;

use crate::core::{CoreError, FactorGraph, NoiseModel, NoiseModels, StateStore};
use crate::error::{FusionError, FusionResult};
use crate::factors::{
    BiasBetweenFactor, CombinedImuFactor, Factor, GpsFactor, ImuFactor, PriorFactor,
};
use crate::imu::{ImuBias, InertialFactorKind, NavState, PreintegratedImuMeasurements};
use crate::manifold::Pose3;

/// Owns the append-only graph and the current value of every variable.
#[derive(Debug)]
pub struct GraphBuilder {
    graph: FactorGraph,
    values: StateStore,
    noise_models: NoiseModels,
    inertial_factor: InertialFactorKind,
}

impl GraphBuilder {
    pub fn new(noise_models: NoiseModels, inertial_factor: InertialFactorKind) -> Self {
        Self {
            graph: FactorGraph::new(),
            values: StateStore::new(),
            noise_models,
            inertial_factor,
        }
    }

    /// Create epoch 0 and its pose, velocity and bias priors.
    ///
    /// Fails if epoch 0 already exists.
    pub fn add_initial_priors(
        &mut self,
        pose: Pose3,
        velocity: Vector3<f64>,
        bias: ImuBias,
    ) -> FusionResult<usize> {
        self.values.insert_epoch(0, pose.clone(), velocity, bias)?;

        self.graph.add_factor(
            Box::new(PriorFactor::new(0, pose)),
            self.noise_models.prior_pose.clone(),
        )?;
        self.graph.add_factor(
            Box::new(PriorFactor::new(0, velocity)),
            self.noise_models.prior_velocity.clone(),
        )?;
        self.graph.add_factor(
            Box::new(PriorFactor::new(0, bias)),
            self.noise_models.prior_bias.clone(),
        )?;

        debug!(factors = self.graph.len(), "added initial priors");
        Ok(0)
    }

    /// Append the epoch after `previous` and its three factors.
    ///
    /// The new epoch's initial guess is `measurement` propagated from the
    /// current values of `previous`, with the bias carried over unchanged.
    pub fn add_epoch(
        &mut self,
        previous: usize,
        measurement: &PreintegratedImuMeasurements,
        corrected_position: Vector3<f64>,
    ) -> FusionResult<usize> {
        let expected = self.values.epoch_count();
        if expected == 0 || previous + 1 != expected {
            return Err(CoreError::NonContiguousEpoch {
                expected,
                actual: previous + 1,
            }
            .into());
        }
        let epoch = previous + 1;
        if measurement.is_empty() {
            return Err(FusionError::EmptyPreintegration { epoch });
        }
        if measurement.kind() != self.inertial_factor {
            return Err(FusionError::InvalidConfig(format!(
                "preintegration is {} but the graph expects {} inertial factors",
                measurement.kind(),
                self.inertial_factor
            )));
        }

        let previous_state = self.values.snapshot(previous)?;
        let predicted = measurement.predict(&previous_state.nav_state(), &previous_state.bias);
        let inertial_noise = self.inertial_noise(measurement)?;

        let inertial_factor: Box<dyn Factor> = match self.inertial_factor {
            InertialFactorKind::Standard => {
                Box::new(ImuFactor::new(previous, epoch, measurement.clone()))
            }
            InertialFactorKind::Combined => {
                Box::new(CombinedImuFactor::new(previous, epoch, measurement.clone()))
            }
        };

        // Validate every factor against its noise model before touching the graph.
        let additions = [
            (inertial_factor, inertial_noise),
            (
                Box::new(BiasBetweenFactor::new(previous, epoch)) as Box<dyn Factor>,
                self.noise_models.bias_between.clone(),
            ),
            (
                Box::new(GpsFactor::new(epoch, corrected_position)) as Box<dyn Factor>,
                self.noise_models.correction.clone(),
            ),
        ];
        if let Some((factor, noise)) = additions
            .iter()
            .find(|(factor, noise)| factor.dimension() != noise.dimension())
        {
            return Err(CoreError::DimensionMismatch {
                factor: factor.dimension(),
                noise: noise.dimension(),
            }
            .into());
        }

        self.values.insert_epoch(
            epoch,
            predicted.pose,
            predicted.velocity,
            previous_state.bias,
        )?;
        for (factor, noise) in additions {
            self.graph.add_factor(factor, noise)?;
        }

        debug!(
            epoch,
            samples = measurement.sample_count(),
            delta_time = measurement.delta_time(),
            factors = self.graph.len(),
            "added epoch"
        );
        Ok(epoch)
    }

    /// Replace every value, e.g. with a solver result.
    pub fn set_values(&mut self, values: StateStore) -> FusionResult<()> {
        if values.epoch_count() != self.values.epoch_count() {
            return Err(CoreError::NonContiguousEpoch {
                expected: self.values.epoch_count(),
                actual: values.epoch_count(),
            }
            .into());
        }
        self.values = values;
        Ok(())
    }

    /// Navigation state and bias of `epoch` in the current values.
    pub fn state(&self, epoch: usize) -> FusionResult<(NavState, ImuBias)> {
        let snapshot = self.values.snapshot(epoch)?;
        Ok((snapshot.nav_state(), snapshot.bias))
    }

    pub fn graph(&self) -> &FactorGraph {
        &self.graph
    }

    pub fn values(&self) -> &StateStore {
        &self.values
    }

    pub fn noise_models(&self) -> &NoiseModels {
        &self.noise_models
    }

    pub fn inertial_factor(&self) -> InertialFactorKind {
        self.inertial_factor
    }

    fn inertial_noise(
        &self,
        measurement: &PreintegratedImuMeasurements,
    ) -> FusionResult<NoiseModel> {
        let covariance = match self.inertial_factor {
            InertialFactorKind::Standard => {
                DMatrix::from_column_slice(9, 9, measurement.covariance().as_slice())
            }
            InertialFactorKind::Combined => {
                let combined = measurement.combined_covariance().ok_or_else(|| {
                    FusionError::InvalidConfig(
                        "combined inertial factor requires a combined preintegration".to_string(),
                    )
                })?;
                DMatrix::from_column_slice(15, 15, combined.as_slice())
            }
        };
        Ok(NoiseModel::from_covariance(&covariance)?)
    }
}
