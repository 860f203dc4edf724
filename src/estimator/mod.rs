//! Event-driven IMU + absolute-fix estimator.
//!
//! [`FusionEstimator`] consumes two event streams: high-rate IMU samples, which
//! are preintegrated, and low-rate absolute position fixes, each of which closes
//! an epoch, extends the graph and re-solves it in full. [`EstimatorWorker`]
//! runs an estimator on its own thread behind a bounded queue so that several
//! producers can feed it without sharing mutable state.

use nalgebra::Vector3;

use crate::core::StateSnapshot;
use crate::imu::ImuSample;
use crate::optimizer::SolverStatus;

pub mod builder;
pub mod config;
pub mod controller;
pub mod worker;

pub use builder::GraphBuilder;
pub use config::{FusionConfig, InitialStateConfig, NoiseConfig};
pub use controller::FusionEstimator;
pub use worker::EstimatorWorker;

/// Position fix already expressed in the estimator's local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsoluteFix {
    pub timestamp: f64,
    pub position: Vector3<f64>,
}

impl AbsoluteFix {
    pub fn new(timestamp: f64, position: Vector3<f64>) -> Self {
        Self {
            timestamp,
            position,
        }
    }
}

/// One input to the estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    Imu(ImuSample),
    Fix(AbsoluteFix),
}

impl SensorEvent {
    pub fn timestamp(&self) -> f64 {
        match self {
            SensorEvent::Imu(sample) => sample.timestamp,
            SensorEvent::Fix(fix) => fix.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorPhase {
    /// Epoch 0 exists; no fix has been processed yet
    AwaitingFirstFix,
    Running,
}

/// Self-consistency of a solved epoch against the fix that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EpochDiagnostics {
    /// `‖p_solved − p_fix‖` in metres
    pub position_discrepancy: f64,
    /// Small-angle rotation away from the identity, in radians
    pub orientation_discrepancy: f64,
}

/// Emitted once per solved epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochOutput {
    pub epoch: usize,
    pub timestamp: f64,
    pub snapshot: StateSnapshot,
    pub status: SolverStatus,
    pub converged: bool,
    pub iterations: usize,
    pub final_cost: f64,
    pub diagnostics: EpochDiagnostics,
}

/// Result of handing a fix to the estimator.
#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    Solved(EpochOutput),
    /// No IMU samples since the previous epoch; the fix was dropped
    Skipped,
}
