use tracing::{debug, info, warn};

use crate::core::{FactorGraph, StateSnapshot, StateStore};
use crate::error::{FusionError, FusionResult};
use crate::estimator::{
    AbsoluteFix, EpochDiagnostics, EpochOutput, EstimatorPhase, FixOutcome, FusionConfig,
    GraphBuilder, SensorEvent,
};
use crate::imu::{ImuSample, PreintegratedImuMeasurements};
use crate::optimizer::LevenbergMarquardt;

/// Owns the preintegrator, graph and solver, and turns sensor events into
/// solved epochs.
///
/// Every event is handled completely before the next one; a fix blocks for a
/// full-graph solve whose cost grows with the number of epochs.
#[derive(Debug)]
pub struct FusionEstimator {
    config: FusionConfig,
    builder: GraphBuilder,
    preintegrator: PreintegratedImuMeasurements,
    optimizer: LevenbergMarquardt,
    phase: EstimatorPhase,
    latest: StateSnapshot,
    last_imu_timestamp: Option<f64>,
    last_fix_timestamp: Option<f64>,
}

impl FusionEstimator {
    /// Validate `config`, create epoch 0 with its priors and start
    /// preintegrating at the initial bias.
    pub fn new(config: FusionConfig) -> FusionResult<Self> {
        config.validate()?;

        let mut builder = GraphBuilder::new(config.noise.noise_models()?, config.inertial_factor);
        let initial = &config.initial_state;
        builder.add_initial_priors(initial.pose()?, initial.velocity(), initial.bias())?;
        let latest = builder.values().snapshot(0)?;

        let preintegrator = PreintegratedImuMeasurements::new(
            config.preintegration_params(),
            config.inertial_factor,
            latest.bias,
        );
        let optimizer = LevenbergMarquardt::with_config(config.optimizer.clone());

        info!(
            inertial_factor = %config.inertial_factor,
            imu_dt = config.imu_dt,
            linear_solver = %config.optimizer.linear_solver,
            "fusion estimator initialized"
        );

        Ok(Self {
            config,
            builder,
            preintegrator,
            optimizer,
            phase: EstimatorPhase::AwaitingFirstFix,
            latest,
            last_imu_timestamp: None,
            last_fix_timestamp: None,
        })
    }

    /// Dispatch one event; returns the solved epoch if the event produced one.
    pub fn handle(&mut self, event: SensorEvent) -> FusionResult<Option<EpochOutput>> {
        match event {
            SensorEvent::Imu(sample) => {
                self.on_imu(sample)?;
                Ok(None)
            }
            SensorEvent::Fix(fix) => match self.on_fix(fix)? {
                FixOutcome::Solved(output) => Ok(Some(output)),
                FixOutcome::Skipped => Ok(None),
            },
        }
    }

    /// Preintegrate one sample over the configured fixed interval.
    ///
    /// A timestamp that is not finite or does not increase is rejected and
    /// nothing changes.
    pub fn on_imu(&mut self, sample: ImuSample) -> FusionResult<()> {
        check_order("imu", self.last_imu_timestamp, sample.timestamp)?;
        self.preintegrator
            .integrate_sample(&sample, self.config.imu_dt)?;
        self.last_imu_timestamp = Some(sample.timestamp);
        Ok(())
    }

    /// Close an epoch at `fix` and re-solve the whole graph.
    ///
    /// The solver result is adopted whatever its status; non-convergence is
    /// reported in the output. A fix without IMU samples since the previous
    /// epoch is skipped.
    ///
    /// If the solve itself fails, the epoch stays in the graph at its predicted
    /// state and the error is returned; the next fix chains from that epoch.
    pub fn on_fix(&mut self, fix: AbsoluteFix) -> FusionResult<FixOutcome> {
        check_order("fix", self.last_fix_timestamp, fix.timestamp)?;
        if fix.position.iter().any(|v| !v.is_finite()) {
            warn!(timestamp = fix.timestamp, "rejecting non-finite fix position");
            return Err(FusionError::InvalidMeasurement(format!(
                "non-finite fix position at t = {}",
                fix.timestamp
            )));
        }

        if self.preintegrator.is_empty() {
            warn!(
                timestamp = fix.timestamp,
                epoch = self.latest.epoch,
                "fix without IMU samples since the last epoch, skipping"
            );
            self.last_fix_timestamp = Some(fix.timestamp);
            return Ok(FixOutcome::Skipped);
        }

        let epoch = self.commit_epoch(&fix)?;

        let result = match self.optimizer.optimize(self.builder.graph(), self.builder.values()) {
            Ok(result) => result,
            Err(err) => {
                warn!(epoch, error = %err, "solve failed, keeping the predicted state");
                return Err(err.into());
            }
        };
        self.builder.set_values(result.values)?;

        self.latest = self.builder.values().snapshot(epoch)?;
        self.preintegrator.reset(self.latest.bias);

        let diagnostics = diagnostics(&self.latest, &fix);
        let converged = result.status.is_converged();
        if converged {
            info!(
                epoch,
                iterations = result.iterations,
                final_cost = result.final_cost,
                position_discrepancy = diagnostics.position_discrepancy,
                "epoch solved"
            );
        } else {
            warn!(
                epoch,
                status = %result.status,
                iterations = result.iterations,
                "epoch adopted without convergence"
            );
        }
        debug!(
            epoch,
            position = ?self.latest.position(),
            velocity = ?self.latest.velocity,
            bias = %self.latest.bias,
            elapsed = ?result.elapsed,
            "latest state"
        );

        Ok(FixOutcome::Solved(EpochOutput {
            epoch,
            timestamp: fix.timestamp,
            snapshot: self.latest.clone(),
            status: result.status,
            converged,
            iterations: result.iterations,
            final_cost: result.final_cost,
            diagnostics,
        }))
    }

    /// Add the epoch closed by `fix` and move onto it: `latest` becomes the
    /// predicted state of the new epoch and preintegration restarts at its bias.
    fn commit_epoch(&mut self, fix: &AbsoluteFix) -> FusionResult<usize> {
        let epoch = self
            .builder
            .add_epoch(self.latest.epoch, &self.preintegrator, fix.position)?;
        self.last_fix_timestamp = Some(fix.timestamp);
        self.latest = self.builder.values().snapshot(epoch)?;
        self.preintegrator.reset(self.latest.bias);
        self.phase = EstimatorPhase::Running;
        Ok(epoch)
    }

    /// Most recent solved (or initial) snapshot.
    pub fn latest(&self) -> &StateSnapshot {
        &self.latest
    }

    pub fn phase(&self) -> EstimatorPhase {
        self.phase
    }

    pub fn graph(&self) -> &FactorGraph {
        self.builder.graph()
    }

    pub fn values(&self) -> &StateStore {
        self.builder.values()
    }

    pub fn epoch_count(&self) -> usize {
        self.builder.values().epoch_count()
    }

    pub fn preintegrator(&self) -> &PreintegratedImuMeasurements {
        &self.preintegrator
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }
}

fn check_order(stream: &'static str, previous: Option<f64>, current: f64) -> FusionResult<()> {
    if !current.is_finite() {
        warn!(stream, current, "rejecting non-finite timestamp");
        return Err(FusionError::InvalidMeasurement(format!(
            "non-finite {stream} timestamp {current}"
        )));
    }
    match previous {
        Some(previous) if current <= previous => {
            warn!(stream, previous, current, "rejecting out-of-order timestamp");
            Err(FusionError::OutOfOrder {
                stream,
                previous,
                current,
            })
        }
        _ => Ok(()),
    }
}

/// Distance to the fix, and twice the quaternion vector part as a small-angle
/// orientation error against the identity the fix implies.
fn diagnostics(snapshot: &StateSnapshot, fix: &AbsoluteFix) -> EpochDiagnostics {
    let [x, y, z, _] = snapshot.pose.rotation().coeffs();
    EpochDiagnostics {
        position_discrepancy: (snapshot.position() - fix.position).norm(),
        orientation_discrepancy: 2.0 * (x * x + y * y + z * z).sqrt(),
    }
}
