//! Levenberg-Marquardt over the fusion factor graph.
//!
//! Each iteration solves the damped normal equations
//!
//! ```text
//! (JᵀJ + λI) δ = −Jᵀr
//! ```
//!
//! and evaluates the gain ratio
//!
//! ```text
//! ρ = (F(x) − F(x ⊞ δ)) / (L(0) − L(δ))
//! ```
//!
//! where `L` is the local quadratic model. Good steps shrink `λ` toward
//! Gauss-Newton, rejected steps grow it toward gradient descent. A factorization
//! failure is treated like a rejected step.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::{FactorGraph, StateStore};
use crate::linalg::{LinearSolverType, NormalEquations};
use crate::optimizer::{
    ConvergenceInfo, ConvergenceReason, OptimizerError, SolverResult, SolverStatus,
};

/// Summary statistics for one Levenberg-Marquardt solve.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtSummary {
    pub status: SolverStatus,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: usize,
    pub successful_steps: usize,
    pub unsuccessful_steps: usize,
    pub final_damping: f64,
    pub average_cost_reduction: f64,
    pub max_gradient_norm: f64,
    pub final_gradient_norm: f64,
    pub max_parameter_update_norm: f64,
    pub final_parameter_update_norm: f64,
    pub total_time: Duration,
    pub average_time_per_iteration: Duration,
}

impl fmt::Display for LevenbergMarquardtSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Levenberg-Marquardt Optimization Summary ===")?;
        writeln!(f, "Status:                    {}", self.status)?;
        writeln!(f, "Initial cost:              {:.6e}", self.initial_cost)?;
        writeln!(f, "Final cost:                {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "Cost reduction:            {:.6e} ({:.2}%)",
            self.initial_cost - self.final_cost,
            100.0 * (self.initial_cost - self.final_cost) / self.initial_cost.max(1e-12)
        )?;
        writeln!(f, "Total iterations:          {}", self.iterations)?;
        writeln!(f, "Successful steps:          {}", self.successful_steps)?;
        writeln!(f, "Unsuccessful steps:        {}", self.unsuccessful_steps)?;
        writeln!(f, "Final damping parameter:   {:.6e}", self.final_damping)?;
        writeln!(
            f,
            "Average cost reduction:    {:.6e}",
            self.average_cost_reduction
        )?;
        writeln!(
            f,
            "Max gradient norm:         {:.6e}",
            self.max_gradient_norm
        )?;
        writeln!(
            f,
            "Final gradient norm:       {:.6e}",
            self.final_gradient_norm
        )?;
        writeln!(
            f,
            "Max parameter update norm: {:.6e}",
            self.max_parameter_update_norm
        )?;
        writeln!(
            f,
            "Final param update norm:   {:.6e}",
            self.final_parameter_update_norm
        )?;
        writeln!(f, "Total time:                {:?}", self.total_time)?;
        writeln!(
            f,
            "Average time per iteration: {:?}",
            self.average_time_per_iteration
        )?;
        Ok(())
    }
}

/// Configuration parameters for Levenberg-Marquardt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevenbergMarquardtConfig {
    /// Maximum number of linearizations
    pub max_iterations: usize,
    /// Stop when `(F_old − F_new) / F_old` falls to this value
    pub relative_error_tolerance: f64,
    /// Stop when `F_old − F_new` falls to this value
    pub absolute_error_tolerance: f64,
    /// Stop when `‖δ‖` falls below this value
    pub step_norm_tolerance: f64,
    /// Stop when the cost itself falls to this value
    pub error_tolerance: f64,
    pub initial_damping: f64,
    pub damping_min: f64,
    pub damping_max: f64,
    pub damping_increase_factor: f64,
    pub damping_decrease_factor: f64,
    /// Steps with a gain ratio below this are rejected
    pub min_step_quality: f64,
    /// Steps with a gain ratio above this shrink the damping
    pub good_step_quality: f64,
    pub linear_solver: LinearSolverType,
    pub verbose: bool,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            relative_error_tolerance: 1e-5,
            absolute_error_tolerance: 1e-5,
            step_norm_tolerance: 1e-10,
            error_tolerance: 0.0,
            initial_damping: 1e-3,
            damping_min: 1e-12,
            damping_max: 1e12,
            damping_increase_factor: 10.0,
            damping_decrease_factor: 0.3,
            min_step_quality: 0.0,
            good_step_quality: 0.75,
            linear_solver: LinearSolverType::default(),
            verbose: false,
        }
    }
}

impl LevenbergMarquardtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_relative_error_tolerance(mut self, tolerance: f64) -> Self {
        self.relative_error_tolerance = tolerance;
        self
    }

    pub fn with_absolute_error_tolerance(mut self, tolerance: f64) -> Self {
        self.absolute_error_tolerance = tolerance;
        self
    }

    pub fn with_step_norm_tolerance(mut self, tolerance: f64) -> Self {
        self.step_norm_tolerance = tolerance;
        self
    }

    pub fn with_error_tolerance(mut self, tolerance: f64) -> Self {
        self.error_tolerance = tolerance;
        self
    }

    pub fn with_damping(mut self, initial: f64) -> Self {
        self.initial_damping = initial;
        self
    }

    pub fn with_damping_bounds(mut self, min: f64, max: f64) -> Self {
        self.damping_min = min;
        self.damping_max = max;
        self
    }

    pub fn with_damping_factors(mut self, increase: f64, decrease: f64) -> Self {
        self.damping_increase_factor = increase;
        self.damping_decrease_factor = decrease;
        self
    }

    pub fn with_step_quality(mut self, min: f64, good: f64) -> Self {
        self.min_step_quality = min;
        self.good_step_quality = good;
        self
    }

    pub fn with_linear_solver(mut self, linear_solver: LinearSolverType) -> Self {
        self.linear_solver = linear_solver;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Levenberg-Marquardt solver for the fusion graph.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: LevenbergMarquardtConfig,
}

/// Column blocks, whitened residual and whitened Jacobian of one residual block.
type LinearizedBlock = (Vec<(usize, usize)>, DVector<f64>, DMatrix<f64>);

/// Per-solve bookkeeping folded into the summary.
#[derive(Debug, Default)]
struct SolveStats {
    successful_steps: usize,
    unsuccessful_steps: usize,
    max_gradient_norm: f64,
    final_gradient_norm: f64,
    max_parameter_update_norm: f64,
    final_parameter_update_norm: f64,
    cost_evaluations: usize,
    jacobian_evaluations: usize,
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LevenbergMarquardtConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LevenbergMarquardtConfig {
        &self.config
    }

    /// Solve `graph` starting from `initial`.
    ///
    /// Errors are returned only when graph and values are inconsistent. Failure
    /// to converge is reported through [`SolverResult::status`], with
    /// [`SolverResult::values`] holding the last accepted iterate.
    pub fn optimize(
        &self,
        graph: &FactorGraph,
        initial: &StateStore,
    ) -> Result<SolverResult, OptimizerError> {
        let start_time = Instant::now();
        graph.validate(initial)?;

        let mut values = initial.clone();
        let mut stats = SolveStats::default();
        let mut linear_solver = self.config.linear_solver.create();
        let mut damping = self.config.initial_damping;
        let mut iterations = 0;

        let initial_cost = graph.cost(&values)?;
        stats.cost_evaluations += 1;
        let mut cost = initial_cost;

        let status = 'solve: {
            if !cost.is_finite() {
                warn!(cost, "initial cost is not finite");
                break 'solve SolverStatus::Diverged;
            }

            while iterations < self.config.max_iterations {
                if cost <= self.config.error_tolerance {
                    break 'solve SolverStatus::Converged(ConvergenceReason::ErrorThreshold);
                }

                let system = self.linearize(graph, &values)?;
                stats.jacobian_evaluations += 1;
                iterations += 1;

                let gradient_norm = system.gradient().norm();
                stats.max_gradient_norm = stats.max_gradient_norm.max(gradient_norm);
                stats.final_gradient_norm = gradient_norm;

                // Retry with growing damping until a step is accepted.
                loop {
                    let step = match linear_solver.solve_damped(&system, damping) {
                        Ok(step) => step,
                        Err(e) => {
                            debug!(damping, error = %e, "damped system could not be solved");
                            stats.unsuccessful_steps += 1;
                            if !self.raise_damping(&mut damping) {
                                break 'solve SolverStatus::Diverged;
                            }
                            continue;
                        }
                    };

                    let step_norm = step.norm();
                    stats.max_parameter_update_norm =
                        stats.max_parameter_update_norm.max(step_norm);
                    stats.final_parameter_update_norm = step_norm;
                    if step_norm <= self.config.step_norm_tolerance {
                        break 'solve SolverStatus::Converged(ConvergenceReason::StepNorm);
                    }

                    let candidate = values.retract_all(&step)?;
                    let new_cost = graph.cost(&candidate)?;
                    stats.cost_evaluations += 1;

                    let predicted_reduction = Self::compute_predicted_reduction(&step, &system);
                    let rho = Self::compute_step_quality(cost, new_cost, predicted_reduction);
                    let accepted = new_cost.is_finite()
                        && new_cost <= cost
                        && self.update_damping(&mut damping, rho);

                    if self.config.verbose {
                        info!(
                            "Iteration {}: cost = {:.6e} -> {:.6e}, rho = {:.3}, |dx| = {:.3e}, lambda = {:.3e}, {}",
                            iterations,
                            cost,
                            new_cost,
                            rho,
                            step_norm,
                            damping,
                            if accepted { "ACCEPTED" } else { "REJECTED" }
                        );
                    } else {
                        debug!(
                            iteration = iterations,
                            cost, new_cost, rho, step_norm, damping, accepted, "LM step"
                        );
                    }

                    if accepted {
                        stats.successful_steps += 1;
                        let reduction = cost - new_cost;
                        values = candidate;
                        cost = new_cost;
                        if let Some(reason) = self.check_convergence(cost + reduction, reduction) {
                            break 'solve SolverStatus::Converged(reason);
                        }
                        break;
                    }

                    stats.unsuccessful_steps += 1;
                    if new_cost.is_finite()
                        && (new_cost - cost).abs() <= self.config.absolute_error_tolerance
                    {
                        // No step changes the cost measurably: at the minimum.
                        break 'solve SolverStatus::Converged(
                            ConvergenceReason::AbsoluteErrorDecrease,
                        );
                    }
                    if !self.raise_damping(&mut damping) {
                        break 'solve SolverStatus::Diverged;
                    }
                }
            }
            SolverStatus::NotConverged
        };

        let elapsed = start_time.elapsed();
        let summary = self.create_summary(
            status,
            initial_cost,
            cost,
            iterations,
            damping,
            &stats,
            elapsed,
        );
        if self.config.verbose {
            info!("{}", summary);
        } else {
            debug!("{}", summary);
        }
        if !status.is_converged() {
            warn!(%status, iterations, final_cost = cost, "Levenberg-Marquardt did not converge");
        }

        Ok(SolverResult {
            values,
            status,
            initial_cost,
            final_cost: cost,
            iterations,
            elapsed,
            convergence_info: ConvergenceInfo {
                final_gradient_norm: stats.final_gradient_norm,
                final_parameter_update_norm: stats.final_parameter_update_norm,
                cost_evaluations: stats.cost_evaluations,
                jacobian_evaluations: stats.jacobian_evaluations,
            },
        })
    }

    /// Assemble `JᵀJ` and `Jᵀr` over every residual block.
    ///
    /// Blocks are evaluated in parallel; accumulation is sequential so the
    /// gradient is summed in block order.
    fn linearize(
        &self,
        graph: &FactorGraph,
        values: &StateStore,
    ) -> Result<NormalEquations, OptimizerError> {
        let linearized: Vec<LinearizedBlock> = graph
            .residual_blocks()
            .par_iter()
            .map(|block| -> Result<LinearizedBlock, OptimizerError> {
                let (residual, jacobian) = block.residual_and_jacobian(values, true)?;
                let jacobian =
                    jacobian.ok_or(OptimizerError::MissingJacobian(block.residual_block_id))?;
                let columns = block
                    .keys()
                    .iter()
                    .map(|key| (key.column(), key.dof()))
                    .collect();
                Ok((columns, residual, jacobian))
            })
            .collect::<Result<_, OptimizerError>>()?;

        let mut system = NormalEquations::new(values.tangent_dimension());
        for (columns, residual, jacobian) in &linearized {
            system.add_block(columns, jacobian, residual)?;
        }
        Ok(system)
    }

    /// Shrink damping after a good step; returns whether the step is accepted.
    ///
    /// Rejected steps leave damping alone; the caller raises it.
    fn update_damping(&self, damping: &mut f64, rho: f64) -> bool {
        if rho > self.config.good_step_quality {
            *damping =
                (*damping * self.config.damping_decrease_factor).max(self.config.damping_min);
            true
        } else {
            rho >= self.config.min_step_quality
        }
    }

    /// Grow damping after a rejected step; `false` once it exceeds the maximum.
    fn raise_damping(&self, damping: &mut f64) -> bool {
        *damping *= self.config.damping_increase_factor;
        if *damping > self.config.damping_max {
            warn!(damping = *damping, "damping exceeded its maximum");
            false
        } else {
            true
        }
    }

    /// Ratio of actual to predicted cost reduction.
    fn compute_step_quality(current_cost: f64, new_cost: f64, predicted_reduction: f64) -> f64 {
        let actual_reduction = current_cost - new_cost;
        if predicted_reduction.abs() < 1e-15 {
            if actual_reduction > 0.0 { 1.0 } else { 0.0 }
        } else {
            actual_reduction / predicted_reduction
        }
    }

    /// `L(0) − L(δ) = −(gᵀδ + ½ δᵀHδ)` for the undamped quadratic model.
    fn compute_predicted_reduction(step: &DVector<f64>, system: &NormalEquations) -> f64 {
        let linear_term = system.gradient().dot(step);
        let quadratic_term = step.dot(&system.hessian_times(step));
        -(linear_term + 0.5 * quadratic_term)
    }

    fn check_convergence(&self, previous_cost: f64, reduction: f64) -> Option<ConvergenceReason> {
        if reduction <= self.config.absolute_error_tolerance {
            return Some(ConvergenceReason::AbsoluteErrorDecrease);
        }
        if previous_cost > 0.0
            && reduction / previous_cost <= self.config.relative_error_tolerance
        {
            return Some(ConvergenceReason::RelativeErrorDecrease);
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn create_summary(
        &self,
        status: SolverStatus,
        initial_cost: f64,
        final_cost: f64,
        iterations: usize,
        final_damping: f64,
        stats: &SolveStats,
        total_time: Duration,
    ) -> LevenbergMarquardtSummary {
        LevenbergMarquardtSummary {
            status,
            initial_cost,
            final_cost,
            iterations,
            successful_steps: stats.successful_steps,
            unsuccessful_steps: stats.unsuccessful_steps,
            final_damping,
            average_cost_reduction: if iterations > 0 {
                (initial_cost - final_cost) / iterations as f64
            } else {
                0.0
            },
            max_gradient_norm: stats.max_gradient_norm,
            final_gradient_norm: stats.final_gradient_norm,
            max_parameter_update_norm: stats.max_parameter_update_norm,
            final_parameter_update_norm: stats.final_parameter_update_norm,
            total_time,
            average_time_per_iteration: if iterations > 0 {
                total_time / iterations as u32
            } else {
                Duration::from_secs(0)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NoiseModel;
    use crate::factors::{GpsFactor, PriorFactor};
    use crate::imu::ImuBias;
    use crate::manifold::{LieGroup, Pose3, SO3};
    use nalgebra::Vector3;

    fn single_epoch_problem(initial_pose: Pose3, fix: Vector3<f64>) -> (FactorGraph, StateStore) {
        let mut graph = FactorGraph::new();
        graph
            .add_factor(
                Box::new(PriorFactor::new(0, Pose3::identity())),
                NoiseModel::diagonal(&[0.01, 0.01, 0.01, 1.0, 1.0, 1.0]).unwrap(),
            )
            .unwrap();
        graph
            .add_factor(
                Box::new(PriorFactor::new(0, Vector3::<f64>::zeros())),
                NoiseModel::isotropic(3, 0.1).unwrap(),
            )
            .unwrap();
        graph
            .add_factor(
                Box::new(PriorFactor::new(0, ImuBias::zero())),
                NoiseModel::isotropic(6, 1e-3).unwrap(),
            )
            .unwrap();
        graph
            .add_factor(Box::new(GpsFactor::new(0, fix)), NoiseModel::isotropic(3, 1.0).unwrap())
            .unwrap();

        let mut values = StateStore::new();
        values.push_epoch(initial_pose, Vector3::zeros(), ImuBias::zero());
        (graph, values)
    }

    #[test]
    fn test_levenberg_marquardt_creation() {
        let solver = LevenbergMarquardt::new();
        assert_eq!(solver.config().max_iterations, 100);
        assert_eq!(solver.config().relative_error_tolerance, 1e-5);
        assert_eq!(solver.config().absolute_error_tolerance, 1e-5);
        assert_eq!(solver.config().linear_solver, LinearSolverType::SparseCholesky);
    }

    #[test]
    fn test_damping_configuration() {
        let config = LevenbergMarquardtConfig::new()
            .with_damping(1e-2)
            .with_damping_bounds(1e-10, 1e10)
            .with_damping_factors(5.0, 0.5)
            .with_step_quality(0.1, 0.8);
        let solver = LevenbergMarquardt::with_config(config);

        let mut damping = 1e-2;
        assert!(solver.update_damping(&mut damping, 0.9));
        assert!((damping - 5e-3).abs() < 1e-15);
        assert!(solver.update_damping(&mut damping, 0.5));
        assert!((damping - 5e-3).abs() < 1e-15);
        assert!(!solver.update_damping(&mut damping, 0.05));
        assert!((damping - 5e-3).abs() < 1e-15);

        assert!(solver.raise_damping(&mut damping));
        assert!((damping - 2.5e-2).abs() < 1e-15);
        let mut saturated = 5e9;
        assert!(!solver.raise_damping(&mut saturated));
    }

    #[test]
    fn test_fix_and_prior_are_balanced() {
        let fix = Vector3::new(2.0, -4.0, 6.0);
        let (graph, values) = single_epoch_problem(Pose3::identity(), fix);
        let result = LevenbergMarquardt::new().optimize(&graph, &values).unwrap();

        assert!(result.status.is_converged(), "{}", result.status);
        // Equal sigmas on prior and fix: the estimate lands halfway.
        let position = result.values.pose(0).unwrap().translation();
        assert!((position - fix * 0.5).norm() < 1e-5, "{position}");
        assert!(result.final_cost < result.initial_cost);
    }

    #[test]
    fn test_rotation_converges_on_manifold() {
        let rotated = Pose3::new(SO3::from_euler_angles(0.3, -0.2, 1.2), Vector3::zeros());
        let (graph, values) = single_epoch_problem(rotated, Vector3::zeros());
        let result = LevenbergMarquardt::new().optimize(&graph, &values).unwrap();

        assert!(result.status.is_converged(), "{}", result.status);
        let angle = result.values.pose(0).unwrap().rotation().angle_to(&SO3::identity());
        assert!(angle < 1e-5, "angle = {angle}");
    }

    #[test]
    fn test_resolve_from_solution_takes_one_iteration() {
        let (graph, values) = single_epoch_problem(
            Pose3::new(SO3::from_euler_angles(0.1, 0.0, -0.4), Vector3::new(1.0, 1.0, 0.0)),
            Vector3::new(3.0, 0.0, 1.0),
        );
        let solver = LevenbergMarquardt::new();
        let first = solver.optimize(&graph, &values).unwrap();
        let second = solver.optimize(&graph, &first.values).unwrap();

        assert!(second.status.is_converged());
        assert_eq!(second.iterations, 1);
        let before = first.values.pose(0).unwrap().translation();
        let after = second.values.pose(0).unwrap().translation();
        assert!((before - after).norm() < 1e-4);
    }

    #[test]
    fn test_iteration_limit_is_reported() {
        let rotated = Pose3::new(SO3::from_euler_angles(0.0, 0.0, 1.0), Vector3::zeros());
        let (graph, values) = single_epoch_problem(rotated, Vector3::zeros());
        let solver =
            LevenbergMarquardt::with_config(LevenbergMarquardtConfig::new().with_max_iterations(1));
        let result = solver.optimize(&graph, &values).unwrap();

        assert_eq!(result.status, SolverStatus::NotConverged);
        assert_eq!(result.iterations, 1);
        assert!(result.final_cost < result.initial_cost);
    }

    #[test]
    fn test_non_finite_start_diverges() {
        let bad = Pose3::new(SO3::identity(), Vector3::new(f64::NAN, 0.0, 0.0));
        let (graph, values) = single_epoch_problem(bad, Vector3::zeros());
        let result = LevenbergMarquardt::new().optimize(&graph, &values).unwrap();

        assert_eq!(result.status, SolverStatus::Diverged);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let (graph, _) = single_epoch_problem(Pose3::identity(), Vector3::zeros());
        let result = LevenbergMarquardt::new().optimize(&graph, &StateStore::new());
        assert!(matches!(result, Err(OptimizerError::Graph(_))));
    }

    #[test]
    fn test_sparse_and_dense_solvers_agree() {
        let initial = Pose3::new(
            SO3::from_euler_angles(0.2, 0.1, 0.5),
            Vector3::new(0.5, 0.0, 0.0),
        );
        let (graph, values) = single_epoch_problem(initial, Vector3::new(1.0, 2.0, 0.0));

        let sparse = LevenbergMarquardt::new().optimize(&graph, &values).unwrap();
        let dense = LevenbergMarquardt::with_config(
            LevenbergMarquardtConfig::new().with_linear_solver(LinearSolverType::DenseCholesky),
        )
        .optimize(&graph, &values)
        .unwrap();

        let a = sparse.values.pose(0).unwrap();
        let b = dense.values.pose(0).unwrap();
        assert!((a.translation() - b.translation()).norm() < 1e-8);
        assert!(a.rotation().angle_to(b.rotation()) < 1e-8);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: LevenbergMarquardtConfig =
            toml::from_str("max_iterations = 7\nlinear_solver = \"dense_cholesky\"").unwrap();
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.linear_solver, LinearSolverType::DenseCholesky);
        assert_eq!(config.good_step_quality, 0.75);
    }
}
