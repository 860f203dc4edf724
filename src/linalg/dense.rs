use nalgebra::{DMatrix, DVector};

use super::{LinAlgError, LinAlgResult, LinearSolver, NormalEquations, check_finite};

/// Dense LLᵀ solver using nalgebra.
#[derive(Debug, Clone, Default)]
pub struct DenseCholeskySolver;

impl DenseCholeskySolver {
    pub fn new() -> Self {
        DenseCholeskySolver
    }
}

impl LinearSolver for DenseCholeskySolver {
    fn solve_damped(
        &mut self,
        system: &NormalEquations,
        lambda: f64,
    ) -> LinAlgResult<DVector<f64>> {
        let n = system.dimension();
        let damped = system.dense_hessian() + DMatrix::<f64>::identity(n, n) * lambda;
        let cholesky = damped.cholesky().ok_or_else(|| {
            LinAlgError::FactorizationFailed("damped Hessian is not positive definite".to_string())
        })?;
        check_finite(cholesky.solve(&(-system.gradient())))
    }

    fn reset(&mut self) {}
}
