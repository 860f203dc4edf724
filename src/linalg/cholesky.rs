use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers;
use faer::sparse::{SparseColMat, Triplet};
use faer::{Mat, Side};
use nalgebra::DVector;
use tracing::trace;

use super::{LinAlgError, LinAlgResult, LinearSolver, NormalEquations, check_finite};

/// Sparse LLᵀ solver backed by faer.
///
/// The symbolic factorization depends only on the sparsity pattern, which is
/// fixed for a given graph, so it is computed once and reused until
/// [`LinearSolver::reset`] is called or the pattern size changes.
#[derive(Debug, Clone)]
pub struct SparseCholeskySolver {
    symbolic_pattern: Option<(usize, usize, solvers::SymbolicLlt<usize>)>,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        SparseCholeskySolver {
            symbolic_pattern: None,
        }
    }

    fn damped_hessian(
        system: &NormalEquations,
        lambda: f64,
    ) -> LinAlgResult<SparseColMat<usize, f64>> {
        let n = system.dimension();
        let mut triplets: Vec<Triplet<usize, usize, f64>> =
            Vec::with_capacity(system.hessian_entries().len() + n);
        triplets.extend(
            system
                .hessian_entries()
                .iter()
                .map(|&(r, c, v)| Triplet::new(r, c, v)),
        );
        triplets.extend((0..n).map(|i| Triplet::new(i, i, lambda)));

        SparseColMat::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| LinAlgError::MatrixConstruction(format!("{e:?}")))
    }
}

impl Default for SparseCholeskySolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearSolver for SparseCholeskySolver {
    fn solve_damped(
        &mut self,
        system: &NormalEquations,
        lambda: f64,
    ) -> LinAlgResult<DVector<f64>> {
        let n = system.dimension();
        let hessian = Self::damped_hessian(system, lambda)?;
        let nnz = hessian.symbolic().compute_nnz();

        let cached = matches!(
            &self.symbolic_pattern,
            Some((dim, count, _)) if *dim == n && *count == nnz
        );
        if !cached {
            trace!(dimension = n, nnz, "symbolic Cholesky analysis");
            let symbolic = solvers::SymbolicLlt::try_new(hessian.symbolic(), Side::Lower)
                .map_err(|e| LinAlgError::FactorizationFailed(format!("{e:?}")))?;
            self.symbolic_pattern = Some((n, nnz, symbolic));
        }

        let symbolic = match &self.symbolic_pattern {
            Some((_, _, symbolic)) => symbolic.clone(),
            None => {
                return Err(LinAlgError::FactorizationFailed(
                    "missing symbolic factorization".to_string(),
                ));
            }
        };

        let cholesky = solvers::Llt::try_new_with_symbolic(symbolic, hessian.as_ref(), Side::Lower)
            .map_err(|e| LinAlgError::FactorizationFailed(format!("{e:?}")))?;

        let gradient = system.gradient();
        let rhs = Mat::<f64>::from_fn(n, 1, |i, _| -gradient[i]);
        let dx = cholesky.solve(rhs.as_ref());

        check_finite(DVector::from_fn(n, |i, _| dx[(i, 0)]))
    }

    fn reset(&mut self) {
        self.symbolic_pattern = None;
    }
}
