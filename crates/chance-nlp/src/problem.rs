//! Problem and solver traits.

use chance_core::error::SolveStatus;
use nalgebra::{DMatrix, DVector};

/// A smooth nonlinear program evaluated at numeric points.
///
/// Bounds may be infinite. Inequalities follow the `g(z) ≤ 0` convention.
pub trait NlpProblem {
    /// Number of decision variables.
    fn num_variables(&self) -> usize;

    /// Lower and upper variable bounds.
    fn variable_bounds(&self) -> (DVector<f64>, DVector<f64>);

    /// Objective value.
    fn objective(&self, z: &DVector<f64>) -> f64;

    /// Objective gradient.
    fn objective_gradient(&self, z: &DVector<f64>) -> DVector<f64>;

    /// Positive semidefinite approximation of the objective Hessian.
    fn objective_hessian(&self, z: &DVector<f64>) -> DMatrix<f64>;

    /// Number of equality constraints.
    fn num_equalities(&self) -> usize;

    /// Equality residuals `h(z)`.
    fn equalities(&self, z: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of `h` (`num_equalities × num_variables`).
    fn equality_jacobian(&self, z: &DVector<f64>) -> DMatrix<f64>;

    /// Number of inequality constraints.
    fn num_inequalities(&self) -> usize;

    /// Inequality values `g(z)`.
    fn inequalities(&self, z: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of `g` (`num_inequalities × num_variables`).
    fn inequality_jacobian(&self, z: &DVector<f64>) -> DMatrix<f64>;

    /// Largest violation of any constraint or bound at `z`.
    fn constraint_violation(&self, z: &DVector<f64>) -> f64 {
        let (lb, ub) = self.variable_bounds();
        let mut worst = 0.0_f64;
        for v in self.equalities(z).iter() {
            worst = worst.max(v.abs());
        }
        for v in self.inequalities(z).iter() {
            worst = worst.max(*v);
        }
        for i in 0..z.len() {
            worst = worst.max(lb[i] - z[i]).max(z[i] - ub[i]);
        }
        worst
    }
}

/// Result of an NLP solve.
#[derive(Clone, Debug)]
pub struct NlpSolution {
    /// Final iterate.
    pub x: DVector<f64>,
    /// Termination status.
    pub status: SolveStatus,
    /// Outer iterations performed.
    pub iterations: u32,
    /// Objective at `x`.
    pub objective: f64,
    /// Largest constraint violation at `x`.
    pub constraint_violation: f64,
    /// Human-readable diagnostic for non-success statuses.
    pub message: String,
}

/// A solver for [`NlpProblem`]s. Blocking, no partial results.
pub trait NlpSolver {
    fn solve(&self, problem: &dyn NlpProblem, initial_guess: &DVector<f64>) -> NlpSolution;
}

impl<T: NlpSolver + ?Sized> NlpSolver for Box<T> {
    fn solve(&self, problem: &dyn NlpProblem, initial_guess: &DVector<f64>) -> NlpSolution {
        (**self).solve(problem, initial_guess)
    }
}
