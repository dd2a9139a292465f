//! Sequential quadratic programming with an ℓ₁ merit line search.
//!
//! Each iteration linearizes the constraints at the current iterate `z`:
//!
//! ```text
//! min  ½ dᵀ (H + εI) d + ∇f(z)ᵀ d
//! s.t. h(z) + J_h d = 0
//!      g(z) + J_g d ≤ 0
//!      lb - z ≤ d ≤ ub - z
//! ```
//!
//! and accepts `z + α d` once the merit `f + μ (‖h‖₁ + ‖max(g, 0)‖₁)`
//! decreases sufficiently. The penalty `μ` is kept above the largest QP
//! multiplier.

use chance_core::config::SqpConfig;
use chance_core::error::SolveStatus;
use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::problem::{NlpProblem, NlpSolution, NlpSolver};
use crate::qp::{QpOutcome, QpProblem, QpSettings};

/// Margin by which the merit penalty exceeds the largest multiplier.
const PENALTY_MARGIN: f64 = 1.1;

/// Default NLP solver.
#[derive(Clone, Debug, Default)]
pub struct SqpSolver {
    config: SqpConfig,
}

impl SqpSolver {
    /// Create a new SQP solver with the given configuration.
    pub const fn new(config: SqpConfig) -> Self {
        Self { config }
    }

    /// Access the solver configuration.
    pub const fn config(&self) -> &SqpConfig {
        &self.config
    }

    fn qp_settings(&self) -> QpSettings {
        QpSettings {
            max_iter: self.config.qp_max_iterations,
            tolerance: self.config.qp_tolerance,
        }
    }
}

/// ℓ₁ norm of equality residuals plus positive parts of inequalities.
fn infeasibility(h: &DVector<f64>, g: &DVector<f64>) -> f64 {
    h.iter().map(|v| v.abs()).sum::<f64>() + g.iter().map(|v| v.max(0.0)).sum::<f64>()
}

fn merit(problem: &dyn NlpProblem, z: &DVector<f64>, penalty: f64) -> f64 {
    problem.objective(z) + penalty * infeasibility(&problem.equalities(z), &problem.inequalities(z))
}

impl SqpSolver {
    /// Stack the linearized constraints and bound rows into a QP.
    #[allow(clippy::too_many_arguments)]
    fn build_qp(
        &self,
        z: &DVector<f64>,
        lb: &DVector<f64>,
        ub: &DVector<f64>,
        hessian: DMatrix<f64>,
        gradient: DVector<f64>,
        h: &DVector<f64>,
        jac_h: DMatrix<f64>,
        g: &DVector<f64>,
        jac_g: &DMatrix<f64>,
    ) -> QpProblem {
        let n = z.len();
        let upper: Vec<usize> = (0..n).filter(|&i| ub[i].is_finite()).collect();
        let lower: Vec<usize> = (0..n).filter(|&i| lb[i].is_finite()).collect();
        let n_g = g.len();
        let n_in = n_g + upper.len() + lower.len();

        let mut a_in = DMatrix::zeros(n_in, n);
        let mut b_in = DVector::zeros(n_in);
        a_in.view_mut((0, 0), (n_g, n)).copy_from(jac_g);
        b_in.rows_mut(0, n_g).copy_from(&(-g));

        let mut row = n_g;
        // d_i ≤ ub_i - z_i
        for &i in &upper {
            a_in[(row, i)] = 1.0;
            b_in[row] = ub[i] - z[i];
            row += 1;
        }
        // -d_i ≤ z_i - lb_i
        for &i in &lower {
            a_in[(row, i)] = -1.0;
            b_in[row] = z[i] - lb[i];
            row += 1;
        }
        debug_assert_eq!(row, n_in, "QP inequality row count mismatch");

        let p_matrix = hessian + DMatrix::identity(n, n) * self.config.hessian_regularization;

        QpProblem {
            p_matrix,
            q_vector: gradient,
            a_eq: jac_h,
            b_eq: -h,
            a_in,
            b_in,
        }
    }

    fn finish(
        problem: &dyn NlpProblem,
        x: DVector<f64>,
        status: SolveStatus,
        iterations: u32,
        message: impl Into<String>,
    ) -> NlpSolution {
        let objective = problem.objective(&x);
        let constraint_violation = problem.constraint_violation(&x);
        NlpSolution {
            x,
            status,
            iterations,
            objective,
            constraint_violation,
            message: message.into(),
        }
    }
}

impl NlpSolver for SqpSolver {
    fn solve(&self, problem: &dyn NlpProblem, initial_guess: &DVector<f64>) -> NlpSolution {
        let cfg = &self.config;
        let (lb, ub) = problem.variable_bounds();

        // Start inside the box so every bound row of the first QP is consistent.
        let mut z = initial_guess.zip_zip_map(&lb, &ub, |v, lo, hi| v.max(lo).min(hi));
        let mut penalty = 1.0_f64;

        for iteration in 0..cfg.max_iterations {
            let h = problem.equalities(&z);
            let g = problem.inequalities(&z);
            let jac_g = problem.inequality_jacobian(&z);
            let qp = self.build_qp(
                &z,
                &lb,
                &ub,
                problem.objective_hessian(&z),
                problem.objective_gradient(&z),
                &h,
                problem.equality_jacobian(&z),
                &g,
                &jac_g,
            );

            let (step, multipliers) = match qp.solve(self.qp_settings()) {
                QpOutcome::Solved {
                    step, multipliers, ..
                } => (step, multipliers),
                QpOutcome::Infeasible => {
                    return Self::finish(
                        problem,
                        z,
                        SolveStatus::Infeasible,
                        iteration,
                        "linearized constraints are infeasible",
                    );
                }
                QpOutcome::Failed(message) => {
                    return Self::finish(
                        problem,
                        z,
                        SolveStatus::NumericalError,
                        iteration,
                        message,
                    );
                }
            };

            let n_general = h.len() + g.len();
            let max_multiplier = multipliers
                .iter()
                .take(n_general)
                .fold(0.0_f64, |acc, y| acc.max(y.abs()));
            penalty = penalty.max(PENALTY_MARGIN * max_multiplier);

            let step_norm = step.amax();
            let infeas = infeasibility(&h, &g);
            let violation = problem.constraint_violation(&z);

            debug!(
                "SQP iter {iteration}: |d|={step_norm:.3e} viol={violation:.3e} mu={penalty:.3e}"
            );

            if step_norm <= cfg.step_tolerance && violation <= cfg.feasibility_tolerance {
                return Self::finish(problem, z, SolveStatus::Solved, iteration, "");
            }

            // Armijo backtracking on the exact-penalty merit function.
            let gradient_dot = qp.q_vector.dot(&step);
            let directional = gradient_dot - penalty * infeas;
            let phi0 = problem.objective(&z) + penalty * infeas;
            let mut alpha = 1.0_f64;
            let accepted = loop {
                let trial = &z + &step * alpha;
                if merit(problem, &trial, penalty) <= phi0 + cfg.armijo * alpha * directional.min(0.0)
                {
                    break Some(trial);
                }
                alpha *= 0.5;
                if alpha < cfg.min_step {
                    break None;
                }
            };

            let Some(next) = accepted else {
                if violation <= cfg.feasibility_tolerance && step_norm <= cfg.step_tolerance.sqrt() {
                    return Self::finish(problem, z, SolveStatus::Solved, iteration + 1, "");
                }
                return Self::finish(
                    problem,
                    z,
                    SolveStatus::NumericalError,
                    iteration + 1,
                    "line search failed to decrease the merit function",
                );
            };
            z = next;
        }

        Self::finish(
            problem,
            z,
            SolveStatus::MaxIterations,
            cfg.max_iterations,
            "iteration limit reached",
        )
    }
}
