//! Convex QP subproblem and its Clarabel backend.
//!
//! ```text
//! min  ½ dᵀ P d + qᵀ d
//! s.t. A_eq d = b_eq
//!      A_in d ≤ b_in
//! ```
//!
//! Clarabel's form is `A z + s = b, s ∈ K`: the zero cone carries the
//! equalities and the nonnegative cone the inequalities.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector};

/// Entries smaller than this are dropped from the sparse matrices.
const SPARSITY_EPS: f64 = 1e-15;

/// Stacked QP data.
#[derive(Clone, Debug)]
pub struct QpProblem {
    /// Cost Hessian (symmetric, only the upper triangle is read).
    pub p_matrix: DMatrix<f64>,
    /// Cost linear term.
    pub q_vector: DVector<f64>,
    /// Equality constraint matrix.
    pub a_eq: DMatrix<f64>,
    /// Equality right-hand side.
    pub b_eq: DVector<f64>,
    /// Inequality constraint matrix.
    pub a_in: DMatrix<f64>,
    /// Inequality right-hand side.
    pub b_in: DVector<f64>,
}

/// Outcome of a QP subproblem solve.
#[derive(Clone, Debug)]
pub enum QpOutcome {
    /// Primal step and multipliers (equalities first, then inequalities).
    Solved {
        step: DVector<f64>,
        multipliers: DVector<f64>,
        iterations: u32,
    },
    /// The linearized constraints admit no solution.
    Infeasible,
    /// Anything else the interior-point method reports.
    Failed(String),
}

/// Clarabel settings forwarded from the SQP configuration.
#[derive(Clone, Copy, Debug)]
pub struct QpSettings {
    pub max_iter: u32,
    pub tolerance: f64,
}

impl QpProblem {
    pub fn num_variables(&self) -> usize {
        self.q_vector.len()
    }

    /// Solve with Clarabel.
    pub fn solve(&self, settings: QpSettings) -> QpOutcome {
        let n = self.num_variables();
        let n_eq = self.a_eq.nrows();
        let n_in = self.a_in.nrows();

        if n_eq + n_in == 0 {
            return self.solve_unconstrained();
        }

        let mut a_all = DMatrix::zeros(n_eq + n_in, n);
        a_all.view_mut((0, 0), (n_eq, n)).copy_from(&self.a_eq);
        a_all.view_mut((n_eq, 0), (n_in, n)).copy_from(&self.a_in);
        let mut b_all: Vec<f64> = Vec::with_capacity(n_eq + n_in);
        b_all.extend(self.b_eq.iter().copied());
        b_all.extend(self.b_in.iter().copied());

        let mut cones: Vec<SupportedConeT<f64>> = Vec::with_capacity(2);
        if n_eq > 0 {
            cones.push(ZeroConeT(n_eq));
        }
        if n_in > 0 {
            cones.push(NonnegativeConeT(n_in));
        }

        let p_csc = dmatrix_to_csc_upper_tri(&self.p_matrix);
        let a_csc = dmatrix_to_csc(&a_all);
        let q: Vec<f64> = self.q_vector.iter().copied().collect();

        let settings = match DefaultSettingsBuilder::default()
            .max_iter(settings.max_iter)
            .verbose(false)
            .tol_gap_abs(settings.tolerance)
            .tol_gap_rel(settings.tolerance)
            .tol_feas(settings.tolerance)
            .build()
        {
            Ok(s) => s,
            Err(e) => return QpOutcome::Failed(format!("invalid QP settings: {e:?}")),
        };

        let mut solver = match DefaultSolver::new(&p_csc, &q, &a_csc, &b_all, &cones, settings) {
            Ok(solver) => solver,
            Err(e) => return QpOutcome::Failed(format!("QP setup failed: {e:?}")),
        };
        solver.solve();
        let sol = &solver.solution;

        match sol.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => QpOutcome::Solved {
                step: DVector::from_column_slice(&sol.x),
                multipliers: DVector::from_column_slice(&sol.z),
                iterations: sol.iterations,
            },
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                QpOutcome::Infeasible
            }
            other => QpOutcome::Failed(format!("QP status {other:?}")),
        }
    }

    /// `P d = -q`, used when there is nothing for a cone to hold.
    fn solve_unconstrained(&self) -> QpOutcome {
        let p = self.p_matrix.upper_triangle() + self.p_matrix.upper_triangle().transpose()
            - DMatrix::from_diagonal(&self.p_matrix.diagonal());
        match p.lu().solve(&(-&self.q_vector)) {
            Some(step) => QpOutcome::Solved {
                step,
                multipliers: DVector::zeros(0),
                iterations: 1,
            },
            None => QpOutcome::Failed("singular unconstrained QP Hessian".into()),
        }
    }
}

/// Convert a nalgebra `DMatrix<f64>` to a Clarabel `CscMatrix<f64>` (full matrix).
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > SPARSITY_EPS {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Convert a symmetric nalgebra `DMatrix<f64>` to upper-triangular `CscMatrix<f64>`.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..=j.min(nrows.saturating_sub(1)) {
            let v = m[(i, j)];
            if v.abs() > SPARSITY_EPS {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}
