//! Assembly of the chance-constrained NLP.
//!
//! [`ProblemStructure`] is built once by `setup()` and captures everything
//! that does not depend on the numeric initial condition: variable layout,
//! cost weights, bound rows and margin coefficients. [`BoundProblem`] binds
//! `(x0, Σ₀, K)` to it for one solve and implements [`NlpProblem`].
//!
//! Variable layout:
//!
//! ```text
//! multiple shooting: z = [ū₀ … ū_{N−1}, x̄₁ … x̄_N]
//! single shooting:   z = [ū₀ … ū_{N−1}]
//! ```
//!
//! Every state row has the form `g(z) ≤ 0`:
//!
//! ```text
//! lower: lb + κσ_i(z) − x̄_i(z) ≤ 0
//! upper: x̄_i(z) − ub + κσ_i(z) ≤ 0
//! ```
//!
//! Rows without a margin (hard bounds) become variable bounds in the
//! multiple-shooting layout.

use chance_core::config::Formulation;
use chance_core::traits::{DisturbanceModel, PlantModel};
use chance_nlp::NlpProblem;
use nalgebra::{DMatrix, DVector};

use crate::constraints::StateInputBounds;
use crate::cost::{QuadStageCost, QuadTerminalCost};
use crate::propagation::UncertaintyPropagator;
use crate::tightening::{ChanceConstraintTightener, Direction, TightenedBounds};
use crate::types::SolutionRecord;

/// Relative forward-difference step for margin Jacobians.
const FD_STEP: f64 = 1e-7;

/// Origin of a state bound row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowKind {
    /// Deterministic bound value.
    Hard(f64),
    /// Chance constraint, by index into the tightener's specs.
    Chance(usize),
}

/// One inequality row on a mean state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateRow {
    /// Horizon step, 1 … N.
    pub step: usize,
    pub state: usize,
    pub direction: Direction,
    pub kind: RowKind,
}

/// Problem skeleton shared by every solve after `setup()`.
#[derive(Debug, Clone)]
pub struct ProblemStructure {
    horizon: usize,
    state_dim: usize,
    input_dim: usize,
    formulation: Formulation,
    stage_q: DVector<f64>,
    stage_ref: DVector<f64>,
    input_q: DVector<f64>,
    input_ref: DVector<f64>,
    terminal_q: DVector<f64>,
    terminal_ref: DVector<f64>,
    bounds: StateInputBounds,
    hard_lower: DVector<f64>,
    hard_upper: DVector<f64>,
    tightener: ChanceConstraintTightener,
    rows: Vec<StateRow>,
}

impl ProblemStructure {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        horizon: usize,
        state_dim: usize,
        input_dim: usize,
        formulation: Formulation,
        stage: &QuadStageCost,
        terminal: &QuadTerminalCost,
        bounds: StateInputBounds,
        tightener: ChanceConstraintTightener,
    ) -> Self {
        let (stage_q, stage_ref) = stage.state_weights();
        let (input_q, input_ref) = stage.input_weights();
        let (terminal_q, terminal_ref) = terminal.state_weights();

        // Chance constraints with κ = 0 are ordinary hard bounds. A negative κ
        // relaxes the bound, so it still needs its own row.
        let mut hard_lower = bounds.x_lb.clone();
        let mut hard_upper = bounds.x_ub.clone();
        let mut tightened = Vec::new();
        for (index, spec) in tightener.specs().iter().enumerate() {
            if tightener.kappa(index) != 0.0 {
                tightened.push(index);
                continue;
            }
            match spec.direction {
                Direction::Lower => {
                    hard_lower[spec.state] = hard_lower[spec.state].max(spec.bound);
                }
                Direction::Upper => {
                    hard_upper[spec.state] = hard_upper[spec.state].min(spec.bound);
                }
            }
        }

        let mut rows = Vec::new();
        for step in 1..=horizon {
            if formulation == Formulation::SingleShooting {
                for state in 0..state_dim {
                    if hard_lower[state].is_finite() {
                        rows.push(StateRow {
                            step,
                            state,
                            direction: Direction::Lower,
                            kind: RowKind::Hard(hard_lower[state]),
                        });
                    }
                    if hard_upper[state].is_finite() {
                        rows.push(StateRow {
                            step,
                            state,
                            direction: Direction::Upper,
                            kind: RowKind::Hard(hard_upper[state]),
                        });
                    }
                }
            }
            for &index in &tightened {
                let spec = tightener.specs()[index];
                rows.push(StateRow {
                    step,
                    state: spec.state,
                    direction: spec.direction,
                    kind: RowKind::Chance(index),
                });
            }
        }

        Self {
            horizon,
            state_dim,
            input_dim,
            formulation,
            stage_q,
            stage_ref,
            input_q,
            input_ref,
            terminal_q,
            terminal_ref,
            bounds,
            hard_lower,
            hard_upper,
            tightener,
            rows,
        }
    }

    pub const fn horizon(&self) -> usize {
        self.horizon
    }

    pub const fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub const fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub const fn formulation(&self) -> Formulation {
        self.formulation
    }

    pub const fn tightener(&self) -> &ChanceConstraintTightener {
        &self.tightener
    }

    pub const fn bounds(&self) -> &StateInputBounds {
        &self.bounds
    }

    pub fn rows(&self) -> &[StateRow] {
        &self.rows
    }

    pub fn num_variables(&self) -> usize {
        match self.formulation {
            Formulation::MultipleShooting => self.horizon * (self.input_dim + self.state_dim),
            Formulation::SingleShooting => self.horizon * self.input_dim,
        }
    }

    pub fn num_equalities(&self) -> usize {
        match self.formulation {
            Formulation::MultipleShooting => self.horizon * self.state_dim,
            Formulation::SingleShooting => 0,
        }
    }

    pub fn num_inequalities(&self) -> usize {
        self.rows.len()
    }

    fn has_margins(&self) -> bool {
        self.rows
            .iter()
            .any(|r| matches!(r.kind, RowKind::Chance(_)))
    }

    const fn u_offset(&self, k: usize) -> usize {
        k * self.input_dim
    }

    /// Offset of x̄_k, k in 1 … N (multiple shooting only).
    const fn x_offset(&self, k: usize) -> usize {
        self.horizon * self.input_dim + (k - 1) * self.state_dim
    }
}

/// Effective bounds and trajectories recovered from a solution vector.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub inputs: Vec<DVector<f64>>,
    pub means: Vec<DVector<f64>>,
    pub covariances: Vec<DMatrix<f64>>,
    pub bounds: TightenedBounds,
}

/// A [`ProblemStructure`] with `(x0, Σ₀, K)` bound in.
pub struct BoundProblem<'a, P: ?Sized, D: ?Sized> {
    structure: &'a ProblemStructure,
    propagator: UncertaintyPropagator<'a, P, D>,
    x0: &'a DVector<f64>,
    sigma0: &'a DMatrix<f64>,
    gain: &'a DMatrix<f64>,
}

impl<'a, P, D> BoundProblem<'a, P, D>
where
    P: PlantModel + ?Sized,
    D: DisturbanceModel + ?Sized,
{
    pub const fn new(
        structure: &'a ProblemStructure,
        propagator: UncertaintyPropagator<'a, P, D>,
        x0: &'a DVector<f64>,
        sigma0: &'a DMatrix<f64>,
        gain: &'a DMatrix<f64>,
    ) -> Self {
        Self {
            structure,
            propagator,
            x0,
            sigma0,
            gain,
        }
    }

    fn inputs(&self, z: &DVector<f64>) -> Vec<DVector<f64>> {
        let s = self.structure;
        (0..s.horizon)
            .map(|k| z.rows(s.u_offset(k), s.input_dim).clone_owned())
            .collect()
    }

    fn means(&self, z: &DVector<f64>, inputs: &[DVector<f64>]) -> Vec<DVector<f64>> {
        let s = self.structure;
        match s.formulation {
            Formulation::MultipleShooting => {
                let mut means = Vec::with_capacity(s.horizon + 1);
                means.push(self.x0.clone());
                for k in 1..=s.horizon {
                    means.push(z.rows(s.x_offset(k), s.state_dim).clone_owned());
                }
                means
            }
            Formulation::SingleShooting => self.propagator.rollout(self.x0, inputs),
        }
    }

    fn covariances(&self, means: &[DVector<f64>], inputs: &[DVector<f64>]) -> Vec<DMatrix<f64>> {
        self.propagator
            .covariances_along(means, inputs, self.sigma0, self.gain)
    }

    /// κσ per row (zero for hard rows).
    fn margins(&self, z: &DVector<f64>) -> DVector<f64> {
        let s = self.structure;
        let mut margins = DVector::zeros(s.rows.len());
        if !s.has_margins() {
            return margins;
        }
        let inputs = self.inputs(z);
        let means = self.means(z, &inputs);
        let covariances = self.covariances(&means, &inputs);
        for (r, row) in s.rows.iter().enumerate() {
            if let RowKind::Chance(index) = row.kind {
                margins[r] = s.tightener.margin(index, &covariances[row.step]);
            }
        }
        margins
    }

    /// Forward-difference Jacobian of [`margins`](Self::margins).
    fn margin_jacobian(&self, z: &DVector<f64>) -> DMatrix<f64> {
        let s = self.structure;
        let nz = z.len();
        let mut jac = DMatrix::zeros(s.rows.len(), nz);
        if !s.has_margins() {
            return jac;
        }
        let base = self.margins(z);
        let mut zp = z.clone();
        for j in 0..nz {
            let h = FD_STEP * z[j].abs().max(1.0);
            zp[j] = z[j] + h;
            let col = (self.margins(&zp) - &base) / h;
            jac.set_column(j, &col);
            zp[j] = z[j];
        }
        jac
    }

    /// `S_k = ∂x̄_k / ∂[ū₀ … ū_{N−1}]` for k = 0 … N.
    fn sensitivities(&self, means: &[DVector<f64>], inputs: &[DVector<f64>]) -> Vec<DMatrix<f64>> {
        let s = self.structure;
        let nu = s.horizon * s.input_dim;
        let mut sens = Vec::with_capacity(s.horizon + 1);
        sens.push(DMatrix::zeros(s.state_dim, nu));
        for k in 0..s.horizon {
            let (a, b) = self.propagator.mean_jacobians(&means[k], &inputs[k]);
            let mut next = a * &sens[k];
            let mut block = next.view_mut((0, s.u_offset(k)), (s.state_dim, s.input_dim));
            block += b;
            sens.push(next);
        }
        sens
    }

    /// Weighted state residual gradient `2 q ∘ (x̄_k − r)` at step k.
    fn state_cost_gradient(&self, k: usize, x: &DVector<f64>) -> DVector<f64> {
        let s = self.structure;
        if k == s.horizon {
            (x - &s.terminal_ref).component_mul(&s.terminal_q) * 2.0
        } else {
            (x - &s.stage_ref).component_mul(&s.stage_q) * 2.0
        }
    }

    fn state_cost_weights(&self, k: usize) -> &DVector<f64> {
        let s = self.structure;
        if k == s.horizon {
            &s.terminal_q
        } else {
            &s.stage_q
        }
    }

    /// Initial iterate: zero inputs, or the previous inputs shifted one step,
    /// with the mean states rolled out from x0.
    pub fn initial_guess(&self, previous: Option<&SolutionRecord>) -> DVector<f64> {
        let s = self.structure;
        let clamp = |u: &DVector<f64>| u.zip_zip_map(&s.bounds.u_lb, &s.bounds.u_ub, |v, lo, hi| v.max(lo).min(hi));
        let inputs: Vec<DVector<f64>> = match previous {
            Some(prev) if prev.horizon() == s.horizon && !prev.inputs.is_empty() => (0..s.horizon)
                .map(|k| clamp(&prev.inputs[(k + 1).min(s.horizon - 1)]))
                .collect(),
            _ => vec![clamp(&DVector::zeros(s.input_dim)); s.horizon],
        };
        let means = self.propagator.rollout(self.x0, &inputs);
        self.pack(&inputs, &means)
    }

    fn pack(&self, inputs: &[DVector<f64>], means: &[DVector<f64>]) -> DVector<f64> {
        let s = self.structure;
        let mut z = DVector::zeros(s.num_variables());
        for (k, u) in inputs.iter().enumerate() {
            z.rows_mut(s.u_offset(k), s.input_dim).copy_from(u);
        }
        if s.formulation == Formulation::MultipleShooting {
            for k in 1..=s.horizon {
                z.rows_mut(s.x_offset(k), s.state_dim).copy_from(&means[k]);
            }
        }
        z
    }

    /// Trajectories, covariances and effective bounds at `z`.
    pub fn extract(&self, z: &DVector<f64>) -> Extracted {
        let s = self.structure;
        let inputs = self.inputs(z);
        let means = self.means(z, &inputs);
        let covariances = self.covariances(&means, &inputs);
        let bounds = s
            .tightener
            .tightened_bounds(&covariances, &s.bounds.x_lb, &s.bounds.x_ub);
        Extracted {
            inputs,
            means,
            covariances,
            bounds,
        }
    }
}

impl<P, D> NlpProblem for BoundProblem<'_, P, D>
where
    P: PlantModel + ?Sized,
    D: DisturbanceModel + ?Sized,
{
    fn num_variables(&self) -> usize {
        self.structure.num_variables()
    }

    fn variable_bounds(&self) -> (DVector<f64>, DVector<f64>) {
        let s = self.structure;
        let nz = s.num_variables();
        let mut lb = DVector::from_element(nz, f64::NEG_INFINITY);
        let mut ub = DVector::from_element(nz, f64::INFINITY);
        for k in 0..s.horizon {
            lb.rows_mut(s.u_offset(k), s.input_dim).copy_from(&s.bounds.u_lb);
            ub.rows_mut(s.u_offset(k), s.input_dim).copy_from(&s.bounds.u_ub);
        }
        if s.formulation == Formulation::MultipleShooting {
            for k in 1..=s.horizon {
                lb.rows_mut(s.x_offset(k), s.state_dim).copy_from(&s.hard_lower);
                ub.rows_mut(s.x_offset(k), s.state_dim).copy_from(&s.hard_upper);
            }
        }
        (lb, ub)
    }

    fn objective(&self, z: &DVector<f64>) -> f64 {
        let s = self.structure;
        let inputs = self.inputs(z);
        let means = self.means(z, &inputs);
        let mut total = 0.0;
        for k in 0..s.horizon {
            let dx = (&means[k] - &s.stage_ref).component_mul(&(&means[k] - &s.stage_ref));
            let du = (&inputs[k] - &s.input_ref).component_mul(&(&inputs[k] - &s.input_ref));
            total += s.stage_q.dot(&dx) + s.input_q.dot(&du);
        }
        let dx = &means[s.horizon] - &s.terminal_ref;
        total + s.terminal_q.dot(&dx.component_mul(&dx))
    }

    fn objective_gradient(&self, z: &DVector<f64>) -> DVector<f64> {
        let s = self.structure;
        let inputs = self.inputs(z);
        let means = self.means(z, &inputs);
        let mut grad = DVector::zeros(s.num_variables());
        for (k, u) in inputs.iter().enumerate() {
            let du = (u - &s.input_ref).component_mul(&s.input_q) * 2.0;
            grad.rows_mut(s.u_offset(k), s.input_dim).copy_from(&du);
        }
        match s.formulation {
            Formulation::MultipleShooting => {
                for k in 1..=s.horizon {
                    let gx = self.state_cost_gradient(k, &means[k]);
                    grad.rows_mut(s.x_offset(k), s.state_dim).copy_from(&gx);
                }
            }
            Formulation::SingleShooting => {
                let sens = self.sensitivities(&means, &inputs);
                for k in 1..=s.horizon {
                    grad += sens[k].transpose() * self.state_cost_gradient(k, &means[k]);
                }
            }
        }
        grad
    }

    /// Gauss–Newton Hessian (exact in the multiple-shooting layout).
    fn objective_hessian(&self, z: &DVector<f64>) -> DMatrix<f64> {
        let s = self.structure;
        let nz = s.num_variables();
        let mut hess = DMatrix::zeros(nz, nz);
        for k in 0..s.horizon {
            for j in 0..s.input_dim {
                let i = s.u_offset(k) + j;
                hess[(i, i)] = 2.0 * s.input_q[j];
            }
        }
        match s.formulation {
            Formulation::MultipleShooting => {
                for k in 1..=s.horizon {
                    let q = self.state_cost_weights(k);
                    for j in 0..s.state_dim {
                        let i = s.x_offset(k) + j;
                        hess[(i, i)] = 2.0 * q[j];
                    }
                }
            }
            Formulation::SingleShooting => {
                let inputs = self.inputs(z);
                let means = self.means(z, &inputs);
                let sens = self.sensitivities(&means, &inputs);
                for k in 1..=s.horizon {
                    let q = DMatrix::from_diagonal(&(self.state_cost_weights(k) * 2.0));
                    hess += sens[k].transpose() * q * &sens[k];
                }
            }
        }
        hess
    }

    fn num_equalities(&self) -> usize {
        self.structure.num_equalities()
    }

    /// `x̄_{k+1} − F(x̄_k, ū_k)` stacked over k.
    fn equalities(&self, z: &DVector<f64>) -> DVector<f64> {
        let s = self.structure;
        let mut h = DVector::zeros(s.num_equalities());
        if s.formulation == Formulation::SingleShooting {
            return h;
        }
        let inputs = self.inputs(z);
        let means = self.means(z, &inputs);
        for k in 0..s.horizon {
            let residual = &means[k + 1] - self.propagator.mean_step(&means[k], &inputs[k]);
            h.rows_mut(k * s.state_dim, s.state_dim).copy_from(&residual);
        }
        h
    }

    fn equality_jacobian(&self, z: &DVector<f64>) -> DMatrix<f64> {
        let s = self.structure;
        let n = s.state_dim;
        let mut jac = DMatrix::zeros(s.num_equalities(), s.num_variables());
        if s.formulation == Formulation::SingleShooting {
            return jac;
        }
        let inputs = self.inputs(z);
        let means = self.means(z, &inputs);
        for k in 0..s.horizon {
            let (a, b) = self.propagator.mean_jacobians(&means[k], &inputs[k]);
            let row = k * n;
            jac.view_mut((row, s.x_offset(k + 1)), (n, n))
                .copy_from(&DMatrix::identity(n, n));
            if k >= 1 {
                jac.view_mut((row, s.x_offset(k)), (n, n)).copy_from(&(-a));
            }
            jac.view_mut((row, s.u_offset(k)), (n, s.input_dim))
                .copy_from(&(-b));
        }
        jac
    }

    fn num_inequalities(&self) -> usize {
        self.structure.num_inequalities()
    }

    fn inequalities(&self, z: &DVector<f64>) -> DVector<f64> {
        let s = self.structure;
        let inputs = self.inputs(z);
        let means = self.means(z, &inputs);
        let margins = self.margins(z);
        DVector::from_iterator(
            s.rows.len(),
            s.rows.iter().enumerate().map(|(r, row)| {
                let bound = match row.kind {
                    RowKind::Hard(b) => b,
                    RowKind::Chance(index) => s.tightener.specs()[index].bound,
                };
                let x = means[row.step][row.state];
                match row.direction {
                    Direction::Lower => bound + margins[r] - x,
                    Direction::Upper => x - bound + margins[r],
                }
            }),
        )
    }

    fn inequality_jacobian(&self, z: &DVector<f64>) -> DMatrix<f64> {
        let s = self.structure;
        let mut jac = self.margin_jacobian(z);
        let sens = match s.formulation {
            Formulation::MultipleShooting => None,
            Formulation::SingleShooting => {
                let inputs = self.inputs(z);
                let means = self.means(z, &inputs);
                Some(self.sensitivities(&means, &inputs))
            }
        };
        for (r, row) in s.rows.iter().enumerate() {
            let sign = match row.direction {
                Direction::Lower => -1.0,
                Direction::Upper => 1.0,
            };
            match &sens {
                None => {
                    jac[(r, s.x_offset(row.step) + row.state)] += sign;
                }
                Some(sens) => {
                    let dx = sens[row.step].row(row.state) * sign;
                    let mut target = jac.row_mut(r);
                    target += dx;
                }
            }
        }
        jac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chance_core::config::TighteningMode;
    use chance_core::disturbance::ConstantDisturbance;
    use chance_core::plant::LinearPlant;

    use crate::tightening::ChanceConstraintSpec;

    struct Fixture {
        plant: LinearPlant,
        disturbance: ConstantDisturbance,
        injection: DMatrix<f64>,
    }

    fn fixture() -> Fixture {
        Fixture {
            plant: LinearPlant::new(
                DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 1.0]),
                DMatrix::from_row_slice(2, 1, &[1.0, 0.0]),
                1.0,
            )
            .with_names(&["px", "py"], &["ax"]),
            disturbance: ConstantDisturbance::zero_mean(&[0.2]),
            injection: DMatrix::from_column_slice(2, 1, &[1.0, 0.0]),
        }
    }

    fn structure(f: &Fixture, formulation: Formulation) -> ProblemStructure {
        let names = f.plant.state_names().to_vec();
        let mut stage = QuadStageCost::new(&names, f.plant.input_names());
        stage.add_states(["px", "py"], 1.0, [1.0, 2.0]).unwrap();
        stage.add_inputs("ax", 0.0, 0.1).unwrap();
        let mut terminal = QuadTerminalCost::new(&names);
        terminal.add_states("mu_py", 1.0, 5.0).unwrap();
        let mut bounds = StateInputBounds::unbounded(2, 1);
        bounds.u_ub[0] = 2.0;
        let tightener = ChanceConstraintTightener::new(
            TighteningMode::Gaussian,
            vec![
                ChanceConstraintSpec {
                    state: 0,
                    bound: -1.0,
                    probability: 0.9,
                    direction: Direction::Lower,
                },
                ChanceConstraintSpec {
                    state: 1,
                    bound: 8.0,
                    probability: 1.0,
                    direction: Direction::Upper,
                },
            ],
            2,
        )
        .unwrap();
        ProblemStructure::build(3, 2, 1, formulation, &stage, &terminal, bounds, tightener)
    }

    fn fd_gradient(problem: &dyn NlpProblem, z: &DVector<f64>) -> DVector<f64> {
        let h = 1e-6;
        DVector::from_fn(z.len(), |j, _| {
            let mut zp = z.clone();
            let mut zm = z.clone();
            zp[j] += h;
            zm[j] -= h;
            (problem.objective(&zp) - problem.objective(&zm)) / (2.0 * h)
        })
    }

    #[test]
    fn layout_counts() {
        let f = fixture();
        let ms = structure(&f, Formulation::MultipleShooting);
        assert_eq!(ms.num_variables(), 3 * (1 + 2));
        assert_eq!(ms.num_equalities(), 6);
        // Only the tightened (p < 1) constraint needs rows.
        assert_eq!(ms.num_inequalities(), 3);

        let ss = structure(&f, Formulation::SingleShooting);
        assert_eq!(ss.num_variables(), 3);
        assert_eq!(ss.num_equalities(), 0);
        assert_eq!(ss.num_inequalities(), 6);
    }

    #[test]
    fn relaxed_chance_bounds_keep_their_rows() {
        let f = fixture();
        let names = f.plant.state_names().to_vec();
        let mut stage = QuadStageCost::new(&names, f.plant.input_names());
        stage.add_states("px", -5.0, 1.0).unwrap();
        let terminal = QuadTerminalCost::new(&names);
        let tightener = ChanceConstraintTightener::new(
            TighteningMode::Gaussian,
            vec![ChanceConstraintSpec {
                state: 0,
                bound: 0.0,
                probability: 0.3,
                direction: Direction::Lower,
            }],
            2,
        )
        .unwrap();
        assert!(tightener.kappa(0) < 0.0);
        let s = ProblemStructure::build(
            3,
            2,
            1,
            Formulation::MultipleShooting,
            &stage,
            &terminal,
            StateInputBounds::unbounded(2, 1),
            tightener,
        );
        assert_eq!(s.num_inequalities(), 3);
        assert!(s.rows().iter().all(|r| matches!(r.kind, RowKind::Chance(0))));

        let prop = UncertaintyPropagator::new(&f.plant, &f.disturbance, &f.injection, true);
        let x0 = DVector::zeros(2);
        let sigma0 = DMatrix::zeros(2, 2);
        let gain = DMatrix::zeros(1, 2);
        let problem = BoundProblem::new(&s, prop, &x0, &sigma0, &gain);
        let (lb, _) = problem.variable_bounds();
        // x̄₁ = z[3..5]: px is not clamped to the nominal bound.
        assert_eq!(lb[3], f64::NEG_INFINITY);
    }

    #[test]
    fn hard_chance_bounds_become_variable_bounds() {
        let f = fixture();
        let s = structure(&f, Formulation::MultipleShooting);
        let prop = UncertaintyPropagator::new(&f.plant, &f.disturbance, &f.injection, true);
        let x0 = DVector::zeros(2);
        let sigma0 = DMatrix::zeros(2, 2);
        let gain = DMatrix::zeros(1, 2);
        let problem = BoundProblem::new(&s, prop, &x0, &sigma0, &gain);
        let (lb, ub) = problem.variable_bounds();
        assert_eq!(ub[0], 2.0);
        assert_eq!(lb[0], f64::NEG_INFINITY);
        // x̄₁ = z[3..5]: py capped at 8.
        assert_eq!(ub[4], 8.0);
        assert_eq!(ub[3], f64::INFINITY);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let f = fixture();
        for formulation in [Formulation::MultipleShooting, Formulation::SingleShooting] {
            let s = structure(&f, formulation);
            let prop = UncertaintyPropagator::new(&f.plant, &f.disturbance, &f.injection, true);
            let x0 = DVector::from_vec(vec![0.5, -0.5]);
            let sigma0 = DMatrix::identity(2, 2) * 0.1;
            let gain = DMatrix::from_row_slice(1, 2, &[-0.3, 0.0]);
            let problem = BoundProblem::new(&s, prop, &x0, &sigma0, &gain);
            let z = DVector::from_fn(s.num_variables(), |i, _| 0.1 * (i as f64) - 0.2);
            let analytic = problem.objective_gradient(&z);
            let numeric = fd_gradient(&problem, &z);
            for i in 0..z.len() {
                assert_relative_eq!(analytic[i], numeric[i], epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn initial_guess_satisfies_dynamics() {
        let f = fixture();
        let s = structure(&f, Formulation::MultipleShooting);
        let prop = UncertaintyPropagator::new(&f.plant, &f.disturbance, &f.injection, true);
        let x0 = DVector::from_vec(vec![1.0, 2.0]);
        let sigma0 = DMatrix::zeros(2, 2);
        let gain = DMatrix::zeros(1, 2);
        let problem = BoundProblem::new(&s, prop, &x0, &sigma0, &gain);
        let z = problem.initial_guess(None);
        assert_relative_eq!(problem.equalities(&z).amax(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn chance_rows_include_margin() {
        let f = fixture();
        let s = structure(&f, Formulation::MultipleShooting);
        let prop = UncertaintyPropagator::new(&f.plant, &f.disturbance, &f.injection, true);
        let x0 = DVector::zeros(2);
        let sigma0 = DMatrix::zeros(2, 2);
        let gain = DMatrix::zeros(1, 2);
        let problem = BoundProblem::new(&s, prop, &x0, &sigma0, &gain);
        let z = problem.initial_guess(None);
        let g = problem.inequalities(&z);
        let kappa = s.tightener().kappa(0);
        // Step k: Σ_px = 0.2 k, x̄ = 0.
        for k in 1..=3 {
            let expected = -1.0 + kappa * (0.2 * k as f64).sqrt();
            assert_relative_eq!(g[k - 1], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn extract_reports_tightened_bounds() {
        let f = fixture();
        let s = structure(&f, Formulation::SingleShooting);
        let prop = UncertaintyPropagator::new(&f.plant, &f.disturbance, &f.injection, true);
        let x0 = DVector::zeros(2);
        let sigma0 = DMatrix::zeros(2, 2);
        let gain = DMatrix::zeros(1, 2);
        let problem = BoundProblem::new(&s, prop, &x0, &sigma0, &gain);
        let out = problem.extract(&DVector::zeros(3));
        assert_eq!(out.means.len(), 4);
        assert_eq!(out.bounds.lower[0][0], f64::NEG_INFINITY);
        assert!(out.bounds.lower[2][0] > out.bounds.lower[1][0]);
        assert_relative_eq!(out.bounds.upper[3][1], 8.0);
    }
}
