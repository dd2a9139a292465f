//! Stochastic MPC orchestrator.
//!
//! Declarations (horizon, costs, constraints) are collected while the
//! controller is unconfigured or configured. `setup()` freezes them into a
//! [`ProblemStructure`]; every `optimize()` binds a fresh initial state,
//! covariance and feedback gain and solves it.

use std::time::Instant;

use chance_core::config::SetupOptions;
use chance_core::error::{ConfigError, SmpcError, SolverError, ValueError};
use chance_core::traits::{DisturbanceModel, PlantModel};
use chance_nlp::{NlpProblem, NlpSolver, SqpSolver};
use log::{info, warn};
use nalgebra::{DMatrix, DVector};

use crate::constraints::{BoxConstraints, ChanceBounds, StateInputBounds};
use crate::cost::{QuadStageCost, QuadTerminalCost};
use crate::problem::{BoundProblem, ProblemStructure};
use crate::propagation::{UncertaintyPropagator, min_eigenvalue};
use crate::tightening::{ChanceConstraintSpec, ChanceConstraintTightener};
use crate::types::{ControllerState, SolutionRecord, SolveRequest};

/// Relative tolerance on the smallest eigenvalue of Σ₀.
const PSD_TOLERANCE: f64 = 1e-9;

/// Chance-constrained MPC over a plant, a disturbance model and an NLP
/// solver.
pub struct Smpc<P, D, S = SqpSolver> {
    plant: P,
    disturbance: D,
    injection: DMatrix<f64>,
    solver: S,
    horizon: Option<usize>,
    stage_cost: QuadStageCost,
    terminal_cost: QuadTerminalCost,
    box_bounds: StateInputBounds,
    chance_specs: Vec<ChanceConstraintSpec>,
    declared: bool,
    options: Option<SetupOptions>,
    structure: Option<ProblemStructure>,
    solution: Option<SolutionRecord>,
}

impl<P, D> Smpc<P, D, SqpSolver>
where
    P: PlantModel,
    D: DisturbanceModel,
{
    /// Create a controller with the default SQP solver.
    ///
    /// `injection` is the n×t matrix G mapping the t disturbance channels
    /// into the state update.
    pub fn new(plant: P, disturbance: D, injection: DMatrix<f64>) -> Result<Self, ConfigError> {
        Self::with_solver(plant, disturbance, injection, SqpSolver::default())
    }
}

impl<P, D, S> Smpc<P, D, S>
where
    P: PlantModel,
    D: DisturbanceModel,
    S: NlpSolver,
{
    pub fn with_solver(
        plant: P,
        disturbance: D,
        injection: DMatrix<f64>,
        solver: S,
    ) -> Result<Self, ConfigError> {
        let n = plant.state_dim();
        let m = plant.input_dim();
        let t = disturbance.output_dim();
        if injection.shape() != (n, t) {
            return Err(ConfigError::InjectionShape {
                expected_rows: n,
                expected_cols: t,
                rows: injection.nrows(),
                cols: injection.ncols(),
            });
        }
        if let Some(required) = disturbance.min_state_dim().filter(|&r| r > n) {
            return Err(ConfigError::DisturbanceStateDim {
                required,
                state_dim: n,
            });
        }
        let stage_cost = QuadStageCost::new(plant.state_names(), plant.input_names());
        let terminal_cost = QuadTerminalCost::new(plant.state_names());
        Ok(Self {
            plant,
            disturbance,
            injection,
            solver,
            horizon: None,
            stage_cost,
            terminal_cost,
            box_bounds: StateInputBounds::unbounded(n, m),
            chance_specs: Vec::new(),
            declared: false,
            options: None,
            structure: None,
            solution: None,
        })
    }

    // -- Lifecycle ----------------------------------------------------------

    pub fn state(&self) -> ControllerState {
        if self.solution.is_some() {
            ControllerState::Solved
        } else if self.structure.is_some() {
            ControllerState::Ready
        } else if self.declared
            || self.horizon.is_some()
            || !self.stage_cost.is_empty()
            || !self.terminal_cost.is_empty()
        {
            ControllerState::Configured
        } else {
            ControllerState::Unconfigured
        }
    }

    fn ensure_unfrozen(&self, what: &'static str) -> Result<(), ConfigError> {
        if self.structure.is_some() {
            Err(ConfigError::Frozen(what))
        } else {
            Ok(())
        }
    }

    // -- Declarations -------------------------------------------------------

    pub const fn horizon(&self) -> Option<usize> {
        self.horizon
    }

    pub fn set_horizon(&mut self, horizon: usize) -> Result<(), ConfigError> {
        self.ensure_unfrozen("horizon")?;
        if horizon == 0 {
            return Err(ConfigError::InvalidHorizon(horizon));
        }
        self.horizon = Some(horizon);
        Ok(())
    }

    pub const fn stage_cost(&self) -> &QuadStageCost {
        &self.stage_cost
    }

    pub const fn terminal_cost(&self) -> &QuadTerminalCost {
        &self.terminal_cost
    }

    /// Stage cost for declarations; unavailable after `setup()`.
    pub fn stage_cost_mut(&mut self) -> Result<&mut QuadStageCost, ConfigError> {
        self.ensure_unfrozen("stage cost")?;
        Ok(&mut self.stage_cost)
    }

    /// Terminal cost for declarations; unavailable after `setup()`.
    pub fn terminal_cost_mut(&mut self) -> Result<&mut QuadTerminalCost, ConfigError> {
        self.ensure_unfrozen("terminal cost")?;
        Ok(&mut self.terminal_cost)
    }

    pub const fn box_constraints(&self) -> &StateInputBounds {
        &self.box_bounds
    }

    /// Declare plain state/input bounds. Omitted sides are kept.
    pub fn set_box_constraints(&mut self, decl: &BoxConstraints) -> Result<(), SmpcError> {
        self.ensure_unfrozen("box constraints")?;
        self.box_bounds = self.box_bounds.apply(decl)?;
        self.declared = true;
        Ok(())
    }

    pub fn chance_constraints(&self) -> &[ChanceConstraintSpec] {
        &self.chance_specs
    }

    /// Replace the declared box chance constraints.
    pub fn set_box_chance_constraints(&mut self, decl: &ChanceBounds) -> Result<(), SmpcError> {
        self.ensure_unfrozen("chance constraints")?;
        let specs = decl.resolve(self.plant.state_dim())?;
        self.chance_specs = specs;
        self.declared = true;
        Ok(())
    }

    // -- Setup --------------------------------------------------------------

    /// Assemble the problem. Can be repeated to change options; the previous
    /// solution is discarded.
    pub fn setup(&mut self, options: SetupOptions) -> Result<(), ConfigError> {
        let horizon = self.horizon.ok_or(ConfigError::MissingHorizon)?;
        if self.stage_cost.is_empty() && self.terminal_cost.is_empty() {
            return Err(ConfigError::NoObjective);
        }
        let n = self.plant.state_dim();
        let tightener =
            ChanceConstraintTightener::new(options.chance_constraints, self.chance_specs.clone(), n)?;
        let structure = ProblemStructure::build(
            horizon,
            n,
            self.plant.input_dim(),
            options.formulation,
            &self.stage_cost,
            &self.terminal_cost,
            self.box_bounds.clone(),
            tightener,
        );
        info!(
            "SMPC setup: horizon={horizon}, mode={}, formulation={:?}, variables={}, equalities={}, inequalities={}",
            options.chance_constraints,
            options.formulation,
            structure.num_variables(),
            structure.num_equalities(),
            structure.num_inequalities(),
        );
        self.structure = Some(structure);
        self.options = Some(options);
        self.solution = None;
        Ok(())
    }

    pub const fn options(&self) -> Option<&SetupOptions> {
        self.options.as_ref()
    }

    pub const fn structure(&self) -> Option<&ProblemStructure> {
        self.structure.as_ref()
    }

    // -- Solve --------------------------------------------------------------

    /// Solve from the state, covariance and gain in `request`.
    ///
    /// On failure the previous solution is left untouched.
    pub fn optimize(&mut self, request: &SolveRequest) -> Result<&SolutionRecord, SmpcError> {
        let x0 = request.x0.as_ref().ok_or(ValueError::MissingInitialState)?;
        let (structure, options) = match (&self.structure, &self.options) {
            (Some(s), Some(o)) => (s, o),
            _ => return Err(ConfigError::NotSetUp.into()),
        };
        let (sigma0, gain) = self.bind_parameters(x0, request)?;

        let propagator = UncertaintyPropagator::new(
            &self.plant,
            &self.disturbance,
            &self.injection,
            options.disturbance_mean,
        );
        let problem = BoundProblem::new(structure, propagator, x0, &sigma0, &gain);
        let previous = if options.warm_start {
            self.solution.as_ref()
        } else {
            None
        };
        let guess = problem.initial_guess(previous);

        let start = Instant::now();
        let result = self.solver.solve(&problem, &guess);
        let solve_time_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);

        if !result.status.is_success() {
            warn!(
                "SMPC solve failed: {} after {} iterations ({})",
                result.status, result.iterations, result.message
            );
            return Err(SolverError {
                status: result.status,
                iterations: result.iterations,
                message: result.message,
            }
            .into());
        }

        let extracted = problem.extract(&result.x);
        let record = SolutionRecord {
            inputs: extracted.inputs,
            means: extracted.means,
            covariances: extracted.covariances,
            lower_bounds: extracted.bounds.lower,
            upper_bounds: extracted.bounds.upper,
            feedback_gain: gain.clone(),
            objective: result.objective,
            constraint_violation: problem.constraint_violation(&result.x),
            status: result.status,
            iterations: result.iterations,
            solve_time_us,
        };
        info!(
            "SMPC solve: {} in {} iterations, objective={:.6}, time={}us",
            record.status, record.iterations, record.objective, record.solve_time_us
        );
        Ok(self.solution.insert(record))
    }

    /// Validate and default Σ₀ and K for one solve.
    fn bind_parameters(
        &self,
        x0: &DVector<f64>,
        request: &SolveRequest,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), ValueError> {
        let n = self.plant.state_dim();
        let m = self.plant.input_dim();
        if x0.len() != n {
            return Err(ValueError::DimensionMismatch {
                what: "x0",
                expected: n.to_string(),
                got: x0.len().to_string(),
            });
        }
        if x0.iter().any(|v| !v.is_finite()) {
            return Err(ValueError::NonFinite { what: "x0" });
        }

        let chance_active = !self.chance_specs.is_empty();
        let sigma0 = match &request.cov_x0 {
            Some(cov) => {
                check_shape("cov_x0", cov, n, n)?;
                if cov.iter().any(|v| !v.is_finite()) {
                    return Err(ValueError::NonFinite { what: "cov_x0" });
                }
                let min_eig = min_eigenvalue(cov);
                if min_eig < -PSD_TOLERANCE * cov.norm().max(1.0) {
                    return Err(ValueError::CovarianceNotPsd {
                        min_eigenvalue: min_eig,
                    });
                }
                cov.clone()
            }
            None if chance_active => return Err(ValueError::MissingInitialCovariance),
            None => DMatrix::zeros(n, n),
        };

        let gain = match &request.k_gain {
            Some(k) => {
                check_shape("k_gain", k, m, n)?;
                if k.iter().any(|v| !v.is_finite()) {
                    return Err(ValueError::NonFinite { what: "k_gain" });
                }
                k.clone()
            }
            None if chance_active || sigma0.iter().any(|v| *v != 0.0) => {
                return Err(ValueError::MissingFeedbackGain);
            }
            None => DMatrix::zeros(m, n),
        };
        Ok((sigma0, gain))
    }

    // -- Accessors ----------------------------------------------------------

    pub const fn solution(&self) -> Option<&SolutionRecord> {
        self.solution.as_ref()
    }

    /// Latest mean trajectory x̄₀ … x̄_N.
    pub fn mean_trajectory(&self) -> Option<&[DVector<f64>]> {
        self.solution.as_ref().map(|s| s.means.as_slice())
    }

    /// Latest covariance sequence Σ₀ … Σ_N.
    pub fn covariance_sequence(&self) -> Option<&[DMatrix<f64>]> {
        self.solution.as_ref().map(|s| s.covariances.as_slice())
    }

    /// Latest optimal inputs ū₀ … ū_{N−1}.
    pub fn input_sequence(&self) -> Option<&[DVector<f64>]> {
        self.solution.as_ref().map(|s| s.inputs.as_slice())
    }

    pub const fn plant(&self) -> &P {
        &self.plant
    }

    pub const fn disturbance(&self) -> &D {
        &self.disturbance
    }

    pub const fn injection(&self) -> &DMatrix<f64> {
        &self.injection
    }

    pub const fn solver(&self) -> &S {
        &self.solver
    }
}

fn check_shape(
    what: &'static str,
    m: &DMatrix<f64>,
    rows: usize,
    cols: usize,
) -> Result<(), ValueError> {
    if m.shape() == (rows, cols) {
        Ok(())
    } else {
        Err(ValueError::DimensionMismatch {
            what,
            expected: format!("{rows}x{cols}"),
            got: format!("{}x{}", m.nrows(), m.ncols()),
        })
    }
}
