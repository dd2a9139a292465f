//! Stochastic model predictive control with chance constraints.
//!
//! The controller optimizes a nominal input sequence for a nonlinear plant
//! whose additive disturbance is described by a (typically GP) model:
//!
//! 1. **Propagation**: mean and covariance are pushed through the plant
//!    linearization under an ancillary feedback `u = ū + K (x − x̄)`
//! 2. **Tightening**: every box chance constraint `P(x_i ≥ lb) ≥ p` becomes
//!    the deterministic bound `x̄_i ≥ lb + κ(p) σ_i`
//! 3. **Assembly**: tracking costs, dynamics and tightened bounds form one
//!    NLP, built once at `setup()` and re-bound to `(x0, Σ₀, K)` per solve
//! 4. **Solve**: a generic [`NlpSolver`](chance_nlp::NlpSolver), SQP by default
//!
//! # Example
//!
//! ```no_run
//! use chance_core::prelude::*;
//! use chance_mpc::{ChanceBounds, Smpc, SolveRequest};
//! use nalgebra::DMatrix;
//!
//! let plant = LinearPlant::new(DMatrix::identity(1, 1), DMatrix::identity(1, 1), 1.0)
//!     .with_names(&["px"], &["a"]);
//! let mut smpc = Smpc::new(plant, ConstantDisturbance::zero_mean(&[0.1]), DMatrix::identity(1, 1))?;
//! smpc.set_horizon(10)?;
//! smpc.stage_cost_mut()?.add_states("mu_px", 1.0, 10.0)?;
//! smpc.set_box_chance_constraints(&ChanceBounds::new().lower(0.0, 0.95))?;
//! smpc.setup(SetupOptions::with_mode(TighteningMode::Gaussian))?;
//! let record = smpc.optimize(
//!     &SolveRequest::at(&[5.0])
//!         .cov_x0(DMatrix::zeros(1, 1))
//!         .k_gain(DMatrix::zeros(1, 1)),
//! )?;
//! println!("u0 = {}", record.first_input()[0]);
//! # Ok::<(), SmpcError>(())
//! ```

pub mod constraints;
pub mod controller;
pub mod cost;
pub mod problem;
pub mod propagation;
pub mod simulate;
pub mod tightening;
pub mod types;
pub mod validation;

pub use constraints::{BoxConstraints, ChanceBounds, StateInputBounds};
pub use controller::Smpc;
pub use cost::{CostTerm, QuadStageCost, QuadTerminalCost, VariableNames};
pub use problem::{BoundProblem, ProblemStructure};
pub use propagation::{Propagation, UncertaintyPropagator};
pub use simulate::{ClosedLoop, ClosedLoopTrajectory, sample_step};
pub use tightening::{
    ChanceConstraintSpec, ChanceConstraintTightener, Direction, TightenedBounds,
    margin_coefficient,
};
pub use types::{ControllerState, SolutionRecord, SolveRequest};
pub use validation::{SatisfactionReport, empirical_satisfaction};
