//! TOML scenario files: plant, disturbance, costs, constraints and the
//! numeric parameters of each solve.

use std::path::Path;

use chance_core::prelude::*;
use chance_gp::{GaussianProcess, GpError, SquaredExponential, TrainingData};
use chance_mpc::{BoxConstraints, ChanceBounds, Smpc, SolveRequest};
use chance_nlp::SqpSolver;
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;
use thiserror::Error;

/// Controller type every scenario builds.
pub type ScenarioController = Smpc<LinearPlant, Box<dyn DisturbanceModel>, SqpSolver>;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gp(#[from] GpError),

    #[error(transparent)]
    Smpc(#[from] SmpcError),

    #[error("Matrix {what} is malformed: {message}")]
    Matrix { what: &'static str, message: String },
}

impl From<ValidationError> for ScenarioError {
    fn from(e: ValidationError) -> Self {
        Self::Smpc(e.into())
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub horizon: usize,
    pub plant: PlantConfig,
    pub disturbance: DisturbanceConfig,
    #[serde(default)]
    pub stage_cost: Vec<CostEntry>,
    #[serde(default)]
    pub terminal_cost: Vec<CostEntry>,
    #[serde(default)]
    pub constraints: BoundsConfig,
    #[serde(default)]
    pub chance_constraints: ChanceConfig,
    #[serde(default)]
    pub setup: SetupOptions,
    #[serde(default)]
    pub solver: SqpConfig,
    pub run: RunConfig,
}

/// Discrete linear plant, matrices given row by row.
#[derive(Debug, Clone, Deserialize)]
pub struct PlantConfig {
    pub states: Vec<String>,
    pub inputs: Vec<String>,
    #[serde(default = "default_dt")]
    pub dt: f64,
    pub a: Vec<Vec<f64>>,
    pub b: Vec<Vec<f64>>,
    /// Disturbance injection `G` (`n × t`).
    pub injection: Vec<Vec<f64>>,
}

const fn default_dt() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisturbanceConfig {
    Zero,
    Constant {
        #[serde(default)]
        mean: Option<Vec<f64>>,
        variance: Vec<f64>,
    },
    Gp {
        features: Vec<String>,
        length_scale: Values,
        signal_variance: f64,
        noise_variance: f64,
        /// Features × samples.
        inputs: Vec<Vec<f64>>,
        /// Outputs × samples.
        targets: Vec<Vec<f64>>,
    },
}

/// One quadratic tracking term. `name` is a state (optionally `mu_`
/// prefixed) or an input.
#[derive(Debug, Clone, Deserialize)]
pub struct CostEntry {
    pub name: String,
    pub reference: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoundsConfig {
    pub x_lb: Option<Values>,
    pub x_ub: Option<Values>,
    pub u_lb: Option<Values>,
    pub u_ub: Option<Values>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChanceConfig {
    pub x_lb: Option<Values>,
    pub x_lb_p: Option<Values>,
    pub x_ub: Option<Values>,
    pub x_ub_p: Option<Values>,
}

impl ChanceConfig {
    fn is_empty(&self) -> bool {
        self.x_lb.is_none() && self.x_lb_p.is_none() && self.x_ub.is_none() && self.x_ub_p.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub x0: Vec<f64>,
    pub cov_x0: Option<Vec<Vec<f64>>>,
    pub k_gain: Option<Vec<Vec<f64>>>,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_samples")]
    pub samples: usize,
}

const fn default_steps() -> usize {
    20
}

const fn default_samples() -> usize {
    1000
}

impl Scenario {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Build the plant and disturbance, declare costs and constraints and
    /// run `setup()`.
    pub fn build(&self) -> Result<ScenarioController, ScenarioError> {
        self.solver.validate()?;
        let plant = self.plant.build()?;
        let injection = matrix("injection", &self.plant.injection)?;
        let disturbance = self.disturbance.build(plant.state_names(), injection.ncols())?;
        let mut smpc =
            Smpc::with_solver(plant, disturbance, injection, SqpSolver::new(self.solver.clone()))?;

        smpc.set_horizon(self.horizon)?;
        for entry in &self.stage_cost {
            let is_input = smpc.plant().input_index(&entry.name).is_some();
            let stage = smpc.stage_cost_mut()?;
            if is_input {
                stage.add_inputs(entry.name.as_str(), entry.reference, entry.weight)?;
            } else {
                stage.add_states(entry.name.as_str(), entry.reference, entry.weight)?;
            }
        }
        for entry in &self.terminal_cost {
            smpc.terminal_cost_mut()?
                .add_states(entry.name.as_str(), entry.reference, entry.weight)?;
        }

        let bounds = &self.constraints;
        if bounds.x_lb.is_some() || bounds.x_ub.is_some() || bounds.u_lb.is_some() || bounds.u_ub.is_some() {
            smpc.set_box_constraints(&BoxConstraints {
                x_lb: bounds.x_lb.clone(),
                x_ub: bounds.x_ub.clone(),
                u_lb: bounds.u_lb.clone(),
                u_ub: bounds.u_ub.clone(),
            })?;
        }
        let chance = &self.chance_constraints;
        if !chance.is_empty() {
            smpc.set_box_chance_constraints(&ChanceBounds {
                x_lb: chance.x_lb.clone(),
                x_lb_p: chance.x_lb_p.clone(),
                x_ub: chance.x_ub.clone(),
                x_ub_p: chance.x_ub_p.clone(),
            })?;
        }

        smpc.setup(self.setup.clone())?;
        Ok(smpc)
    }

    /// Solve parameters for the initial state in `[run]`.
    pub fn request(&self) -> Result<SolveRequest, ScenarioError> {
        let mut request = SolveRequest::at(&self.run.x0);
        if let Some(cov) = &self.run.cov_x0 {
            request = request.cov_x0(matrix("cov_x0", cov)?);
        }
        if let Some(gain) = &self.run.k_gain {
            request = request.k_gain(matrix("k_gain", gain)?);
        }
        Ok(request)
    }
}

impl PlantConfig {
    fn build(&self) -> Result<LinearPlant, ScenarioError> {
        let a = matrix("a", &self.a)?;
        let b = matrix("b", &self.b)?;
        if !a.is_square() {
            return Err(malformed("a", format!("must be square, got {}x{}", a.nrows(), a.ncols())));
        }
        if b.nrows() != a.nrows() {
            return Err(malformed("b", format!("needs {} rows, got {}", a.nrows(), b.nrows())));
        }
        if self.states.len() != a.nrows() || self.inputs.len() != b.ncols() {
            return Err(malformed("a/b", "dimensions do not match the state and input names".into()));
        }
        let states: Vec<&str> = self.states.iter().map(String::as_str).collect();
        let inputs: Vec<&str> = self.inputs.iter().map(String::as_str).collect();
        Ok(LinearPlant::new(a, b, self.dt).with_names(&states, &inputs))
    }
}

impl DisturbanceConfig {
    fn build(
        &self,
        state_names: &[String],
        channels: usize,
    ) -> Result<Box<dyn DisturbanceModel>, ScenarioError> {
        match self {
            Self::Zero => Ok(Box::new(ZeroDisturbance::new(channels))),
            Self::Constant { mean, variance } => {
                let mean = mean.clone().unwrap_or_else(|| vec![0.0; variance.len()]);
                if mean.len() != variance.len() {
                    return Err(malformed("variance", "mean and variance lengths differ".into()));
                }
                Ok(Box::new(ConstantDisturbance::new(
                    DVector::from_vec(mean),
                    DVector::from_column_slice(variance),
                )))
            }
            Self::Gp {
                features,
                length_scale,
                signal_variance,
                noise_variance,
                inputs,
                targets,
            } => {
                let kernel = SquaredExponential {
                    length_scales: length_scale.broadcast(features.len(), "length_scale")?,
                    signal_variance: *signal_variance,
                    noise_variance: *noise_variance,
                };
                let data = TrainingData {
                    inputs: matrix("inputs", inputs)?,
                    targets: matrix("targets", targets)?,
                };
                let names: Vec<&str> = features.iter().map(String::as_str).collect();
                let gp = GaussianProcess::fit_named(data, kernel, &names, state_names)?;
                Ok(Box::new(gp))
            }
        }
    }
}

fn malformed(what: &'static str, message: String) -> ScenarioError {
    ScenarioError::Matrix { what, message }
}

/// Row-major nested vectors to a matrix.
fn matrix(what: &'static str, rows: &[Vec<f64>]) -> Result<DMatrix<f64>, ScenarioError> {
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(malformed(what, "rows have different lengths".into()));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Ok(DMatrix::from_row_slice(rows.len(), ncols, &flat))
}
