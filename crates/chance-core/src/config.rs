use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}
const fn default_max_iterations() -> u32 {
    50
}
const fn default_step_tolerance() -> f64 {
    1e-6
}
const fn default_feasibility_tolerance() -> f64 {
    1e-6
}
const fn default_hessian_regularization() -> f64 {
    1e-8
}
const fn default_armijo() -> f64 {
    1e-4
}
const fn default_min_step() -> f64 {
    1e-8
}
const fn default_qp_max_iterations() -> u32 {
    200
}
const fn default_qp_tolerance() -> f64 {
    1e-9
}

// ---------------------------------------------------------------------------
// TighteningMode
// ---------------------------------------------------------------------------

/// Family of margin functions κ(p) used to tighten box chance constraints.
///
/// Exactly one family is selected per `setup()` and applied to every declared
/// chance constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TighteningMode {
    /// Probabilistic reachable set: κ(p) = sqrt(χ²ₙ⁻¹(p)), the axis projection
    /// of the level-p confidence ellipsoid of the n-dimensional state error.
    #[default]
    Prs,
    /// Individual Gaussian half-space: κ(p) = Φ⁻¹(p).
    Gaussian,
    /// Distribution-free one-sided Chebyshev (Cantelli): κ(p) = sqrt(p / (1 - p)).
    Chebyshev,
}

impl TighteningMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prs => "prs",
            Self::Gaussian => "gaussian",
            Self::Chebyshev => "chebyshev",
        }
    }
}

impl fmt::Display for TighteningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TighteningMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prs" => Ok(Self::Prs),
            "gaussian" | "normal" => Ok(Self::Gaussian),
            "chebyshev" | "cantelli" => Ok(Self::Chebyshev),
            other => Err(ConfigError::InvalidValue {
                field: "chance_constraints".into(),
                message: format!("unknown tightening mode '{other}'"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Formulation
// ---------------------------------------------------------------------------

/// How the mean trajectory enters the NLP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formulation {
    /// Mean states are auxiliary decision variables linked by equality
    /// constraints.
    #[default]
    MultipleShooting,
    /// Only the inputs are decision variables; the mean states are rolled out.
    SingleShooting,
}

// ---------------------------------------------------------------------------
// SetupOptions
// ---------------------------------------------------------------------------

/// Options consumed by `setup()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupOptions {
    /// Chance-constraint tightening family.
    #[serde(default)]
    pub chance_constraints: TighteningMode,

    /// NLP formulation of the mean dynamics.
    #[serde(default)]
    pub formulation: Formulation,

    /// Add the disturbance model's predictive mean to the mean dynamics.
    #[serde(default = "default_true")]
    pub disturbance_mean: bool,

    /// Start each solve from the previous solution instead of a zero-input
    /// rollout.
    #[serde(default)]
    pub warm_start: bool,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            chance_constraints: TighteningMode::default(),
            formulation: Formulation::default(),
            disturbance_mean: true,
            warm_start: false,
        }
    }
}

impl SetupOptions {
    /// Options with the given tightening family and defaults elsewhere.
    pub fn with_mode(mode: TighteningMode) -> Self {
        Self {
            chance_constraints: mode,
            ..Self::default()
        }
    }

    /// Parse from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

// ---------------------------------------------------------------------------
// SqpConfig
// ---------------------------------------------------------------------------

/// Settings for the sequential quadratic programming solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqpConfig {
    /// Maximum SQP (outer) iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Converged when the infinity norm of the step falls below this.
    #[serde(default = "default_step_tolerance")]
    pub step_tolerance: f64,

    /// Maximum constraint violation accepted at convergence.
    #[serde(default = "default_feasibility_tolerance")]
    pub feasibility_tolerance: f64,

    /// Diagonal added to the QP Hessian.
    #[serde(default = "default_hessian_regularization")]
    pub hessian_regularization: f64,

    /// Sufficient-decrease constant of the merit line search.
    #[serde(default = "default_armijo")]
    pub armijo: f64,

    /// Smallest step length tried before the line search gives up.
    #[serde(default = "default_min_step")]
    pub min_step: f64,

    /// Iteration limit of each QP subproblem.
    #[serde(default = "default_qp_max_iterations")]
    pub qp_max_iterations: u32,

    /// Gap and feasibility tolerance of each QP subproblem.
    #[serde(default = "default_qp_tolerance")]
    pub qp_tolerance: f64,
}

impl Default for SqpConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            step_tolerance: default_step_tolerance(),
            feasibility_tolerance: default_feasibility_tolerance(),
            hessian_regularization: default_hessian_regularization(),
            armijo: default_armijo(),
            min_step: default_min_step(),
            qp_max_iterations: default_qp_max_iterations(),
            qp_tolerance: default_qp_tolerance(),
        }
    }
}

impl SqpConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations", "must be > 0"));
        }
        for (field, value) in [
            ("step_tolerance", self.step_tolerance),
            ("feasibility_tolerance", self.feasibility_tolerance),
            ("qp_tolerance", self.qp_tolerance),
            ("min_step", self.min_step),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(field, "must be finite and > 0"));
            }
        }
        if !self.hessian_regularization.is_finite() || self.hessian_regularization < 0.0 {
            return Err(invalid("hessian_regularization", "must be finite and >= 0"));
        }
        if !(0.0..0.5).contains(&self.armijo) {
            return Err(invalid("armijo", "must lie in [0, 0.5)"));
        }
        Ok(())
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}
