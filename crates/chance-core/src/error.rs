use std::fmt;

use thiserror::Error;

/// Top-level error type for the chance-constrained MPC stack.
#[derive(Debug, Error)]
pub enum SmpcError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),
}

/// Configuration errors (invalid or missing controller setup).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid horizon: {0} (must be > 0)")]
    InvalidHorizon(usize),

    #[error("Horizon has not been set")]
    MissingHorizon,

    #[error("No stage or terminal cost has been declared")]
    NoObjective,

    #[error("Controller has not been set up")]
    NotSetUp,

    #[error("Cannot change {0} after setup()")]
    Frozen(&'static str),

    #[error("Disturbance injection matrix must be {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    InjectionShape {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Disturbance model reads {required} states, plant has {state_dim}")]
    DisturbanceStateDim { required: usize, state_dim: usize },

    #[error("Ancillary feedback gain is required for covariance propagation")]
    MissingFeedbackGain,

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Tightening margin could not be evaluated: {0}")]
    Tightening(String),
}

/// Declaration-time validation errors (shape, range and name checks).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Length mismatch for {what}: expected {expected}, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Probability at index {index} must lie in (0, 1], got {value}")]
    ProbabilityOutOfRange { index: usize, value: f64 },

    #[error("Weight for {name} must be >= 0, got {value}")]
    NegativeWeight { name: String, value: f64 },

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("{what} contains NaN")]
    NonFinite { what: &'static str },

    #[error("Empty interval at index {index}: lower {lower} > upper {upper}")]
    EmptyInterval { index: usize, lower: f64, upper: f64 },

    #[error("Probability {0} given without a matching bound")]
    MissingBound(&'static str),
}

/// Errors in the numeric arguments of a solve request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("Initial state x0 is required")]
    MissingInitialState,

    #[error("Initial covariance is required when chance constraints are active")]
    MissingInitialCovariance,

    #[error("Feedback gain is required when chance constraints or initial covariance are active")]
    MissingFeedbackGain,

    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: String,
        got: String,
    },

    #[error("Initial covariance is not positive semidefinite (min eigenvalue {min_eigenvalue})")]
    CovarianceNotPsd { min_eigenvalue: f64 },

    #[error("{what} contains NaN or Inf")]
    NonFinite { what: &'static str },
}

/// Termination status reported by an NLP solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Converged within tolerance.
    Solved,
    /// Iteration budget exhausted before convergence.
    MaxIterations,
    /// Subproblem reported (local) infeasibility.
    Infeasible,
    /// Line search or subproblem broke down numerically.
    NumericalError,
}

impl SolveStatus {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Solved)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Solved => "solved",
            Self::MaxIterations => "max iterations reached",
            Self::Infeasible => "infeasible",
            Self::NumericalError => "numerical error",
        };
        f.write_str(s)
    }
}

/// NLP solve failure with the solver's diagnostics attached.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("NLP solver failed ({status}) after {iterations} iterations: {message}")]
pub struct SolverError {
    pub status: SolveStatus,
    pub iterations: u32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smpc_error_from_config_error() {
        let err = ConfigError::InvalidHorizon(0);
        let smpc_err: SmpcError = err.into();
        assert!(matches!(smpc_err, SmpcError::Config(_)));
        assert!(smpc_err.to_string().contains("horizon"));
    }

    #[test]
    fn smpc_error_from_validation_error() {
        let err = ValidationError::ProbabilityOutOfRange {
            index: 0,
            value: 2.0,
        };
        let smpc_err: SmpcError = err.into();
        assert!(matches!(smpc_err, SmpcError::Validation(_)));
        assert!(smpc_err.to_string().contains("(0, 1]"));
    }

    #[test]
    fn smpc_error_from_value_error() {
        let smpc_err: SmpcError = ValueError::MissingInitialState.into();
        assert!(matches!(smpc_err, SmpcError::Value(_)));
    }

    #[test]
    fn smpc_error_from_solver_error() {
        let err = SolverError {
            status: SolveStatus::Infeasible,
            iterations: 3,
            message: "QP primal infeasible".into(),
        };
        let smpc_err: SmpcError = err.into();
        assert!(matches!(smpc_err, SmpcError::Solver(_)));
        assert!(smpc_err.to_string().contains("infeasible"));
    }

    #[test]
    fn config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::Io(_)));
    }

    #[test]
    fn validation_error_display_messages() {
        assert_eq!(
            ValidationError::LengthMismatch {
                what: "x_lb",
                expected: 2,
                got: 1
            }
            .to_string(),
            "Length mismatch for x_lb: expected 2, got 1"
        );
        assert_eq!(
            ValidationError::UnknownVariable("mu_pz".into()).to_string(),
            "Unknown variable: mu_pz"
        );
        assert_eq!(
            ValidationError::NegativeWeight {
                name: "px".into(),
                value: -1.0
            }
            .to_string(),
            "Weight for px must be >= 0, got -1"
        );
    }

    #[test]
    fn config_error_display_messages() {
        assert_eq!(
            ConfigError::InvalidHorizon(0).to_string(),
            "Invalid horizon: 0 (must be > 0)"
        );
        assert_eq!(
            ConfigError::Frozen("horizon").to_string(),
            "Cannot change horizon after setup()"
        );
        assert_eq!(
            ConfigError::InjectionShape {
                expected_rows: 2,
                expected_cols: 1,
                rows: 1,
                cols: 1
            }
            .to_string(),
            "Disturbance injection matrix must be 2x1, got 1x1"
        );
    }

    #[test]
    fn solve_status_success() {
        assert!(SolveStatus::Solved.is_success());
        assert!(!SolveStatus::MaxIterations.is_success());
        assert_eq!(SolveStatus::NumericalError.to_string(), "numerical error");
    }
}
