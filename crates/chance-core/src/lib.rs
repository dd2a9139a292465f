// chance-core: Errors, configuration, collaborator traits and reference models
// for stochastic MPC with chance constraints.

pub mod config;
pub mod disturbance;
pub mod error;
pub mod plant;
pub mod traits;
pub mod values;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for downstream crates.
pub mod prelude {
    pub use crate::config::{Formulation, SetupOptions, SqpConfig, TighteningMode};
    pub use crate::disturbance::{ConstantDisturbance, ZeroDisturbance};
    pub use crate::error::{
        ConfigError, SmpcError, SolveStatus, SolverError, ValidationError, ValueError,
    };
    pub use crate::plant::{EulerPlant, LinearPlant};
    pub use crate::traits::{DisturbanceModel, PlantModel};
    pub use crate::values::Values;
}
