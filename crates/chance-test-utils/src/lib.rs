//! Shared test fixtures and utilities for the chance-constrained MPC crates.
//!
//! Provides deterministic RNG setup, the scalar and two-state reference
//! plants, and a GP disturbance model conditioned on the reference data set.

pub mod fixtures;
pub mod rng;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use fixtures::{
    mimo_injection, mimo_plant, reference_gp, reference_kernel, reference_training_data,
    scalar_injection, scalar_plant,
};
pub use rng::{random_covariance, random_gain, seeded_rng};
