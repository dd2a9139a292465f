//! Gaussian-process regression used as a learned additive disturbance model.
//!
//! A [`GaussianProcess`] is conditioned on training data once, with fixed
//! hyperparameters, and then answers predictive mean/variance queries at the
//! states visited by the MPC. It implements
//! [`DisturbanceModel`](chance_core::traits::DisturbanceModel) so it can be
//! handed straight to the controller.
//!
//! Hyperparameter optimization is not provided here; supply the values
//! obtained from whatever fitting procedure produced the model.

pub mod gp;
pub mod kernel;

pub use gp::{GaussianProcess, GpError, TrainingData};
pub use kernel::SquaredExponential;
