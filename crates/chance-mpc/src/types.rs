//! Core types for the SMPC pipeline.

use std::fmt;

use chance_core::error::SolveStatus;
use nalgebra::{DMatrix, DVector};

/// Lifecycle of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Nothing declared yet.
    Unconfigured,
    /// Horizon, costs or constraints declared; not yet set up.
    Configured,
    /// Problem assembled, ready to optimize.
    Ready,
    /// At least one successful solve is stored.
    Solved,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Ready => "ready",
            Self::Solved => "solved",
        };
        f.write_str(s)
    }
}

/// Numeric parameters bound into one solve.
///
/// Every field is optional so that omissions can be reported precisely.
#[derive(Debug, Clone, Default)]
pub struct SolveRequest {
    pub x0: Option<DVector<f64>>,
    pub cov_x0: Option<DMatrix<f64>>,
    pub k_gain: Option<DMatrix<f64>>,
}

impl SolveRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request anchored at `x0`.
    pub fn at(x0: &[f64]) -> Self {
        Self::new().x0(x0)
    }

    #[must_use]
    pub fn x0(mut self, x0: &[f64]) -> Self {
        self.x0 = Some(DVector::from_column_slice(x0));
        self
    }

    #[must_use]
    pub fn cov_x0(mut self, cov: DMatrix<f64>) -> Self {
        self.cov_x0 = Some(cov);
        self
    }

    /// Diagonal initial covariance.
    #[must_use]
    pub fn cov_x0_diag(mut self, variances: &[f64]) -> Self {
        self.cov_x0 = Some(DMatrix::from_diagonal(&DVector::from_column_slice(variances)));
        self
    }

    #[must_use]
    pub fn k_gain(mut self, gain: DMatrix<f64>) -> Self {
        self.k_gain = Some(gain);
        self
    }
}

/// Result of a successful `optimize()`.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionRecord {
    /// Optimal mean inputs ū₀ … ū_{N−1}.
    pub inputs: Vec<DVector<f64>>,
    /// Mean trajectory x̄₀ … x̄_N.
    pub means: Vec<DVector<f64>>,
    /// Covariance sequence Σ₀ … Σ_N.
    pub covariances: Vec<DMatrix<f64>>,
    /// Effective (tightened) lower bounds on x̄₀ … x̄_N.
    pub lower_bounds: Vec<DVector<f64>>,
    /// Effective (tightened) upper bounds on x̄₀ … x̄_N.
    pub upper_bounds: Vec<DVector<f64>>,
    /// Ancillary feedback gain used for propagation.
    pub feedback_gain: DMatrix<f64>,
    pub objective: f64,
    pub constraint_violation: f64,
    pub status: SolveStatus,
    pub iterations: u32,
    pub solve_time_us: u64,
}

impl SolutionRecord {
    pub fn horizon(&self) -> usize {
        self.inputs.len()
    }

    /// ū₀, the input applied at the current step.
    pub fn first_input(&self) -> &DVector<f64> {
        &self.inputs[0]
    }

    /// Ancillary law at step 0: `ū₀ + K (x − x̄₀)`.
    pub fn feedback_input(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.inputs[0] + &self.feedback_gain * (x - &self.means[0])
    }

    /// Mean of state `index` over x̄₀ … x̄_N.
    pub fn state_trajectory(&self, index: usize) -> Vec<f64> {
        self.means.iter().map(|x| x[index]).collect()
    }

    /// Input `index` over ū₀ … ū_{N−1}.
    pub fn input_trajectory(&self, index: usize) -> Vec<f64> {
        self.inputs.iter().map(|u| u[index]).collect()
    }

    /// Standard deviation of state `index` over the horizon.
    pub fn std_dev_trajectory(&self, index: usize) -> Vec<f64> {
        self.covariances
            .iter()
            .map(|s| s[(index, index)].max(0.0).sqrt())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record() -> SolutionRecord {
        SolutionRecord {
            inputs: vec![DVector::from_element(1, -2.0), DVector::from_element(1, 0.0)],
            means: vec![
                DVector::from_vec(vec![3.0, 0.0]),
                DVector::from_vec(vec![1.0, 3.0]),
                DVector::from_vec(vec![1.0, 4.0]),
            ],
            covariances: vec![
                DMatrix::zeros(2, 2),
                DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 0.0])),
                DMatrix::from_diagonal(&DVector::from_vec(vec![9.0, 1.0])),
            ],
            lower_bounds: vec![DVector::from_element(2, f64::NEG_INFINITY); 3],
            upper_bounds: vec![DVector::from_element(2, f64::INFINITY); 3],
            feedback_gain: DMatrix::from_row_slice(1, 2, &[-0.5, 0.0]),
            objective: 1.0,
            constraint_violation: 0.0,
            status: SolveStatus::Solved,
            iterations: 2,
            solve_time_us: 10,
        }
    }

    #[test]
    fn feedback_input_corrects_deviation() {
        let rec = record();
        assert_relative_eq!(rec.first_input()[0], -2.0);
        let u = rec.feedback_input(&DVector::from_vec(vec![5.0, 7.0]));
        assert_relative_eq!(u[0], -3.0);
    }

    #[test]
    fn trajectories() {
        let rec = record();
        assert_eq!(rec.horizon(), 2);
        assert_eq!(rec.state_trajectory(1), vec![0.0, 3.0, 4.0]);
        assert_eq!(rec.input_trajectory(0), vec![-2.0, 0.0]);
        assert_eq!(rec.std_dev_trajectory(0), vec![0.0, 2.0, 3.0]);
    }

    #[test]
    fn request_builder() {
        let req = SolveRequest::at(&[15.0])
            .cov_x0_diag(&[0.0])
            .k_gain(DMatrix::zeros(1, 1));
        assert_eq!(req.x0.unwrap()[0], 15.0);
        assert_eq!(req.cov_x0.unwrap().shape(), (1, 1));
        assert!(req.k_gain.is_some());
        assert!(SolveRequest::new().x0.is_none());
    }
}
