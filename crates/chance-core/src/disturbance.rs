//! Reference disturbance models.

use nalgebra::{DMatrix, DVector};

use crate::traits::DisturbanceModel;

/// Deterministic, noise-free disturbance: zero mean and zero variance.
#[derive(Debug, Clone)]
pub struct ZeroDisturbance {
    channels: usize,
}

impl ZeroDisturbance {
    pub const fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl DisturbanceModel for ZeroDisturbance {
    fn output_dim(&self) -> usize {
        self.channels
    }

    fn predict(&self, _x: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        (DVector::zeros(self.channels), DVector::zeros(self.channels))
    }

    fn mean_jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::zeros(self.channels, x.len())
    }
}

/// State-independent disturbance with fixed mean and variance per channel.
#[derive(Debug, Clone)]
pub struct ConstantDisturbance {
    mean: DVector<f64>,
    variance: DVector<f64>,
}

impl ConstantDisturbance {
    /// # Panics
    ///
    /// Panics if `mean` and `variance` differ in length or any variance is
    /// negative.
    pub fn new(mean: DVector<f64>, variance: DVector<f64>) -> Self {
        assert_eq!(mean.len(), variance.len(), "mean/variance length mismatch");
        assert!(
            variance.iter().all(|v| *v >= 0.0),
            "variance must be non-negative"
        );
        Self { mean, variance }
    }

    /// Zero-mean disturbance with the given per-channel variance.
    pub fn zero_mean(variance: &[f64]) -> Self {
        Self::new(
            DVector::zeros(variance.len()),
            DVector::from_column_slice(variance),
        )
    }
}

impl DisturbanceModel for ConstantDisturbance {
    fn output_dim(&self) -> usize {
        self.mean.len()
    }

    fn predict(&self, _x: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        (self.mean.clone(), self.variance.clone())
    }

    fn mean_jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::zeros(self.mean.len(), x.len())
    }
}
