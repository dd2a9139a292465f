//! Squared-exponential covariance function with per-feature length scales.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// ARD squared-exponential kernel:
///
/// ```text
/// k(a, b) = σ_f² · exp(-½ Σᵢ ((aᵢ - bᵢ) / ℓᵢ)²)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquaredExponential {
    /// Length scale per input feature.
    pub length_scales: Vec<f64>,
    /// Signal variance σ_f².
    pub signal_variance: f64,
    /// Observation noise variance σ_n².
    pub noise_variance: f64,
}

impl SquaredExponential {
    /// Isotropic kernel with the same length scale on every feature.
    pub fn isotropic(
        features: usize,
        length_scale: f64,
        signal_variance: f64,
        noise_variance: f64,
    ) -> Self {
        Self {
            length_scales: vec![length_scale; features],
            signal_variance,
            noise_variance,
        }
    }

    /// Whether every hyperparameter is finite and strictly positive
    /// (noise may be zero).
    pub fn is_valid(&self) -> bool {
        !self.length_scales.is_empty()
            && self.length_scales.iter().all(|l| l.is_finite() && *l > 0.0)
            && self.signal_variance.is_finite()
            && self.signal_variance > 0.0
            && self.noise_variance.is_finite()
            && self.noise_variance >= 0.0
    }

    /// Kernel value between two feature vectors.
    pub fn eval(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64 {
        let r2: f64 = a
            .iter()
            .zip(b.iter())
            .zip(&self.length_scales)
            .map(|((ai, bi), l)| ((ai - bi) / l).powi(2))
            .sum();
        self.signal_variance * (-0.5 * r2).exp()
    }

    /// Gram matrix between the columns of `a` and the columns of `b`.
    pub fn gram(&self, a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(a.ncols(), b.ncols(), |i, j| {
            self.eval(&a.column(i).clone_owned(), &b.column(j).clone_owned())
        })
    }

    /// Gradient of `k(z, b)` with respect to `z`.
    pub fn gradient(&self, z: &DVector<f64>, b: &DVector<f64>) -> DVector<f64> {
        let k = self.eval(z, b);
        DVector::from_fn(z.len(), |j, _| {
            -k * (z[j] - b[j]) / self.length_scales[j].powi(2)
        })
    }
}
