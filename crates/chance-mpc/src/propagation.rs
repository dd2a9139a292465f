//! Mean and covariance propagation under an ancillary linear feedback.
//!
//! ```text
//! x̄⁺ = f(x̄, ū) + G μ_w(x̄)
//! Σ⁺ = (A + B K) Σ (A + B K)ᵀ + G diag(σ²_w(x̄)) Gᵀ
//! ```
//!
//! Both terms of the covariance update are congruences of PSD matrices, so
//! PSD-ness is preserved without clipping. The result is symmetrized to keep
//! round-off from accumulating in the off-diagonal.

use chance_core::error::ConfigError;
use chance_core::traits::{DisturbanceModel, PlantModel};
use nalgebra::{DMatrix, DVector};

/// Mean trajectory and covariance sequence over a horizon.
#[derive(Clone, Debug)]
pub struct Propagation {
    /// x̄₀ … x̄_N.
    pub means: Vec<DVector<f64>>,
    /// Σ₀ … Σ_N.
    pub covariances: Vec<DMatrix<f64>>,
}

/// Propagates the first two moments of the closed-loop state.
pub struct UncertaintyPropagator<'a, P: ?Sized, D: ?Sized> {
    plant: &'a P,
    disturbance: &'a D,
    injection: &'a DMatrix<f64>,
    include_mean: bool,
}

impl<'a, P, D> UncertaintyPropagator<'a, P, D>
where
    P: PlantModel + ?Sized,
    D: DisturbanceModel + ?Sized,
{
    /// `injection` is the n×t matrix G. With `include_mean` the disturbance
    /// mean enters the mean dynamics.
    pub const fn new(
        plant: &'a P,
        disturbance: &'a D,
        injection: &'a DMatrix<f64>,
        include_mean: bool,
    ) -> Self {
        Self {
            plant,
            disturbance,
            injection,
            include_mean,
        }
    }

    pub const fn plant(&self) -> &'a P {
        self.plant
    }

    pub const fn disturbance(&self) -> &'a D {
        self.disturbance
    }

    pub const fn injection(&self) -> &'a DMatrix<f64> {
        self.injection
    }

    /// One mean step `x̄⁺ = f(x̄, ū) + G μ_w(x̄)`.
    pub fn mean_step(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let next = self.plant.transition(x, u);
        if self.include_mean {
            let (mean, _) = self.disturbance.predict(x);
            next + self.injection * mean
        } else {
            next
        }
    }

    /// Jacobians of [`mean_step`](Self::mean_step) with respect to x̄ and ū.
    pub fn mean_jacobians(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let (a, b) = self.plant.jacobians(x, u);
        if self.include_mean {
            (a + self.injection * self.disturbance.mean_jacobian(x), b)
        } else {
            (a, b)
        }
    }

    /// One covariance step about the linearization point `(x̄, ū)`.
    pub fn covariance_step(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        sigma: &DMatrix<f64>,
        gain: &DMatrix<f64>,
    ) -> DMatrix<f64> {
        let (a, b) = self.plant.jacobians(x, u);
        let a_cl = a + b * gain;
        let (_, variance) = self.disturbance.predict(x);
        let g_scaled = self.injection * DMatrix::from_diagonal(&variance);
        let next = &a_cl * sigma * a_cl.transpose() + g_scaled * self.injection.transpose();
        symmetrize(&next)
    }

    /// One joint step `(x̄, Σ) → (x̄⁺, Σ⁺)`.
    pub fn step(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        sigma: &DMatrix<f64>,
        gain: &DMatrix<f64>,
    ) -> (DVector<f64>, DMatrix<f64>) {
        (self.mean_step(x, u), self.covariance_step(x, u, sigma, gain))
    }

    /// Roll out means and covariances from `(x0, Σ₀)` under `inputs`.
    ///
    /// Fails without a feedback gain: the covariance recursion is undefined
    /// without the closed-loop matrix.
    pub fn propagate(
        &self,
        x0: &DVector<f64>,
        sigma0: &DMatrix<f64>,
        inputs: &[DVector<f64>],
        gain: Option<&DMatrix<f64>>,
    ) -> Result<Propagation, ConfigError> {
        let gain = gain.ok_or(ConfigError::MissingFeedbackGain)?;
        let means = self.rollout(x0, inputs);
        let covariances = self.covariances_along(&means, inputs, sigma0, gain);
        Ok(Propagation { means, covariances })
    }

    /// Mean rollout `x̄₀ … x̄_N`.
    pub fn rollout(&self, x0: &DVector<f64>, inputs: &[DVector<f64>]) -> Vec<DVector<f64>> {
        let mut means = Vec::with_capacity(inputs.len() + 1);
        means.push(x0.clone());
        for (k, u) in inputs.iter().enumerate() {
            let next = self.mean_step(&means[k], u);
            means.push(next);
        }
        means
    }

    /// Covariances `Σ₀ … Σ_N` along a given mean trajectory (which need not
    /// satisfy the dynamics).
    pub fn covariances_along(
        &self,
        means: &[DVector<f64>],
        inputs: &[DVector<f64>],
        sigma0: &DMatrix<f64>,
        gain: &DMatrix<f64>,
    ) -> Vec<DMatrix<f64>> {
        let mut covariances = Vec::with_capacity(inputs.len() + 1);
        covariances.push(symmetrize(sigma0));
        for (k, u) in inputs.iter().enumerate() {
            let next = self.covariance_step(&means[k], u, &covariances[k], gain);
            covariances.push(next);
        }
        covariances
    }
}

/// `(S + Sᵀ) / 2`.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Smallest eigenvalue of a symmetric matrix (0 for an empty matrix).
pub fn min_eigenvalue(m: &DMatrix<f64>) -> f64 {
    if m.is_empty() {
        return 0.0;
    }
    symmetrize(m)
        .symmetric_eigenvalues()
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min)
}
