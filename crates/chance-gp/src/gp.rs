//! Exact GP regression with shared hyperparameters across output channels.

use chance_core::traits::DisturbanceModel;
use log::debug;
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::kernel::SquaredExponential;

/// Diagonal jitter added to the Gram matrix before factorization.
const JITTER: f64 = 1e-10;

/// Errors raised while conditioning a GP on training data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GpError {
    #[error("Training inputs have {inputs} samples but targets have {targets}")]
    SampleCountMismatch { inputs: usize, targets: usize },

    #[error("Expected {expected} feature rows, got {got}")]
    FeatureCountMismatch { expected: usize, got: usize },

    #[error("Training set is empty")]
    Empty,

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Invalid kernel hyperparameters")]
    InvalidHyperparameters,

    #[error("Gram matrix is not positive definite")]
    NotPositiveDefinite,
}

/// Training set laid out column-per-sample.
#[derive(Debug, Clone)]
pub struct TrainingData {
    /// Features × samples.
    pub inputs: DMatrix<f64>,
    /// Outputs × samples.
    pub targets: DMatrix<f64>,
}

/// A GP conditioned on its training data.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    kernel: SquaredExponential,
    /// State indices used as regressors.
    features: Vec<usize>,
    inputs: DMatrix<f64>,
    /// Lower Cholesky factor of `K + σ_n² I`.
    l: DMatrix<f64>,
    /// `(K + σ_n² I)⁻¹ Y`, samples × outputs.
    alpha: DMatrix<f64>,
}

impl GaussianProcess {
    /// Condition a GP on `data`.
    ///
    /// `features[i]` is the state index feeding input row `i`.
    pub fn fit(
        data: TrainingData,
        kernel: SquaredExponential,
        features: Vec<usize>,
    ) -> Result<Self, GpError> {
        let TrainingData { inputs, targets } = data;
        if inputs.ncols() == 0 {
            return Err(GpError::Empty);
        }
        if inputs.ncols() != targets.ncols() {
            return Err(GpError::SampleCountMismatch {
                inputs: inputs.ncols(),
                targets: targets.ncols(),
            });
        }
        if inputs.nrows() != features.len() {
            return Err(GpError::FeatureCountMismatch {
                expected: features.len(),
                got: inputs.nrows(),
            });
        }
        if !kernel.is_valid() || kernel.length_scales.len() != features.len() {
            return Err(GpError::InvalidHyperparameters);
        }

        let s = inputs.ncols();
        let mut gram = kernel.gram(&inputs, &inputs);
        for i in 0..s {
            gram[(i, i)] += kernel.noise_variance + JITTER;
        }
        let chol = gram.cholesky().ok_or(GpError::NotPositiveDefinite)?;
        let alpha = chol.solve(&targets.transpose());
        let l = chol.unpack();

        debug!(
            "GP conditioned on {s} samples, {} features, {} outputs",
            features.len(),
            targets.nrows()
        );

        Ok(Self {
            kernel,
            features,
            inputs,
            l,
            alpha,
        })
    }

    /// Like [`fit`](Self::fit) but resolves features by state name.
    pub fn fit_named(
        data: TrainingData,
        kernel: SquaredExponential,
        feature_names: &[&str],
        state_names: &[String],
    ) -> Result<Self, GpError> {
        let features = feature_names
            .iter()
            .map(|name| {
                state_names
                    .iter()
                    .position(|s| s == name)
                    .ok_or_else(|| GpError::UnknownFeature((*name).to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::fit(data, kernel, features)
    }

    pub const fn kernel(&self) -> &SquaredExponential {
        &self.kernel
    }

    pub fn features(&self) -> &[usize] {
        &self.features
    }

    pub fn num_samples(&self) -> usize {
        self.inputs.ncols()
    }

    fn regressors(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.features.len(), self.features.iter().map(|&i| x[i]))
    }

    fn cross_covariance(&self, z: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.inputs.ncols(), |i, _| {
            self.kernel.eval(z, &self.inputs.column(i).clone_owned())
        })
    }
}

impl DisturbanceModel for GaussianProcess {
    fn output_dim(&self) -> usize {
        self.alpha.ncols()
    }

    fn min_state_dim(&self) -> Option<usize> {
        self.features.iter().max().map(|&i| i + 1)
    }

    /// Posterior mean and variance. The variance includes the observation
    /// noise, since the disturbance realization carries it.
    fn predict(&self, x: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        let z = self.regressors(x);
        let k_star = self.cross_covariance(&z);
        let mean = self.alpha.transpose() * &k_star;

        let explained = self
            .l
            .solve_lower_triangular(&k_star)
            .map_or(0.0, |v| v.norm_squared());
        let posterior = (self.kernel.signal_variance - explained).max(0.0);
        let variance = DVector::from_element(
            self.output_dim(),
            posterior + self.kernel.noise_variance,
        );
        (mean, variance)
    }

    fn mean_jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let z = self.regressors(x);
        let mut dk = DMatrix::zeros(self.inputs.ncols(), self.features.len());
        for i in 0..self.inputs.ncols() {
            let grad = self
                .kernel
                .gradient(&z, &self.inputs.column(i).clone_owned());
            dk.set_row(i, &grad.transpose());
        }
        // outputs × features
        let d_mean = self.alpha.transpose() * dk;
        let mut jac = DMatrix::zeros(self.output_dim(), x.len());
        for (col, &state) in self.features.iter().enumerate() {
            let column = jac.column(state) + d_mean.column(col);
            jac.set_column(state, &column);
        }
        jac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn arcsine_data() -> TrainingData {
        let s3 = 3.0_f64.sqrt() / 2.0;
        TrainingData {
            inputs: DMatrix::from_row_slice(1, 5, &[0.0, 0.5, 1.0 / 2.0_f64.sqrt(), s3, 1.0]),
            targets: DMatrix::from_row_slice(1, 5, &[0.0, PI / 6.0, PI / 4.0, PI / 3.0, PI / 2.0]),
        }
    }

    fn fitted() -> GaussianProcess {
        GaussianProcess::fit(
            arcsine_data(),
            SquaredExponential::isotropic(1, 0.5, 1.0, 1e-6),
            vec![0],
        )
        .unwrap()
    }

    #[test]
    fn interpolates_training_points() {
        let gp = fitted();
        let (mean, var) = gp.predict(&DVector::from_element(1, 0.5));
        assert_relative_eq!(mean[0], PI / 6.0, epsilon = 1e-3);
        assert!(var[0] < 1e-3, "variance at a training point: {}", var[0]);
    }

    #[test]
    fn reverts_to_prior_far_from_data() {
        let gp = fitted();
        let (mean, var) = gp.predict(&DVector::from_element(1, 15.0));
        assert_relative_eq!(mean[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(var[0], 1.0 + 1e-6, epsilon = 1e-9);
    }

    #[test]
    fn variance_is_non_negative_everywhere() {
        let gp = fitted();
        for i in 0..=40 {
            let x = DVector::from_element(1, -1.0 + 0.075 * f64::from(i));
            let (_, var) = gp.predict(&x);
            assert!(var[0] >= 0.0);
        }
    }

    #[test]
    fn analytic_mean_jacobian_matches_finite_difference() {
        let gp = fitted();
        let x = DVector::from_element(1, 0.6);
        let analytic = gp.mean_jacobian(&x);
        let h = 1e-6;
        let (mp, _) = gp.predict(&DVector::from_element(1, 0.6 + h));
        let (mm, _) = gp.predict(&DVector::from_element(1, 0.6 - h));
        assert_relative_eq!(analytic[(0, 0)], (mp[0] - mm[0]) / (2.0 * h), epsilon = 1e-5);
    }

    #[test]
    fn features_select_state_components() {
        let state_names = vec!["px".to_string(), "py".to_string()];
        let gp = GaussianProcess::fit_named(
            arcsine_data(),
            SquaredExponential::isotropic(1, 0.5, 1.0, 1e-6),
            &["px"],
            &state_names,
        )
        .unwrap();
        let a = gp.predict(&DVector::from_vec(vec![0.5, -100.0]));
        let b = gp.predict(&DVector::from_vec(vec![0.5, 100.0]));
        assert_relative_eq!(a.0[0], b.0[0]);
        let jac = gp.mean_jacobian(&DVector::from_vec(vec![0.5, 3.0]));
        assert_eq!(jac.shape(), (1, 2));
        assert_relative_eq!(jac[(0, 1)], 0.0);
        assert_eq!(gp.min_state_dim(), Some(1));
    }

    #[test]
    fn min_state_dim_follows_highest_feature() {
        let gp = GaussianProcess::fit(
            arcsine_data(),
            SquaredExponential::isotropic(1, 0.5, 1.0, 1e-6),
            vec![3],
        )
        .unwrap();
        assert_eq!(gp.min_state_dim(), Some(4));
    }

    #[test]
    fn rejects_unknown_feature() {
        let result = GaussianProcess::fit_named(
            arcsine_data(),
            SquaredExponential::isotropic(1, 0.5, 1.0, 1e-6),
            &["pz"],
            &["px".to_string()],
        );
        assert_eq!(result.unwrap_err(), GpError::UnknownFeature("pz".into()));
    }

    #[test]
    fn rejects_sample_mismatch() {
        let data = TrainingData {
            inputs: DMatrix::zeros(1, 3),
            targets: DMatrix::zeros(1, 2),
        };
        let result = GaussianProcess::fit(
            data,
            SquaredExponential::isotropic(1, 0.5, 1.0, 1e-6),
            vec![0],
        );
        assert!(matches!(result, Err(GpError::SampleCountMismatch { .. })));
    }
}
