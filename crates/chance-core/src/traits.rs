use nalgebra::{DMatrix, DVector};

// ---------------------------------------------------------------------------
// PlantModel
// ---------------------------------------------------------------------------

/// Nominal discrete-time dynamics `x⁺ = f(x, u)` with Jacobians.
///
/// The discretization timestep is fixed when the model is built.
pub trait PlantModel {
    /// Number of states `n`.
    fn state_dim(&self) -> usize;

    /// Number of inputs `m`.
    fn input_dim(&self) -> usize;

    /// State names, one per state, used for name-based declarations.
    fn state_names(&self) -> &[String];

    /// Input names, one per input.
    fn input_names(&self) -> &[String];

    /// Discretization timestep in seconds.
    fn dt(&self) -> f64;

    /// Nominal one-step transition.
    fn transition(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64>;

    /// Jacobians `(∂f/∂x, ∂f/∂u)` evaluated at `(x, u)`.
    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>);

    /// Index of the state called `name`.
    fn state_index(&self, name: &str) -> Option<usize> {
        self.state_names().iter().position(|s| s == name)
    }

    /// Index of the input called `name`.
    fn input_index(&self, name: &str) -> Option<usize> {
        self.input_names().iter().position(|s| s == name)
    }
}

// ---------------------------------------------------------------------------
// DisturbanceModel
// ---------------------------------------------------------------------------

/// Learned additive disturbance with predictive mean and variance.
///
/// The query point is always the full state vector; implementations pick the
/// regressors they need from it.
pub trait DisturbanceModel {
    /// Number of disturbance channels `t`.
    fn output_dim(&self) -> usize;

    /// Predictive `(mean, variance)` per channel at state `x`.
    fn predict(&self, x: &DVector<f64>) -> (DVector<f64>, DVector<f64>);

    /// Smallest state dimension `predict` can be queried with, if the model
    /// reads state entries at all.
    fn min_state_dim(&self) -> Option<usize> {
        None
    }

    /// Jacobian of the predictive mean with respect to the state (`t × n`).
    ///
    /// The default uses central differences.
    fn mean_jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let n = x.len();
        let mut jac = DMatrix::zeros(self.output_dim(), n);
        let mut xp = x.clone();
        for j in 0..n {
            let h = 1e-6 * x[j].abs().max(1.0);
            xp[j] = x[j] + h;
            let (mean_plus, _) = self.predict(&xp);
            xp[j] = x[j] - h;
            let (mean_minus, _) = self.predict(&xp);
            xp[j] = x[j];
            jac.set_column(j, &((mean_plus - mean_minus) / (2.0 * h)));
        }
        jac
    }
}

impl<T: PlantModel + ?Sized> PlantModel for Box<T> {
    fn state_dim(&self) -> usize {
        (**self).state_dim()
    }
    fn input_dim(&self) -> usize {
        (**self).input_dim()
    }
    fn state_names(&self) -> &[String] {
        (**self).state_names()
    }
    fn input_names(&self) -> &[String] {
        (**self).input_names()
    }
    fn dt(&self) -> f64 {
        (**self).dt()
    }
    fn transition(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        (**self).transition(x, u)
    }
    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        (**self).jacobians(x, u)
    }
}

impl<T: DisturbanceModel + ?Sized> DisturbanceModel for Box<T> {
    fn output_dim(&self) -> usize {
        (**self).output_dim()
    }
    fn predict(&self, x: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        (**self).predict(x)
    }
    fn min_state_dim(&self) -> Option<usize> {
        (**self).min_state_dim()
    }
    fn mean_jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        (**self).mean_jacobian(x)
    }
}
