//! Reference plant models.
//!
//! [`LinearPlant`] is a discrete LTI system. [`EulerPlant`] wraps a continuous
//! vector field `ẋ = g(x, u)` with first-order explicit Runge–Kutta:
//!
//! ```text
//! x⁺ = x + dt · g(x, u)
//! A_d = I + dt · ∂g/∂x,   B_d = dt · ∂g/∂u
//! ```

use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::traits::PlantModel;

type VectorField = Box<dyn Fn(&DVector<f64>, &DVector<f64>) -> DVector<f64> + Send + Sync>;
type FieldJacobian =
    Box<dyn Fn(&DVector<f64>, &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) + Send + Sync>;

fn default_names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

// ---------------------------------------------------------------------------
// LinearPlant
// ---------------------------------------------------------------------------

/// Discrete linear plant `x⁺ = A x + B u`.
#[derive(Debug, Clone)]
pub struct LinearPlant {
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    dt: f64,
    state_names: Vec<String>,
    input_names: Vec<String>,
}

impl LinearPlant {
    /// # Panics
    ///
    /// Panics if `a` is not square or `b` has a different row count.
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>, dt: f64) -> Self {
        assert!(a.is_square(), "A must be square");
        assert_eq!(a.nrows(), b.nrows(), "A and B must have the same row count");
        let state_names = default_names("x", a.nrows());
        let input_names = default_names("u", b.ncols());
        Self {
            a,
            b,
            dt,
            state_names,
            input_names,
        }
    }

    /// Replace the default `x0, x1, ...` / `u0, ...` names.
    ///
    /// # Panics
    ///
    /// Panics if the name counts do not match the dimensions.
    #[must_use]
    pub fn with_names(mut self, states: &[&str], inputs: &[&str]) -> Self {
        assert_eq!(states.len(), self.a.nrows(), "state name count");
        assert_eq!(inputs.len(), self.b.ncols(), "input name count");
        self.state_names = states.iter().map(|s| (*s).to_string()).collect();
        self.input_names = inputs.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub const fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub const fn b(&self) -> &DMatrix<f64> {
        &self.b
    }
}

impl PlantModel for LinearPlant {
    fn state_dim(&self) -> usize {
        self.a.nrows()
    }

    fn input_dim(&self) -> usize {
        self.b.ncols()
    }

    fn state_names(&self) -> &[String] {
        &self.state_names
    }

    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn dt(&self) -> f64 {
        self.dt
    }

    fn transition(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        &self.a * x + &self.b * u
    }

    fn jacobians(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        (self.a.clone(), self.b.clone())
    }
}

// ---------------------------------------------------------------------------
// EulerPlant
// ---------------------------------------------------------------------------

/// Continuous dynamics discretized with explicit Euler.
pub struct EulerPlant {
    field: VectorField,
    field_jacobian: Option<FieldJacobian>,
    dt: f64,
    state_names: Vec<String>,
    input_names: Vec<String>,
}

impl fmt::Debug for EulerPlant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EulerPlant")
            .field("dt", &self.dt)
            .field("state_names", &self.state_names)
            .field("input_names", &self.input_names)
            .field("analytic_jacobian", &self.field_jacobian.is_some())
            .finish_non_exhaustive()
    }
}

impl EulerPlant {
    /// Build from named states/inputs and the continuous vector field.
    ///
    /// Jacobians are computed by central differences unless
    /// [`with_jacobian`](Self::with_jacobian) is used.
    pub fn new<F>(states: &[&str], inputs: &[&str], dt: f64, field: F) -> Self
    where
        F: Fn(&DVector<f64>, &DVector<f64>) -> DVector<f64> + Send + Sync + 'static,
    {
        Self {
            field: Box::new(field),
            field_jacobian: None,
            dt,
            state_names: states.iter().map(|s| (*s).to_string()).collect(),
            input_names: inputs.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Supply the continuous-time Jacobians `(∂g/∂x, ∂g/∂u)`.
    #[must_use]
    pub fn with_jacobian<J>(mut self, jacobian: J) -> Self
    where
        J: Fn(&DVector<f64>, &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) + Send + Sync + 'static,
    {
        self.field_jacobian = Some(Box::new(jacobian));
        self
    }

    fn continuous_jacobians(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        if let Some(jac) = &self.field_jacobian {
            return jac(x, u);
        }
        let n = x.len();
        let m = u.len();
        let mut a_c = DMatrix::zeros(n, n);
        let mut b_c = DMatrix::zeros(n, m);

        let mut xp = x.clone();
        for j in 0..n {
            let h = 1e-6 * x[j].abs().max(1.0);
            xp[j] = x[j] + h;
            let plus = (self.field)(&xp, u);
            xp[j] = x[j] - h;
            let minus = (self.field)(&xp, u);
            xp[j] = x[j];
            a_c.set_column(j, &((plus - minus) / (2.0 * h)));
        }

        let mut up = u.clone();
        for j in 0..m {
            let h = 1e-6 * u[j].abs().max(1.0);
            up[j] = u[j] + h;
            let plus = (self.field)(x, &up);
            up[j] = u[j] - h;
            let minus = (self.field)(x, &up);
            up[j] = u[j];
            b_c.set_column(j, &((plus - minus) / (2.0 * h)));
        }

        (a_c, b_c)
    }
}

impl PlantModel for EulerPlant {
    fn state_dim(&self) -> usize {
        self.state_names.len()
    }

    fn input_dim(&self) -> usize {
        self.input_names.len()
    }

    fn state_names(&self) -> &[String] {
        &self.state_names
    }

    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn dt(&self) -> f64 {
        self.dt
    }

    fn transition(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        x + (self.field)(x, u) * self.dt
    }

    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let (a_c, b_c) = self.continuous_jacobians(x, u);
        let n = x.len();
        let a_d = DMatrix::identity(n, n) + a_c * self.dt;
        let b_d = b_c * self.dt;
        (a_d, b_d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn double_integrator() -> EulerPlant {
        EulerPlant::new(&["p", "v"], &["a"], 0.1, |x, u| {
            DVector::from_vec(vec![x[1], u[0]])
        })
    }

    #[test]
    fn linear_plant_transition() {
        let plant = LinearPlant::new(
            DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]),
            DMatrix::from_row_slice(2, 1, &[0.0, 1.0]),
            1.0,
        );
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let u = DVector::from_vec(vec![0.5]);
        let next = plant.transition(&x, &u);
        assert_relative_eq!(next[0], 3.0);
        assert_relative_eq!(next[1], 2.5);
        assert_eq!(plant.state_names(), &["x0".to_string(), "x1".to_string()]);
    }

    #[test]
    fn linear_plant_names() {
        let plant = LinearPlant::new(DMatrix::identity(1, 1), DMatrix::identity(1, 1), 1.0)
            .with_names(&["px"], &["a"]);
        assert_eq!(plant.state_index("px"), Some(0));
        assert_eq!(plant.input_index("a"), Some(0));
        assert_eq!(plant.state_index("py"), None);
    }

    #[test]
    fn euler_transition_is_forward_euler() {
        let plant = double_integrator();
        let x = DVector::from_vec(vec![0.0, 1.0]);
        let u = DVector::from_vec(vec![2.0]);
        let next = plant.transition(&x, &u);
        assert_relative_eq!(next[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(next[1], 1.2, epsilon = 1e-12);
    }

    #[test]
    fn euler_jacobians_match_discretized_matrices() {
        let plant = double_integrator();
        let x = DVector::from_vec(vec![0.3, -0.2]);
        let u = DVector::from_vec(vec![1.0]);
        let (a, b) = plant.jacobians(&x, &u);
        let a_expected = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]);
        let b_expected = DMatrix::from_row_slice(2, 1, &[0.0, 0.1]);
        assert_relative_eq!(a, a_expected, epsilon = 1e-8);
        assert_relative_eq!(b, b_expected, epsilon = 1e-8);
    }

    #[test]
    fn analytic_jacobian_is_used() {
        let plant = double_integrator().with_jacobian(|_, _| {
            (DMatrix::zeros(2, 2), DMatrix::from_element(2, 1, 10.0))
        });
        let (a, b) = plant.jacobians(&DVector::zeros(2), &DVector::zeros(1));
        assert_relative_eq!(a, DMatrix::identity(2, 2));
        assert_relative_eq!(b[(0, 0)], 1.0);
    }
}
