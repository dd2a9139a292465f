//! Receding-horizon closed-loop simulation.

use chance_core::error::SmpcError;
use chance_core::traits::{DisturbanceModel, PlantModel};
use chance_nlp::NlpSolver;
use log::debug;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::controller::Smpc;
use crate::types::SolveRequest;

/// One stochastic plant step: `x⁺ = f(x, u) + G w`, `w ~ N(μ_w(x), diag σ²_w(x))`.
pub fn sample_step<P, D, R>(
    plant: &P,
    disturbance: &D,
    injection: &DMatrix<f64>,
    x: &DVector<f64>,
    u: &DVector<f64>,
    rng: &mut R,
) -> DVector<f64>
where
    P: PlantModel + ?Sized,
    D: DisturbanceModel + ?Sized,
    R: Rng + ?Sized,
{
    let (mean, variance) = disturbance.predict(x);
    let w = DVector::from_fn(mean.len(), |i, _| {
        let z: f64 = rng.sample(StandardNormal);
        mean[i] + variance[i].max(0.0).sqrt() * z
    });
    plant.transition(x, u) + injection * w
}

/// Realized closed-loop trajectory.
#[derive(Debug, Clone)]
pub struct ClosedLoopTrajectory {
    /// x₀ … x_T.
    pub states: Vec<DVector<f64>>,
    /// Applied inputs u₀ … u_{T−1}.
    pub inputs: Vec<DVector<f64>>,
    /// One-step-ahead predicted means x̄₁ of each solve.
    pub predictions: Vec<DVector<f64>>,
    /// Objective of each solve.
    pub objectives: Vec<f64>,
}

impl ClosedLoopTrajectory {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// State `index` over x₀ … x_T.
    pub fn state_trajectory(&self, index: usize) -> Vec<f64> {
        self.states.iter().map(|x| x[index]).collect()
    }
}

/// Drives a set-up controller against the stochastic plant it models.
///
/// Each step re-solves from the measured state, applies
/// `u = ū₀ + K (x − x̄₀)` and samples the next state.
pub struct ClosedLoop<'c, P, D, S> {
    controller: &'c mut Smpc<P, D, S>,
    cov_x0: Option<DMatrix<f64>>,
    k_gain: Option<DMatrix<f64>>,
}

impl<'c, P, D, S> ClosedLoop<'c, P, D, S>
where
    P: PlantModel,
    D: DisturbanceModel,
    S: NlpSolver,
{
    pub const fn new(controller: &'c mut Smpc<P, D, S>) -> Self {
        Self {
            controller,
            cov_x0: None,
            k_gain: None,
        }
    }

    /// Covariance passed to every solve (the measurement uncertainty).
    #[must_use]
    pub fn with_covariance(mut self, cov: DMatrix<f64>) -> Self {
        self.cov_x0 = Some(cov);
        self
    }

    #[must_use]
    pub fn with_gain(mut self, gain: DMatrix<f64>) -> Self {
        self.k_gain = Some(gain);
        self
    }

    pub fn run<R: Rng + ?Sized>(
        &mut self,
        x0: &DVector<f64>,
        steps: usize,
        rng: &mut R,
    ) -> Result<ClosedLoopTrajectory, SmpcError> {
        let mut trajectory = ClosedLoopTrajectory {
            states: vec![x0.clone()],
            inputs: Vec::with_capacity(steps),
            predictions: Vec::with_capacity(steps),
            objectives: Vec::with_capacity(steps),
        };
        for step in 0..steps {
            let x = trajectory.states[step].clone();
            let request = SolveRequest {
                x0: Some(x.clone()),
                cov_x0: self.cov_x0.clone(),
                k_gain: self.k_gain.clone(),
            };
            let record = self.controller.optimize(&request)?;
            let u = record.feedback_input(&x);
            let prediction = record.means[1].clone();
            let objective = record.objective;

            let next = sample_step(
                self.controller.plant(),
                self.controller.disturbance(),
                self.controller.injection(),
                &x,
                &u,
                rng,
            );
            debug!(
                "closed loop step {step}: u={:?}, x_next={:?}",
                u.as_slice(),
                next.as_slice()
            );
            trajectory.inputs.push(u);
            trajectory.predictions.push(prediction);
            trajectory.objectives.push(objective);
            trajectory.states.push(next);
        }
        Ok(trajectory)
    }
}
