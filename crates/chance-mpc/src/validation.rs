//! Monte-Carlo check of chance-constraint satisfaction along a prediction.
//!
//! Realizations start from `x₀ ~ N(x̄₀, Σ₀)`, follow the ancillary law
//! `u_k = ū_k + K (x_k − x̄_k)` and draw disturbances from the disturbance
//! model. Each nominal (untightened) bound is checked at every step.

use chance_core::traits::{DisturbanceModel, PlantModel};
use chance_nlp::NlpSolver;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::controller::Smpc;
use crate::propagation::symmetrize;
use crate::simulate::sample_step;
use crate::tightening::ChanceConstraintSpec;
use crate::types::SolutionRecord;

/// Empirical satisfaction rates.
#[derive(Debug, Clone, PartialEq)]
pub struct SatisfactionReport {
    pub samples: usize,
    /// `rates[c][k]`: fraction of realizations meeting constraint `c` at step `k`.
    pub rates: Vec<Vec<f64>>,
    /// Required probability per constraint.
    pub required: Vec<f64>,
}

impl SatisfactionReport {
    /// Worst rate of constraint `c` over steps 1 … N.
    pub fn min_rate(&self, c: usize) -> f64 {
        self.rates[c]
            .iter()
            .skip(1)
            .copied()
            .fold(f64::INFINITY, f64::min)
    }

    /// Whether every constraint reaches its probability up to `slack`.
    pub fn all_satisfied(&self, slack: f64) -> bool {
        (0..self.rates.len()).all(|c| self.min_rate(c) + slack >= self.required[c])
    }
}

/// `L` with `L Lᵀ = Σ` from the symmetric eigendecomposition; tolerates
/// singular Σ.
fn sampling_factor(sigma: &DMatrix<f64>) -> DMatrix<f64> {
    let eig = symmetrize(sigma).symmetric_eigen();
    let roots = eig.eigenvalues.map(|v| v.max(0.0).sqrt());
    eig.eigenvectors * DMatrix::from_diagonal(&roots)
}

/// Estimate satisfaction of `specs` under the stochastic closed loop.
#[allow(clippy::too_many_arguments)]
pub fn empirical_satisfaction<P, D, R>(
    plant: &P,
    disturbance: &D,
    injection: &DMatrix<f64>,
    record: &SolutionRecord,
    specs: &[ChanceConstraintSpec],
    samples: usize,
    rng: &mut R,
) -> SatisfactionReport
where
    P: PlantModel + ?Sized,
    D: DisturbanceModel + ?Sized,
    R: Rng + ?Sized,
{
    let horizon = record.horizon();
    let n = record.means[0].len();
    let factor = sampling_factor(&record.covariances[0]);
    let mut hits = vec![vec![0_usize; horizon + 1]; specs.len()];

    for _ in 0..samples {
        let e = DVector::from_fn(n, |_, _| rng.sample::<f64, _>(StandardNormal));
        let mut x = &record.means[0] + &factor * e;
        for k in 0..=horizon {
            for (c, spec) in specs.iter().enumerate() {
                if spec.is_satisfied(x[spec.state]) {
                    hits[c][k] += 1;
                }
            }
            if k == horizon {
                break;
            }
            let u = &record.inputs[k] + &record.feedback_gain * (&x - &record.means[k]);
            x = sample_step(plant, disturbance, injection, &x, &u, rng);
        }
    }

    let total = samples.max(1) as f64;
    SatisfactionReport {
        samples,
        rates: hits
            .into_iter()
            .map(|row| row.into_iter().map(|h| h as f64 / total).collect())
            .collect(),
        required: specs.iter().map(|s| s.probability).collect(),
    }
}

impl<P, D, S> Smpc<P, D, S>
where
    P: PlantModel,
    D: DisturbanceModel,
    S: NlpSolver,
{
    /// [`empirical_satisfaction`] of the declared chance constraints along
    /// the latest solution.
    pub fn empirical_satisfaction<R: Rng + ?Sized>(
        &self,
        samples: usize,
        rng: &mut R,
    ) -> Option<SatisfactionReport> {
        let record = self.solution()?;
        Some(empirical_satisfaction(
            self.plant(),
            self.disturbance(),
            self.injection(),
            record,
            self.chance_constraints(),
            samples,
            rng,
        ))
    }
}
