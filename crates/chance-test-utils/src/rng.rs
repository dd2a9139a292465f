//! Seeded random covariances and feedback gains.

use nalgebra::DMatrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

/// `ChaCha8Rng` seeded from `seed`. Every sampled test goes through this.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Random PSD matrix `s² L Lᵀ` with standard-normal `L`.
///
/// Rank-deficient draws are possible for small `dim`, which is what the
/// propagation tests want to exercise.
pub fn random_covariance(dim: usize, scale: f64, seed: u64) -> DMatrix<f64> {
    let mut rng = seeded_rng(seed);
    let factor = DMatrix::from_fn(dim, dim, |_, _| scale * rng.sample::<f64, _>(StandardNormal));
    let sigma = &factor * factor.transpose();
    (&sigma + sigma.transpose()) * 0.5
}

/// Random `rows × cols` gain with entries uniform in `[-bound, bound)`.
pub fn random_gain(rows: usize, cols: usize, bound: f64, seed: u64) -> DMatrix<f64> {
    let mut rng = seeded_rng(seed);
    DMatrix::from_fn(rows, cols, |_, _| rng.gen_range(-bound..bound))
}
