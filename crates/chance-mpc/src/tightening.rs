//! Conversion of box chance constraints into deterministic tightened bounds.
//!
//! A lower bound `P(x_i ≥ lb) ≥ p` becomes `x̄_i ≥ lb + κ(p) σ_i` and an upper
//! bound `P(x_i ≤ ub) ≥ p` becomes `x̄_i ≤ ub − κ(p) σ_i`, with
//! `σ_i = sqrt(Σ_ii)`.

use chance_core::config::TighteningMode;
use chance_core::error::ConfigError;
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

/// Side of a box constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Lower,
    Upper,
}

/// A single probabilistic bound on one state component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChanceConstraintSpec {
    /// State index.
    pub state: usize,
    /// Nominal bound value.
    pub bound: f64,
    /// Required satisfaction probability, in (0, 1].
    pub probability: f64,
    pub direction: Direction,
}

impl ChanceConstraintSpec {
    /// Whether a realized value satisfies the nominal bound.
    pub fn is_satisfied(&self, value: f64) -> bool {
        match self.direction {
            Direction::Lower => value >= self.bound,
            Direction::Upper => value <= self.bound,
        }
    }
}

/// Margin coefficient κ(p) of a tightening family.
///
/// `state_dim` is only read by [`TighteningMode::Prs`], whose ellipsoid lives
/// in the full state space. Every family returns 0 for `p = 1`.
pub fn margin_coefficient(
    mode: TighteningMode,
    probability: f64,
    state_dim: usize,
) -> Result<f64, ConfigError> {
    if !(probability > 0.0 && probability <= 1.0) {
        return Err(ConfigError::Tightening(format!(
            "probability {probability} outside (0, 1]"
        )));
    }
    if probability >= 1.0 {
        return Ok(0.0);
    }
    let kappa = match mode {
        TighteningMode::Prs => {
            let chi2 = ChiSquared::new(state_dim.max(1) as f64)
                .map_err(|e| ConfigError::Tightening(format!("{e:?}")))?;
            chi2.inverse_cdf(probability).sqrt()
        }
        TighteningMode::Gaussian => {
            let normal =
                Normal::new(0.0, 1.0).map_err(|e| ConfigError::Tightening(format!("{e:?}")))?;
            normal.inverse_cdf(probability)
        }
        TighteningMode::Chebyshev => (probability / (1.0 - probability)).sqrt(),
    };
    if kappa.is_finite() {
        Ok(kappa)
    } else {
        Err(ConfigError::Tightening(format!(
            "{mode} margin is not finite at p = {probability}"
        )))
    }
}

/// Per-step effective lower/upper state bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct TightenedBounds {
    /// Lower bounds for x̄₀ … x̄_N (`-inf` where unconstrained).
    pub lower: Vec<DVector<f64>>,
    /// Upper bounds for x̄₀ … x̄_N (`+inf` where unconstrained).
    pub upper: Vec<DVector<f64>>,
}

/// Chance constraints with their margin coefficients resolved for one
/// tightening family.
#[derive(Clone, Debug)]
pub struct ChanceConstraintTightener {
    mode: TighteningMode,
    specs: Vec<ChanceConstraintSpec>,
    kappas: Vec<f64>,
}

impl ChanceConstraintTightener {
    pub fn new(
        mode: TighteningMode,
        specs: Vec<ChanceConstraintSpec>,
        state_dim: usize,
    ) -> Result<Self, ConfigError> {
        let kappas = specs
            .iter()
            .map(|s| margin_coefficient(mode, s.probability, state_dim))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            mode,
            specs,
            kappas,
        })
    }

    pub const fn mode(&self) -> TighteningMode {
        self.mode
    }

    pub fn specs(&self) -> &[ChanceConstraintSpec] {
        &self.specs
    }

    pub fn kappa(&self, index: usize) -> f64 {
        self.kappas[index]
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// κ σ_i for constraint `index` under covariance `sigma`.
    pub fn margin(&self, index: usize, sigma: &DMatrix<f64>) -> f64 {
        let kappa = self.kappas[index];
        if kappa == 0.0 {
            return 0.0;
        }
        let i = self.specs[index].state;
        kappa * sigma[(i, i)].max(0.0).sqrt()
    }

    /// Deterministic bound imposed on the mean for constraint `index`.
    pub fn tighten(&self, index: usize, sigma: &DMatrix<f64>) -> f64 {
        let spec = &self.specs[index];
        let margin = self.margin(index, sigma);
        match spec.direction {
            Direction::Lower => spec.bound + margin,
            Direction::Upper => spec.bound - margin,
        }
    }

    /// Effective bounds at every step, merged with the plain box bounds.
    ///
    /// Step 0 carries only the plain bounds since x̄₀ is fixed by the caller.
    pub fn tightened_bounds(
        &self,
        covariances: &[DMatrix<f64>],
        plain_lower: &DVector<f64>,
        plain_upper: &DVector<f64>,
    ) -> TightenedBounds {
        let mut lower = vec![plain_lower.clone(); covariances.len()];
        let mut upper = vec![plain_upper.clone(); covariances.len()];
        for (k, sigma) in covariances.iter().enumerate().skip(1) {
            for (index, spec) in self.specs.iter().enumerate() {
                let bound = self.tighten(index, sigma);
                match spec.direction {
                    Direction::Lower => {
                        lower[k][spec.state] = lower[k][spec.state].max(bound);
                    }
                    Direction::Upper => {
                        upper[k][spec.state] = upper[k][spec.state].min(bound);
                    }
                }
            }
        }
        TightenedBounds { lower, upper }
    }
}
