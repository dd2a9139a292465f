//! Plain and probabilistic box-constraint declarations.

use chance_core::error::ValidationError;
use chance_core::values::Values;
use nalgebra::DVector;

use crate::tightening::{ChanceConstraintSpec, Direction};

/// Plain box constraint declaration. Omitted sides keep their current value.
#[derive(Clone, Debug, Default)]
pub struct BoxConstraints {
    pub x_lb: Option<Values>,
    pub x_ub: Option<Values>,
    pub u_lb: Option<Values>,
    pub u_ub: Option<Values>,
}

impl BoxConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn x_lb(mut self, values: impl Into<Values>) -> Self {
        self.x_lb = Some(values.into());
        self
    }

    #[must_use]
    pub fn x_ub(mut self, values: impl Into<Values>) -> Self {
        self.x_ub = Some(values.into());
        self
    }

    #[must_use]
    pub fn u_lb(mut self, values: impl Into<Values>) -> Self {
        self.u_lb = Some(values.into());
        self
    }

    #[must_use]
    pub fn u_ub(mut self, values: impl Into<Values>) -> Self {
        self.u_ub = Some(values.into());
        self
    }
}

/// Resolved plain bounds on states and inputs (infinite where absent).
#[derive(Clone, Debug, PartialEq)]
pub struct StateInputBounds {
    pub x_lb: DVector<f64>,
    pub x_ub: DVector<f64>,
    pub u_lb: DVector<f64>,
    pub u_ub: DVector<f64>,
}

impl StateInputBounds {
    pub fn unbounded(state_dim: usize, input_dim: usize) -> Self {
        Self {
            x_lb: DVector::from_element(state_dim, f64::NEG_INFINITY),
            x_ub: DVector::from_element(state_dim, f64::INFINITY),
            u_lb: DVector::from_element(input_dim, f64::NEG_INFINITY),
            u_ub: DVector::from_element(input_dim, f64::INFINITY),
        }
    }

    /// Apply a declaration on top of `self`, returning the merged bounds.
    pub fn apply(&self, decl: &BoxConstraints) -> Result<Self, ValidationError> {
        let n = self.x_lb.len();
        let m = self.u_lb.len();
        let side = |values: &Option<Values>, current: &DVector<f64>, len: usize, what| {
            values.as_ref().map_or_else(
                || Ok(current.clone()),
                |v| v.broadcast(len, what).map(DVector::from_vec),
            )
        };
        let merged = Self {
            x_lb: side(&decl.x_lb, &self.x_lb, n, "x_lb")?,
            x_ub: side(&decl.x_ub, &self.x_ub, n, "x_ub")?,
            u_lb: side(&decl.u_lb, &self.u_lb, m, "u_lb")?,
            u_ub: side(&decl.u_ub, &self.u_ub, m, "u_ub")?,
        };
        check_interval(&merged.x_lb, &merged.x_ub)?;
        check_interval(&merged.u_lb, &merged.u_ub)?;
        Ok(merged)
    }
}

fn check_interval(lower: &DVector<f64>, upper: &DVector<f64>) -> Result<(), ValidationError> {
    for (index, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
        if lo > hi {
            return Err(ValidationError::EmptyInterval {
                index,
                lower: lo,
                upper: hi,
            });
        }
    }
    Ok(())
}

/// Box chance constraint declaration on the states.
///
/// A bound without a probability is hard (p = 1). Infinite bound entries
/// leave that component unconstrained.
#[derive(Clone, Debug, Default)]
pub struct ChanceBounds {
    pub x_lb: Option<Values>,
    pub x_lb_p: Option<Values>,
    pub x_ub: Option<Values>,
    pub x_ub_p: Option<Values>,
}

impl ChanceBounds {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lower(mut self, bound: impl Into<Values>, probability: impl Into<Values>) -> Self {
        self.x_lb = Some(bound.into());
        self.x_lb_p = Some(probability.into());
        self
    }

    #[must_use]
    pub fn upper(mut self, bound: impl Into<Values>, probability: impl Into<Values>) -> Self {
        self.x_ub = Some(bound.into());
        self.x_ub_p = Some(probability.into());
        self
    }

    /// Resolve into per-state specs for an `n`-dimensional state.
    pub fn resolve(&self, state_dim: usize) -> Result<Vec<ChanceConstraintSpec>, ValidationError> {
        let mut specs = Vec::new();
        let lower = resolve_side(
            self.x_lb.as_ref(),
            self.x_lb_p.as_ref(),
            state_dim,
            ("x_lb", "x_lb_p"),
            Direction::Lower,
            &mut specs,
        )?;
        let upper = resolve_side(
            self.x_ub.as_ref(),
            self.x_ub_p.as_ref(),
            state_dim,
            ("x_ub", "x_ub_p"),
            Direction::Upper,
            &mut specs,
        )?;
        if let (Some(lo), Some(hi)) = (lower, upper) {
            check_interval(&DVector::from_vec(lo), &DVector::from_vec(hi))?;
        }
        Ok(specs)
    }
}

fn resolve_side(
    bound: Option<&Values>,
    probability: Option<&Values>,
    state_dim: usize,
    (bound_name, p_name): (&'static str, &'static str),
    direction: Direction,
    specs: &mut Vec<ChanceConstraintSpec>,
) -> Result<Option<Vec<f64>>, ValidationError> {
    let Some(bound) = bound else {
        return match probability {
            Some(_) => Err(ValidationError::MissingBound(p_name)),
            None => Ok(None),
        };
    };
    let bounds = bound.broadcast(state_dim, bound_name)?;
    let probabilities = match probability {
        Some(p) => {
            // A per-state probability array must line up with the bound array.
            if let (Some(nb), Some(np)) = (bound.len(), p.len()) {
                if nb != np && np != 1 {
                    return Err(ValidationError::LengthMismatch {
                        what: p_name,
                        expected: nb,
                        got: np,
                    });
                }
            }
            p.broadcast(state_dim, p_name)?
        }
        None => vec![1.0; state_dim],
    };
    for (index, &p) in probabilities.iter().enumerate() {
        if !(p > 0.0 && p <= 1.0) {
            return Err(ValidationError::ProbabilityOutOfRange { index, value: p });
        }
    }
    for (state, (&b, &p)) in bounds.iter().zip(&probabilities).enumerate() {
        let unconstrained = match direction {
            Direction::Lower => b == f64::NEG_INFINITY,
            Direction::Upper => b == f64::INFINITY,
        };
        if unconstrained {
            continue;
        }
        if !b.is_finite() {
            return Err(ValidationError::NonFinite { what: bound_name });
        }
        specs.push(ChanceConstraintSpec {
            state,
            bound: b,
            probability: p,
            direction,
        });
    }
    Ok(Some(bounds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_constraints_broadcast_and_merge() {
        let bounds = StateInputBounds::unbounded(2, 1);
        let bounds = bounds
            .apply(&BoxConstraints::new().x_lb(0.0).u_ub([3.0]))
            .unwrap();
        assert_eq!(bounds.x_lb.as_slice(), &[0.0, 0.0]);
        assert_eq!(bounds.x_ub[0], f64::INFINITY);
        assert_eq!(bounds.u_ub[0], 3.0);

        let bounds = bounds.apply(&BoxConstraints::new().x_ub([1.0, 2.0])).unwrap();
        assert_eq!(bounds.x_lb.as_slice(), &[0.0, 0.0]);
        assert_eq!(bounds.x_ub.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn empty_interval_rejected() {
        let bounds = StateInputBounds::unbounded(1, 1);
        let err = bounds
            .apply(&BoxConstraints::new().u_lb(2.0).u_ub(1.0))
            .unwrap_err();
        assert!(matches!(err, ValidationError::EmptyInterval { index: 0, .. }));
    }

    #[test]
    fn chance_bounds_resolve_per_state() {
        let specs = ChanceBounds::new()
            .lower([0.0, f64::NEG_INFINITY], 0.9)
            .resolve(2)
            .unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].state, 0);
        assert_eq!(specs[0].direction, Direction::Lower);
        assert!((specs[0].probability - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_probability_means_hard_bound() {
        let decl = ChanceBounds {
            x_ub: Some(Values::from(5.0)),
            ..ChanceBounds::default()
        };
        let specs = decl.resolve(1).unwrap();
        assert!((specs[0].probability - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn probability_outside_unit_interval_rejected() {
        let err = ChanceBounds::new().lower([10.0], 2.0).resolve(1).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ProbabilityOutOfRange {
                index: 0,
                value: 2.0
            }
        );
        assert!(ChanceBounds::new().lower([10.0], 0.0).resolve(1).is_err());
    }

    #[test]
    fn mismatched_bound_and_probability_lengths_rejected() {
        let err = ChanceBounds::new()
            .lower([0.0, 0.0], [0.9, 0.9, 0.9])
            .resolve(2)
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::LengthMismatch {
                what: "x_lb_p",
                expected: 2,
                got: 3
            }
        ));
        let err = ChanceBounds::new().lower([0.0, 0.0], 0.9).resolve(3).unwrap_err();
        assert!(matches!(err, ValidationError::LengthMismatch { what: "x_lb", .. }));
    }

    #[test]
    fn probability_without_bound_rejected() {
        let decl = ChanceBounds {
            x_ub_p: Some(Values::from(0.9)),
            ..ChanceBounds::default()
        };
        assert_eq!(
            decl.resolve(1).unwrap_err(),
            ValidationError::MissingBound("x_ub_p")
        );
    }

    #[test]
    fn crossing_chance_bounds_rejected() {
        let err = ChanceBounds::new()
            .lower(2.0, 0.9)
            .upper(1.0, 0.9)
            .resolve(1)
            .unwrap_err();
        assert!(matches!(err, ValidationError::EmptyInterval { .. }));
    }
}
