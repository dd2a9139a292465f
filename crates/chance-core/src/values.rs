//! Scalar-or-array arguments for declaration calls.
//!
//! A [`Values`] is either a single number applied to every slot or one number
//! per slot. Broadcasting against the target length is checked when the
//! declaration is made, never later.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A scalar or per-element array of `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Values {
    Scalar(f64),
    Array(Vec<f64>),
}

impl Values {
    /// Number of elements when given explicitly, `None` for a scalar.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Scalar(_) => None,
            Self::Array(v) => Some(v.len()),
        }
    }

    /// Whether this is an explicitly empty array.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Array(v) if v.is_empty())
    }

    /// Expand to exactly `n` elements.
    ///
    /// A scalar is repeated, a one-element array is repeated, any other array
    /// must already have length `n`.
    pub fn broadcast(&self, n: usize, what: &'static str) -> Result<Vec<f64>, ValidationError> {
        let out = match self {
            Self::Scalar(v) => vec![*v; n],
            Self::Array(v) if v.len() == n => v.clone(),
            Self::Array(v) if v.len() == 1 => vec![v[0]; n],
            Self::Array(v) => {
                return Err(ValidationError::LengthMismatch {
                    what,
                    expected: n,
                    got: v.len(),
                });
            }
        };
        if out.iter().any(|v| v.is_nan()) {
            return Err(ValidationError::NonFinite { what });
        }
        Ok(out)
    }
}

impl From<f64> for Values {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<i32> for Values {
    fn from(v: i32) -> Self {
        Self::Scalar(f64::from(v))
    }
}

impl From<Vec<f64>> for Values {
    fn from(v: Vec<f64>) -> Self {
        Self::Array(v)
    }
}

impl From<&[f64]> for Values {
    fn from(v: &[f64]) -> Self {
        Self::Array(v.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for Values {
    fn from(v: [f64; N]) -> Self {
        Self::Array(v.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_broadcasts() {
        let v = Values::from(2.0);
        assert_eq!(v.broadcast(3, "w").unwrap(), vec![2.0, 2.0, 2.0]);
        assert_eq!(v.len(), None);
    }

    #[test]
    fn singleton_array_broadcasts() {
        let v = Values::from([0.9]);
        assert_eq!(v.broadcast(2, "p").unwrap(), vec![0.9, 0.9]);
    }

    #[test]
    fn mismatched_array_rejected() {
        let v = Values::from(vec![1.0, 2.0]);
        assert_eq!(
            v.broadcast(3, "x_lb"),
            Err(ValidationError::LengthMismatch {
                what: "x_lb",
                expected: 3,
                got: 2
            })
        );
    }

    #[test]
    fn nan_rejected() {
        let v = Values::from(vec![1.0, f64::NAN]);
        assert!(matches!(
            v.broadcast(2, "ref"),
            Err(ValidationError::NonFinite { what: "ref" })
        ));
    }

    #[test]
    fn infinite_bounds_allowed() {
        let v = Values::from(vec![f64::NEG_INFINITY, 0.0]);
        assert!(v.broadcast(2, "x_lb").is_ok());
    }

    #[test]
    fn deserializes_scalar_or_array() {
        #[derive(Deserialize)]
        struct Decl {
            bound: Values,
            probability: Values,
        }
        let decl: Decl = toml::from_str("bound = [10.0, -inf]\nprobability = 0.9").unwrap();
        assert_eq!(decl.bound, Values::Array(vec![10.0, f64::NEG_INFINITY]));
        assert_eq!(decl.probability, Values::Scalar(0.9));
    }
}
