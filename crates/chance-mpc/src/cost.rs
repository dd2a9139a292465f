//! Quadratic tracking costs over the mean trajectory.
//!
//! ```text
//! ℓ(x̄, ū) = Σ_i q_i (x̄_i − r_i)² + Σ_j r_j (ū_j − s_j)²
//! ℓ_N(x̄) = Σ_i q_i (x̄_i − r_i)²
//! ```

use chance_core::error::ValidationError;
use chance_core::values::Values;
use nalgebra::DVector;

/// Prefix marking a mean-state variable in cost declarations.
pub const MEAN_PREFIX: &str = "mu_";

/// One declared quadratic term.
#[derive(Debug, Clone, PartialEq)]
pub struct CostTerm {
    pub name: String,
    pub reference: f64,
    pub weight: f64,
}

/// Variable names accepted by cost declarations: one name or several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableNames(Vec<String>);

impl VariableNames {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for VariableNames {
    fn from(name: &str) -> Self {
        Self(vec![name.to_string()])
    }
}

impl From<&[&str]> for VariableNames {
    fn from(names: &[&str]) -> Self {
        Self(names.iter().map(|s| (*s).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for VariableNames {
    fn from(names: [&str; N]) -> Self {
        Self(names.iter().map(|s| (*s).to_string()).collect())
    }
}

impl From<Vec<String>> for VariableNames {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

/// Terms indexed by variable position; `None` contributes nothing.
#[derive(Debug, Clone)]
struct TermTable {
    names: Vec<String>,
    terms: Vec<Option<CostTerm>>,
}

impl TermTable {
    fn new(names: &[String]) -> Self {
        Self {
            names: names.to_vec(),
            terms: vec![None; names.len()],
        }
    }

    fn is_empty(&self) -> bool {
        self.terms.iter().all(Option::is_none)
    }

    /// Validate every entry before touching the table.
    fn declare(
        &mut self,
        names: &VariableNames,
        references: &Values,
        weights: &Values,
        resolve: impl Fn(&[String], &str) -> Option<usize>,
    ) -> Result<(), ValidationError> {
        let count = names.as_slice().len();
        let refs = references.broadcast(count, "references")?;
        let weights = weights.broadcast(count, "weights")?;

        let mut staged = Vec::with_capacity(count);
        for ((name, &reference), &weight) in names.as_slice().iter().zip(&refs).zip(&weights) {
            let index = resolve(&self.names, name)
                .ok_or_else(|| ValidationError::UnknownVariable(name.clone()))?;
            if !reference.is_finite() {
                return Err(ValidationError::NonFinite { what: "references" });
            }
            if !weight.is_finite() {
                return Err(ValidationError::NonFinite { what: "weights" });
            }
            if weight < 0.0 {
                return Err(ValidationError::NegativeWeight {
                    name: name.clone(),
                    value: weight,
                });
            }
            staged.push((
                index,
                CostTerm {
                    name: self.names[index].clone(),
                    reference,
                    weight,
                },
            ));
        }
        for (index, term) in staged {
            self.terms[index] = Some(term);
        }
        Ok(())
    }

    /// `(weights, references)` with zeros for undeclared variables.
    fn dense(&self) -> (DVector<f64>, DVector<f64>) {
        let n = self.terms.len();
        let mut q = DVector::zeros(n);
        let mut r = DVector::zeros(n);
        for (i, term) in self.terms.iter().enumerate() {
            if let Some(t) = term {
                q[i] = t.weight;
                r[i] = t.reference;
            }
        }
        (q, r)
    }

    fn terms(&self) -> impl Iterator<Item = &CostTerm> {
        self.terms.iter().flatten()
    }
}

fn resolve_state(names: &[String], name: &str) -> Option<usize> {
    names.iter().position(|s| s == name).or_else(|| {
        name.strip_prefix(MEAN_PREFIX)
            .and_then(|bare| names.iter().position(|s| s == bare))
    })
}

fn resolve_input(names: &[String], name: &str) -> Option<usize> {
    names.iter().position(|s| s == name)
}

fn quadratic(weights: &DVector<f64>, references: &DVector<f64>, v: &DVector<f64>) -> f64 {
    weights
        .iter()
        .zip(references.iter())
        .zip(v.iter())
        .map(|((q, r), x)| q * (x - r).powi(2))
        .sum()
}

/// Stage cost applied at steps 0 … N−1.
#[derive(Debug, Clone)]
pub struct QuadStageCost {
    states: TermTable,
    inputs: TermTable,
}

impl QuadStageCost {
    pub fn new(state_names: &[String], input_names: &[String]) -> Self {
        Self {
            states: TermTable::new(state_names),
            inputs: TermTable::new(input_names),
        }
    }

    /// Track mean states, named `mu_<state>` or `<state>`.
    pub fn add_states(
        &mut self,
        names: impl Into<VariableNames>,
        references: impl Into<Values>,
        weights: impl Into<Values>,
    ) -> Result<(), ValidationError> {
        self.states.declare(
            &names.into(),
            &references.into(),
            &weights.into(),
            resolve_state,
        )
    }

    /// Track inputs by name.
    pub fn add_inputs(
        &mut self,
        names: impl Into<VariableNames>,
        references: impl Into<Values>,
        weights: impl Into<Values>,
    ) -> Result<(), ValidationError> {
        self.inputs.declare(
            &names.into(),
            &references.into(),
            &weights.into(),
            resolve_input,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty() && self.inputs.is_empty()
    }

    pub fn state_terms(&self) -> impl Iterator<Item = &CostTerm> {
        self.states.terms()
    }

    pub fn input_terms(&self) -> impl Iterator<Item = &CostTerm> {
        self.inputs.terms()
    }

    /// Dense state `(weights, references)`.
    pub fn state_weights(&self) -> (DVector<f64>, DVector<f64>) {
        self.states.dense()
    }

    /// Dense input `(weights, references)`.
    pub fn input_weights(&self) -> (DVector<f64>, DVector<f64>) {
        self.inputs.dense()
    }

    pub fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        let (qx, rx) = self.states.dense();
        let (qu, ru) = self.inputs.dense();
        quadratic(&qx, &rx, x) + quadratic(&qu, &ru, u)
    }
}

/// Terminal cost applied at step N. State terms only.
#[derive(Debug, Clone)]
pub struct QuadTerminalCost {
    states: TermTable,
}

impl QuadTerminalCost {
    pub fn new(state_names: &[String]) -> Self {
        Self {
            states: TermTable::new(state_names),
        }
    }

    pub fn add_states(
        &mut self,
        names: impl Into<VariableNames>,
        references: impl Into<Values>,
        weights: impl Into<Values>,
    ) -> Result<(), ValidationError> {
        self.states.declare(
            &names.into(),
            &references.into(),
            &weights.into(),
            resolve_state,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state_terms(&self) -> impl Iterator<Item = &CostTerm> {
        self.states.terms()
    }

    pub fn state_weights(&self) -> (DVector<f64>, DVector<f64>) {
        self.states.dense()
    }

    pub fn evaluate(&self, x: &DVector<f64>) -> f64 {
        let (q, r) = self.states.dense();
        quadratic(&q, &r, x)
    }
}
