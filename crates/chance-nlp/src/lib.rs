//! Nonlinear programming interface and the default SQP solver.
//!
//! Problems are stated as
//!
//! ```text
//! min  f(z)
//! s.t. h(z) = 0
//!      g(z) ≤ 0
//!      lb ≤ z ≤ ub
//! ```
//!
//! through the [`NlpProblem`] trait. Any [`NlpSolver`] can be plugged into the
//! controller; [`SqpSolver`] linearizes the constraints at each iterate and
//! solves the resulting convex QP with Clarabel (pure Rust interior point),
//! globalized by an ℓ₁ merit line search.

pub mod problem;
pub mod qp;
pub mod sqp;

pub use problem::{NlpProblem, NlpSolution, NlpSolver};
pub use sqp::SqpSolver;
