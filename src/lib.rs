//! Constrained trajectory optimization.
//!
//! An iterative LQR solver wrapped in an augmented Lagrangian outer loop:
//! the inner loop minimizes the penalized objective with a regularized
//! Riccati sweep and a backtracking line search, the outer loop performs
//! dual ascent on the constraint multipliers and schedules the penalties.
//! Minimum-time and infeasible-start problems are handled by augmenting the
//! control vector rather than by forking the solver.

pub mod constraints;
pub mod models;
pub mod objective;
pub mod problem;
pub mod solver;
pub mod trajectory;
pub mod utils;

pub use constraints::{Constraint, ControlConstraint, StateConstraint};
pub use models::{ControlIntegration, Discretizer, Dynamics};
pub use objective::QuadraticObjective;
pub use problem::Problem;
pub use solver::{Solution, Solver, SolverError, SolverOptions, SolverStats, Termination};
