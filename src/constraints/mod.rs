mod set;

pub use set::{ConstraintSet, GroupData, KnotConstraints};

use nalgebra::{DMatrix, DVector};

use crate::problem::ControlLayout;

/// General state constraint oracle. Inequalities are `c(x) <= 0`, equalities
/// `c(x) = 0`; `jacobian` fills a `dim x n` slot.
pub trait StateConstraint: Send + Sync {
    fn dim(&self) -> usize;
    fn evaluate(&self, x: &DVector<f64>, out: &mut DVector<f64>);
    fn jacobian(&self, x: &DVector<f64>, jac: &mut DMatrix<f64>);
}

/// General control constraint oracle over the plant controls (`dim x m`).
pub trait ControlConstraint: Send + Sync {
    fn dim(&self) -> usize;
    fn evaluate(&self, u: &DVector<f64>, out: &mut DVector<f64>);
    fn jacobian(&self, u: &DVector<f64>, jac: &mut DMatrix<f64>);
}

/// One constraint of the problem.
///
/// Box bounds materialize rows only for finite entries. `GoalState` pins the
/// terminal state to the objective goal. The last three variants are appended
/// by the solver for the minimum-time and infeasible-start embeddings; user
/// code normally never constructs them.
pub enum Constraint {
    /// `lower <= x <= upper`, elementwise, infinite entries skipped.
    BoxState {
        lower: DVector<f64>,
        upper: DVector<f64>,
    },
    /// `lower <= u <= upper` on the plant controls.
    BoxControl {
        lower: DVector<f64>,
        upper: DVector<f64>,
    },
    StateInequality(Box<dyn StateConstraint>),
    StateEquality(Box<dyn StateConstraint>),
    ControlInequality(Box<dyn ControlConstraint>),
    ControlEquality(Box<dyn ControlConstraint>),
    /// Terminal equality `x_N = xf`.
    GoalState,
    /// `sqrt(min_dt) <= tau <= sqrt(max_dt)` on the time-step control.
    MinTimeBound { min_dt: f64, max_dt: f64 },
    /// `tau_k - tau_{k+1} = 0`, keeping the time steps uniform. Enforced from
    /// both endpoints: each knot also carries the mirrored row against its
    /// predecessor, so every tau feels both neighbors through the one-sided
    /// per-knot Jacobians.
    MinTimeLink,
    /// Infeasible-start slack controls pinned to zero.
    InfeasibleZero,
}

/// Which of the four dual/penalty groups a constraint's rows land in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupId {
    StateIneq,
    ControlIneq,
    StateEq,
    ControlEq,
}

fn finite_rows(bound: &DVector<f64>) -> usize {
    bound.iter().filter(|b| b.is_finite()).count()
}

impl Constraint {
    pub(crate) fn group(&self) -> GroupId {
        match self {
            Constraint::BoxState { .. } | Constraint::StateInequality(_) => GroupId::StateIneq,
            Constraint::BoxControl { .. }
            | Constraint::ControlInequality(_)
            | Constraint::MinTimeBound { .. } => GroupId::ControlIneq,
            Constraint::StateEquality(_) | Constraint::GoalState => GroupId::StateEq,
            Constraint::ControlEquality(_)
            | Constraint::MinTimeLink
            | Constraint::InfeasibleZero => GroupId::ControlEq,
        }
    }

    pub(crate) fn rows(&self, layout: &ControlLayout, k: usize, n_knots: usize) -> usize {
        match self {
            Constraint::BoxState { lower, upper } | Constraint::BoxControl { lower, upper } => {
                finite_rows(upper) + finite_rows(lower)
            }
            Constraint::StateInequality(f) | Constraint::StateEquality(f) => f.dim(),
            Constraint::ControlInequality(f) | Constraint::ControlEquality(f) => f.dim(),
            Constraint::GoalState => layout.n,
            Constraint::MinTimeBound { .. } => 2,
            Constraint::MinTimeLink => {
                let forward = usize::from(k + 2 < n_knots);
                let backward = usize::from(k >= 1 && k + 1 < n_knots);
                forward + backward
            }
            Constraint::InfeasibleZero => layout.n,
        }
    }

    /// Whether this constraint has rows at knot `k` of `n_knots`.
    pub(crate) fn applies_at(&self, k: usize, n_knots: usize, foh: bool) -> bool {
        let last = n_knots - 1;
        match self {
            // The first state is pinned to x0; constraining it is pointless
            // (and unfixable when violated).
            Constraint::BoxState { .. }
            | Constraint::StateInequality(_)
            | Constraint::StateEquality(_) => k >= 1,
            Constraint::BoxControl { .. }
            | Constraint::ControlInequality(_)
            | Constraint::ControlEquality(_) => {
                if foh {
                    true
                } else {
                    k < last
                }
            }
            Constraint::GoalState => k == last,
            Constraint::MinTimeBound { .. } | Constraint::InfeasibleZero => k < last,
            Constraint::MinTimeLink => n_knots >= 3 && k < last,
        }
    }
}
