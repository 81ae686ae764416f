use nalgebra::DVector;

use crate::constraints::Constraint;
use crate::models::Dynamics;
use crate::objective::QuadraticObjective;

/// Sizing of the (possibly augmented) control vector.
///
/// The plant has `m` controls. Minimum time appends one slot holding
/// `tau = sqrt(dt)`; infeasible start appends `n` slack controls added directly
/// to the next state. Everything that indexes into a control vector goes
/// through this struct so offsets are derived in exactly one place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlLayout {
    pub n: usize,
    pub m: usize,
    pub min_time: bool,
    pub infeasible: bool,
}

impl ControlLayout {
    /// Plant controls plus the minimum-time slot.
    pub fn m_bar(&self) -> usize {
        self.m + usize::from(self.min_time)
    }

    /// Full augmented control dimension.
    pub fn mm(&self) -> usize {
        self.m_bar() + if self.infeasible { self.n } else { 0 }
    }

    pub fn tau_index(&self) -> Option<usize> {
        self.min_time.then_some(self.m)
    }

    pub fn slack_range(&self) -> Option<std::ops::Range<usize>> {
        self.infeasible.then(|| self.m_bar()..self.m_bar() + self.n)
    }

    /// The plant slice of an augmented control vector.
    pub fn plant_of(&self, u: &DVector<f64>) -> DVector<f64> {
        u.rows(0, self.m).into_owned()
    }
}

/// A trajectory optimization problem: dynamics, objective, constraints and
/// boundary data. Validated when handed to the solver.
pub struct Problem {
    pub model: Box<dyn Dynamics>,
    pub objective: QuadraticObjective,
    pub constraints: Vec<Constraint>,
    pub x0: DVector<f64>,
    /// Number of knot points (N-1 intervals).
    pub n_knots: usize,
    /// Nominal final time; the uniform initial time step is tf / (N-1).
    pub tf: f64,
    /// Per-interval plant controls used as the initial guess (zeros if absent).
    pub initial_controls: Option<Vec<DVector<f64>>>,
    /// State trajectory seed for infeasible starts (linear interpolation from
    /// x0 to the objective goal if absent).
    pub initial_states: Option<Vec<DVector<f64>>>,
    /// Bounds on the per-interval time step under minimum time.
    pub min_dt: f64,
    pub max_dt: f64,
}

impl Problem {
    pub fn new(
        model: Box<dyn Dynamics>,
        objective: QuadraticObjective,
        x0: DVector<f64>,
        n_knots: usize,
        tf: f64,
    ) -> Problem {
        Problem {
            model,
            objective,
            constraints: Vec::new(),
            x0,
            n_knots,
            tf,
            initial_controls: None,
            initial_states: None,
            min_dt: 1.0e-3,
            max_dt: 1.0,
        }
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_offsets() {
        let base = ControlLayout {
            n: 3,
            m: 2,
            min_time: false,
            infeasible: false,
        };
        assert_eq!(base.m_bar(), 2);
        assert_eq!(base.mm(), 2);
        assert_eq!(base.tau_index(), None);
        assert_eq!(base.slack_range(), None);

        let full = ControlLayout {
            n: 3,
            m: 2,
            min_time: true,
            infeasible: true,
        };
        assert_eq!(full.m_bar(), 3);
        assert_eq!(full.mm(), 6);
        assert_eq!(full.tau_index(), Some(2));
        assert_eq!(full.slack_range(), Some(3..6));
    }
}
