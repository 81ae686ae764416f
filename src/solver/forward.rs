use tracing::trace;

use crate::models::{simpson_midpoint, Discretizer};
use crate::problem::ControlLayout;
use crate::solver::{LineSearch, Solver};
use crate::trajectory::Trajectory;

impl Solver {
    /// Integrate the accepted trajectory in place from `x0` with its own
    /// controls. Returns false if any state or control magnitude blows past
    /// the divergence limits.
    pub(crate) fn rollout_accepted(&mut self) -> bool {
        self.traj.x[0].copy_from(&self.x0);
        for k in 0..self.n_knots - 1 {
            if let Some(ti) = self.layout.tau_index() {
                // the bound itself is an AL inequality; the clamp only keeps
                // the integration step wellformed and never touches the
                // stored control
                let tau = self.traj.u[k][ti].clamp(self.min_tau, self.max_tau);
                self.traj.dt[k] = tau * tau;
            }
            let dt = self.traj.dt[k];
            let up = self.layout.plant_of(&self.traj.u[k]);
            let mut next = if self.foh() {
                let vp = self.layout.plant_of(&self.traj.u[k + 1]);
                self.disc.step_foh(&self.traj.x[k], &up, &vp, dt)
            } else {
                self.disc.step_zoh(&self.traj.x[k], &up, dt)
            };
            if let Some(range) = self.layout.slack_range() {
                next += self.traj.u[k].rows(range.start, range.len());
            }
            if !within_limits(&next, self.opts.max_state_value)
                || !within_limits(&self.traj.u[k], self.opts.max_control_value)
            {
                return false;
            }
            self.traj.x[k + 1].copy_from(&next);
        }
        if self.foh() {
            refresh_foh_aux(&self.disc, &self.layout, &mut self.traj);
        }
        true
    }

    /// Roll out the shadow trajectory under the current gains at step size
    /// `alpha`, then refresh its constraint values and active set.
    pub(crate) fn rollout_candidate(&mut self, alpha: f64) -> bool {
        let ok = if self.foh() {
            self.rollout_candidate_foh(alpha)
        } else {
            self.rollout_candidate_zoh(alpha)
        };
        if !ok {
            return false;
        }
        if self.foh() {
            refresh_foh_aux(&self.disc, &self.layout, &mut self.cand);
        }
        self.constraints.evaluate_all(&self.cand);
        self.constraints
            .update_active_set(self.opts.active_constraint_tolerance);
        true
    }

    fn rollout_candidate_zoh(&mut self, alpha: f64) -> bool {
        self.cand.x[0].copy_from(&self.x0);
        for k in 0..self.n_knots - 1 {
            let dx = &self.cand.x[k] - &self.traj.x[k];
            let u_new = &self.traj.u[k] + &self.k_gain[k] * &dx + &self.d_gain[k] * alpha;
            let dt = if let Some(ti) = self.layout.tau_index() {
                let tau = u_new[ti].clamp(self.min_tau, self.max_tau);
                tau * tau
            } else {
                self.traj.dt[k]
            };
            self.cand.dt[k] = dt;
            self.cand.u[k].copy_from(&u_new);

            let up = self.layout.plant_of(&u_new);
            let mut next = self.disc.step_zoh(&self.cand.x[k], &up, dt);
            if let Some(range) = self.layout.slack_range() {
                next += u_new.rows(range.start, range.len());
            }
            if !within_limits(&next, self.opts.max_state_value)
                || !within_limits(&u_new, self.opts.max_control_value)
            {
                return false;
            }
            self.cand.x[k + 1].copy_from(&next);
        }
        let last = self.n_knots - 1;
        self.cand.u[last].copy_from(&self.traj.u[last]);
        true
    }

    /// First-order hold: the update of u_{k+1} is fed back from this knot's
    /// state deviation and the previous control update.
    fn rollout_candidate_foh(&mut self, alpha: f64) -> bool {
        self.cand.x[0].copy_from(&self.x0);
        let mut du = &self.d_gain[0] * alpha;
        self.cand.u[0].copy_from(&(&self.traj.u[0] + &du));
        if !within_limits(&self.cand.u[0], self.opts.max_control_value) {
            return false;
        }
        for k in 0..self.n_knots - 1 {
            let dx = &self.cand.x[k] - &self.traj.x[k];
            du = &self.k_gain[k + 1] * &dx + &self.b_gain[k + 1] * &du + &self.d_gain[k + 1] * alpha;
            let u_next = &self.traj.u[k + 1] + &du;
            self.cand.u[k + 1].copy_from(&u_next);
            self.cand.dt[k] = self.traj.dt[k];

            let up = self.layout.plant_of(&self.cand.u[k]);
            let vp = self.layout.plant_of(&u_next);
            let mut next = self.disc.step_foh(&self.cand.x[k], &up, &vp, self.cand.dt[k]);
            if let Some(range) = self.layout.slack_range() {
                next += self.cand.u[k].rows(range.start, range.len());
            }
            if !within_limits(&next, self.opts.max_state_value)
                || !within_limits(&u_next, self.opts.max_control_value)
            {
                return false;
            }
            self.cand.x[k + 1].copy_from(&next);
        }
        true
    }

    /// Backtracking line search over the gains from the last backward pass.
    pub(crate) fn forward_pass(&mut self) -> LineSearch {
        let j_prev = self.j_current;
        let mut alpha = 1.0;
        for _ in 0..self.opts.line_search_iterations {
            if self.rollout_candidate(alpha) {
                let j_new = self.objective_cost(&self.cand) + self.constraints.al_cost();
                let expected = -(alpha * self.dv1 + alpha * alpha * self.dv2);
                let accept = if j_new.is_finite() {
                    if expected > 1.0e-10 {
                        let z = (j_prev - j_new) / expected;
                        z > self.opts.line_search_lower && z < self.opts.line_search_upper
                    } else {
                        // flat model: the pass is at a stationary point
                        j_new <= j_prev + 1.0e-10
                    }
                } else {
                    false
                };
                trace!(alpha, j_new, expected, accept, "line search trial");
                if accept {
                    std::mem::swap(&mut self.traj, &mut self.cand);
                    self.j_current = j_new;
                    return LineSearch::Accepted { dj: j_prev - j_new };
                }
            }
            alpha *= self.opts.line_search_factor;
        }
        LineSearch::Rejected
    }

    /// Objective part of the cost (stage + embeddings + terminal); the AL
    /// terms come from the constraint set.
    pub(crate) fn objective_cost(&self, t: &Trajectory) -> f64 {
        let mut cost = 0.0;
        if self.foh() {
            for k in 0..self.n_knots - 1 {
                cost += self.objective.interval_cost_foh(
                    &t.x[k],
                    &t.u[k],
                    &t.x[k + 1],
                    &t.u[k + 1],
                    &t.xm[k],
                    &t.um[k],
                    t.dt[k],
                    &self.layout,
                    self.opts.r_infeasible,
                );
            }
        } else {
            for k in 0..self.n_knots - 1 {
                cost += self.objective.stage_cost_zoh(
                    &t.x[k],
                    &t.u[k],
                    t.dt[k],
                    &self.layout,
                    self.opts.r_minimum_time,
                    self.opts.r_infeasible,
                );
            }
        }
        cost + self.objective.terminal(&t.x[self.n_knots - 1])
    }
}

fn within_limits(v: &nalgebra::DVector<f64>, limit: f64) -> bool {
    v.iter().all(|x| x.is_finite()) && v.amax() < limit
}

fn refresh_foh_aux(disc: &Discretizer, layout: &ControlLayout, t: &mut Trajectory) {
    let n_knots = t.n_knots();
    for k in 0..n_knots {
        let up = layout.plant_of(&t.u[k]);
        t.dx[k] = disc.model().dynamics(&t.x[k], &up);
    }
    for k in 0..n_knots - 1 {
        t.xm[k] = simpson_midpoint(&t.x[k], &t.dx[k], &t.x[k + 1], &t.dx[k + 1], t.dt[k]);
        let up = layout.plant_of(&t.u[k]);
        let vp = layout.plant_of(&t.u[k + 1]);
        t.um[k] = (up + vp) * 0.5;
    }
}

#[cfg(test)]
mod tests {
    use crate::models::Dynamics;
    use crate::objective::QuadraticObjective;
    use crate::problem::Problem;
    use crate::solver::{Solver, SolverOptions};
    use nalgebra::{dvector, DMatrix, DVector};

    /// x_dot = x^2: blows up fast from a large initial state.
    struct Explosive;

    impl Dynamics for Explosive {
        fn state_dim(&self) -> usize {
            1
        }
        fn control_dim(&self) -> usize {
            1
        }
        fn dynamics(&self, x: &DVector<f64>, _u: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![x[0] * x[0]])
        }
    }

    #[test]
    fn rollout_flags_divergence() {
        let objective = QuadraticObjective::new(
            DMatrix::zeros(1, 1),
            DMatrix::from_element(1, 1, 1.0),
            DMatrix::zeros(1, 1),
            dvector![0.0],
        );
        let problem = Problem::new(Box::new(Explosive), objective, dvector![10.0], 20, 19.0);
        let mut solver = Solver::new(problem, SolverOptions::default()).unwrap();
        assert!(!solver.rollout_accepted());
        // the solve still terminates and reports honestly
        let solution = solver.solve();
        assert!(!solution.stats.converged);
        assert_eq!(solution.stats.termination, crate::solver::Termination::IterationCap);
    }
}
