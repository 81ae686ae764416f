mod backward;
mod forward;
mod options;
mod outer;
mod stats;

pub use options::{OuterLoopUpdate, SolverOptions};
pub use stats::{SolverStats, Termination};

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::{debug, warn};

use crate::constraints::{Constraint, ConstraintSet};
use crate::models::{ControlIntegration, Discretizer};
use crate::objective::{IntervalExpansion, QuadraticObjective, StageExpansion};
use crate::problem::{ControlLayout, Problem};
use crate::trajectory::Trajectory;
use crate::utils::linear_interpolation;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("unsupported configuration: {0}")]
    Unsupported(&'static str),
}

/// Result of a solve: states, plant controls (augmented columns stripped) and
/// the per-interval time steps, plus the solve statistics.
pub struct Solution {
    pub x: Vec<DVector<f64>>,
    pub u: Vec<DVector<f64>>,
    pub dt: Vec<f64>,
    pub stats: SolverStats,
}

impl Solution {
    pub fn total_time(&self) -> f64 {
        self.dt.iter().sum()
    }
}

pub(crate) enum InnerOutcome {
    Converged,
    IterationCap,
    Stalled,
}

pub(crate) enum LineSearch {
    Accepted { dj: f64 },
    Rejected,
}

/// AL-iLQR solver. Owns every buffer it needs; nothing is allocated after
/// construction except inside nalgebra expression temporaries.
pub struct Solver {
    pub(crate) disc: Discretizer,
    pub(crate) objective: QuadraticObjective,
    pub(crate) opts: SolverOptions,
    pub(crate) layout: ControlLayout,
    pub(crate) x0: DVector<f64>,
    pub(crate) n_knots: usize,

    pub(crate) traj: Trajectory,
    pub(crate) cand: Trajectory,
    pub(crate) constraints: ConstraintSet,

    // dynamics linearization per interval
    pub(crate) a_jac: Vec<DMatrix<f64>>,
    pub(crate) b_jac: Vec<DMatrix<f64>>,
    pub(crate) c_jac: Vec<DMatrix<f64>>,

    // cost expansions
    pub(crate) stage_exp: Vec<StageExpansion>,
    pub(crate) interval_exp: Vec<IntervalExpansion>,
    pub(crate) term_lxx: DMatrix<f64>,
    pub(crate) term_lx: DVector<f64>,

    // gains: entry k produces the update of u_k
    pub(crate) k_gain: Vec<DMatrix<f64>>,
    pub(crate) b_gain: Vec<DMatrix<f64>>,
    pub(crate) d_gain: Vec<DVector<f64>>,
    pub(crate) dv1: f64,
    pub(crate) dv2: f64,

    pub(crate) rho: f64,
    pub(crate) drho: f64,
    pub(crate) rho_warned: bool,

    /// Integration-step clamp under minimum time (sqrt of the dt bounds).
    /// Only the dt fed to the integrator is clamped; the stored control keeps
    /// its excursions so the bound inequality is enforced by the duals.
    pub(crate) min_tau: f64,
    pub(crate) max_tau: f64,

    pub(crate) j_current: f64,
    pub(crate) stats: SolverStats,
    stop: Option<Box<dyn Fn() -> bool + Send + Sync>>,
}

impl std::fmt::Debug for Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver").finish_non_exhaustive()
    }
}

impl Solver {
    pub fn new(problem: Problem, opts: SolverOptions) -> Result<Solver, SolverError> {
        let n = problem.model.state_dim();
        let m = problem.model.control_dim();
        let n_knots = problem.n_knots;
        validate(&problem, &opts, n, m)?;

        let layout = ControlLayout {
            n,
            m,
            min_time: opts.minimum_time,
            infeasible: opts.infeasible,
        };
        let mm = layout.mm();
        let foh = opts.control_integration == ControlIntegration::Foh;

        let mut dt0 = problem.tf / (n_knots - 1) as f64;
        if opts.minimum_time {
            dt0 = dt0.clamp(problem.min_dt, problem.max_dt);
        }

        let Problem {
            model,
            objective,
            mut constraints,
            x0,
            initial_controls,
            initial_states,
            min_dt,
            max_dt,
            ..
        } = problem;
        let disc = Discretizer::new(model);

        let mut traj = Trajectory::zeros(n, mm, m, n_knots);
        traj.x[0].copy_from(&x0);
        for k in 0..n_knots {
            if let Some(u0) = &initial_controls {
                if k < u0.len() {
                    traj.u[k].rows_mut(0, m).copy_from(&u0[k]);
                }
            }
            if let Some(ti) = layout.tau_index() {
                traj.u[k][ti] = dt0.sqrt();
            }
        }
        for k in 0..n_knots - 1 {
            traj.dt[k] = dt0;
        }

        if opts.minimum_time {
            constraints.push(Constraint::MinTimeBound { min_dt, max_dt });
            constraints.push(Constraint::MinTimeLink);
        }
        if opts.infeasible {
            constraints.push(Constraint::InfeasibleZero);
        }
        let constraints = ConstraintSet::new(
            constraints,
            layout,
            n_knots,
            objective.xf.clone(),
            opts.penalty_initial,
            foh,
        );

        let mut solver = Solver {
            disc,
            objective,
            layout,
            x0,
            n_knots,
            cand: Trajectory::zeros(n, mm, m, n_knots),
            constraints,
            a_jac: Vec::new(),
            b_jac: Vec::new(),
            c_jac: Vec::new(),
            stage_exp: Vec::new(),
            interval_exp: Vec::new(),
            term_lxx: DMatrix::zeros(n, n),
            term_lx: DVector::zeros(n),
            k_gain: Vec::new(),
            b_gain: Vec::new(),
            d_gain: Vec::new(),
            dv1: 0.0,
            dv2: 0.0,
            rho: opts.rho_initial.max(opts.rho_min),
            drho: 1.0,
            rho_warned: false,
            min_tau: min_dt.max(f64::MIN_POSITIVE).sqrt(),
            max_tau: max_dt.sqrt(),
            j_current: f64::INFINITY,
            stats: SolverStats::default(),
            stop: None,
            opts,
            traj,
        };
        solver.allocate_buffers();

        if solver.layout.infeasible {
            solver.seed_infeasible_start(initial_states);
        }
        Ok(solver)
    }

    fn allocate_buffers(&mut self) {
        let n = self.layout.n;
        let mm = self.layout.mm();
        let intervals = self.n_knots - 1;
        let foh = self.foh();
        self.a_jac = vec![DMatrix::zeros(n, n); intervals];
        self.b_jac = vec![DMatrix::zeros(n, mm); intervals];
        self.c_jac = if foh {
            vec![DMatrix::zeros(n, mm); intervals]
        } else {
            Vec::new()
        };
        self.stage_exp = if foh {
            Vec::new()
        } else {
            (0..intervals).map(|_| StageExpansion::zeros(n, mm)).collect()
        };
        self.interval_exp = if foh {
            (0..intervals)
                .map(|_| IntervalExpansion::zeros(n, mm))
                .collect()
        } else {
            Vec::new()
        };
        self.k_gain = vec![DMatrix::zeros(mm, n); self.n_knots];
        self.b_gain = vec![DMatrix::zeros(mm, mm); self.n_knots];
        self.d_gain = vec![DVector::zeros(mm); self.n_knots];
    }

    pub(crate) fn foh(&self) -> bool {
        self.opts.control_integration == ControlIntegration::Foh
    }

    /// Index range of controls the backward pass produces gains for.
    pub(crate) fn active_controls(&self) -> usize {
        if self.foh() {
            self.n_knots
        } else {
            self.n_knots - 1
        }
    }

    /// Seed the state trajectory directly and back out the slack controls so
    /// the discrete dynamics hold exactly from the first rollout.
    fn seed_infeasible_start(&mut self, initial_states: Option<Vec<DVector<f64>>>) {
        let states = initial_states
            .unwrap_or_else(|| linear_interpolation(&self.x0, &self.objective.xf, self.n_knots));
        for (xk, seed) in self.traj.x.iter_mut().zip(&states) {
            xk.copy_from(seed);
        }
        let range = self.layout.slack_range().expect("infeasible layout");
        let foh = self.foh();
        for k in 0..self.n_knots - 1 {
            let up = self.layout.plant_of(&self.traj.u[k]);
            let dt = self.traj.dt[k];
            let step = if foh {
                let vp = self.layout.plant_of(&self.traj.u[k + 1]);
                self.disc.step_foh(&self.traj.x[k], &up, &vp, dt)
            } else {
                self.disc.step_zoh(&self.traj.x[k], &up, dt)
            };
            let slack = &states[k + 1] - step;
            self.traj.u[k]
                .rows_mut(range.start, range.len())
                .copy_from(&slack);
        }
    }

    pub fn set_stop_signal<F>(&mut self, stop: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.stop = Some(Box::new(stop));
    }

    pub fn options(&self) -> &SolverOptions {
        &self.opts
    }

    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }

    pub fn solve(&mut self) -> Solution {
        self.stats.reset();
        let termination = if self.initialize() {
            let mut termination = self.run_outer(self.opts.iterations);
            if termination == Termination::Converged && self.layout.infeasible {
                self.go_feasible();
                let budget = self.opts.iterations.max(self.stats.outer_iterations + 1);
                termination = self.run_outer(budget);
            }
            termination
        } else {
            // nothing the line search could ever accept grows out of a
            // diverged seed; report honestly instead of iterating
            warn!("initial rollout diverged; returning without iterating");
            Termination::IterationCap
        };

        self.stats.termination = termination;
        self.stats.converged = termination == Termination::Converged;
        self.stats.cost = self.j_current;
        self.stats.c_max = self.constraints.max_violation();

        let m = self.layout.m;
        let n_controls = self.active_controls();
        Solution {
            x: self.traj.x.clone(),
            u: (0..n_controls)
                .map(|k| self.traj.u[k].rows(0, m).into_owned())
                .collect(),
            dt: self.traj.dt.clone(),
            stats: self.stats.clone(),
        }
    }

    fn initialize(&mut self) -> bool {
        self.rho = self.opts.rho_initial.max(self.opts.rho_min);
        self.drho = 1.0;
        self.rho_warned = false;
        let ok = self.rollout_accepted();
        self.constraints.evaluate_all(&self.traj);
        self.constraints
            .update_active_set(self.opts.active_constraint_tolerance);
        self.constraints.record_initial_violations();
        self.j_current = self.objective_cost(&self.traj) + self.constraints.al_cost();
        ok
    }

    fn run_outer(&mut self, budget: usize) -> Termination {
        loop {
            self.stats.outer_iterations += 1;
            let far = self.constraints.max_violation() > self.opts.constraint_tolerance_intermediate;
            let (cost_tol, grad_tol) = if far {
                (
                    self.opts.cost_tolerance_intermediate,
                    self.opts.gradient_norm_tolerance_intermediate,
                )
            } else {
                (self.opts.cost_tolerance, self.opts.gradient_norm_tolerance)
            };

            let inner = self.inner_solve(cost_tol, grad_tol);
            if matches!(inner, InnerOutcome::Stalled) {
                warn!("inner solver stalled on indefinite curvature; updating duals anyway");
            }

            let c_max = self.constraints.max_violation();
            let mu_max = self.constraints.max_penalty();
            self.stats.cost_history.push(self.j_current);
            self.stats.c_max_history.push(c_max);
            self.stats.penalty_history.push(mu_max);
            if self.opts.verbose {
                println!(
                    "outer {:3} : cost = {:12.5}, c_max = {:9.3e}, mu_max = {:8.2e}, rho = {:8.2e}",
                    self.stats.outer_iterations, self.j_current, c_max, mu_max, self.rho
                );
            }

            if c_max < self.opts.constraint_tolerance {
                return Termination::Converged;
            }
            if let Some(stop) = &self.stop {
                if stop() {
                    return Termination::Stopped;
                }
            }
            if self.opts.kickout_max_penalty && mu_max >= self.opts.penalty_max {
                return Termination::MaxPenalty;
            }
            if self.stats.outer_iterations >= budget {
                return Termination::IterationCap;
            }

            self.update_duals_and_penalties();
            self.constraints
                .update_active_set(self.opts.active_constraint_tolerance);
            self.j_current = self.objective_cost(&self.traj) + self.constraints.al_cost();
        }
    }

    fn inner_solve(&mut self, cost_tol: f64, grad_tol: f64) -> InnerOutcome {
        for _ in 0..self.opts.iterations_inner {
            self.stats.inner_iterations += 1;
            self.update_jacobians();
            self.update_expansions();
            self.constraints.jacobian_all(&self.traj);

            let mut retries = 0;
            while !self.backward_pass() {
                self.increase_regularization();
                retries += 1;
                if retries > self.opts.backward_pass_retries {
                    debug!("backward pass stalled on indefinite curvature");
                    return InnerOutcome::Stalled;
                }
            }

            match self.forward_pass() {
                LineSearch::Accepted { dj } => {
                    self.decrease_regularization();
                    let grad = self.gradient_norm();
                    debug!(
                        cost = self.j_current,
                        dj, grad, "step accepted"
                    );
                    if dj.abs() < cost_tol || grad < grad_tol {
                        return InnerOutcome::Converged;
                    }
                }
                LineSearch::Rejected => {
                    self.increase_regularization();
                    // the shadow trajectory was rejected; restore constraint
                    // values for the accepted one
                    self.constraints.evaluate_all(&self.traj);
                    self.constraints
                        .update_active_set(self.opts.active_constraint_tolerance);
                    debug!(rho = self.rho, "line search rejected every step");
                }
            }
        }
        InnerOutcome::IterationCap
    }

    /// Average feedforward magnitude relative to the current controls.
    pub(crate) fn gradient_norm(&self) -> f64 {
        let count = self.active_controls();
        let mut total = 0.0;
        for k in 0..count {
            let mut worst = 0.0f64;
            for j in 0..self.d_gain[k].len() {
                worst = worst.max(self.d_gain[k][j].abs() / (self.traj.u[k][j].abs() + 1.0));
            }
            total += worst;
        }
        total / count as f64
    }

    /// Drop the infeasible-start slack controls and hand the (now dynamically
    /// consistent) trajectory back to the outer loop.
    fn go_feasible(&mut self) {
        if self.opts.verbose {
            println!("slack controls converged; dropping them and re-projecting");
        }
        let layout = ControlLayout {
            infeasible: false,
            ..self.layout
        };
        let mm = layout.mm();
        for u in self.traj.u.iter_mut().chain(self.cand.u.iter_mut()) {
            *u = u.rows(0, mm).into_owned();
        }
        self.layout = layout;
        self.constraints.strip_infeasible(layout);
        self.allocate_buffers();

        if !self.rollout_accepted() {
            warn!("rollout diverged after dropping slack controls");
        }
        self.constraints.evaluate_all(&self.traj);
        self.constraints
            .update_active_set(self.opts.active_constraint_tolerance);
        self.j_current = self.objective_cost(&self.traj) + self.constraints.al_cost();
    }
}

fn validate(problem: &Problem, opts: &SolverOptions, n: usize, m: usize) -> Result<(), SolverError> {
    let mismatch = |what: &str| Err(SolverError::DimensionMismatch(what.to_string()));
    if problem.n_knots < 2 {
        return mismatch("at least two knot points are required");
    }
    if problem.x0.len() != n {
        return mismatch("x0 length does not match the model state dimension");
    }
    let obj = &problem.objective;
    if obj.q.nrows() != n || obj.q.ncols() != n {
        return mismatch("Q must be n x n");
    }
    if obj.r.nrows() != m || obj.r.ncols() != m {
        return mismatch("R must be m x m");
    }
    if obj.qf.nrows() != n || obj.qf.ncols() != n {
        return mismatch("Qf must be n x n");
    }
    if obj.xf.len() != n {
        return mismatch("goal state length does not match the state dimension");
    }
    if !(problem.tf > 0.0) {
        return mismatch("final time must be positive");
    }
    if let Some(u0) = &problem.initial_controls {
        if u0.len() + 1 != problem.n_knots && u0.len() != problem.n_knots {
            return mismatch("initial controls must cover every interval");
        }
        if u0.iter().any(|u| u.len() != m) {
            return mismatch("initial control width does not match the model");
        }
    }
    if let Some(xs) = &problem.initial_states {
        if xs.len() != problem.n_knots || xs.iter().any(|x| x.len() != n) {
            return mismatch("initial states must be N vectors of state dimension");
        }
    }
    if opts.minimum_time {
        if !(problem.min_dt > 0.0 && problem.min_dt < problem.max_dt) {
            return mismatch("minimum time requires 0 < min_dt < max_dt");
        }
        if opts.control_integration == ControlIntegration::Foh {
            return Err(SolverError::Unsupported(
                "minimum time with first-order hold",
            ));
        }
    }
    Ok(())
}
