use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::constraints::{Constraint, GroupId};
use crate::problem::ControlLayout;
use crate::trajectory::Trajectory;

/// Dual/penalty state of one constraint group at one knot.
///
/// `active` is a 0/1 mask; for equalities it is identically 1. The penalty
/// matrix `I_mu = diag(active .* mu)` is never materialized, the mask and `mu`
/// are combined on the fly.
pub struct GroupData {
    pub equality: bool,
    pub c: DVector<f64>,
    pub jac: DMatrix<f64>,
    pub lambda: DVector<f64>,
    pub mu: DVector<f64>,
    pub active: DVector<f64>,
    /// Row violations recorded at the previous dual update (feedback
    /// penalty scheduling compares against these).
    pub prev: DVector<f64>,
}

impl GroupData {
    fn new(rows: usize, width: usize, mu0: f64, equality: bool) -> GroupData {
        GroupData {
            equality,
            c: DVector::zeros(rows),
            jac: DMatrix::zeros(rows, width),
            lambda: DVector::zeros(rows),
            mu: DVector::from_element(rows, mu0),
            active: DVector::from_element(rows, if equality { 1.0 } else { 0.0 }),
            prev: DVector::from_element(rows, f64::INFINITY),
        }
    }

    pub fn rows(&self) -> usize {
        self.c.len()
    }

    pub fn update_active_set(&mut self, tol: f64) {
        if self.equality {
            self.active.fill(1.0);
        } else {
            for r in 0..self.rows() {
                self.active[r] = if self.c[r] > -tol || self.lambda[r] > 0.0 {
                    1.0
                } else {
                    0.0
                };
            }
        }
    }

    /// lambda' c + 1/2 c' I_mu c.
    pub fn al_cost(&self) -> f64 {
        let mut cost = 0.0;
        for r in 0..self.rows() {
            cost += self.lambda[r] * self.c[r]
                + 0.5 * self.active[r] * self.mu[r] * self.c[r] * self.c[r];
        }
        cost
    }

    /// Adds `jac' (lambda + I_mu c)` into `out`.
    pub fn add_gradient(&self, out: &mut DVector<f64>) {
        if self.rows() == 0 {
            return;
        }
        let w = DVector::from_fn(self.rows(), |r, _| {
            self.lambda[r] + self.active[r] * self.mu[r] * self.c[r]
        });
        *out += self.jac.transpose() * w;
    }

    /// Adds `jac' I_mu jac` into `out`.
    pub fn add_hessian(&self, out: &mut DMatrix<f64>) {
        if self.rows() == 0 {
            return;
        }
        let mut scaled = self.jac.clone();
        for r in 0..self.rows() {
            let w = self.active[r] * self.mu[r];
            scaled.row_mut(r).scale_mut(w);
        }
        *out += self.jac.transpose() * scaled;
    }

    fn row_violation(&self, r: usize) -> f64 {
        if self.equality {
            self.c[r].abs()
        } else {
            self.c[r].max(0.0)
        }
    }

    pub fn max_violation(&self) -> f64 {
        (0..self.rows()).fold(0.0, |acc, r| acc.max(self.row_violation(r)))
    }

    pub fn max_penalty(&self) -> f64 {
        self.mu.iter().copied().fold(0.0, f64::max)
    }

    /// Dual ascent with clamping: inequalities project onto [0, lambda_max],
    /// equalities clip to [-lambda_max, lambda_max].
    pub fn dual_update(&mut self, lambda_max: f64) {
        for r in 0..self.rows() {
            let step = self.lambda[r] + self.mu[r] * self.c[r];
            self.lambda[r] = if self.equality {
                step.clamp(-lambda_max, lambda_max)
            } else {
                step.max(0.0).min(lambda_max)
            };
        }
    }

    pub fn scale_penalties(&mut self, factor: f64, mu_max: f64) {
        for r in 0..self.rows() {
            self.mu[r] = (self.mu[r] * factor).min(mu_max);
        }
    }

    /// Per-row scheduling: rows that failed to shrink by `ratio` get the full
    /// scaling, the others the no-progress factor.
    pub fn scale_penalties_feedback(
        &mut self,
        scaling: f64,
        scaling_no: f64,
        ratio: f64,
        mu_max: f64,
    ) {
        for r in 0..self.rows() {
            let violation = self.row_violation(r);
            let factor = if violation > ratio * self.prev[r] {
                scaling
            } else {
                scaling_no
            };
            self.mu[r] = (self.mu[r] * factor).min(mu_max);
        }
    }

    pub fn record_violations(&mut self) {
        for r in 0..self.rows() {
            self.prev[r] = self.row_violation(r);
        }
    }
}

struct RowEntry {
    def: usize,
    group: GroupId,
    offset: usize,
}

/// All constraint rows at one knot, split into the four dual groups.
pub struct KnotConstraints {
    pub state_ineq: GroupData,
    pub control_ineq: GroupData,
    pub state_eq: GroupData,
    pub control_eq: GroupData,
    entries: Vec<RowEntry>,
    knot: usize,
    n_knots: usize,
}

impl KnotConstraints {
    pub fn group(&self, id: GroupId) -> &GroupData {
        match id {
            GroupId::StateIneq => &self.state_ineq,
            GroupId::ControlIneq => &self.control_ineq,
            GroupId::StateEq => &self.state_eq,
            GroupId::ControlEq => &self.control_eq,
        }
    }

    fn group_mut(&mut self, id: GroupId) -> &mut GroupData {
        match id {
            GroupId::StateIneq => &mut self.state_ineq,
            GroupId::ControlIneq => &mut self.control_ineq,
            GroupId::StateEq => &mut self.state_eq,
            GroupId::ControlEq => &mut self.control_eq,
        }
    }

    pub fn groups(&self) -> [&GroupData; 4] {
        [
            &self.state_ineq,
            &self.control_ineq,
            &self.state_eq,
            &self.control_eq,
        ]
    }

    pub fn groups_mut(&mut self) -> [&mut GroupData; 4] {
        [
            &mut self.state_ineq,
            &mut self.control_ineq,
            &mut self.state_eq,
            &mut self.control_eq,
        ]
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate(
        &mut self,
        defs: &[Constraint],
        layout: &ControlLayout,
        xf: &DVector<f64>,
        x: &DVector<f64>,
        u: &DVector<f64>,
        u_prev: Option<&DVector<f64>>,
        u_next: Option<&DVector<f64>>,
    ) {
        let (knot, n_knots) = (self.knot, self.n_knots);
        for e in 0..self.entries.len() {
            let (def, group, offset) = {
                let entry = &self.entries[e];
                (entry.def, entry.group, entry.offset)
            };
            let data = self.group_mut(group);
            match &defs[def] {
                Constraint::BoxState { lower, upper } => {
                    let mut r = offset;
                    for j in 0..upper.len() {
                        if upper[j].is_finite() {
                            data.c[r] = x[j] - upper[j];
                            r += 1;
                        }
                    }
                    for j in 0..lower.len() {
                        if lower[j].is_finite() {
                            data.c[r] = lower[j] - x[j];
                            r += 1;
                        }
                    }
                }
                Constraint::BoxControl { lower, upper } => {
                    let mut r = offset;
                    for j in 0..upper.len() {
                        if upper[j].is_finite() {
                            data.c[r] = u[j] - upper[j];
                            r += 1;
                        }
                    }
                    for j in 0..lower.len() {
                        if lower[j].is_finite() {
                            data.c[r] = lower[j] - u[j];
                            r += 1;
                        }
                    }
                }
                Constraint::StateInequality(f) | Constraint::StateEquality(f) => {
                    let dim = f.dim();
                    let mut value = DVector::zeros(dim);
                    f.evaluate(x, &mut value);
                    data.c.rows_mut(offset, dim).copy_from(&value);
                }
                Constraint::ControlInequality(f) | Constraint::ControlEquality(f) => {
                    let dim = f.dim();
                    let up = layout.plant_of(u);
                    let mut value = DVector::zeros(dim);
                    f.evaluate(&up, &mut value);
                    data.c.rows_mut(offset, dim).copy_from(&value);
                }
                Constraint::GoalState => {
                    data.c.rows_mut(offset, xf.len()).copy_from(&(x - xf));
                }
                Constraint::MinTimeBound { min_dt, max_dt } => {
                    let ti = layout.tau_index().expect("minimum-time row without tau");
                    data.c[offset] = u[ti] - max_dt.sqrt();
                    data.c[offset + 1] = min_dt.sqrt() - u[ti];
                }
                Constraint::MinTimeLink => {
                    let ti = layout.tau_index().expect("minimum-time row without tau");
                    let mut r = offset;
                    if knot + 2 < n_knots {
                        let next = u_next.expect("forward time-step link without a successor");
                        data.c[r] = u[ti] - next[ti];
                        r += 1;
                    }
                    if knot >= 1 {
                        let prev = u_prev.expect("backward time-step link without a predecessor");
                        data.c[r] = u[ti] - prev[ti];
                    }
                }
                Constraint::InfeasibleZero => {
                    let range = layout.slack_range().expect("slack rows without slack");
                    data.c
                        .rows_mut(offset, range.len())
                        .copy_from(&u.rows(range.start, range.len()));
                }
            }
        }
    }

    fn jacobian(
        &mut self,
        defs: &[Constraint],
        layout: &ControlLayout,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) {
        let (knot, n_knots) = (self.knot, self.n_knots);
        for data in self.groups_mut() {
            data.jac.fill(0.0);
        }
        for e in 0..self.entries.len() {
            let (def, group, offset) = {
                let entry = &self.entries[e];
                (entry.def, entry.group, entry.offset)
            };
            let data = self.group_mut(group);
            match &defs[def] {
                Constraint::BoxState { lower, upper }
                | Constraint::BoxControl { lower, upper } => {
                    let mut r = offset;
                    for j in 0..upper.len() {
                        if upper[j].is_finite() {
                            data.jac[(r, j)] = 1.0;
                            r += 1;
                        }
                    }
                    for j in 0..lower.len() {
                        if lower[j].is_finite() {
                            data.jac[(r, j)] = -1.0;
                            r += 1;
                        }
                    }
                }
                Constraint::StateInequality(f) | Constraint::StateEquality(f) => {
                    let dim = f.dim();
                    let mut jac = DMatrix::zeros(dim, layout.n);
                    f.jacobian(x, &mut jac);
                    data.jac
                        .view_mut((offset, 0), (dim, layout.n))
                        .copy_from(&jac);
                }
                Constraint::ControlInequality(f) | Constraint::ControlEquality(f) => {
                    let dim = f.dim();
                    let up = layout.plant_of(u);
                    let mut jac = DMatrix::zeros(dim, layout.m);
                    f.jacobian(&up, &mut jac);
                    data.jac
                        .view_mut((offset, 0), (dim, layout.m))
                        .copy_from(&jac);
                }
                Constraint::GoalState => {
                    for j in 0..layout.n {
                        data.jac[(offset + j, j)] = 1.0;
                    }
                }
                Constraint::MinTimeBound { .. } => {
                    let ti = layout.tau_index().expect("minimum-time row without tau");
                    data.jac[(offset, ti)] = 1.0;
                    data.jac[(offset + 1, ti)] = -1.0;
                }
                Constraint::MinTimeLink => {
                    // Differentiated w.r.t. this knot's tau only; the mirrored
                    // row at the neighbor carries the other side.
                    let ti = layout.tau_index().expect("minimum-time row without tau");
                    let mut r = offset;
                    if knot + 2 < n_knots {
                        data.jac[(r, ti)] = 1.0;
                        r += 1;
                    }
                    if knot >= 1 {
                        data.jac[(r, ti)] = 1.0;
                    }
                }
                Constraint::InfeasibleZero => {
                    let range = layout.slack_range().expect("slack rows without slack");
                    for (j, col) in range.enumerate() {
                        data.jac[(offset + j, col)] = 1.0;
                    }
                }
            }
        }
    }
}

/// The full constraint system: definitions plus per-(group, knot) runtime
/// state, allocated once at solver construction.
pub struct ConstraintSet {
    defs: Vec<Constraint>,
    pub knots: Vec<KnotConstraints>,
    layout: ControlLayout,
    xf: DVector<f64>,
    mu0: f64,
    foh: bool,
    prev_group_max: [f64; 4],
}

const GROUPS: [GroupId; 4] = [
    GroupId::StateIneq,
    GroupId::ControlIneq,
    GroupId::StateEq,
    GroupId::ControlEq,
];

impl ConstraintSet {
    pub fn new(
        defs: Vec<Constraint>,
        layout: ControlLayout,
        n_knots: usize,
        xf: DVector<f64>,
        mu0: f64,
        foh: bool,
    ) -> ConstraintSet {
        let knots = (0..n_knots)
            .map(|k| Self::build_knot(&defs, &layout, k, n_knots, mu0, foh))
            .collect();
        ConstraintSet {
            defs,
            knots,
            layout,
            xf,
            mu0,
            foh,
            prev_group_max: [f64::INFINITY; 4],
        }
    }

    fn build_knot(
        defs: &[Constraint],
        layout: &ControlLayout,
        k: usize,
        n_knots: usize,
        mu0: f64,
        foh: bool,
    ) -> KnotConstraints {
        let mut rows = [0usize; 4];
        let mut entries = Vec::new();
        for (i, def) in defs.iter().enumerate() {
            if !def.applies_at(k, n_knots, foh) {
                continue;
            }
            let group = def.group();
            let gi = GROUPS.iter().position(|g| *g == group).unwrap();
            entries.push(RowEntry {
                def: i,
                group,
                offset: rows[gi],
            });
            rows[gi] += def.rows(layout, k, n_knots);
        }
        let mm = layout.mm();
        KnotConstraints {
            state_ineq: GroupData::new(rows[0], layout.n, mu0, false),
            control_ineq: GroupData::new(rows[1], mm, mu0, false),
            state_eq: GroupData::new(rows[2], layout.n, mu0, true),
            control_eq: GroupData::new(rows[3], mm, mu0, true),
            entries,
            knot: k,
            n_knots,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.knots
            .iter()
            .all(|kd| kd.groups().iter().all(|g| g.rows() == 0))
    }

    pub fn evaluate_all(&mut self, traj: &Trajectory) {
        let defs = &self.defs;
        let layout = self.layout;
        let xf = &self.xf;
        let x = &traj.x;
        let u = &traj.u;
        self.knots.par_iter_mut().enumerate().for_each(|(k, kd)| {
            let u_prev = if k > 0 { u.get(k - 1) } else { None };
            kd.evaluate(defs, &layout, xf, &x[k], &u[k], u_prev, u.get(k + 1));
        });
    }

    pub fn jacobian_all(&mut self, traj: &Trajectory) {
        let defs = &self.defs;
        let layout = self.layout;
        let x = &traj.x;
        let u = &traj.u;
        self.knots.par_iter_mut().enumerate().for_each(|(k, kd)| {
            kd.jacobian(defs, &layout, &x[k], &u[k]);
        });
    }

    pub fn update_active_set(&mut self, tol: f64) {
        for kd in &mut self.knots {
            for g in kd.groups_mut() {
                g.update_active_set(tol);
            }
        }
    }

    pub fn al_cost(&self) -> f64 {
        self.knots
            .iter()
            .map(|kd| kd.groups().iter().map(|g| g.al_cost()).sum::<f64>())
            .sum()
    }

    pub fn max_violation(&self) -> f64 {
        self.group_max_violation().into_iter().fold(0.0, f64::max)
    }

    pub fn group_max_violation(&self) -> [f64; 4] {
        let mut out = [0.0f64; 4];
        for kd in &self.knots {
            for (g, data) in kd.groups().into_iter().enumerate() {
                out[g] = out[g].max(data.max_violation());
            }
        }
        out
    }

    pub fn max_penalty(&self) -> f64 {
        self.knots
            .iter()
            .flat_map(|kd| kd.groups().into_iter().map(|g| g.max_penalty()))
            .fold(0.0, f64::max)
    }

    /// Baseline the violation history on the current values so the first
    /// penalty update has something meaningful to compare against.
    pub fn record_initial_violations(&mut self) {
        for kd in &mut self.knots {
            for g in kd.groups_mut() {
                g.record_violations();
            }
        }
        self.prev_group_max = self.group_max_violation();
    }

    pub fn dual_update(&mut self, lambda_max: f64) {
        for kd in &mut self.knots {
            for g in kd.groups_mut() {
                g.dual_update(lambda_max);
            }
        }
    }

    /// Group-level penalty scheduling: a group that failed to shrink its worst
    /// violation by `ratio` gets the full scaling, the others the no-progress
    /// factor.
    pub fn penalty_update_default(
        &mut self,
        scaling: f64,
        scaling_no: f64,
        ratio: f64,
        mu_max: f64,
    ) {
        let current = self.group_max_violation();
        for (g, &cur) in current.iter().enumerate() {
            let factor = if cur > ratio * self.prev_group_max[g] {
                scaling
            } else {
                scaling_no
            };
            for kd in &mut self.knots {
                kd.groups_mut()[g].scale_penalties(factor, mu_max);
            }
        }
        self.prev_group_max = current;
    }

    /// Row-level penalty scheduling.
    pub fn penalty_update_feedback(
        &mut self,
        scaling: f64,
        scaling_no: f64,
        ratio: f64,
        mu_max: f64,
    ) {
        for kd in &mut self.knots {
            for g in kd.groups_mut() {
                g.scale_penalties_feedback(scaling, scaling_no, ratio, mu_max);
                g.record_violations();
            }
        }
        self.prev_group_max = self.group_max_violation();
    }

    /// Drops the infeasible-start slack rows and reshapes the control-side
    /// Jacobians for the reduced control vector. Surviving duals and penalties
    /// stay warm (the slack rows are the tail of the control-equality group).
    pub fn strip_infeasible(&mut self, layout: ControlLayout) {
        assert!(!layout.infeasible);
        self.defs.retain(|d| !matches!(d, Constraint::InfeasibleZero));
        self.layout = layout;
        let n_knots = self.knots.len();
        let old: Vec<KnotConstraints> = std::mem::take(&mut self.knots);
        self.knots = (0..n_knots)
            .map(|k| Self::build_knot(&self.defs, &self.layout, k, n_knots, self.mu0, self.foh))
            .collect();
        for (kd, old_kd) in self.knots.iter_mut().zip(&old) {
            for id in GROUPS {
                let rows = kd.group(id).rows();
                let src = old_kd.group(id);
                debug_assert!(rows <= src.rows());
                let dst = kd.group_mut(id);
                for r in 0..rows {
                    dst.lambda[r] = src.lambda[r];
                    dst.mu[r] = src.mu[r];
                    dst.active[r] = src.active[r];
                    dst.prev[r] = src.prev[r];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn layout() -> ControlLayout {
        ControlLayout {
            n: 2,
            m: 1,
            min_time: false,
            infeasible: false,
        }
    }

    fn simple_set(n_knots: usize) -> (ConstraintSet, Trajectory) {
        let defs = vec![
            Constraint::BoxControl {
                lower: dvector![-1.0],
                upper: dvector![1.0],
            },
            Constraint::GoalState,
        ];
        let set = ConstraintSet::new(defs, layout(), n_knots, dvector![1.0, 0.0], 1.0, false);
        let traj = Trajectory::zeros(2, 1, 1, n_knots);
        (set, traj)
    }

    #[test]
    fn box_rows_and_goal_rows_land_in_their_groups() {
        let (set, _) = simple_set(4);
        assert_eq!(set.knots[0].control_ineq.rows(), 2);
        assert_eq!(set.knots[0].state_eq.rows(), 0);
        // terminal knot: goal equality, no control rows under zoh
        assert_eq!(set.knots[3].control_ineq.rows(), 0);
        assert_eq!(set.knots[3].state_eq.rows(), 2);
    }

    #[test]
    fn one_sided_box_skips_infinite_rows() {
        let defs = vec![Constraint::BoxState {
            lower: dvector![f64::NEG_INFINITY, -2.0],
            upper: dvector![5.0, f64::INFINITY],
        }];
        let set = ConstraintSet::new(defs, layout(), 3, dvector![0.0, 0.0], 1.0, false);
        assert_eq!(set.knots[1].state_ineq.rows(), 2);
        assert_eq!(set.knots[0].state_ineq.rows(), 0); // x0 is pinned
    }

    #[test]
    fn active_set_mask_matches_definition() {
        let (mut set, mut traj) = simple_set(3);
        traj.u[0] = dvector![1.5]; // upper bound violated
        traj.u[1] = dvector![-0.5]; // strictly inside
        set.evaluate_all(&traj);
        set.update_active_set(0.0);
        let g = &set.knots[0].control_ineq;
        approx::assert_abs_diff_eq!(g.c[0], 0.5);
        approx::assert_abs_diff_eq!(g.active[0], 1.0);
        let g1 = &set.knots[1].control_ineq;
        assert!(g1.c[0] < 0.0 && g1.c[1] < 0.0);
        approx::assert_abs_diff_eq!(g1.active[0], 0.0);
        approx::assert_abs_diff_eq!(g1.active[1], 0.0);

        // a positive multiplier keeps a satisfied row active
        set.knots[1].control_ineq.lambda[0] = 0.3;
        set.update_active_set(0.0);
        approx::assert_abs_diff_eq!(set.knots[1].control_ineq.active[0], 1.0);
    }

    #[test]
    fn al_cost_matches_hand_expansion() {
        let (mut set, mut traj) = simple_set(3);
        traj.u[0] = dvector![1.5];
        set.evaluate_all(&traj);
        set.update_active_set(0.0);
        set.knots[0].control_ineq.lambda[0] = 2.0;
        // rows: [u - 1, -1 - u] = [0.5, -2.5]; active = [1, 0]
        // cost = 2.0 * 0.5 + 0.5 * 1.0 * 0.25
        approx::assert_abs_diff_eq!(set.knots[0].control_ineq.al_cost(), 1.125);
    }

    #[test]
    fn dual_update_clamps() {
        let mut g = GroupData::new(2, 1, 10.0, false);
        g.c[0] = 5.0;
        g.c[1] = -3.0;
        g.lambda[1] = 0.2;
        g.dual_update(20.0);
        approx::assert_abs_diff_eq!(g.lambda[0], 20.0); // 0 + 10*5 clipped
        approx::assert_abs_diff_eq!(g.lambda[1], 0.0); // 0.2 - 30 floored at 0

        let mut h = GroupData::new(1, 1, 4.0, true);
        h.c[0] = -9.0;
        h.lambda[0] = 1.0;
        h.dual_update(30.0);
        approx::assert_abs_diff_eq!(h.lambda[0], -30.0); // 1 - 36 clipped
    }

    #[test]
    fn penalties_are_monotone_under_default_schedule() {
        let (mut set, mut traj) = simple_set(3);
        traj.u[0] = dvector![2.0];
        set.evaluate_all(&traj);
        set.update_active_set(0.0);
        let before = set.max_penalty();
        set.penalty_update_default(10.0, 1.0, 0.25, 1.0e8);
        let mid = set.max_penalty();
        set.penalty_update_default(10.0, 1.0, 0.25, 1.0e8);
        let after = set.max_penalty();
        assert!(before <= mid && mid <= after);
        // no progress between updates: full scaling both times
        approx::assert_abs_diff_eq!(after, 100.0);
    }

    #[test]
    fn penalty_saturates_at_mu_max() {
        let mut g = GroupData::new(1, 1, 1.0, false);
        for _ in 0..20 {
            g.scale_penalties(10.0, 1.0e3);
        }
        approx::assert_abs_diff_eq!(g.max_penalty(), 1.0e3);
    }

    #[test]
    fn gradient_and_hessian_accumulate_masked_terms() {
        let mut g = GroupData::new(2, 2, 2.0, false);
        g.c = dvector![0.5, -1.0];
        g.lambda = dvector![1.0, 0.0];
        g.active = dvector![1.0, 0.0];
        g.jac = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let mut grad = DVector::zeros(2);
        g.add_gradient(&mut grad);
        // row 0: lambda + mu * c = 1 + 2*0.5 = 2; row 1 inactive: lambda = 0
        approx::assert_abs_diff_eq!(grad, dvector![2.0, 0.0]);
        let mut hess = DMatrix::zeros(2, 2);
        g.add_hessian(&mut hess);
        approx::assert_abs_diff_eq!(hess, DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 0.0]));
    }

    #[test]
    fn strip_infeasible_keeps_surviving_duals() {
        let lay = ControlLayout {
            n: 2,
            m: 1,
            min_time: false,
            infeasible: true,
        };
        let defs = vec![
            Constraint::BoxControl {
                lower: dvector![-1.0],
                upper: dvector![1.0],
            },
            Constraint::GoalState,
            Constraint::InfeasibleZero,
        ];
        let mut set = ConstraintSet::new(defs, lay, 3, dvector![1.0, 0.0], 1.0, false);
        assert_eq!(set.knots[0].control_eq.rows(), 2);
        set.knots[0].control_ineq.lambda[0] = 0.7;
        set.knots[2].state_eq.mu[1] = 50.0;
        let reduced = ControlLayout {
            infeasible: false,
            ..lay
        };
        set.strip_infeasible(reduced);
        assert_eq!(set.knots[0].control_eq.rows(), 0);
        assert_eq!(set.knots[0].control_ineq.jac.ncols(), 1);
        approx::assert_abs_diff_eq!(set.knots[0].control_ineq.lambda[0], 0.7);
        approx::assert_abs_diff_eq!(set.knots[2].state_eq.mu[1], 50.0);
    }

    #[test]
    fn min_time_rows_wire_through_tau() {
        let lay = ControlLayout {
            n: 2,
            m: 1,
            min_time: true,
            infeasible: false,
        };
        let defs = vec![
            Constraint::MinTimeBound {
                min_dt: 0.01,
                max_dt: 0.25,
            },
            Constraint::MinTimeLink,
        ];
        let mut set = ConstraintSet::new(defs, lay, 4, dvector![0.0, 0.0], 1.0, false);
        let mut traj = Trajectory::zeros(2, 2, 1, 4);
        for k in 0..4 {
            traj.u[k][1] = 0.3 + 0.1 * k as f64; // tau
        }
        set.evaluate_all(&traj);
        // knot 0: tau = 0.3, bounds sqrt(0.25) = 0.5, sqrt(0.01) = 0.1
        let b = &set.knots[0].control_ineq;
        approx::assert_abs_diff_eq!(b.c[0], -0.2, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(b.c[1], -0.2, epsilon = 1e-12);
        // links are mirrored: tau_0 - tau_1 at knot 0, both neighbors at
        // knot 1, tau_2 - tau_1 at knot 2, nothing at the terminal knot
        approx::assert_abs_diff_eq!(set.knots[0].control_eq.c[0], -0.1, epsilon = 1e-12);
        assert_eq!(set.knots[1].control_eq.rows(), 2);
        approx::assert_abs_diff_eq!(set.knots[1].control_eq.c[0], -0.1, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(set.knots[1].control_eq.c[1], 0.1, epsilon = 1e-12);
        assert_eq!(set.knots[2].control_eq.rows(), 1);
        approx::assert_abs_diff_eq!(set.knots[2].control_eq.c[0], 0.1, epsilon = 1e-12);
        assert_eq!(set.knots[3].control_eq.rows(), 0);
    }
}
