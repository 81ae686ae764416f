use nalgebra::{DMatrix, DVector};

use crate::problem::ControlLayout;

/// Quadratic objective with a goal offset:
///
/// l(x, u) = 1/2 (x - xf)' Q (x - xf) + 1/2 u' R u + c
///
/// terminal 1/2 (x_N - xf)' Qf (x_N - xf). Stage contributions are scaled by
/// the interval time step; minimum time adds `r_mt * dt` per interval and
/// infeasible start adds `1/2 r_inf ||slack||^2` (unscaled, the slack is not a
/// rate).
pub struct QuadraticObjective {
    pub q: DMatrix<f64>,
    pub r: DMatrix<f64>,
    pub qf: DMatrix<f64>,
    pub xf: DVector<f64>,
    pub c: f64,
}

/// Quadratic expansion of one zero-order-hold stage, time scaling folded in.
/// Control blocks span the full augmented control.
pub struct StageExpansion {
    pub lx: DVector<f64>,
    pub lu: DVector<f64>,
    pub lxx: DMatrix<f64>,
    pub luu: DMatrix<f64>,
    pub lux: DMatrix<f64>,
}

impl StageExpansion {
    pub fn zeros(n: usize, mm: usize) -> StageExpansion {
        StageExpansion {
            lx: DVector::zeros(n),
            lu: DVector::zeros(mm),
            lxx: DMatrix::zeros(n, n),
            luu: DMatrix::zeros(mm, mm),
            lux: DMatrix::zeros(mm, n),
        }
    }
}

/// Quadratic expansion of one first-order-hold interval in the variables
/// (x_k, u_k, u_{k+1}); `v` blocks refer to the next knot's control.
pub struct IntervalExpansion {
    pub lx: DVector<f64>,
    pub lu: DVector<f64>,
    pub lv: DVector<f64>,
    pub lxx: DMatrix<f64>,
    pub luu: DMatrix<f64>,
    pub lvv: DMatrix<f64>,
    pub lux: DMatrix<f64>,
    pub lvx: DMatrix<f64>,
    pub lvu: DMatrix<f64>,
}

impl IntervalExpansion {
    pub fn zeros(n: usize, mm: usize) -> IntervalExpansion {
        IntervalExpansion {
            lx: DVector::zeros(n),
            lu: DVector::zeros(mm),
            lv: DVector::zeros(mm),
            lxx: DMatrix::zeros(n, n),
            luu: DMatrix::zeros(mm, mm),
            lvv: DMatrix::zeros(mm, mm),
            lux: DMatrix::zeros(mm, n),
            lvx: DMatrix::zeros(mm, n),
            lvu: DMatrix::zeros(mm, mm),
        }
    }
}

/// Dynamics linearizations an interval expansion chains through: continuous
/// Jacobians at both endpoints and the discrete `(A, B, C)` of the step.
pub struct IntervalJacobians<'a> {
    pub ac0: &'a DMatrix<f64>,
    pub bc0: &'a DMatrix<f64>,
    pub ac1: &'a DMatrix<f64>,
    pub bc1: &'a DMatrix<f64>,
    pub a: &'a DMatrix<f64>,
    pub b: &'a DMatrix<f64>,
    pub c: &'a DMatrix<f64>,
}

impl QuadraticObjective {
    pub fn new(
        q: DMatrix<f64>,
        r: DMatrix<f64>,
        qf: DMatrix<f64>,
        xf: DVector<f64>,
    ) -> QuadraticObjective {
        QuadraticObjective {
            q,
            r,
            qf,
            xf,
            c: 0.0,
        }
    }

    /// Unscaled running cost at one point, plant controls only.
    pub fn stage(&self, x: &DVector<f64>, u_plant: &DVector<f64>) -> f64 {
        let dx = x - &self.xf;
        0.5 * dx.dot(&(&self.q * &dx)) + 0.5 * u_plant.dot(&(&self.r * u_plant)) + self.c
    }

    pub fn terminal(&self, x: &DVector<f64>) -> f64 {
        let dx = x - &self.xf;
        0.5 * dx.dot(&(&self.qf * &dx))
    }

    /// Cost of one zero-order-hold interval including embedding terms.
    pub fn stage_cost_zoh(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
        layout: &ControlLayout,
        r_min_time: f64,
        r_infeasible: f64,
    ) -> f64 {
        let up = layout.plant_of(u);
        let mut cost = (self.stage(x, &up) + if layout.min_time { r_min_time } else { 0.0 }) * dt;
        if let Some(range) = layout.slack_range() {
            let slack = u.rows(range.start, range.len());
            cost += 0.5 * r_infeasible * slack.norm_squared();
        }
        cost
    }

    /// Cost of one first-order-hold interval by Simpson's rule.
    #[allow(clippy::too_many_arguments)]
    pub fn interval_cost_foh(
        &self,
        x0: &DVector<f64>,
        u0: &DVector<f64>,
        x1: &DVector<f64>,
        u1: &DVector<f64>,
        xm: &DVector<f64>,
        um: &DVector<f64>,
        dt: f64,
        layout: &ControlLayout,
        r_infeasible: f64,
    ) -> f64 {
        let up0 = layout.plant_of(u0);
        let up1 = layout.plant_of(u1);
        let mut cost =
            dt / 6.0 * (self.stage(x0, &up0) + 4.0 * self.stage(xm, um) + self.stage(x1, &up1));
        if let Some(range) = layout.slack_range() {
            let slack = u0.rows(range.start, range.len());
            cost += 0.5 * r_infeasible * slack.norm_squared();
        }
        cost
    }

    /// Expansion of one zero-order-hold stage. For minimum time the time step
    /// is a control (`dt = tau^2`), so the tau slot carries the chain-rule
    /// terms of `(l + r_mt) * tau^2`.
    pub fn expansion_zoh(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
        layout: &ControlLayout,
        r_min_time: f64,
        r_infeasible: f64,
        out: &mut StageExpansion,
    ) {
        let m = layout.m;
        let dx = x - &self.xf;
        let up = layout.plant_of(u);
        let qx = &self.q * &dx;
        let ru = &self.r * &up;

        out.lx.copy_from(&(&qx * dt));
        out.lxx.copy_from(&(&self.q * dt));
        out.lu.fill(0.0);
        out.luu.fill(0.0);
        out.lux.fill(0.0);
        out.lu.rows_mut(0, m).copy_from(&(&ru * dt));
        out.luu.view_mut((0, 0), (m, m)).copy_from(&(&self.r * dt));

        if let Some(ti) = layout.tau_index() {
            let tau = u[ti];
            let l0 = self.stage(x, &up) + r_min_time;
            out.lu[ti] = 2.0 * tau * l0;
            out.luu[(ti, ti)] = 2.0 * l0;
            for j in 0..m {
                out.luu[(ti, j)] = 2.0 * tau * ru[j];
                out.luu[(j, ti)] = 2.0 * tau * ru[j];
            }
            for j in 0..x.len() {
                out.lux[(ti, j)] = 2.0 * tau * qx[j];
            }
        }

        if let Some(range) = layout.slack_range() {
            for i in range {
                out.lu[i] = r_infeasible * u[i];
                out.luu[(i, i)] = r_infeasible;
            }
        }
    }

    pub fn terminal_expansion(&self, x: &DVector<f64>, lxx: &mut DMatrix<f64>, lx: &mut DVector<f64>) {
        let dx = x - &self.xf;
        lxx.copy_from(&self.qf);
        lx.copy_from(&(&self.qf * dx));
    }

    /// Expansion of one first-order-hold interval in (x_k, u_k, u_{k+1}).
    ///
    /// The midstate is a function of all three through the step map, so the
    /// expansion chains through `jac`. Gauss-Newton form: second derivatives
    /// of the midpoint map are dropped (exact for linear dynamics).
    #[allow(clippy::too_many_arguments)]
    pub fn expansion_foh(
        &self,
        x0: &DVector<f64>,
        u0: &DVector<f64>,
        x1: &DVector<f64>,
        u1: &DVector<f64>,
        xm: &DVector<f64>,
        um: &DVector<f64>,
        dt: f64,
        layout: &ControlLayout,
        r_infeasible: f64,
        jac: &IntervalJacobians,
        out: &mut IntervalExpansion,
    ) {
        let n = layout.n;
        let m = layout.m;
        let s = dt / 6.0;

        let up0 = layout.plant_of(u0);
        let up1 = layout.plant_of(u1);
        let e0 = &self.q * (x0 - &self.xf);
        let em = &self.q * (xm - &self.xf);
        let e1 = &self.q * (x1 - &self.xf);
        let g0 = &self.r * &up0;
        let gm = &self.r * um;
        let g1 = &self.r * &up1;

        // w = 1/2 I - dt/8 Ac1; midstate sensitivities chain through it.
        let mut w = jac.ac1 * (-dt / 8.0);
        for i in 0..n {
            w[(i, i)] += 0.5;
        }
        let mut xmx = &w * jac.a + jac.ac0 * (dt / 8.0);
        for i in 0..n {
            xmx[(i, i)] += 0.5;
        }
        let mut xmu = &w * jac.b;
        {
            let mut block = xmu.view_mut((0, 0), (n, m));
            block += jac.bc0 * (dt / 8.0);
        }
        let mut xmv = &w * jac.c;
        {
            let mut block = xmv.view_mut((0, 0), (n, m));
            block += jac.bc1 * (-dt / 8.0);
        }

        // Gradients.
        out.lx.copy_from(&((&e0 + xmx.transpose() * &em * 4.0 + jac.a.transpose() * &e1) * s));

        out.lu.copy_from(&((xmu.transpose() * &em * 4.0 + jac.b.transpose() * &e1) * s));
        {
            let mut plant = out.lu.rows_mut(0, m);
            plant += (&g0 + &gm * 2.0) * s;
        }

        out.lv.copy_from(&((xmv.transpose() * &em * 4.0 + jac.c.transpose() * &e1) * s));
        {
            let mut plant = out.lv.rows_mut(0, m);
            plant += (&g1 + &gm * 2.0) * s;
        }

        // Gauss-Newton Hessian blocks.
        let qxmx = &self.q * &xmx;
        let qxmu = &self.q * &xmu;
        let qxmv = &self.q * &xmv;
        let qa = &self.q * jac.a;
        let qb = &self.q * jac.b;
        let qc = &self.q * jac.c;

        out.lxx
            .copy_from(&((&self.q + xmx.transpose() * &qxmx * 4.0 + jac.a.transpose() * &qa) * s));

        out.luu
            .copy_from(&((xmu.transpose() * &qxmu * 4.0 + jac.b.transpose() * &qb) * s));
        {
            let mut plant = out.luu.view_mut((0, 0), (m, m));
            plant += &self.r * (2.0 * s);
        }

        out.lvv
            .copy_from(&((xmv.transpose() * &qxmv * 4.0 + jac.c.transpose() * &qc) * s));
        {
            let mut plant = out.lvv.view_mut((0, 0), (m, m));
            plant += &self.r * (2.0 * s);
        }

        out.lux
            .copy_from(&((xmu.transpose() * &qxmx * 4.0 + jac.b.transpose() * &qa) * s));
        out.lvx
            .copy_from(&((xmv.transpose() * &qxmx * 4.0 + jac.c.transpose() * &qa) * s));
        out.lvu
            .copy_from(&((xmv.transpose() * &qxmu * 4.0 + jac.c.transpose() * &qb) * s));
        {
            let mut plant = out.lvu.view_mut((0, 0), (m, m));
            plant += &self.r * s;
        }

        if let Some(range) = layout.slack_range() {
            for i in range {
                out.lu[i] += r_infeasible * u0[i];
                out.luu[(i, i)] += r_infeasible;
            }
        }
    }
}
