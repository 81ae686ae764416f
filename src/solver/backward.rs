use nalgebra::{DMatrix, DVector};
use tracing::warn;

use crate::objective::IntervalJacobians;
use crate::solver::Solver;

impl Solver {
    /// Linearize the dynamics along the accepted trajectory. The control-side
    /// Jacobian is assembled over the full augmented control: plant columns
    /// from the discretizer, the tau column via d(x+)/d(dt) * 2 tau, identity
    /// columns for the infeasible slack.
    pub(crate) fn update_jacobians(&mut self) {
        let n = self.layout.n;
        let m = self.layout.m;
        for k in 0..self.n_knots - 1 {
            let dt = self.traj.dt[k];
            let up = self.layout.plant_of(&self.traj.u[k]);
            if self.foh() {
                let vp = self.layout.plant_of(&self.traj.u[k + 1]);
                let (a, bp, cp) = self.disc.jacobians_foh(&self.traj.x[k], &up, &vp, dt);
                self.a_jac[k].copy_from(&a);
                self.b_jac[k].fill(0.0);
                self.b_jac[k].view_mut((0, 0), (n, m)).copy_from(&bp);
                self.c_jac[k].fill(0.0);
                self.c_jac[k].view_mut((0, 0), (n, m)).copy_from(&cp);
                if let Some(range) = self.layout.slack_range() {
                    for (i, col) in range.enumerate() {
                        self.b_jac[k][(i, col)] = 1.0;
                    }
                }
            } else {
                let (a, bp) = self.disc.jacobians_zoh(&self.traj.x[k], &up, dt);
                self.a_jac[k].copy_from(&a);
                self.b_jac[k].fill(0.0);
                self.b_jac[k].view_mut((0, 0), (n, m)).copy_from(&bp);
                if let Some(ti) = self.layout.tau_index() {
                    let tau = self.traj.u[k][ti];
                    let col = self.disc.dt_column_zoh(&self.traj.x[k], &up, dt) * (2.0 * tau);
                    self.b_jac[k].set_column(ti, &col);
                }
                if let Some(range) = self.layout.slack_range() {
                    for (i, col) in range.enumerate() {
                        self.b_jac[k][(i, col)] = 1.0;
                    }
                }
            }
        }
    }

    pub(crate) fn update_expansions(&mut self) {
        if self.foh() {
            for k in 0..self.n_knots - 1 {
                let up = self.layout.plant_of(&self.traj.u[k]);
                let vp = self.layout.plant_of(&self.traj.u[k + 1]);
                let ac0 = self.disc.model().jacobian_wrt_state(&self.traj.x[k], &up);
                let bc0 = self.disc.model().jacobian_wrt_input(&self.traj.x[k], &up);
                let ac1 = self.disc.model().jacobian_wrt_state(&self.traj.x[k + 1], &vp);
                let bc1 = self.disc.model().jacobian_wrt_input(&self.traj.x[k + 1], &vp);
                self.objective.expansion_foh(
                    &self.traj.x[k],
                    &self.traj.u[k],
                    &self.traj.x[k + 1],
                    &self.traj.u[k + 1],
                    &self.traj.xm[k],
                    &self.traj.um[k],
                    self.traj.dt[k],
                    &self.layout,
                    self.opts.r_infeasible,
                    &IntervalJacobians {
                        ac0: &ac0,
                        bc0: &bc0,
                        ac1: &ac1,
                        bc1: &bc1,
                        a: &self.a_jac[k],
                        b: &self.b_jac[k],
                        c: &self.c_jac[k],
                    },
                    &mut self.interval_exp[k],
                );
            }
        } else {
            for k in 0..self.n_knots - 1 {
                self.objective.expansion_zoh(
                    &self.traj.x[k],
                    &self.traj.u[k],
                    self.traj.dt[k],
                    &self.layout,
                    self.opts.r_minimum_time,
                    self.opts.r_infeasible,
                    &mut self.stage_exp[k],
                );
            }
        }
    }

    /// Riccati sweep. Returns false when the regularized control curvature is
    /// not positive definite; the caller bumps rho and retries.
    pub(crate) fn backward_pass(&mut self) -> bool {
        if self.foh() {
            self.backward_pass_foh()
        } else {
            self.backward_pass_zoh()
        }
    }

    fn backward_pass_zoh(&mut self) -> bool {
        let mm = self.layout.mm();
        let last = self.n_knots - 1;

        self.objective
            .terminal_expansion(&self.traj.x[last], &mut self.term_lxx, &mut self.term_lx);
        let mut s_xx = self.term_lxx.clone();
        let mut s_x = self.term_lx.clone();
        {
            let kd = &self.constraints.knots[last];
            kd.state_ineq.add_gradient(&mut s_x);
            kd.state_eq.add_gradient(&mut s_x);
            kd.state_ineq.add_hessian(&mut s_xx);
            kd.state_eq.add_hessian(&mut s_xx);
        }
        self.dv1 = 0.0;
        self.dv2 = 0.0;

        for k in (0..last).rev() {
            let a = &self.a_jac[k];
            let b = &self.b_jac[k];
            let exp = &self.stage_exp[k];

            let sa = &s_xx * a;
            let sb = &s_xx * b;
            let mut qx = &exp.lx + a.transpose() * &s_x;
            let mut qu = &exp.lu + b.transpose() * &s_x;
            let mut qxx = &exp.lxx + a.transpose() * &sa;
            let mut quu = &exp.luu + b.transpose() * &sb;
            let mut qux = &exp.lux + b.transpose() * &sa;

            let kd = &self.constraints.knots[k];
            kd.state_ineq.add_gradient(&mut qx);
            kd.state_eq.add_gradient(&mut qx);
            kd.state_ineq.add_hessian(&mut qxx);
            kd.state_eq.add_hessian(&mut qxx);
            kd.control_ineq.add_gradient(&mut qu);
            kd.control_eq.add_gradient(&mut qu);
            kd.control_ineq.add_hessian(&mut quu);
            kd.control_eq.add_hessian(&mut quu);

            let mut quu_reg = quu.clone();
            for i in 0..mm {
                quu_reg[(i, i)] += self.rho;
            }
            let Some(chol) = quu_reg.cholesky() else {
                return false;
            };
            let kk = -chol.solve(&qux);
            let dd = -chol.solve(&qu);

            self.dv1 += dd.dot(&qu);
            self.dv2 += 0.5 * dd.dot(&(&quu * &dd));

            // value update with the unregularized curvature
            let kt_quu = kk.transpose() * &quu;
            s_xx = qxx + &kt_quu * &kk + kk.transpose() * &qux + qux.transpose() * &kk;
            s_x = qx + &kt_quu * &dd + kk.transpose() * &qu + qux.transpose() * &dd;
            s_xx = (&s_xx + s_xx.transpose()) * 0.5;

            self.k_gain[k].copy_from(&kk);
            self.d_gain[k].copy_from(&dd);
        }
        true
    }

    /// First-order hold: Riccati over the augmented pair z_k = (x_k, u_k)
    /// with the next knot's control as the decision variable. Produces the
    /// coupled gains (K, b, d) the foh rollout consumes, plus a dedicated
    /// minimization for the first control.
    fn backward_pass_foh(&mut self) -> bool {
        let n = self.layout.n;
        let mm = self.layout.mm();
        let nz = n + mm;
        let last = self.n_knots - 1;

        self.objective
            .terminal_expansion(&self.traj.x[last], &mut self.term_lxx, &mut self.term_lx);
        let mut sb = DMatrix::zeros(nz, nz);
        let mut sv = DVector::zeros(nz);
        sb.view_mut((0, 0), (n, n)).copy_from(&self.term_lxx);
        sv.rows_mut(0, n).copy_from(&self.term_lx);
        {
            // terminal constraints: state rows on x_N, control rows on u_N
            let kd = &self.constraints.knots[last];
            let mut gx = DVector::zeros(n);
            let mut hx = DMatrix::zeros(n, n);
            kd.state_ineq.add_gradient(&mut gx);
            kd.state_eq.add_gradient(&mut gx);
            kd.state_ineq.add_hessian(&mut hx);
            kd.state_eq.add_hessian(&mut hx);
            let mut gu = DVector::zeros(mm);
            let mut hu = DMatrix::zeros(mm, mm);
            kd.control_ineq.add_gradient(&mut gu);
            kd.control_eq.add_gradient(&mut gu);
            kd.control_ineq.add_hessian(&mut hu);
            kd.control_eq.add_hessian(&mut hu);
            {
                let mut rows = sv.rows_mut(0, n);
                rows += gx;
            }
            {
                let mut rows = sv.rows_mut(n, mm);
                rows += gu;
            }
            {
                let mut block = sb.view_mut((0, 0), (n, n));
                block += hx;
            }
            {
                let mut block = sb.view_mut((n, n), (mm, mm));
                block += hu;
            }
        }
        self.dv1 = 0.0;
        self.dv2 = 0.0;

        let mut fz = DMatrix::zeros(nz, nz);
        let mut fv = DMatrix::zeros(nz, mm);
        for k in (0..last).rev() {
            let a = &self.a_jac[k];
            let b = &self.b_jac[k];
            let c = &self.c_jac[k];
            let exp = &self.interval_exp[k];

            // z+ = (fd(x, u, v), v)
            fz.fill(0.0);
            fz.view_mut((0, 0), (n, n)).copy_from(a);
            fz.view_mut((0, n), (n, mm)).copy_from(b);
            fv.fill(0.0);
            fv.view_mut((0, 0), (n, mm)).copy_from(c);
            for i in 0..mm {
                fv[(n + i, i)] = 1.0;
            }

            let mut qz = DVector::zeros(nz);
            qz.rows_mut(0, n).copy_from(&exp.lx);
            qz.rows_mut(n, mm).copy_from(&exp.lu);
            qz += fz.transpose() * &sv;
            let qv = &exp.lv + fv.transpose() * &sv;

            let sfz = &sb * &fz;
            let sfv = &sb * &fv;
            let mut qzz = DMatrix::zeros(nz, nz);
            qzz.view_mut((0, 0), (n, n)).copy_from(&exp.lxx);
            qzz.view_mut((n, 0), (mm, n)).copy_from(&exp.lux);
            qzz.view_mut((0, n), (n, mm))
                .copy_from(&exp.lux.transpose());
            qzz.view_mut((n, n), (mm, mm)).copy_from(&exp.luu);
            qzz += fz.transpose() * &sfz;
            let qvv = &exp.lvv + fv.transpose() * &sfv;
            let mut qvz = DMatrix::zeros(mm, nz);
            qvz.view_mut((0, 0), (mm, n)).copy_from(&exp.lvx);
            qvz.view_mut((0, n), (mm, mm)).copy_from(&exp.lvu);
            qvz += fv.transpose() * &sfz;

            {
                // stage constraints at knot k act on z_k
                let kd = &self.constraints.knots[k];
                let mut gx = DVector::zeros(n);
                let mut hx = DMatrix::zeros(n, n);
                kd.state_ineq.add_gradient(&mut gx);
                kd.state_eq.add_gradient(&mut gx);
                kd.state_ineq.add_hessian(&mut hx);
                kd.state_eq.add_hessian(&mut hx);
                let mut gu = DVector::zeros(mm);
                let mut hu = DMatrix::zeros(mm, mm);
                kd.control_ineq.add_gradient(&mut gu);
                kd.control_eq.add_gradient(&mut gu);
                kd.control_ineq.add_hessian(&mut hu);
                kd.control_eq.add_hessian(&mut hu);
                {
                    let mut rows = qz.rows_mut(0, n);
                    rows += gx;
                }
                {
                    let mut rows = qz.rows_mut(n, mm);
                    rows += gu;
                }
                {
                    let mut block = qzz.view_mut((0, 0), (n, n));
                    block += hx;
                }
                {
                    let mut block = qzz.view_mut((n, n), (mm, mm));
                    block += hu;
                }
            }

            let mut qvv_reg = qvv.clone();
            for i in 0..mm {
                qvv_reg[(i, i)] += self.rho;
            }
            let Some(chol) = qvv_reg.cholesky() else {
                return false;
            };
            let kv = -chol.solve(&qvz);
            let dd = -chol.solve(&qv);

            self.dv1 += dd.dot(&qv);
            self.dv2 += 0.5 * dd.dot(&(&qvv * &dd));

            let kt_qvv = kv.transpose() * &qvv;
            sb = qzz + &kt_qvv * &kv + kv.transpose() * &qvz + qvz.transpose() * &kv;
            sv = qz + &kt_qvv * &dd + kv.transpose() * &qv + qvz.transpose() * &dd;
            sb = (&sb + sb.transpose()) * 0.5;

            self.k_gain[k + 1].copy_from(&kv.columns(0, n));
            self.b_gain[k + 1].copy_from(&kv.columns(n, mm));
            self.d_gain[k + 1].copy_from(&dd);
        }

        // u_0 minimizes the remaining augmented value function (x_0 is fixed)
        let suu = sb.view((n, n), (mm, mm)).into_owned();
        let sux = sb.view((n, 0), (mm, n)).into_owned();
        let su = sv.rows(n, mm).into_owned();
        let mut suu_reg = suu.clone();
        for i in 0..mm {
            suu_reg[(i, i)] += self.rho;
        }
        let Some(chol) = suu_reg.cholesky() else {
            return false;
        };
        let k0 = -chol.solve(&sux);
        let d0 = -chol.solve(&su);
        self.dv1 += d0.dot(&su);
        self.dv2 += 0.5 * d0.dot(&(&suu * &d0));
        self.k_gain[0].copy_from(&k0);
        self.d_gain[0].copy_from(&d0);
        self.b_gain[0].fill(0.0);
        true
    }

    pub(crate) fn increase_regularization(&mut self) {
        self.drho = (self.drho * self.opts.rho_factor).max(self.opts.rho_factor);
        self.rho = (self.rho * self.drho).max(self.opts.rho_min);
        self.stats.rho_increases += 1;
        if self.rho > self.opts.rho_max && !self.rho_warned {
            warn!(rho = self.rho, "regularization exceeded rho_max; continuing");
            self.rho_warned = true;
        }
    }

    pub(crate) fn decrease_regularization(&mut self) {
        self.drho = (self.drho / self.opts.rho_factor).min(1.0 / self.opts.rho_factor);
        self.rho = (self.rho * self.drho).max(self.opts.rho_min);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DoubleIntegrator;
    use crate::objective::QuadraticObjective;
    use crate::problem::Problem;
    use crate::solver::SolverOptions;
    use nalgebra::dvector;

    fn lq_problem(n_knots: usize, r_value: f64, qf: f64) -> Problem {
        let objective = QuadraticObjective::new(
            DMatrix::zeros(2, 2),
            DMatrix::from_element(1, 1, r_value),
            DMatrix::from_diagonal(&dvector![qf, qf]),
            dvector![0.0, 0.0],
        );
        Problem::new(
            Box::new(DoubleIntegrator),
            objective,
            dvector![1.0, 0.0],
            n_knots,
            0.1 * (n_knots - 1) as f64,
        )
    }

    #[test]
    fn gains_match_finite_horizon_riccati() {
        let problem = lq_problem(11, 0.1, 100.0);
        let mut solver = Solver::new(problem, SolverOptions::default()).unwrap();
        assert!(solver.rollout_accepted());
        solver.update_jacobians();
        solver.update_expansions();
        assert!(solver.backward_pass());

        // reference: finite-horizon Riccati recursion on the same (A, B)
        let dt = 0.1;
        let a = DMatrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]);
        let b = DMatrix::from_row_slice(2, 1, &[0.5 * dt * dt, dt]);
        let r = DMatrix::from_element(1, 1, 0.1 * dt);
        let mut p = DMatrix::from_diagonal(&dvector![100.0, 100.0]);
        let mut gains = Vec::new();
        for _ in 0..10 {
            let quu = &r + b.transpose() * &p * &b;
            let qux = b.transpose() * &p * &a;
            let k = quu.clone().try_inverse().unwrap() * &qux;
            gains.push(k.clone());
            p = &a.transpose() * &p * &a
                - qux.transpose() * quu.try_inverse().unwrap() * &qux;
        }
        gains.reverse();

        for k in 0..10 {
            // solver stores u = u_bar + K dx, the reference u = -K x
            approx::assert_abs_diff_eq!(solver.k_gain[k], -&gains[k], epsilon = 1e-5);
        }
    }

    #[test]
    fn indefinite_curvature_fails_then_recovers_with_rho() {
        let problem = lq_problem(6, -1.0, 0.0);
        let mut solver = Solver::new(problem, SolverOptions::default()).unwrap();
        assert!(solver.rollout_accepted());
        solver.update_jacobians();
        solver.update_expansions();
        assert!(!solver.backward_pass());

        let mut tries = 0;
        while !solver.backward_pass() {
            solver.increase_regularization();
            tries += 1;
            assert!(tries < 200, "regularization never recovered");
        }
        assert!(solver.stats.rho_increases >= 1);
        assert!(solver.rho > 0.1);
    }

    #[test]
    fn regularization_schedule_follows_the_two_level_rule() {
        let problem = lq_problem(6, 0.1, 1.0);
        let mut solver = Solver::new(problem, SolverOptions::default()).unwrap();
        let fac = solver.opts.rho_factor;
        let rho_min = solver.opts.rho_min;
        assert!(solver.rho >= rho_min);

        solver.increase_regularization();
        approx::assert_abs_diff_eq!(solver.drho, fac);
        approx::assert_abs_diff_eq!(solver.rho, (rho_min * fac).max(rho_min));
        solver.increase_regularization();
        approx::assert_abs_diff_eq!(solver.drho, fac * fac);

        let rho_before = solver.rho;
        solver.decrease_regularization();
        assert!(solver.drho <= 1.0 / fac + 1e-12);
        assert!(solver.rho <= rho_before);
        for _ in 0..100 {
            solver.decrease_regularization();
        }
        assert!(solver.rho >= rho_min);
    }
}
