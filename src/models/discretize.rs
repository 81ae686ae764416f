use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::models::Dynamics;

/// How controls are held across an integration interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlIntegration {
    /// Zero-order hold: `u` constant over the interval.
    Zoh,
    /// First-order hold: `u` interpolates linearly to the next knot's control.
    Foh,
}

/// Explicit third-order Runge-Kutta discretization of a continuous model.
///
/// `dt` is an argument everywhere, never a stored constant, so a per-interval
/// time step (minimum-time formulations) flows through without special cases.
/// Discrete Jacobians are chained exactly through the RK stages from the
/// model's continuous Jacobians; the `d(x+)/d(dt)` column is a central finite
/// difference.
pub struct Discretizer {
    model: Box<dyn Dynamics>,
}

impl Discretizer {
    pub fn new(model: Box<dyn Dynamics>) -> Discretizer {
        Discretizer { model }
    }

    pub fn model(&self) -> &dyn Dynamics {
        self.model.as_ref()
    }

    pub fn state_dim(&self) -> usize {
        self.model.state_dim()
    }

    pub fn control_dim(&self) -> usize {
        self.model.control_dim()
    }

    /// One step with the control held constant.
    pub fn step_zoh(&self, x: &DVector<f64>, u: &DVector<f64>, dt: f64) -> DVector<f64> {
        let k1 = self.model.dynamics(x, u);
        let k2 = self.model.dynamics(&(x + &k1 * (dt / 2.0)), u);
        let k3 = self.model.dynamics(&(x - &k1 * dt + &k2 * (2.0 * dt)), u);
        x + (k1 + k2 * 4.0 + k3) * (dt / 6.0)
    }

    /// One step with the control interpolating linearly from `u` to `v`.
    pub fn step_foh(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        v: &DVector<f64>,
        dt: f64,
    ) -> DVector<f64> {
        let um = (u + v) * 0.5;
        let k1 = self.model.dynamics(x, u);
        let k2 = self.model.dynamics(&(x + &k1 * (dt / 2.0)), &um);
        let k3 = self.model.dynamics(&(x - &k1 * dt + &k2 * (2.0 * dt)), v);
        x + (k1 + k2 * 4.0 + k3) * (dt / 6.0)
    }

    /// Discrete Jacobians `(A, B)` of `step_zoh` at `(x, u, dt)`.
    pub fn jacobians_zoh(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let n = self.model.state_dim();
        let eye = DMatrix::identity(n, n);

        let k1 = self.model.dynamics(x, u);
        let x2 = x + &k1 * (dt / 2.0);
        let k2 = self.model.dynamics(&x2, u);
        let x3 = x - &k1 * dt + &k2 * (2.0 * dt);

        let a1 = self.model.jacobian_wrt_state(x, u);
        let b1 = self.model.jacobian_wrt_input(x, u);
        let a2s = self.model.jacobian_wrt_state(&x2, u);
        let b2s = self.model.jacobian_wrt_input(&x2, u);
        let a3s = self.model.jacobian_wrt_state(&x3, u);
        let b3s = self.model.jacobian_wrt_input(&x3, u);

        let dk2_dx = &a2s * (&eye + &a1 * (dt / 2.0));
        let dk2_du = &a2s * (&b1 * (dt / 2.0)) + &b2s;
        let dk3_dx = &a3s * (&eye - &a1 * dt + &dk2_dx * (2.0 * dt));
        let dk3_du = &a3s * (-&b1 * dt + &dk2_du * (2.0 * dt)) + &b3s;

        let a = eye + (a1 + &dk2_dx * 4.0 + dk3_dx) * (dt / 6.0);
        let b = (b1 + &dk2_du * 4.0 + dk3_du) * (dt / 6.0);
        (a, b)
    }

    /// Discrete Jacobians `(A, B, C)` of `step_foh`, with `C = d(x+)/d(v)`.
    pub fn jacobians_foh(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        v: &DVector<f64>,
        dt: f64,
    ) -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>) {
        let n = self.model.state_dim();
        let eye = DMatrix::identity(n, n);
        let um = (u + v) * 0.5;

        let k1 = self.model.dynamics(x, u);
        let x2 = x + &k1 * (dt / 2.0);
        let k2 = self.model.dynamics(&x2, &um);
        let x3 = x - &k1 * dt + &k2 * (2.0 * dt);

        let a1 = self.model.jacobian_wrt_state(x, u);
        let b1 = self.model.jacobian_wrt_input(x, u);
        let a2s = self.model.jacobian_wrt_state(&x2, &um);
        let b2s = self.model.jacobian_wrt_input(&x2, &um);
        let a3s = self.model.jacobian_wrt_state(&x3, v);
        let b3s = self.model.jacobian_wrt_input(&x3, v);

        let dk2_dx = &a2s * (&eye + &a1 * (dt / 2.0));
        let dk2_du = &a2s * (&b1 * (dt / 2.0)) + &b2s * 0.5;
        let dk2_dv = &b2s * 0.5;
        let dk3_dx = &a3s * (&eye - &a1 * dt + &dk2_dx * (2.0 * dt));
        let dk3_du = &a3s * (-&b1 * dt + &dk2_du * (2.0 * dt));
        let dk3_dv = &a3s * (&dk2_dv * (2.0 * dt)) + &b3s;

        let a = eye + (a1 + &dk2_dx * 4.0 + dk3_dx) * (dt / 6.0);
        let b = (b1 + &dk2_du * 4.0 + dk3_du) * (dt / 6.0);
        let c = (&dk2_dv * 4.0 + dk3_dv) * (dt / 6.0);
        (a, b, c)
    }

    /// `d(x+)/d(dt)` for the zero-order-hold step.
    pub fn dt_column_zoh(&self, x: &DVector<f64>, u: &DVector<f64>, dt: f64) -> DVector<f64> {
        let h = 1e-6 * (1.0 + dt.abs());
        (self.step_zoh(x, u, dt + h) - self.step_zoh(x, u, dt - h)) / (2.0 * h)
    }
}

/// Simpson midstate of an interval: `xm = (x0 + x1)/2 + dt/8 * (f0 - f1)`,
/// with `f0`, `f1` the continuous dynamics at the interval endpoints.
pub fn simpson_midpoint(
    x0: &DVector<f64>,
    f0: &DVector<f64>,
    x1: &DVector<f64>,
    f1: &DVector<f64>,
    dt: f64,
) -> DVector<f64> {
    (x0 + x1) * 0.5 + (f0 - f1) * (dt / 8.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DoubleIntegrator, Pendulum};
    use nalgebra::dvector;

    #[test]
    fn double_integrator_discretizes_exactly() {
        let disc = Discretizer::new(Box::new(DoubleIntegrator));
        let dt = 0.1;
        let (a, b) = disc.jacobians_zoh(&dvector![1.0, 0.5], &dvector![0.3], dt);
        #[rustfmt::skip]
        let a_expected = DMatrix::from_row_slice(2, 2, &[
            1.0, dt,
            0.0, 1.0,
        ]);
        let b_expected = DMatrix::from_row_slice(2, 1, &[0.5 * dt * dt, dt]);
        approx::assert_abs_diff_eq!(a, a_expected, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(b, b_expected, epsilon = 1e-12);

        let x1 = disc.step_zoh(&dvector![1.0, 0.5], &dvector![0.3], dt);
        approx::assert_abs_diff_eq!(
            x1,
            dvector![1.0 + 0.5 * dt + 0.15 * dt * dt, 0.5 + 0.3 * dt],
            epsilon = 1e-12
        );
    }

    #[test]
    fn double_integrator_dt_column_is_analytic() {
        let disc = Discretizer::new(Box::new(DoubleIntegrator));
        let x = dvector![1.0, -0.4];
        let u = dvector![0.7];
        let dt = 0.05;
        // x+ = [x + v dt + u dt^2/2, v + u dt] so d/d(dt) = [v + u dt, u]
        let col = disc.dt_column_zoh(&x, &u, dt);
        approx::assert_abs_diff_eq!(col, dvector![-0.4 + 0.7 * dt, 0.7], epsilon = 1e-6);
    }

    fn finite_diff_zoh(
        disc: &Discretizer,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let n = x.len();
        let m = u.len();
        let h = 1e-6;
        let mut a = DMatrix::zeros(n, n);
        let mut b = DMatrix::zeros(n, m);
        for j in 0..n {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[j] += h;
            xm[j] -= h;
            a.set_column(j, &((disc.step_zoh(&xp, u, dt) - disc.step_zoh(&xm, u, dt)) / (2.0 * h)));
        }
        for j in 0..m {
            let mut up = u.clone();
            let mut um = u.clone();
            up[j] += h;
            um[j] -= h;
            b.set_column(j, &((disc.step_zoh(x, &up, dt) - disc.step_zoh(x, &um, dt)) / (2.0 * h)));
        }
        (a, b)
    }

    #[test]
    fn pendulum_zoh_jacobians_match_finite_differences() {
        let disc = Discretizer::new(Box::new(Pendulum::default()));
        let x = dvector![1.1, -0.6];
        let u = dvector![0.8];
        let dt = 0.05;
        let (a, b) = disc.jacobians_zoh(&x, &u, dt);
        let (a_num, b_num) = finite_diff_zoh(&disc, &x, &u, dt);
        approx::assert_abs_diff_eq!(a, a_num, epsilon = 1e-5);
        approx::assert_abs_diff_eq!(b, b_num, epsilon = 1e-5);
    }

    #[test]
    fn pendulum_foh_jacobians_match_finite_differences() {
        let disc = Discretizer::new(Box::new(Pendulum::default()));
        let x = dvector![0.4, 0.9];
        let u = dvector![0.2];
        let v = dvector![-0.5];
        let dt = 0.05;
        let h = 1e-6;
        let (a, b, c) = disc.jacobians_foh(&x, &u, &v, dt);

        let mut a_num = DMatrix::zeros(2, 2);
        for j in 0..2 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[j] += h;
            xm[j] -= h;
            a_num.set_column(
                j,
                &((disc.step_foh(&xp, &u, &v, dt) - disc.step_foh(&xm, &u, &v, dt)) / (2.0 * h)),
            );
        }
        let b_num = (disc.step_foh(&x, &dvector![0.2 + h], &v, dt)
            - disc.step_foh(&x, &dvector![0.2 - h], &v, dt))
            / (2.0 * h);
        let c_num = (disc.step_foh(&x, &u, &dvector![-0.5 + h], dt)
            - disc.step_foh(&x, &u, &dvector![-0.5 - h], dt))
            / (2.0 * h);
        approx::assert_abs_diff_eq!(a, a_num, epsilon = 1e-5);
        approx::assert_abs_diff_eq!(b.column(0).into_owned(), b_num, epsilon = 1e-5);
        approx::assert_abs_diff_eq!(c.column(0).into_owned(), c_num, epsilon = 1e-5);
    }

    #[test]
    fn simpson_midpoint_is_linear_in_endpoints() {
        let disc = Discretizer::new(Box::new(DoubleIntegrator));
        let x0 = dvector![1.0, 0.0];
        let u0 = dvector![0.5];
        let dt = 0.1;
        let x1 = disc.step_zoh(&x0, &u0, dt);
        let f0 = disc.model().dynamics(&x0, &u0);
        let f1 = disc.model().dynamics(&x1, &u0);
        let xm = simpson_midpoint(&x0, &f0, &x1, &f1, dt);
        approx::assert_abs_diff_eq!(
            xm,
            (&x0 + &x1) * 0.5 + (&f0 - &f1) * (dt / 8.0),
            epsilon = 1e-12
        );
    }
}
