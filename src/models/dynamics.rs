use nalgebra::{DMatrix, DVector};

const FINITE_DIFF_STEP: f64 = 1e-6;

/// Continuous-time dynamics `x_dot = f(x, u)`.
///
/// Implementors provide the vector field and, where available, analytic
/// Jacobians. The default Jacobians are central finite differences, so a model
/// without analytic derivatives still works as a differentiation oracle.
pub trait Dynamics: Send + Sync {
    fn state_dim(&self) -> usize;
    fn control_dim(&self) -> usize;

    fn dynamics(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64>;

    fn jacobian_wrt_state(&self, x: &DVector<f64>, u: &DVector<f64>) -> DMatrix<f64> {
        let n = self.state_dim();
        let mut jac = DMatrix::zeros(n, n);
        let mut xp = x.clone();
        let mut xm = x.clone();
        for j in 0..n {
            let h = FINITE_DIFF_STEP * (1.0 + x[j].abs());
            xp[j] = x[j] + h;
            xm[j] = x[j] - h;
            let df = (self.dynamics(&xp, u) - self.dynamics(&xm, u)) / (2.0 * h);
            jac.set_column(j, &df);
            xp[j] = x[j];
            xm[j] = x[j];
        }
        jac
    }

    fn jacobian_wrt_input(&self, x: &DVector<f64>, u: &DVector<f64>) -> DMatrix<f64> {
        let n = self.state_dim();
        let m = self.control_dim();
        let mut jac = DMatrix::zeros(n, m);
        let mut up = u.clone();
        let mut um = u.clone();
        for j in 0..m {
            let h = FINITE_DIFF_STEP * (1.0 + u[j].abs());
            up[j] = u[j] + h;
            um[j] = u[j] - h;
            let df = (self.dynamics(x, &up) - self.dynamics(x, &um)) / (2.0 * h);
            jac.set_column(j, &df);
            up[j] = u[j];
            um[j] = u[j];
        }
        jac
    }
}

/// Point mass on a line: state [position, velocity], control [acceleration].
pub struct DoubleIntegrator;

impl Dynamics for DoubleIntegrator {
    fn state_dim(&self) -> usize {
        2
    }
    fn control_dim(&self) -> usize {
        1
    }

    fn dynamics(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![x[1], u[0]])
    }

    fn jacobian_wrt_state(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0])
    }

    fn jacobian_wrt_input(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 1, &[0.0, 1.0])
    }
}

/// Torque-actuated pendulum, state [angle, angular rate], control [torque].
///
/// theta_ddot = (u - b * theta_dot - m * g * l * sin(theta)) / (m * l^2)
///
/// with theta = 0 hanging down and theta = pi upright.
pub struct Pendulum {
    pub mass: f64,
    pub length: f64,
    pub damping: f64,
    pub gravity: f64,
}

impl Pendulum {
    pub fn new(mass: f64, length: f64, damping: f64, gravity: f64) -> Pendulum {
        Pendulum {
            mass,
            length,
            damping,
            gravity,
        }
    }

    fn inertia(&self) -> f64 {
        self.mass * self.length * self.length
    }
}

impl Default for Pendulum {
    fn default() -> Pendulum {
        Pendulum::new(1.0, 0.5, 0.1, 9.81)
    }
}

impl Dynamics for Pendulum {
    fn state_dim(&self) -> usize {
        2
    }
    fn control_dim(&self) -> usize {
        1
    }

    fn dynamics(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let theta = x[0];
        let omega = x[1];
        let accel = (u[0] - self.damping * omega - self.mass * self.gravity * self.length * theta.sin())
            / self.inertia();
        DVector::from_vec(vec![omega, accel])
    }

    fn jacobian_wrt_state(&self, x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        let theta = x[0];
        #[rustfmt::skip]
        let jac = DMatrix::from_row_slice(2, 2, &[
            0.0, 1.0,
            -self.gravity / self.length * theta.cos(), -self.damping / self.inertia(),
        ]);
        jac
    }

    fn jacobian_wrt_input(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 1, &[0.0, 1.0 / self.inertia()])
    }
}

/// Kinematic car in the plane: state [px, py, heading, speed],
/// control [acceleration, turn rate].
pub struct PlanarCar;

impl Dynamics for PlanarCar {
    fn state_dim(&self) -> usize {
        4
    }
    fn control_dim(&self) -> usize {
        2
    }

    fn dynamics(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let heading = x[2];
        let v = x[3];
        DVector::from_vec(vec![v * heading.cos(), v * heading.sin(), u[1], u[0]])
    }

    fn jacobian_wrt_state(&self, x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        let heading = x[2];
        let v = x[3];
        #[rustfmt::skip]
        let jac = DMatrix::from_row_slice(4, 4, &[
            0.0, 0.0, -v * heading.sin(), heading.cos(),
            0.0, 0.0,  v * heading.cos(), heading.sin(),
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0,
        ]);
        jac
    }

    fn jacobian_wrt_input(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        #[rustfmt::skip]
        let jac = DMatrix::from_row_slice(4, 2, &[
            0.0, 0.0,
            0.0, 0.0,
            0.0, 1.0,
            1.0, 0.0,
        ]);
        jac
    }
}
