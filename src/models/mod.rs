mod discretize;
mod dynamics;

pub use discretize::{simpson_midpoint, ControlIntegration, Discretizer};
pub use dynamics::{DoubleIntegrator, Dynamics, Pendulum, PlanarCar};
