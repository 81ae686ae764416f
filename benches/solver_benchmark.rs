use criterion::{criterion_group, criterion_main, Criterion};

use nalgebra::{dvector, DMatrix};
use std::f64::consts::PI;

extern crate trajopt;
use trajopt::models::{DoubleIntegrator, Pendulum};
use trajopt::{Constraint, Problem, QuadraticObjective, Solver, SolverOptions};

fn double_integrator(b: &mut Criterion) {
    b.bench_function("double_integrator_lqr", |b| {
        b.iter(|| {
            let objective = QuadraticObjective::new(
                DMatrix::zeros(2, 2),
                DMatrix::from_element(1, 1, 0.1),
                DMatrix::from_diagonal(&dvector![100.0, 100.0]),
                dvector![0.0, 0.0],
            );
            let problem = Problem::new(
                Box::new(DoubleIntegrator),
                objective,
                dvector![1.0, 0.0],
                51,
                5.0,
            );
            let mut solver = Solver::new(problem, SolverOptions::default()).unwrap();
            solver.solve()
        })
    });
}

fn pendulum_swing_up(b: &mut Criterion) {
    b.bench_function("pendulum_swing_up_bounded", |b| {
        b.iter(|| {
            let objective = QuadraticObjective::new(
                DMatrix::from_diagonal(&dvector![0.01, 0.01]),
                DMatrix::from_element(1, 1, 0.01),
                DMatrix::from_diagonal(&dvector![100.0, 100.0]),
                dvector![PI, 0.0],
            );
            let mut problem = Problem::new(
                Box::new(Pendulum::default()),
                objective,
                dvector![0.0, 0.0],
                51,
                5.0,
            );
            problem.add_constraint(Constraint::BoxControl {
                lower: dvector![-3.0],
                upper: dvector![3.0],
            });
            problem.add_constraint(Constraint::GoalState);
            let mut solver = Solver::new(problem, SolverOptions::default()).unwrap();
            solver.solve()
        })
    });
}

criterion_group!(benches, double_integrator, pendulum_swing_up);
criterion_main!(benches);
