use std::f64::consts::PI;

use nalgebra::{dvector, DMatrix};

use trajopt::models::Pendulum;
use trajopt::{Constraint, Problem, QuadraticObjective, Solver, SolverOptions};

fn main() {
    // torque-limited pendulum swing-up
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
        101,
        5.0,
    );
    problem.add_constraint(Constraint::BoxControl {
        lower: dvector![-3.0],
        upper: dvector![3.0],
    });
    problem.add_constraint(Constraint::GoalState);

    let mut opts = SolverOptions::default();
    opts.verbose = true;

    let mut solver = Solver::new(problem, opts).expect("problem is well formed");
    let solution = solver.solve();

    let stats = &solution.stats;
    println!(
        "{} after {} outer / {} inner iterations",
        if stats.converged { "converged" } else { "did not converge" },
        stats.outer_iterations,
        stats.inner_iterations
    );
    println!(
        "cost = {:.5}, c_max = {:.3e}, final state = [{:.4}, {:.4}]",
        stats.cost,
        stats.c_max,
        solution.x[100][0],
        solution.x[100][1]
    );
}
