use serde::{Deserialize, Serialize};

use crate::models::ControlIntegration;

/// Which penalty scheduling the outer loop runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OuterLoopUpdate {
    /// Group-level: one progress test per constraint group.
    Default,
    /// Row-level: each constraint row tracked against its own history.
    Feedback,
}

/// Solver configuration. Everything has a usable default; option sets
/// round-trip through serde so a tuned configuration can be stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Inner convergence: accepted cost decrease below this.
    pub cost_tolerance: f64,
    /// Looser cost tolerance used while constraints are still far.
    pub cost_tolerance_intermediate: f64,
    /// Inner convergence on the feedforward gradient norm.
    pub gradient_norm_tolerance: f64,
    pub gradient_norm_tolerance_intermediate: f64,
    /// Outer convergence: maximum constraint violation below this.
    pub constraint_tolerance: f64,
    /// Switch point between intermediate and final inner tolerances.
    pub constraint_tolerance_intermediate: f64,
    /// Outer iteration cap.
    pub iterations: usize,
    /// Inner (iLQR) iteration cap per outer iteration.
    pub iterations_inner: usize,
    pub dual_max: f64,
    pub penalty_max: f64,
    pub penalty_initial: f64,
    pub penalty_scaling: f64,
    /// Penalty factor applied when a group did make progress (>= 1).
    pub penalty_scaling_no: f64,
    /// Required violation decrease per outer iteration.
    pub constraint_decrease_ratio: f64,
    pub rho_initial: f64,
    pub rho_min: f64,
    pub rho_max: f64,
    pub rho_factor: f64,
    /// Rollout divergence limits.
    pub max_state_value: f64,
    pub max_control_value: f64,
    pub active_constraint_tolerance: f64,
    pub outer_loop_update: OuterLoopUpdate,
    pub minimum_time: bool,
    pub infeasible: bool,
    /// Weight on total time under minimum time.
    pub r_minimum_time: f64,
    /// Weight on the infeasible-start slack controls.
    pub r_infeasible: f64,
    pub control_integration: ControlIntegration,
    /// Stop the outer loop once any penalty saturates.
    pub kickout_max_penalty: bool,
    pub verbose: bool,
    /// Line-search acceptance window on actual/expected decrease.
    pub line_search_lower: f64,
    pub line_search_upper: f64,
    /// Backtracking factor for the step size.
    pub line_search_factor: f64,
    pub line_search_iterations: usize,
    /// Cholesky failure retries (each bumps rho) before the pass gives up.
    pub backward_pass_retries: usize,
}

impl Default for SolverOptions {
    fn default() -> SolverOptions {
        SolverOptions {
            cost_tolerance: 1.0e-4,
            cost_tolerance_intermediate: 1.0e-3,
            gradient_norm_tolerance: 1.0e-5,
            gradient_norm_tolerance_intermediate: 1.0e-4,
            constraint_tolerance: 1.0e-3,
            constraint_tolerance_intermediate: 1.0e-2,
            iterations: 30,
            iterations_inner: 150,
            dual_max: 1.0e8,
            penalty_max: 1.0e8,
            penalty_initial: 1.0,
            penalty_scaling: 10.0,
            penalty_scaling_no: 1.0,
            constraint_decrease_ratio: 0.25,
            rho_initial: 0.0,
            rho_min: 1.0e-8,
            rho_max: 1.0e8,
            rho_factor: 1.6,
            max_state_value: 1.0e8,
            max_control_value: 1.0e8,
            active_constraint_tolerance: 0.0,
            outer_loop_update: OuterLoopUpdate::Default,
            minimum_time: false,
            infeasible: false,
            r_minimum_time: 1.0,
            r_infeasible: 1.0,
            control_integration: ControlIntegration::Zoh,
            kickout_max_penalty: false,
            verbose: false,
            line_search_lower: 1.0e-4,
            line_search_upper: 10.0,
            line_search_factor: 0.5,
            line_search_iterations: 15,
            backward_pass_retries: 25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let opts = SolverOptions::default();
        assert!(opts.cost_tolerance <= opts.cost_tolerance_intermediate);
        assert!(opts.constraint_tolerance <= opts.constraint_tolerance_intermediate);
        assert!(opts.penalty_scaling > 1.0);
        assert!(opts.penalty_scaling_no >= 1.0);
        assert!(opts.rho_min > 0.0 && opts.rho_min < opts.rho_max);
        assert!(opts.line_search_factor > 0.0 && opts.line_search_factor < 1.0);
    }

    #[test]
    fn options_roundtrip_through_serde() {
        let mut opts = SolverOptions::default();
        opts.minimum_time = true;
        opts.control_integration = ControlIntegration::Foh;
        opts.outer_loop_update = OuterLoopUpdate::Feedback;
        let json = serde_json::to_string(&opts).unwrap();
        let back: SolverOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.minimum_time, true);
        assert_eq!(back.control_integration, ControlIntegration::Foh);
        assert_eq!(back.outer_loop_update, OuterLoopUpdate::Feedback);
    }
}
