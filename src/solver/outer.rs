use crate::solver::{OuterLoopUpdate, Solver};

impl Solver {
    /// One dual-ascent step plus penalty scheduling, after the inner solver
    /// has converged on the current augmented objective.
    pub(crate) fn update_duals_and_penalties(&mut self) {
        self.constraints.dual_update(self.opts.dual_max);
        match self.opts.outer_loop_update {
            OuterLoopUpdate::Default => self.constraints.penalty_update_default(
                self.opts.penalty_scaling,
                self.opts.penalty_scaling_no,
                self.opts.constraint_decrease_ratio,
                self.opts.penalty_max,
            ),
            OuterLoopUpdate::Feedback => self.constraints.penalty_update_feedback(
                self.opts.penalty_scaling,
                self.opts.penalty_scaling_no,
                self.opts.constraint_decrease_ratio,
                self.opts.penalty_max,
            ),
        }
    }
}
