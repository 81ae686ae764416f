/// Why the outer loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Maximum constraint violation below the tolerance.
    Converged,
    /// Outer iteration budget exhausted.
    IterationCap,
    /// A penalty reached its cap with kickout enabled.
    MaxPenalty,
    /// The caller's stop signal fired at an outer boundary.
    Stopped,
}

/// Per-solve bookkeeping; always fully populated, converged or not.
#[derive(Clone, Debug)]
pub struct SolverStats {
    pub converged: bool,
    pub termination: Termination,
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    /// Final augmented cost and constraint violation.
    pub cost: f64,
    pub c_max: f64,
    /// One entry per outer iteration.
    pub cost_history: Vec<f64>,
    pub c_max_history: Vec<f64>,
    pub penalty_history: Vec<f64>,
    /// Regularization bumps over the whole solve.
    pub rho_increases: usize,
}

impl Default for SolverStats {
    fn default() -> SolverStats {
        SolverStats {
            converged: false,
            termination: Termination::IterationCap,
            outer_iterations: 0,
            inner_iterations: 0,
            cost: f64::INFINITY,
            c_max: f64::INFINITY,
            cost_history: Vec::new(),
            c_max_history: Vec::new(),
            penalty_history: Vec::new(),
            rho_increases: 0,
        }
    }
}

impl SolverStats {
    pub(crate) fn reset(&mut self) {
        *self = SolverStats::default();
    }
}
