//! Rate controller - load-based speed scaling and per-frame drain budget

use tracing::trace;

use super::config::{default_rate_steps, RateStep, DRAIN_BUDGET_PER_FRAME};

/// Output of one controller evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    /// Applied to newly placed messages only
    pub multiplier: f32,
    /// Max placement attempts this frame
    pub budget: usize,
}

/// Monotonic step function over pending depth
#[derive(Debug, Clone)]
pub struct RateController {
    steps: Vec<RateStep>,
    budget: usize,
}

impl Default for RateController {
    fn default() -> Self {
        Self::new(default_rate_steps(), DRAIN_BUDGET_PER_FRAME)
    }
}

impl RateController {
    /// Steps are sorted by `min_depth`; an empty table means a flat 1.0.
    pub fn new(mut steps: Vec<RateStep>, budget: usize) -> Self {
        steps.sort_by_key(|s| s.min_depth);
        Self { steps, budget }
    }

    /// Multiplier for a given pending depth
    pub fn multiplier(&self, pending_depth: usize) -> f32 {
        self.steps
            .iter()
            .rev()
            .find(|s| pending_depth >= s.min_depth)
            .map_or(1.0, |s| s.multiplier)
    }

    pub fn evaluate(&self, pending_depth: usize) -> RateDecision {
        let decision = RateDecision {
            multiplier: self.multiplier(pending_depth),
            budget: self.budget,
        };
        trace!(pending_depth, multiplier = decision.multiplier, budget = decision.budget, "Rate evaluated");
        decision
    }

    pub fn budget(&self) -> usize {
        self.budget
    }
}
