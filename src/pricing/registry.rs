use std::time::Duration;

use itertools::Itertools;

use crate::pricing::duals::DualPrices;
use crate::pricing::job::{BlockId, Column, JobMode};
use crate::pricing::{PricingType, SolveOutcome, SolverStatus, UserSubproblemSolver};

/// Registered pricing solver plugins, highest priority first
#[derive(Default)]
pub struct SolverRegistry {
    solvers: Vec<Box<dyn UserSubproblemSolver>>,
}

impl SolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_solver<S: UserSubproblemSolver + 'static>(mut self, solver: S) -> Self {
        self.register(Box::new(solver));
        self
    }

    /// Insert a solver. Solvers of equal priority keep their registration order.
    pub fn register(&mut self, solver: Box<dyn UserSubproblemSolver>) {
        let pos = self.solvers.iter().position(|s| s.priority() < solver.priority()).unwrap_or(self.solvers.len());
        self.solvers.insert(pos, solver);
    }

    pub fn len(&self) -> usize {
        self.solvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solvers.is_empty()
    }

    pub fn names(&self) -> String {
        self.solvers.iter().map(|s| s.name()).join(", ")
    }

    /// Offer the job to each solver in priority order until one applies
    pub fn solve(&self, block: BlockId, duals: &DualPrices, mode: JobMode, pricing_type: PricingType, time_limit: Duration) -> SolveOutcome {
        for solver in &self.solvers {
            let outcome = match mode {
                JobMode::Heuristic => solver.solve_heuristic(block, duals, pricing_type, time_limit),
                JobMode::Exact => solver.solve_exact(block, duals, pricing_type, time_limit),
            };
            if outcome.status != SolverStatus::NotApplicable {
                return outcome;
            }
        }
        SolveOutcome::not_applicable()
    }

    /// Reduced cost of the column under the given duals.
    /// Falls back to the cost stored on the column if no solver is registered.
    pub fn price_column(&self, column: &Column, duals: &DualPrices, pricing_type: PricingType) -> f64 {
        self.solvers
            .first()
            .map_or(column.reduced_cost, |s| s.price_column_with_duals(column, duals, pricing_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        priority: i32,
        applies: bool,
    }

    impl UserSubproblemSolver for Fixed {
        fn name(&self) -> &str { self.name }
        fn priority(&self) -> i32 { self.priority }

        fn solve_exact(&self, block: BlockId, _duals: &DualPrices, _pricing_type: PricingType, _time_limit: Duration) -> SolveOutcome {
            if !self.applies {
                return SolveOutcome::not_applicable();
            }
            SolveOutcome::new(SolverStatus::Optimal, f64::from(self.priority), vec![])
        }

        fn price_column_with_duals(&self, _column: &Column, _duals: &DualPrices, _pricing_type: PricingType) -> f64 {
            f64::from(self.priority)
        }
    }

    #[test]
    fn solvers_are_tried_by_priority() {
        let registry = SolverRegistry::new()
            .with_solver(Fixed { name: "mip", priority: 0, applies: true })
            .with_solver(Fixed { name: "knapsack", priority: 10, applies: false })
            .with_solver(Fixed { name: "dp", priority: 5, applies: true });

        assert_eq!(registry.names(), "knapsack, dp, mip");

        let outcome = registry.solve(BlockId(0), &DualPrices::new(), JobMode::Exact, PricingType::ReducedCost, Duration::from_secs(1));
        assert_eq!(outcome.status, SolverStatus::Optimal);
        assert_eq!(outcome.lower_bound, 5.0);
    }

    #[test]
    fn heuristic_defaults_to_not_applicable() {
        let registry = SolverRegistry::new().with_solver(Fixed { name: "mip", priority: 0, applies: true });
        let outcome = registry.solve(BlockId(0), &DualPrices::new(), JobMode::Heuristic, PricingType::ReducedCost, Duration::from_secs(1));
        assert_eq!(outcome.status, SolverStatus::NotApplicable);
    }
}
