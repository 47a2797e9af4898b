use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::error::PricingError;

pub mod duals;
pub mod job;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod stabilization;

use crate::pricing::duals::DualPrices;
use crate::pricing::job::{BlockId, Column};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Kind of pricing performed in a phase.
/// Farkas pricing restores feasibility of an infeasible master.
pub enum PricingType {
    ReducedCost,
    Farkas,
}

impl Display for PricingType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PricingType::ReducedCost => write!(f, "redcost"),
            PricingType::Farkas => write!(f, "farkas"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Status reported by a subproblem solver for one solve call
pub enum SolverStatus {
    Optimal,
    Infeasible,
    Unbounded,
    LimitReached,
    InternalError(String),
    /// Solver cannot handle this block or mode; the next registered solver is tried
    NotApplicable,
}

#[derive(Clone, Debug)]
pub struct SolveOutcome {
    pub status: SolverStatus,
    pub lower_bound: f64,
    pub columns: Vec<Column>,
}

impl SolveOutcome {
    pub fn new(status: SolverStatus, lower_bound: f64, columns: Vec<Column>) -> Self {
        SolveOutcome { status, lower_bound, columns }
    }

    pub fn not_applicable() -> Self {
        SolveOutcome::new(SolverStatus::NotApplicable, f64::NEG_INFINITY, vec![])
    }
}

/// Primary trait to implement a pricing solver plugin.
///
/// Workers call the solver concurrently for different blocks, so any
/// per block state (models, environments) must be synchronized by the
/// implementation.
pub trait UserSubproblemSolver: Send + Sync {

    fn name(&self) -> &str { "solver" }

    /// Solvers with higher priority are asked first
    fn priority(&self) -> i32 { 0 }

    /// Solve the block's subproblem to optimality under the given duals.
    /// The time limit is advisory, the solver must terminate on its own.
    fn solve_exact(&self, block: BlockId, duals: &DualPrices, pricing_type: PricingType, time_limit: Duration) -> SolveOutcome;

    /// Heuristic attempt. Returned lower bounds must be valid or -inf.
    fn solve_heuristic(&self, block: BlockId, duals: &DualPrices, pricing_type: PricingType, time_limit: Duration) -> SolveOutcome {
        SolveOutcome::not_applicable()
    }

    /// Return the reduced cost of the column under the duals provided
    ///
    /// Used in the dual smoothing to identify misprices
    fn price_column_with_duals(&self, column: &Column, duals: &DualPrices, pricing_type: PricingType) -> f64;
}

/// Trait for the master problem side consumed by the pricing loop
pub trait UserMaster {
    /// Dual values (Farkas multipliers in Farkas pricing) of the current master LP
    fn raw_duals(&mut self, pricing_type: PricingType) -> DualPrices;

    /// Part of the Lagrangian bound that does not depend on the subproblems,
    /// i.e. the dual objective over the master rows.
    fn dual_objective_value(&self, duals: &DualPrices) -> f64 {
        0.0
    }
}

/// Receives the columns found by pricing
pub trait UserColumnSink {
    /// Offer a column to the master. Returns whether it was admitted.
    fn accept(&mut self, column: Column) -> bool;

    /// Columns already known to the sink that price out negatively under the duals.
    /// Checked before any job is dispatched.
    fn query_negative_reduced_cost(&mut self, duals: &DualPrices) -> Vec<Column> {
        Vec::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
/// Order in which the pricing jobs of a round are solved
pub enum SortingStrategy {
    Index,
    DualValue,
    ReliabilityAll,
    ReliabilityRecent { window_rounds: usize },
}

#[derive(Clone)]
/// Settings of the pricing controller
pub struct PricingSettings {
    pub sorting: SortingStrategy,
    pub chunk_size: usize,
    /// every `eager_frequency` rounds all blocks are solved, 0 disables
    pub eager_frequency: u32,
    pub job_time_increment: Duration,
    pub max_successful_fraction: f64,
    pub heuristic_enabled: bool,
    pub stabilization_enabled: bool,
    pub farkas_stabilization_enabled: bool,
    pub num_threads: usize,
    pub max_job_solves: u32,
    pub use_column_pool: bool,
    /// a round may close early once this many improving columns were found
    pub max_columns_round: usize,
    /// improving columns kept per block and round, the best ones win
    pub max_columns_per_block: usize,
}

impl Default for PricingSettings {
    fn default() -> Self {
        PricingSettings {
            sorting: SortingStrategy::ReliabilityAll,
            chunk_size: usize::MAX,
            eager_frequency: 10,
            job_time_increment: Duration::from_secs(u64::MAX / 4),
            max_successful_fraction: 1.0,
            heuristic_enabled: false,
            stabilization_enabled: true,
            farkas_stabilization_enabled: false,
            num_threads: 1,
            max_job_solves: 3,
            use_column_pool: true,
            max_columns_round: 100,
            max_columns_per_block: 10,
        }
    }
}

impl PricingSettings {
    pub fn validate(&self) -> Result<(), PricingError> {
        if self.chunk_size == 0 {
            return Err(PricingError::InvalidSettings("chunk_size must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.max_successful_fraction) {
            return Err(PricingError::InvalidSettings(format!(
                "max_successful_fraction {} outside [0,1]",
                self.max_successful_fraction
            )));
        }
        if self.num_threads == 0 {
            return Err(PricingError::InvalidSettings("num_threads must be at least 1".to_string()));
        }
        if self.max_job_solves == 0 {
            return Err(PricingError::InvalidSettings("max_job_solves must be at least 1".to_string()));
        }
        if self.max_columns_round == 0 || self.max_columns_per_block == 0 {
            return Err(PricingError::InvalidSettings("column caps must be at least 1".to_string()));
        }
        if let SortingStrategy::ReliabilityRecent { window_rounds: 0 } = self.sorting {
            return Err(PricingError::InvalidSettings("reliability window must be at least 1 round".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
/// Settings for dual stabilization following wentges rule
pub struct StabilizationSettings {
    /// keep alpha between pricing phases of the same node
    pub cross_iteration_memory: bool,
    pub initial_smoothing_alpha: f64,
    pub maximum_smoothing_alpha: f64,

    pub alpha_steps_up: f64,
    pub alpha_steps_down: f64,

    pub farkas_alpha: f64,
    pub farkas_steps_down: f64,
}

impl Default for StabilizationSettings {
    fn default() -> Self {
        StabilizationSettings {
            cross_iteration_memory: true,
            initial_smoothing_alpha: 0.8,
            maximum_smoothing_alpha: 0.9,
            alpha_steps_up: 0.1,
            alpha_steps_down: 0.2,
            farkas_alpha: 0.1,
            farkas_steps_down: 0.02,
        }
    }
}

impl StabilizationSettings {
    pub fn validate(&self) -> Result<(), PricingError> {
        let in_unit = |v: f64| (0.0..1.0).contains(&v);
        if !in_unit(self.maximum_smoothing_alpha) {
            return Err(PricingError::InvalidSettings(format!(
                "maximum_smoothing_alpha {} outside [0,1)",
                self.maximum_smoothing_alpha
            )));
        }
        if !in_unit(self.initial_smoothing_alpha) || !in_unit(self.farkas_alpha) {
            return Err(PricingError::InvalidSettings("initial alphas must lie in [0,1)".to_string()));
        }
        // a zero step down would let a mispricing schedule stall
        if self.alpha_steps_down <= 0.0 || self.farkas_steps_down <= 0.0 {
            return Err(PricingError::InvalidSettings("alpha step down must be positive".to_string()));
        }
        if self.alpha_steps_up < 0.0 {
            return Err(PricingError::InvalidSettings("alpha step up must not be negative".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseStatus {
    /// no chunk yields more improving columns, or the column pool short-circuited the phase
    Done,
    /// Farkas pricing proved the master infeasible
    Infeasible,
    TimeLimit,
    RoundLimit,
}

#[derive(Clone, Debug)]
pub struct PhaseResult {
    pub status: PhaseStatus,
    pub lower_bound: f64,
    /// only set if the last fully evaluated round solved every job to optimality
    pub lower_bound_valid: bool,
    pub columns_found: usize,
    pub rounds: usize,
    /// blocks whose last solve in the final round stopped at a limit
    pub limited_blocks: Vec<BlockId>,
}
