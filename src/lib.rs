#![warn(warnings)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(non_upper_case_globals)]
#![allow(clippy::needless_return)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions, clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#![allow(unused_variables, dead_code)]

pub mod error;
pub mod misc;
pub mod pricing;
mod ui;

pub use ui::*;
pub use error::{PricingError, PricingResult};
pub use pricing::duals::{DualKey, DualPrices, DualSign};
pub use pricing::job::{BlockId, Column, JobMode, JobStatus, PricingJob, VarId};
pub use pricing::orchestrator::PricingOrchestrator;
pub use pricing::registry::SolverRegistry;
pub use pricing::scheduler::{JobScheduler, RoundAggregate};
pub use pricing::stabilization::{StabilizationController, StabilizationState};
pub use pricing::{
    PhaseResult, PhaseStatus, PricingSettings, PricingType, SolveOutcome, SolverStatus, SortingStrategy,
    StabilizationSettings, UserColumnSink, UserMaster, UserSubproblemSolver,
};

/// Tolerance for comparing alphas and sign restrictions
pub const INT_FEAS_TOL: f64 = 1e-5;

/// A column improves the master if its reduced cost is below `-DUAL_FEAS_TOL`
pub const DUAL_FEAS_TOL: f64 = 1e-7;
