use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use compare::Compare;

use crate::misc::HashMap;
use crate::pricing::SortingStrategy;
use crate::DUAL_FEAS_TOL;

/// Window used for the recent success history when the
/// sorting strategy does not name one
pub const DEFAULT_HISTORY_WINDOW: usize = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl std::hash::Hash for BlockId {
    fn hash<H: std::hash::Hasher>(&self, hasher: &mut H) {
        hasher.write_u32(self.0)
    }
}

impl nohash_hasher::IsEnabled for BlockId {}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
/// Identifies a variable of a subproblem
pub struct VarId(pub u32);

impl std::hash::Hash for VarId {
    fn hash<H: std::hash::Hasher>(&self, hasher: &mut H) {
        hasher.write_u32(self.0)
    }
}

impl nohash_hasher::IsEnabled for VarId {}

/// A solution of a block's subproblem, offered to the master as a new variable
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub block: BlockId,
    pub values: HashMap<VarId, f64>,
    pub is_ray: bool,
    pub reduced_cost: f64,
}

impl Column {
    pub fn new(block: BlockId, values: HashMap<VarId, f64>, is_ray: bool, reduced_cost: f64) -> Self {
        Column { block, values, is_ray, reduced_cost }
    }

    /// Column would improve the master objective
    pub fn is_improving(&self) -> bool {
        self.reduced_cost < -DUAL_FEAS_TOL
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobMode {
    Heuristic,
    Exact,
}

impl Display for JobMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            JobMode::Heuristic => write!(f, "heur"),
            JobMode::Exact => write!(f, "exact"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Outcome of the latest solve attempt of a job within the current round
pub enum JobStatus {
    Unsolved,
    OptimalImproving,
    OptimalNoImprovement,
    Infeasible,
    Unbounded,
    LimitReached,
}

impl JobStatus {
    pub fn is_optimal(&self) -> bool {
        matches!(self, JobStatus::OptimalImproving | JobStatus::OptimalNoImprovement)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Unsolved => "unsolved",
            JobStatus::OptimalImproving => "optimal(improving)",
            JobStatus::OptimalNoImprovement => "optimal",
            JobStatus::Infeasible => "infeasible",
            JobStatus::Unbounded => "unbounded",
            JobStatus::LimitReached => "limit",
        };
        write!(f, "{}", s)
    }
}

/// Per block record of the rounds in which the block was examined
/// and whether it produced an improving column there.
#[derive(Clone, Debug)]
pub struct SuccessHistory {
    examined: u32,
    successes: u32,
    recent: VecDeque<bool>,
    window: usize,
}

impl SuccessHistory {
    pub fn new(window: usize) -> Self {
        SuccessHistory {
            examined: 0,
            successes: 0,
            recent: VecDeque::new(),
            window: window.max(1),
        }
    }

    pub fn record(&mut self, success: bool) {
        self.examined += 1;
        if success {
            self.successes += 1;
        }
        if self.recent.len() == self.window {
            self.recent.pop_back();
        }
        self.recent.push_front(success);
    }

    pub fn examined(&self) -> u32 {
        self.examined
    }

    /// Success rate over all examined rounds. Never examined blocks are
    /// treated as promising.
    pub fn rate_all(&self) -> f64 {
        if self.examined == 0 {
            return 1.0;
        }
        f64::from(self.successes) / f64::from(self.examined)
    }

    /// Success rate over the last `window` examined rounds
    pub fn rate_recent(&self, window: usize) -> f64 {
        let considered = self.recent.iter().take(window.max(1));
        let (n, hits) = considered.fold((0u32, 0u32), |(n, hits), s| (n + 1, hits + u32::from(*s)));
        if n == 0 {
            return 1.0;
        }
        f64::from(hits) / f64::from(n)
    }
}

#[derive(Clone, Debug)]
/// One block's subproblem state for the current round.
/// Persists across rounds, round state is reset by `setup`.
pub struct PricingJob {
    block: BlockId,
    chunk: usize,
    mode: JobMode,
    score: f64,
    status: JobStatus,
    solve_count: u32,
    lower_bound: f64,
    /// improving columns only, best first
    columns: Vec<Column>,
    other_columns: Vec<Column>,
    max_columns: usize,
    solve_time: Duration,
    examined: bool,
    history: SuccessHistory,
}

impl PricingJob {
    pub fn new(block: BlockId, chunk: usize, history_window: usize) -> Self {
        PricingJob {
            block,
            chunk,
            mode: JobMode::Exact,
            score: 0.0,
            status: JobStatus::Unsolved,
            solve_count: 0,
            lower_bound: f64::NEG_INFINITY,
            columns: Vec::new(),
            other_columns: Vec::new(),
            max_columns: usize::MAX,
            solve_time: Duration::ZERO,
            examined: false,
            history: SuccessHistory::new(history_window),
        }
    }

    /// Reset the job for a new round. At most `max_columns` improving
    /// columns are kept per round.
    pub fn setup(&mut self, heuristic_allowed: bool, strategy: SortingStrategy, convexity_dual: f64, max_columns: usize) {
        self.mode = if heuristic_allowed { JobMode::Heuristic } else { JobMode::Exact };
        self.score = match strategy {
            SortingStrategy::Index => 0.0,
            SortingStrategy::DualValue => convexity_dual,
            SortingStrategy::ReliabilityAll => self.history.rate_all(),
            SortingStrategy::ReliabilityRecent { window_rounds } => self.history.rate_recent(window_rounds),
        };
        self.status = JobStatus::Unsolved;
        self.solve_count = 0;
        self.lower_bound = f64::NEG_INFINITY;
        self.columns.clear();
        self.other_columns.clear();
        self.max_columns = max_columns.max(1);
        self.solve_time = Duration::ZERO;
        self.examined = false;
    }

    /// Store the result of one solve attempt.
    /// Improving columns are kept ordered by ascending reduced cost and cut
    /// to the per block cap, the others are only handed to the sink.
    pub fn record_solve(&mut self, status: JobStatus, lower_bound: f64, columns: Vec<Column>, elapsed: Duration) {
        self.solve_count += 1;
        self.solve_time += elapsed;
        self.status = status;
        if lower_bound > self.lower_bound {
            self.lower_bound = lower_bound;
        }
        if !columns.is_empty() {
            let (improving, other): (Vec<Column>, Vec<Column>) = columns.into_iter().partition(Column::is_improving);
            self.other_columns.extend(other);
            self.columns.extend(improving);
            self.columns.sort_by(|a, b| a.reduced_cost.total_cmp(&b.reduced_cost));
            self.columns.truncate(self.max_columns);
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.status, JobStatus::OptimalImproving | JobStatus::Infeasible | JobStatus::Unbounded)
            || !self.columns.is_empty()
    }

    pub fn has_hit_limit(&self) -> bool {
        self.status == JobStatus::LimitReached
    }

    pub fn has_improving_column(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn num_improving(&self) -> usize {
        self.columns.len()
    }

    pub(crate) fn set_exact(&mut self) {
        self.mode = JobMode::Exact;
    }

    pub(crate) fn mark_examined(&mut self) {
        self.examined = true;
    }

    /// Push this round's outcome into the success history.
    /// Blocks that were not part of the round are left untouched.
    pub(crate) fn close_round(&mut self) {
        if self.examined && self.solve_count > 0 {
            let success = self.has_improving_column();
            self.history.record(success);
        }
    }

    /// Hand all columns over, improving ones first. The job keeps no reference.
    pub fn take_columns(&mut self) -> Vec<Column> {
        let mut columns = std::mem::take(&mut self.columns);
        columns.append(&mut self.other_columns);
        columns
    }

    pub fn ticket(&self) -> JobTicket {
        JobTicket {
            block: self.block,
            mode: self.mode,
            score: self.score,
            spent: self.solve_time,
        }
    }

    pub fn block(&self) -> BlockId { self.block }
    pub fn chunk(&self) -> usize { self.chunk }
    pub fn mode(&self) -> JobMode { self.mode }
    pub fn score(&self) -> f64 { self.score }
    pub fn status(&self) -> JobStatus { self.status }
    pub fn solve_count(&self) -> u32 { self.solve_count }
    pub fn lower_bound(&self) -> f64 { self.lower_bound }
    pub fn columns(&self) -> &[Column] { &self.columns }
    pub fn max_columns(&self) -> usize { self.max_columns }
    pub fn solve_time(&self) -> Duration { self.solve_time }
    pub fn history(&self) -> &SuccessHistory { &self.history }
}

#[derive(Clone, Debug, PartialEq)]
/// Queue entry handed to a worker.
/// Captures the job's priority and the solve time already spent on it this round.
pub struct JobTicket {
    pub block: BlockId,
    pub mode: JobMode,
    pub score: f64,
    pub spent: Duration,
}

#[derive(Clone, Default)]
/// Heuristic tickets before exact ones, then higher score, then lower block id
pub struct JobComparator;

impl Compare<JobTicket> for JobComparator {
    fn compare(&self, l: &JobTicket, r: &JobTicket) -> core::cmp::Ordering {
        fn mode_rank(m: JobMode) -> u8 {
            match m {
                JobMode::Heuristic => 1,
                JobMode::Exact => 0,
            }
        }

        // max heap: greater pops first
        mode_rank(l.mode).cmp(&mode_rank(r.mode))
            .then(l.score.total_cmp(&r.score))
            .then(r.block.cmp(&l.block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(block: u32, reduced_cost: f64) -> Column {
        Column::new(BlockId(block), HashMap::default(), false, reduced_cost)
    }

    #[test]
    fn setup_resets_round_state() {
        let mut job = PricingJob::new(BlockId(3), 1, DEFAULT_HISTORY_WINDOW);
        job.setup(true, SortingStrategy::DualValue, 4.5, usize::MAX);
        job.record_solve(JobStatus::OptimalImproving, 2.0, vec![column(3, -1.0)], Duration::from_millis(5));
        assert!(job.is_done());

        job.setup(false, SortingStrategy::DualValue, 1.5, usize::MAX);
        assert_eq!(job.mode(), JobMode::Exact);
        assert_eq!(job.status(), JobStatus::Unsolved);
        assert_eq!(job.solve_count(), 0);
        assert!(job.columns().is_empty());
        assert_eq!(job.lower_bound(), f64::NEG_INFINITY);
        assert_eq!(job.score(), 1.5);
    }

    #[test]
    fn record_keeps_best_bound_and_sorted_columns() {
        let mut job = PricingJob::new(BlockId(0), 0, DEFAULT_HISTORY_WINDOW);
        job.setup(true, SortingStrategy::Index, 0.0, usize::MAX);
        job.record_solve(JobStatus::OptimalImproving, 5.0, vec![column(0, -0.5), column(0, 0.3)], Duration::ZERO);
        job.record_solve(JobStatus::OptimalImproving, 3.0, vec![column(0, -2.0)], Duration::ZERO);

        assert_eq!(job.lower_bound(), 5.0);
        let costs: Vec<f64> = job.columns().iter().map(|c| c.reduced_cost).collect();
        assert_eq!(costs, vec![-2.0, -0.5]);
        assert_eq!(job.num_improving(), 2);

        let handed: Vec<f64> = job.take_columns().iter().map(|c| c.reduced_cost).collect();
        assert_eq!(handed, vec![-2.0, -0.5, 0.3]);
    }

    #[test]
    fn per_block_cap_keeps_best_columns() {
        let mut job = PricingJob::new(BlockId(0), 0, DEFAULT_HISTORY_WINDOW);
        job.setup(false, SortingStrategy::Index, 0.0, 2);
        job.record_solve(JobStatus::OptimalImproving, 0.0, vec![column(0, -1.0), column(0, -3.0)], Duration::ZERO);
        job.record_solve(JobStatus::OptimalImproving, 0.0, vec![column(0, -2.0), column(0, -0.5)], Duration::ZERO);

        let costs: Vec<f64> = job.columns().iter().map(|c| c.reduced_cost).collect();
        assert_eq!(costs, vec![-3.0, -2.0]);
    }

    #[test]
    fn non_improving_columns_do_not_finish_the_job() {
        let mut job = PricingJob::new(BlockId(0), 0, DEFAULT_HISTORY_WINDOW);
        job.setup(true, SortingStrategy::Index, 0.0, usize::MAX);
        job.record_solve(JobStatus::Unsolved, f64::NEG_INFINITY, vec![column(0, 0.5)], Duration::ZERO);
        assert!(job.columns().is_empty());
        assert!(!job.is_done());
        assert_eq!(job.take_columns().len(), 1);
    }

    #[test]
    fn limit_is_neither_done() {
        let mut job = PricingJob::new(BlockId(0), 0, DEFAULT_HISTORY_WINDOW);
        job.setup(false, SortingStrategy::Index, 0.0, usize::MAX);
        job.record_solve(JobStatus::LimitReached, f64::NEG_INFINITY, vec![], Duration::ZERO);
        assert!(job.has_hit_limit());
        assert!(!job.is_done());

        job.record_solve(JobStatus::OptimalNoImprovement, 0.0, vec![column(0, 0.0)], Duration::ZERO);
        assert!(!job.is_done());
    }

    #[test]
    fn recent_history_forgets_old_rounds() {
        let mut history = SuccessHistory::new(2);
        history.record(true);
        history.record(false);
        history.record(false);
        assert_eq!(history.rate_recent(2), 0.0);
        assert!((history.rate_all() - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(SuccessHistory::new(4).rate_all(), 1.0);
    }

    #[test]
    fn huge_history_window_allocates_lazily() {
        let mut history = SuccessHistory::new(usize::MAX / 2);
        history.record(true);
        assert_eq!(history.rate_recent(usize::MAX / 2), 1.0);
    }

    #[test]
    fn comparator_prefers_heuristic_then_score_then_block() {
        let cmp = JobComparator;
        let ticket = |block, mode, score| JobTicket { block: BlockId(block), mode, score, spent: Duration::ZERO };

        let heur_low = ticket(5, JobMode::Heuristic, -10.0);
        let exact_high = ticket(1, JobMode::Exact, 10.0);
        assert_eq!(cmp.compare(&heur_low, &exact_high), core::cmp::Ordering::Greater);

        let a = ticket(1, JobMode::Exact, 2.0);
        let b = ticket(2, JobMode::Exact, 1.0);
        assert_eq!(cmp.compare(&a, &b), core::cmp::Ordering::Greater);

        let c = ticket(1, JobMode::Exact, 1.0);
        assert_eq!(cmp.compare(&c, &b), core::cmp::Ordering::Greater);
    }
}
