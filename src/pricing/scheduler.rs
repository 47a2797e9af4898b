use std::sync::Arc;
use std::time::Duration;

use crate::error::PricingError;
use crate::misc::blocking_queue::BlockingQueue;
use crate::misc::{HashMap, HashSet};
use crate::pricing::duals::DualPrices;
use crate::pricing::job::{BlockId, Column, JobComparator, JobMode, JobStatus, JobTicket, PricingJob, DEFAULT_HISTORY_WINDOW};
use crate::pricing::{PricingSettings, SolveOutcome, SolverStatus, SortingStrategy};

pub type JobQueue = BlockingQueue<JobTicket, JobComparator>;

/// Round wide summary over the jobs of the current round
#[derive(Clone, Debug, PartialEq)]
pub struct RoundAggregate {
    pub any_improving: bool,
    pub all_optimal: bool,
    pub any_infeasible: bool,
    pub best_lower_bound_sum: f64,
    pub num_improving_columns: usize,
    pub covers_all_blocks: bool,
    pub limited_blocks: Vec<BlockId>,
}

/// What happened to a job when its result was recorded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordedResult {
    pub status: JobStatus,
    pub new_improving: usize,
    /// first solve of the job this round
    pub first_solve: bool,
    /// job had no improving column before and has one now
    pub became_successful: bool,
    pub requeued: bool,
}

/// Owns the pricing jobs, partitions the blocks into chunks and
/// fills the round's priority queue.
pub struct JobScheduler {
    /// ordered by block id
    jobs: Vec<PricingJob>,
    index: HashMap<BlockId, usize>,
    queue: Arc<JobQueue>,
    heuristic_enabled: bool,
    sorting: SortingStrategy,
    eager_frequency: u32,
    max_columns_per_block: usize,
    num_relevant: usize,
    num_chunks: usize,
    active_chunk: usize,
    start_chunk: usize,
    eager_age: u32,
    eager_round: bool,
    round_blocks: Vec<BlockId>,
    escalated: HashSet<BlockId>,
}

impl JobScheduler {
    /// Create one job per relevant block. Blocks are assigned to chunks of
    /// `chunk_size` consecutive relevant blocks in id order.
    pub fn new(relevant_blocks: &[BlockId], settings: &PricingSettings) -> Self {
        let mut blocks = relevant_blocks.to_vec();
        blocks.sort();
        blocks.dedup();

        let num_relevant = blocks.len();
        let chunk_size = settings.chunk_size.min(num_relevant).max(1);
        let num_chunks = num_relevant.div_ceil(chunk_size).max(1);

        let history_window = match settings.sorting {
            SortingStrategy::ReliabilityRecent { window_rounds } => window_rounds,
            _ => DEFAULT_HISTORY_WINDOW,
        };

        let jobs: Vec<PricingJob> = blocks
            .iter()
            .enumerate()
            .map(|(k, block)| PricingJob::new(*block, k / chunk_size, history_window))
            .collect();
        let index = blocks.iter().enumerate().map(|(k, block)| (*block, k)).collect();

        JobScheduler {
            jobs,
            index,
            queue: Arc::new(BlockingQueue::new(JobComparator)),
            heuristic_enabled: settings.heuristic_enabled,
            sorting: settings.sorting,
            eager_frequency: settings.eager_frequency,
            max_columns_per_block: settings.max_columns_per_block,
            num_relevant,
            num_chunks,
            // the first phase starts with chunk 0
            active_chunk: num_chunks - 1,
            start_chunk: 0,
            eager_age: 0,
            eager_round: false,
            round_blocks: Vec::new(),
            escalated: HashSet::default(),
        }
    }

    /// Move to the next chunk at the start of a pricing phase.
    /// The rotation of this phase ends when it comes back to this chunk.
    pub fn begin_phase(&mut self) {
        self.active_chunk = (self.active_chunk + 1) % self.num_chunks;
        self.start_chunk = self.active_chunk;
    }

    /// Setup all jobs for a new round and queue those of the active chunk,
    /// or every job if an eager round is due.
    pub fn init_round(&mut self, duals: &DualPrices) {
        self.queue.reset();
        self.round_blocks.clear();
        self.escalated.clear();

        self.eager_round = self.eager_frequency > 0 && self.eager_age >= self.eager_frequency;
        if self.eager_round {
            self.eager_age = 0;
        }

        for job in &mut self.jobs {
            job.setup(self.heuristic_enabled, self.sorting, duals.convexity(job.block()), self.max_columns_per_block);

            if self.eager_round || job.chunk() == self.active_chunk {
                job.mark_examined();
                self.queue.add_job(job.ticket());
                self.round_blocks.push(job.block());
            }
        }

        #[cfg(feature = "validity_assertions")]
        self.assert_chunk_partition();
    }

    /// Remove the highest priority pending job. Safe to call from several workers.
    /// Waits while the queue is empty but popped jobs have no result yet.
    pub fn pop(&self) -> Option<JobTicket> {
        self.queue.get_job()
    }

    /// Like `pop`, but returns None as soon as nothing is queued
    pub fn try_pop(&self) -> Option<JobTicket> {
        self.queue.try_get_job()
    }

    /// Record a solve result of a popped job.
    ///
    /// A job without improving column that did not hit a limit is escalated
    /// from heuristic to exact pricing and queued again, once per round.
    /// For a job that hit a limit, `grant_limit_retry` decides whether it is
    /// queued again. The dispatch slot of the job is released afterwards.
    pub fn record_result<F>(&mut self, block: BlockId, outcome: SolveOutcome, elapsed: Duration, grant_limit_retry: F) -> Result<RecordedResult, PricingError>
    where
        F: FnOnce(&PricingJob) -> bool,
    {
        let result = self.apply_result(block, outcome, elapsed, grant_limit_retry);
        self.queue.job_done();
        result
    }

    fn apply_result<F>(&mut self, block: BlockId, outcome: SolveOutcome, elapsed: Duration, grant_limit_retry: F) -> Result<RecordedResult, PricingError>
    where
        F: FnOnce(&PricingJob) -> bool,
    {
        let job = self
            .index
            .get(&block)
            .and_then(|k| self.jobs.get_mut(*k))
            .ok_or_else(|| PricingError::SolverInternal { block, message: "result for unknown block".to_string() })?;

        let improving_before = job.num_improving();
        let first_solve = job.solve_count() == 0;

        let status = match outcome.status {
            SolverStatus::InternalError(message) => return Err(PricingError::SolverInternal { block, message }),
            SolverStatus::NotApplicable if job.mode() == JobMode::Exact => return Err(PricingError::NoApplicableSolver(block)),
            SolverStatus::NotApplicable => JobStatus::Unsolved,
            SolverStatus::Optimal if outcome.columns.iter().any(Column::is_improving) => JobStatus::OptimalImproving,
            SolverStatus::Optimal => JobStatus::OptimalNoImprovement,
            SolverStatus::Infeasible => JobStatus::Infeasible,
            SolverStatus::Unbounded => JobStatus::Unbounded,
            SolverStatus::LimitReached => JobStatus::LimitReached,
        };

        job.record_solve(status, outcome.lower_bound, outcome.columns, elapsed);

        let new_improving = job.num_improving().saturating_sub(improving_before);
        let mut requeued = false;

        if !job.is_done() {
            if job.has_hit_limit() {
                if grant_limit_retry(job) {
                    requeued = self.queue.add_job(job.ticket());
                }
            } else if job.mode() == JobMode::Heuristic && self.escalated.insert(block) {
                job.set_exact();
                requeued = self.queue.add_job(job.ticket());
            }
        }

        Ok(RecordedResult {
            status,
            new_improving,
            first_solve,
            became_successful: improving_before == 0 && new_improving > 0,
            requeued,
        })
    }

    /// Summarize the jobs of the current round
    pub fn aggregate(&self) -> RoundAggregate {
        let mut any_improving = false;
        let mut all_optimal = true;
        let mut any_infeasible = false;
        let mut best_lower_bound_sum = 0.0;
        let mut num_improving_columns = 0;
        let mut limited_blocks = Vec::new();

        for job in self.round_jobs() {
            let improving = job.num_improving();
            num_improving_columns += improving;
            any_improving |= improving > 0;
            all_optimal &= job.status().is_optimal();
            any_infeasible |= job.status() == JobStatus::Infeasible;
            if job.has_hit_limit() {
                limited_blocks.push(job.block());
            }
            best_lower_bound_sum += job.lower_bound();
        }

        if best_lower_bound_sum.is_nan() {
            best_lower_bound_sum = f64::NEG_INFINITY;
        }

        RoundAggregate {
            any_improving,
            all_optimal,
            any_infeasible,
            best_lower_bound_sum,
            num_improving_columns,
            covers_all_blocks: self.round_blocks.len() == self.num_relevant,
            limited_blocks,
        }
    }

    /// Advance to the next chunk. Returns false if the rotation would come back
    /// to the chunk it started from, in that case the active chunk is kept.
    pub fn advance_chunk(&mut self) -> bool {
        let next = (self.active_chunk + 1) % self.num_chunks;
        if next == self.start_chunk {
            return false;
        }
        self.active_chunk = next;
        true
    }

    /// The active chunk produced improving columns, restart the rotation from it
    pub fn mark_productive(&mut self) {
        self.start_chunk = self.active_chunk;
    }

    /// Age the eager counter by one round
    pub fn eager_tick(&mut self) {
        if self.eager_frequency > 0 {
            self.eager_age += 1;
        }
    }

    /// Update the success history of the jobs that took part in the round
    pub fn close_round(&mut self) {
        for job in &mut self.jobs {
            job.close_round();
        }
    }

    /// Take every column out of the jobs
    pub fn drain_columns(&mut self) -> Vec<Column> {
        self.jobs.iter_mut().flat_map(PricingJob::take_columns).collect()
    }

    pub fn queue(&self) -> Arc<JobQueue> {
        self.queue.clone()
    }

    pub fn job(&self, block: BlockId) -> Option<&PricingJob> {
        self.index.get(&block).and_then(|k| self.jobs.get(*k))
    }

    pub fn jobs(&self) -> impl Iterator<Item = &PricingJob> {
        self.jobs.iter()
    }

    fn round_jobs(&self) -> impl Iterator<Item = &PricingJob> {
        self.round_blocks.iter().filter_map(|b| self.job(*b))
    }

    pub fn chunk_blocks(&self, chunk: usize) -> Vec<BlockId> {
        self.jobs().filter(|j| j.chunk() == chunk).map(PricingJob::block).collect()
    }

    pub fn round_blocks(&self) -> &[BlockId] {
        &self.round_blocks
    }

    pub fn is_eager_round(&self) -> bool {
        self.eager_round
    }

    pub fn eager_age(&self) -> u32 {
        self.eager_age
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    pub fn active_chunk(&self) -> usize {
        self.active_chunk
    }

    pub fn num_relevant(&self) -> usize {
        self.num_relevant
    }

    #[cfg(feature = "validity_assertions")]
    fn assert_chunk_partition(&self) {
        let total: usize = (0..self.num_chunks).map(|c| self.chunk_blocks(c).len()).sum();
        assert_eq!(total, self.num_relevant);
        assert!(self.jobs().all(|j| j.chunk() < self.num_chunks));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::misc::HashMap;
    use crate::pricing::duals::{DualKey, DualSign};
    use itertools::Itertools;

    fn blocks(n: u32) -> Vec<BlockId> {
        (0..n).map(BlockId).collect()
    }

    fn settings(chunk_size: usize, heuristic: bool) -> PricingSettings {
        PricingSettings {
            chunk_size,
            heuristic_enabled: heuristic,
            sorting: SortingStrategy::Index,
            eager_frequency: 0,
            ..PricingSettings::default()
        }
    }

    fn improving(block: BlockId) -> Column {
        Column::new(block, HashMap::default(), false, -1.0)
    }

    fn optimal(columns: Vec<Column>) -> SolveOutcome {
        SolveOutcome::new(SolverStatus::Optimal, 0.0, columns)
    }

    fn drain(scheduler: &JobScheduler) -> Vec<JobTicket> {
        let mut out = vec![];
        while let Some(t) = scheduler.try_pop() {
            out.push(t);
        }
        out
    }

    #[test]
    fn chunks_partition_the_blocks() {
        for n in [1u32, 2, 5, 7, 16] {
            for chunk_size in [1usize, 2, 3, 4, 100] {
                let all = blocks(n);
                let scheduler = JobScheduler::new(&all, &settings(chunk_size, false));
                assert_eq!(scheduler.num_chunks(), (n as usize).div_ceil(chunk_size.min(n as usize)));

                let union: Vec<BlockId> = (0..scheduler.num_chunks())
                    .flat_map(|c| scheduler.chunk_blocks(c))
                    .sorted()
                    .collect();
                assert_eq!(union, all, "n={n} chunk_size={chunk_size}");
            }
        }
    }

    #[test]
    fn irrelevant_blocks_get_no_job() {
        let scheduler = JobScheduler::new(&[BlockId(4), BlockId(1)], &settings(1, false));
        assert!(scheduler.job(BlockId(0)).is_none());
        assert!(scheduler.job(BlockId(2)).is_none());
        assert_eq!(scheduler.job(BlockId(1)).map(PricingJob::chunk), Some(0));
        assert_eq!(scheduler.job(BlockId(4)).map(PricingJob::chunk), Some(1));
    }

    #[test]
    fn sparse_block_ids_are_supported() {
        let scheduler = JobScheduler::new(&[BlockId(u32::MAX), BlockId(7)], &settings(1, false));
        assert_eq!(scheduler.num_relevant(), 2);
        assert_eq!(scheduler.job(BlockId(7)).map(PricingJob::chunk), Some(0));
        assert_eq!(scheduler.job(BlockId(u32::MAX)).map(PricingJob::chunk), Some(1));
        assert!(scheduler.job(BlockId(8)).is_none());
    }

    #[test]
    fn large_reliability_window_is_accepted() {
        let mut s = settings(usize::MAX, false);
        s.sorting = SortingStrategy::ReliabilityRecent { window_rounds: usize::MAX / 2 };
        assert!(s.validate().is_ok());

        let mut scheduler = JobScheduler::new(&blocks(2), &s);
        scheduler.begin_phase();
        scheduler.init_round(&DualPrices::new());
        assert_eq!(drain(&scheduler).len(), 2);
    }

    #[test]
    fn init_round_queues_active_chunk_only() {
        let mut scheduler = JobScheduler::new(&blocks(5), &settings(2, false));
        scheduler.begin_phase();
        scheduler.init_round(&DualPrices::new());
        assert_eq!(scheduler.round_blocks(), &[BlockId(0), BlockId(1)]);
        assert!(scheduler.advance_chunk());
        scheduler.init_round(&DualPrices::new());
        assert_eq!(scheduler.round_blocks(), &[BlockId(2), BlockId(3)]);
    }

    #[test]
    fn dual_value_sorting_orders_by_convexity_dual() {
        let mut s = settings(usize::MAX, false);
        s.sorting = SortingStrategy::DualValue;
        let mut scheduler = JobScheduler::new(&blocks(3), &s);
        scheduler.begin_phase();

        let duals = DualPrices::new()
            .with(DualKey::Convexity(BlockId(0)), 1.0, DualSign::Free)
            .with(DualKey::Convexity(BlockId(1)), 5.0, DualSign::Free)
            .with(DualKey::Convexity(BlockId(2)), 3.0, DualSign::Free);
        scheduler.init_round(&duals);

        let order: Vec<BlockId> = drain(&scheduler).into_iter().map(|t| t.block).collect();
        assert_eq!(order, vec![BlockId(1), BlockId(2), BlockId(0)]);
    }

    #[test]
    fn heuristic_jobs_precede_escalated_exact_jobs() {
        let mut scheduler = JobScheduler::new(&blocks(4), &settings(usize::MAX, true));
        scheduler.begin_phase();
        scheduler.init_round(&DualPrices::new());

        let first = scheduler.pop().unwrap();
        assert_eq!(first.mode, JobMode::Heuristic);
        let recorded = scheduler.record_result(first.block, optimal(vec![]), Duration::ZERO, |_| false).unwrap();
        assert!(recorded.requeued);

        let rest = drain(&scheduler);
        let modes: Vec<JobMode> = rest.iter().map(|t| t.mode).collect();
        assert_eq!(modes, vec![JobMode::Heuristic, JobMode::Heuristic, JobMode::Heuristic, JobMode::Exact]);
        assert_eq!(rest.last().unwrap().block, first.block);
    }

    #[test]
    fn escalation_happens_once() {
        let mut scheduler = JobScheduler::new(&blocks(1), &settings(usize::MAX, true));
        scheduler.begin_phase();
        scheduler.init_round(&DualPrices::new());

        let t = scheduler.pop().unwrap();
        let r = scheduler.record_result(t.block, optimal(vec![]), Duration::ZERO, |_| false).unwrap();
        assert!(r.requeued);
        assert_eq!(scheduler.job(t.block).unwrap().mode(), JobMode::Exact);

        let t = scheduler.pop().unwrap();
        assert_eq!(t.mode, JobMode::Exact);
        let r = scheduler.record_result(t.block, optimal(vec![improving(t.block)]), Duration::ZERO, |_| false).unwrap();
        assert!(!r.requeued);
        assert!(r.became_successful);
        assert!(scheduler.pop().is_none());

        let agg = scheduler.aggregate();
        assert!(agg.any_improving);
        assert!(agg.all_optimal);
    }

    #[test]
    fn limited_jobs_are_only_retried_when_granted() {
        let mut scheduler = JobScheduler::new(&blocks(2), &settings(usize::MAX, false));
        scheduler.begin_phase();
        scheduler.init_round(&DualPrices::new());

        let limit = || SolveOutcome::new(SolverStatus::LimitReached, f64::NEG_INFINITY, vec![]);

        let a = scheduler.pop().unwrap();
        assert!(!scheduler.record_result(a.block, limit(), Duration::from_millis(3), |_| false).unwrap().requeued);
        let b = scheduler.pop().unwrap();
        assert!(scheduler.record_result(b.block, limit(), Duration::from_millis(3), |j| j.solve_count() < 2).unwrap().requeued);

        let again = scheduler.pop().unwrap();
        assert_eq!(again.block, b.block);
        assert_eq!(again.spent, Duration::from_millis(3));

        let agg = scheduler.aggregate();
        assert!(!agg.all_optimal);
        assert_eq!(agg.limited_blocks.len(), 2);
    }

    #[test]
    fn internal_error_is_fatal() {
        let mut scheduler = JobScheduler::new(&blocks(1), &settings(usize::MAX, false));
        scheduler.begin_phase();
        scheduler.init_round(&DualPrices::new());
        let t = scheduler.pop().unwrap();
        let outcome = SolveOutcome::new(SolverStatus::InternalError("lp crashed".to_string()), 0.0, vec![]);
        let err = scheduler.record_result(t.block, outcome, Duration::ZERO, |_| false).unwrap_err();
        assert!(matches!(err, PricingError::SolverInternal { .. }));
        assert_eq!(scheduler.queue().in_progress(), 0);
    }

    #[test]
    fn rotation_stops_at_start_chunk() {
        let mut scheduler = JobScheduler::new(&blocks(6), &settings(2, false));
        scheduler.begin_phase();
        assert_eq!(scheduler.active_chunk(), 0);
        assert!(scheduler.advance_chunk());
        assert!(scheduler.advance_chunk());
        assert!(!scheduler.advance_chunk());
        assert_eq!(scheduler.active_chunk(), 2);

        // the next phase starts behind the last chunk used
        scheduler.begin_phase();
        assert_eq!(scheduler.active_chunk(), 0);
        scheduler.advance_chunk();
        scheduler.mark_productive();
        assert!(scheduler.advance_chunk());
        assert!(scheduler.advance_chunk());
        assert!(!scheduler.advance_chunk());
    }

    #[test]
    fn eager_round_includes_every_block() {
        let mut s = settings(2, false);
        s.eager_frequency = 2;
        let mut scheduler = JobScheduler::new(&blocks(4), &s);
        scheduler.begin_phase();

        for _ in 0..2 {
            scheduler.init_round(&DualPrices::new());
            assert_eq!(scheduler.round_blocks().len(), 2);
            assert!(!scheduler.is_eager_round());
            scheduler.eager_tick();
            scheduler.advance_chunk();
        }

        scheduler.init_round(&DualPrices::new());
        assert!(scheduler.is_eager_round());
        assert_eq!(scheduler.round_blocks(), &blocks(4)[..]);
        assert_eq!(scheduler.eager_age(), 0);
        assert!(scheduler.aggregate().covers_all_blocks);
    }

    #[test]
    fn reliability_prefers_successful_blocks() {
        let mut s = settings(usize::MAX, false);
        s.sorting = SortingStrategy::ReliabilityAll;
        let mut scheduler = JobScheduler::new(&blocks(2), &s);
        scheduler.begin_phase();
        scheduler.init_round(&DualPrices::new());

        while let Some(t) = scheduler.pop() {
            let columns = if t.block == BlockId(1) { vec![improving(t.block)] } else { vec![] };
            scheduler.record_result(t.block, optimal(columns), Duration::ZERO, |_| false).unwrap();
        }
        scheduler.close_round();
        scheduler.drain_columns();

        scheduler.init_round(&DualPrices::new());
        assert_eq!(scheduler.pop().map(|t| t.block), Some(BlockId(1)));
    }
}
