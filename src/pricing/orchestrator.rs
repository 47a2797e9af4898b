use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{PricingError, PricingResult};
use crate::pricing::duals::DualPrices;
use crate::pricing::job::{BlockId, Column, JobTicket};
use crate::pricing::registry::SolverRegistry;
use crate::pricing::scheduler::{JobQueue, JobScheduler, RoundAggregate};
use crate::pricing::stabilization::StabilizationController;
use crate::pricing::{PhaseResult, PhaseStatus, PricingSettings, PricingType, SolveOutcome, StabilizationSettings, UserColumnSink, UserMaster};
use crate::ui::{JobUIState, RoundUIState, UISender, UIUserMessage};

/// Wall clock of one pricing phase
#[derive(Clone, Copy, Debug)]
struct PhaseClock {
    started: Instant,
    budget: Duration,
}

impl PhaseClock {
    fn new(budget: Duration) -> Self {
        PhaseClock { started: Instant::now(), budget }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// State of a single `run_phase` call, dropped when the phase ends
struct PhaseContext {
    pricing_type: PricingType,
    clock: PhaseClock,
    max_rounds: usize,
    rounds: usize,
    columns_found: usize,
    best_lower_bound: f64,
    lower_bound_valid: bool,
    /// every round since the rotation started was optimal without columns
    farkas_clean: bool,
    limited_blocks: Vec<BlockId>,
}

impl PhaseContext {
    fn new(pricing_type: PricingType, max_rounds: usize, time_budget: Duration) -> Self {
        PhaseContext {
            pricing_type,
            clock: PhaseClock::new(time_budget),
            max_rounds,
            rounds: 0,
            columns_found: 0,
            best_lower_bound: f64::NEG_INFINITY,
            lower_bound_valid: false,
            farkas_clean: true,
            limited_blocks: Vec::new(),
        }
    }

    fn finish(self, status: PhaseStatus) -> PhaseResult {
        PhaseResult {
            status,
            lower_bound: self.best_lower_bound,
            lower_bound_valid: self.lower_bound_valid,
            columns_found: self.columns_found,
            rounds: self.rounds,
            limited_blocks: self.limited_blocks,
        }
    }
}

enum WorkerReport {
    Solved { ticket: JobTicket, outcome: SolveOutcome, elapsed: Duration },
    OutOfTime,
    Panicked { ticket: JobTicket },
}

#[derive(Default, Debug)]
struct DispatchSummary {
    aborted_early: bool,
    out_of_time: bool,
}

/// Everything a worker needs for one round
struct RoundInput<'a> {
    queue: &'a JobQueue,
    registry: &'a SolverRegistry,
    raw_duals: &'a DualPrices,
    used_duals: &'a DualPrices,
    reprice: bool,
    pricing_type: PricingType,
    job_time_increment: Duration,
    clock: PhaseClock,
}

/// Drives pricing rounds until no chunk yields improving columns.
///
/// A phase alternates between the master (fresh duals every round) and a
/// pool of workers solving the subproblems of the active chunk.
pub struct PricingOrchestrator {
    settings: PricingSettings,
    scheduler: JobScheduler,
    stabilization: StabilizationController,
    registry: SolverRegistry,
    ui: UISender,
}

impl PricingOrchestrator {
    pub fn new(relevant_blocks: &[BlockId], settings: PricingSettings, stabilization_settings: StabilizationSettings, registry: SolverRegistry, ui: UISender) -> PricingResult<Self> {
        settings.validate()?;
        stabilization_settings.validate()?;
        if registry.is_empty() {
            return Err(PricingError::InvalidSettings("no pricing solver registered".to_string()));
        }

        let scheduler = JobScheduler::new(relevant_blocks, &settings);
        ui.send(UIUserMessage::Log(format!(
            "pricing {} blocks in {} chunks with solvers [{}]",
            scheduler.num_relevant(),
            scheduler.num_chunks(),
            registry.names()
        )));

        #[cfg(feature = "validity_assertions")]
        ui.send(UIUserMessage::LogS("Validity Assertions Active"));

        Ok(PricingOrchestrator {
            stabilization: StabilizationController::new(stabilization_settings, ui.clone()),
            settings,
            scheduler,
            registry,
            ui,
        })
    }

    /// A new branch and bound node starts, the stability center is dropped
    pub fn start_node(&mut self) {
        self.stabilization.reset_node();
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn stabilization(&self) -> &StabilizationController {
        &self.stabilization
    }

    pub fn settings(&self) -> &PricingSettings {
        &self.settings
    }

    /// Run pricing rounds until the rotation over all chunks is exhausted,
    /// Farkas pricing proves infeasibility, or a limit is hit.
    ///
    /// `master.raw_duals` is asked once per round, after the columns of the
    /// previous round were handed to `sink`.
    pub fn run_phase<M, S>(&mut self, master: &mut M, sink: &mut S, pricing_type: PricingType, max_rounds: usize, time_budget: Duration) -> PricingResult<PhaseResult>
    where
        M: UserMaster + ?Sized,
        S: UserColumnSink + ?Sized,
    {
        let mut ctx = PhaseContext::new(pricing_type, max_rounds, time_budget);

        self.ui.send(UIUserMessage::StartPhase(
            match pricing_type {
                PricingType::ReducedCost => "Reduced Cost Pricing",
                PricingType::Farkas => "Farkas Pricing",
            },
            1,
        ));

        let stabilization_enabled = match pricing_type {
            PricingType::ReducedCost => self.settings.stabilization_enabled,
            PricingType::Farkas => self.settings.farkas_stabilization_enabled,
        };
        self.stabilization.begin_phase(pricing_type, stabilization_enabled);
        self.scheduler.begin_phase();

        loop {
            if ctx.rounds >= ctx.max_rounds {
                return Ok(ctx.finish(PhaseStatus::RoundLimit));
            }
            if ctx.clock.expired() {
                self.ui.send(UIUserMessage::TimeLimitReached);
                return Ok(ctx.finish(PhaseStatus::TimeLimit));
            }

            // round setup
            let raw_duals = master.raw_duals(pricing_type);

            if self.settings.use_column_pool {
                let known = sink.query_negative_reduced_cost(&raw_duals);
                let accepted = Self::hand_over(&mut *sink, known);
                if accepted > 0 {
                    // the master reoptimizes with the known columns before any job runs
                    ctx.rounds += 1;
                    ctx.columns_found += accepted;
                    self.ui.send(UIUserMessage::Log(format!("{} improving columns from the pool", accepted)));
                    continue;
                }
            }

            let was_stabilized = self.stabilization.is_stabilized();
            let used_duals = self.stabilization.stabilized_duals(&raw_duals);

            self.scheduler.init_round(&used_duals);
            if self.scheduler.is_eager_round() {
                self.ui.send(UIUserMessage::EagerRound);
            }
            self.ui.send(UIUserMessage::RoundStart(self.round_ui_state(&ctx, was_stabilized, 0, None)));

            // dispatching
            let summary = self.dispatch_round(&raw_duals, &used_duals, was_stabilized, pricing_type, &ctx.clock)?;
            ctx.rounds += 1;
            self.scheduler.eager_tick();

            // round evaluation
            let aggregate = self.scheduler.aggregate();
            self.scheduler.close_round();
            let accepted = Self::hand_over(&mut *sink, self.scheduler.drain_columns());
            ctx.columns_found += accepted;
            ctx.limited_blocks.clone_from(&aggregate.limited_blocks);

            let candidate = self.candidate_lower_bound(&*master, &used_duals, &aggregate);
            if candidate > ctx.best_lower_bound {
                ctx.best_lower_bound = candidate;
            }
            ctx.lower_bound_valid = aggregate.all_optimal && aggregate.covers_all_blocks && candidate.is_finite();

            self.ui.send(UIUserMessage::RoundFinish(self.round_ui_state(&ctx, was_stabilized, aggregate.num_improving_columns, Some(candidate))));

            if pricing_type == PricingType::Farkas && aggregate.any_infeasible {
                return Ok(ctx.finish(PhaseStatus::Infeasible));
            }
            if summary.out_of_time {
                self.ui.send(UIUserMessage::TimeLimitReached);
                return Ok(ctx.finish(PhaseStatus::TimeLimit));
            }
            if summary.aborted_early {
                self.ui.send(UIUserMessage::LogS("enough successful blocks, round closed early"));
            }

            self.stabilization.on_round_complete(aggregate.all_optimal, aggregate.any_improving, candidate, &used_duals, was_stabilized);

            if aggregate.any_improving {
                self.scheduler.mark_productive();
                ctx.farkas_clean = true;
                if pricing_type == PricingType::Farkas {
                    // the master has to be resolved to know whether it is still infeasible
                    return Ok(ctx.finish(PhaseStatus::Done));
                }
                continue;
            }

            ctx.farkas_clean &= aggregate.all_optimal;

            if was_stabilized {
                // misprice, the same chunk is priced again with less smoothing
                continue;
            }

            // raw duals over every block without improvement, the other chunks have nothing left
            if aggregate.covers_all_blocks || !self.scheduler.advance_chunk() {
                let status = if pricing_type == PricingType::Farkas && ctx.farkas_clean {
                    PhaseStatus::Infeasible
                } else {
                    PhaseStatus::Done
                };
                return Ok(ctx.finish(status));
            }
            self.ui.send(UIUserMessage::ChunkAdvance { chunk: self.scheduler.active_chunk(), num_chunks: self.scheduler.num_chunks() });
        }
    }

    /// Offer columns to the sink, returns the number of accepted improving ones
    fn hand_over<S: UserColumnSink + ?Sized>(sink: &mut S, columns: Vec<Column>) -> usize {
        let mut accepted = 0;
        for column in columns {
            let improving = column.is_improving();
            if sink.accept(column) && improving {
                accepted += 1;
            }
        }
        accepted
    }

    /// Lagrangian bound of the round, -inf unless every relevant block was solved
    fn candidate_lower_bound<M: UserMaster + ?Sized>(&self, master: &M, used_duals: &DualPrices, aggregate: &RoundAggregate) -> f64 {
        if !aggregate.covers_all_blocks {
            return f64::NEG_INFINITY;
        }
        let bound = master.dual_objective_value(used_duals) + aggregate.best_lower_bound_sum;
        if bound.is_nan() {
            f64::NEG_INFINITY
        } else {
            bound
        }
    }

    fn round_ui_state(&self, ctx: &PhaseContext, stabilized: bool, num_columns: usize, lower_bound: Option<f64>) -> RoundUIState {
        RoundUIState {
            round: ctx.rounds,
            pricing_type: ctx.pricing_type,
            chunk: self.scheduler.active_chunk(),
            num_chunks: self.scheduler.num_chunks(),
            num_jobs: self.scheduler.round_blocks().len(),
            alpha: self.stabilization.alpha(),
            stabilized,
            num_columns,
            lower_bound,
        }
    }

    /// Solve the queued jobs on the worker pool. Results are recorded on the
    /// calling thread only, in the order they arrive.
    fn dispatch_round(&mut self, raw_duals: &DualPrices, used_duals: &DualPrices, was_stabilized: bool, pricing_type: PricingType, clock: &PhaseClock) -> PricingResult<DispatchSummary> {
        let queue = self.scheduler.queue();
        let num_round_blocks = self.scheduler.round_blocks().len();
        if num_round_blocks == 0 {
            return Ok(DispatchSummary::default());
        }

        let num_workers = self.settings.num_threads.min(num_round_blocks).max(1);
        let max_job_solves = self.settings.max_job_solves;
        let required_successes = (self.settings.max_successful_fraction * num_round_blocks as f64).ceil() as usize;
        let max_columns_round = self.settings.max_columns_round;
        let abort_allowed = !was_stabilized && !self.scheduler.is_eager_round();

        let input = RoundInput {
            queue: &queue,
            registry: &self.registry,
            raw_duals,
            used_duals,
            reprice: was_stabilized,
            pricing_type,
            job_time_increment: self.settings.job_time_increment,
            clock: *clock,
        };
        let scheduler = &mut self.scheduler;
        let ui = &self.ui;

        let mut summary = DispatchSummary::default();
        let mut fatal: Option<PricingError> = None;

        thread::scope(|s| {
            let (tx, rx) = channel();

            let handles: Vec<_> = (0..num_workers)
                .map(|_| {
                    let tx = tx.clone();
                    let ui = ui.clone();
                    let input = &input;
                    s.spawn(move || run_worker(input, tx, ui))
                })
                .collect();
            drop(tx);

            let mut improving_columns = 0;
            let mut successful_blocks = 0;

            for report in rx {
                match report {
                    WorkerReport::Solved { ticket, outcome, elapsed } => {
                        if fatal.is_some() {
                            queue.job_done();
                            continue;
                        }
                        let recorded = scheduler.record_result(ticket.block, outcome, elapsed, |job| {
                            job.solve_count() < max_job_solves && !clock.expired()
                        });
                        match recorded {
                            Ok(recorded) => {
                                if let Some(job) = scheduler.job(ticket.block) {
                                    ui.send(UIUserMessage::JobFinish(JobUIState {
                                        block: ticket.block,
                                        mode: ticket.mode,
                                        status: recorded.status,
                                        runtime: elapsed.as_secs_f64(),
                                        num_columns: job.columns().len(),
                                        lower_bound: job.lower_bound(),
                                    }));
                                }

                                improving_columns += recorded.new_improving;
                                if recorded.became_successful {
                                    successful_blocks += 1;
                                }
                                let enough = improving_columns >= max_columns_round || successful_blocks >= required_successes;
                                if abort_allowed && improving_columns > 0 && enough && !summary.aborted_early {
                                    queue.close();
                                    summary.aborted_early = true;
                                }
                            }
                            Err(e) => {
                                queue.close();
                                fatal = Some(e);
                            }
                        }
                    }
                    WorkerReport::OutOfTime => {
                        summary.out_of_time = true;
                        queue.close();
                        queue.job_done();
                    }
                    WorkerReport::Panicked { ticket } => {
                        ui.send(UIUserMessage::Log(format!("pricing of {} panicked", ticket.block)));
                        queue.close();
                        queue.job_done();
                        fatal.get_or_insert(PricingError::WorkerPanicked);
                    }
                }
            }

            for handle in handles {
                if handle.join().is_err() {
                    fatal.get_or_insert(PricingError::WorkerPanicked);
                }
            }
        });

        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}

fn run_worker(input: &RoundInput<'_>, tx: Sender<WorkerReport>, ui: UISender) {
    ui.send(UIUserMessage::StartWorker);

    while let Some(ticket) = input.queue.get_job() {
        let remaining = input.clock.remaining();
        if remaining.is_zero() {
            if tx.send(WorkerReport::OutOfTime).is_err() {
                break;
            }
            continue;
        }

        let time_limit = ticket.spent.saturating_add(input.job_time_increment).min(remaining);
        let start = Instant::now();

        let solved = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut outcome = input.registry.solve(ticket.block, input.used_duals, ticket.mode, input.pricing_type, time_limit);
            if input.reprice {
                // smoothed duals may fake improvement, judge by the real ones
                for column in &mut outcome.columns {
                    column.reduced_cost = input.registry.price_column(column, input.raw_duals, input.pricing_type);
                }
            }
            outcome
        }));

        let report = match solved {
            Ok(outcome) => WorkerReport::Solved { ticket, outcome, elapsed: start.elapsed() },
            Err(_) => WorkerReport::Panicked { ticket },
        };
        if tx.send(report).is_err() {
            break;
        }
    }
}
