use std::fmt::{Display, Formatter};

use std::io::Write;
use std::time::{Duration, Instant};
use crate::misc::FullHashSet;

use std::sync::mpsc::{channel, Sender};
use std::thread::{JoinHandle, ThreadId};
#[cfg(feature = "buffered_out")]
use std::io::BufWriter;

use console::{pad_str_with, Alignment, style, pad_str};
use crate::pricing::PricingType;
use crate::pricing::job::{BlockId, JobMode, JobStatus};

/// Struct to hold the UI
/// Particulary the sending side of the channel to the render thread
pub struct UI {
    sender: UISender,
    render: Option<JoinHandle<()>>,
}


#[derive(Clone)]
pub struct UISender {
    sender: Option<Sender<UIMessage>>
}


impl UISender {
    /// Sender that drops every message
    pub fn detached() -> Self {
        UISender { sender: None }
    }

    /// Send typed UIMessage to internal channel.
    /// Messages are lost if the render thread is gone.
    pub fn send(&self, user_msg: UIUserMessage) {
        #[cfg(not(feature = "disable_ui"))]
        if let Some(sender) = &self.sender {
            sender.send(
                UIMessage {
                    thread_id: std::thread::current().id(),
                    message: user_msg
                }
            ).ok();
        }

        #[cfg(feature = "disable_ui")]
        let _ = user_msg;
    }
}

impl Default for UI {
    fn default() -> Self {
        Self::new()
    }
}

impl UI {

    pub fn get_sender(&self) -> UISender {
        self.sender.clone()
    }

    /// Print the statistics and wait for the render thread to flush.
    /// Call once pricing is over, messages sent afterwards are lost.
    pub fn finish(mut self, phase_duration: Option<Duration>) {
        self.sender.send(UIUserMessage::ExitUi { phase_duration });
        if let Some(render) = self.render.take() {
            render.join().ok();
        }
    }

    pub fn new() -> Self {

        let (sender, receiver) = channel();


        #[cfg(not(feature = "disable_ui"))]
        let render = Some(std::thread::spawn(move || {

            #[cfg(not(feature = "locked_out"))]
                let stdout = std::io::stdout();
            #[cfg(feature = "locked_out")]
                let stdout = std::io::stdout().lock();

            #[cfg(not(feature = "buffered_out"))]
                let mut buffered_out = stdout;
            #[cfg(feature = "buffered_out")]
                let mut buffered_out = BufWriter::with_capacity(512, stdout);

            let start_time = Instant::now();

            let mut total_solver_runtime = 0.0;
            let mut heuristic_solves = 0usize;
            let mut exact_solves = 0usize;
            let mut rounds = 0usize;
            let mut misprices = 0usize;

            let mut seen_threads_this_phase = FullHashSet::default();
            let mut max_workers = 1;

            while let Ok(msg) = receiver.recv() {
                match msg {
                    UIMessage { message: UIUserMessage::TimeLimitReached, .. } => { writeln!(&mut buffered_out, "{}", style("Time Limit Reached").yellow().bold()).ok(); }
                    UIMessage { thread_id, message: UIUserMessage::Log(msg) } => { writeln!(&mut buffered_out, "[{:?}] {:>6.2}  {}", thread_id, start_time.elapsed().as_secs_f64(), msg).ok(); }
                    UIMessage { thread_id, message: UIUserMessage::LogS(msg) } => { writeln!(&mut buffered_out, "[{:?}] {:>6.2}  {}", thread_id, start_time.elapsed().as_secs_f64(), msg).ok(); }
                    UIMessage { thread_id, message: UIUserMessage::StartWorker } => {
                        // workers live for one round, only count them
                        seen_threads_this_phase.insert(thread_id);
                        max_workers = max_workers.max(seen_threads_this_phase.len());
                    }

                    UIMessage { thread_id, message: UIUserMessage::StartPhase(title, level) } => {
                        seen_threads_this_phase = FullHashSet::default();

                        let width = 30usize.saturating_sub(usize::from(level) * 4);
                        writeln!(&mut buffered_out, "{}", pad_str_with(&format!("{:?}", thread_id), width, Alignment::Center, None, '⎯')).ok();
                        writeln!(&mut buffered_out, "{}", style(pad_str(title, width, Alignment::Center, None)).green()).ok();
                        writeln!(&mut buffered_out, "{}", "⎯".repeat(width)).ok();
                        buffered_out.flush().ok();
                    },
                    UIMessage { thread_id, message: UIUserMessage::RoundStart(state) } => {
                        seen_threads_this_phase = FullHashSet::default();
                        writeln!(&mut buffered_out, "{}", style(format!("[{t:?}] {time:>6.2} started   round {state}",
                                 t = thread_id,
                                 time = start_time.elapsed().as_secs_f64(),
                                 state = state
                        )).dim()).ok();
                    }
                    UIMessage { thread_id, message: UIUserMessage::RoundFinish(state) } => {
                        rounds += 1;
                        writeln!(&mut buffered_out, "[{t:?}] {time:>6.2} completed round {state}",
                                 t = thread_id,
                                 time = start_time.elapsed().as_secs_f64(),
                                 state = state
                        ).ok();
                        buffered_out.flush().ok();
                    }
                    UIMessage { thread_id, message: UIUserMessage::JobFinish(state) } => {

                        // always needed for statistics
                        total_solver_runtime += state.runtime;
                        match state.mode {
                            JobMode::Heuristic => heuristic_solves += 1,
                            JobMode::Exact => exact_solves += 1,
                        }

                        /* noisy*/
                        writeln!(&mut buffered_out, "{}", style(format!("[{t:?}] {time:>6.2} pricing job {state}",
                                 t = thread_id,
                                 time = start_time.elapsed().as_secs_f64(),
                                 state = state
                        )).dim()).ok();
                    }
                    UIMessage { thread_id, message: UIUserMessage::Misprice { alpha } } => {
                        misprices += 1;
                        writeln!(&mut buffered_out, "[{:?}] {:>6.2}  {} alpha=<{:.3}>", thread_id, start_time.elapsed().as_secs_f64(), style("Misprice").yellow(), alpha).ok();
                    }
                    UIMessage { thread_id, message: UIUserMessage::StabilityCenterMoved { lower_bound } } => {
                        writeln!(&mut buffered_out, "[{:?}] {:>6.2}  {} {}", thread_id, start_time.elapsed().as_secs_f64(), style("New stability center:").black().on_green().bold(), style(lower_bound.to_string()).bold()).ok();
                    }
                    UIMessage { thread_id, message: UIUserMessage::ChunkAdvance { chunk, num_chunks } } => {
                        writeln!(&mut buffered_out, "[{:?}] {:>6.2}  chunk {}/{}", thread_id, start_time.elapsed().as_secs_f64(), chunk + 1, num_chunks).ok();
                    }
                    UIMessage { thread_id, message: UIUserMessage::EagerRound } => {
                        writeln!(&mut buffered_out, "[{:?}] {:>6.2}  {}", thread_id, start_time.elapsed().as_secs_f64(), style("eager round, all blocks").cyan()).ok();
                    }
                    UIMessage { message: UIUserMessage::ExitUi { phase_duration }, .. } => {

                        let final_time = phase_duration.unwrap_or_else(|| start_time.elapsed()).as_secs_f64();
                        writeln!(&mut buffered_out, "{}", pad_str_with("Statistics", 30, Alignment::Center, None, '⎯')).ok();
                        writeln!(&mut buffered_out, "rounds: {} / misprices: {}", rounds, misprices).ok();
                        writeln!(&mut buffered_out, "total_solver_time: {:>8.2}s in {} solves", total_solver_runtime, heuristic_solves + exact_solves).ok();

                        let overhead = (final_time * max_workers as f64) - total_solver_runtime;
                        writeln!(&mut buffered_out, "'overhead': {:>8.2}s  ({:>3.1}%) (in {} threads)", overhead, overhead / (final_time * max_workers as f64) * 100.0, max_workers).ok();
                        if heuristic_solves + exact_solves > 0 {
                            writeln!(&mut buffered_out, "{:>3.1}% heuristic vs exact solves", heuristic_solves as f64 / (heuristic_solves + exact_solves) as f64 * 100.0).ok();
                        }
                        writeln!(&mut buffered_out, "{}", "⎯".repeat(30)).ok();


                        buffered_out.flush().ok();

                        break
                    },
                }
            }

            buffered_out.flush().ok();
        }));

        #[cfg(feature = "disable_ui")]
        let render = {
            drop(receiver);
            None
        };

        Self {
            sender: UISender { sender: Some(sender) },
            render,
        }

    }
}

#[derive(Clone)]
pub struct RoundUIState {
    pub round: usize,
    pub pricing_type: PricingType,
    pub chunk: usize,
    pub num_chunks: usize,
    pub num_jobs: usize,
    pub alpha: f64,
    pub stabilized: bool,
    pub num_columns: usize,
    pub lower_bound: Option<f64>, // not set in round start
}

impl Display for RoundUIState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{round} {pricing_type} chunk=<{chunk}/{num_chunks}> jobs=<{num_jobs}> alpha=<{alpha:.3}{stab}> cols=<{num_columns}> bound=<{bound}>",
            round = self.round, pricing_type = self.pricing_type, chunk = self.chunk + 1, num_chunks = self.num_chunks, num_jobs = self.num_jobs,
            alpha = self.alpha, stab = if self.stabilized { "" } else { " off" }, num_columns = self.num_columns,
            bound = self.lower_bound.filter(|b| b.is_finite()).map(|b| format!("{:>10.6}", b)).unwrap_or_else(|| "-".to_string())
        )
    }
}

#[derive(Clone)]
pub struct JobUIState {
    pub block: BlockId,
    pub mode: JobMode,
    pub status: JobStatus,
    pub runtime: f64,
    pub num_columns: usize,
    pub lower_bound: f64,
}

impl Display for JobUIState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} status=<{}> runtime=<{:>5.2}> num_cols=<{}> bound=<{}>", self.block, self.mode, self.status, self.runtime, self.num_columns, self.lower_bound)
    }
}

#[derive(Clone)]
/// Holds all state updates that can influence the UI
pub enum UIUserMessage {
    LogS(&'static str),
    Log(String),
    TimeLimitReached,
    StartPhase(&'static str, u8),
    ExitUi { phase_duration: Option<Duration> },
    StartWorker,

    RoundStart(RoundUIState),
    RoundFinish(RoundUIState),
    JobFinish(JobUIState),

    Misprice { alpha: f64 },
    StabilityCenterMoved { lower_bound: f64 },
    ChunkAdvance { chunk: usize, num_chunks: usize },
    EagerRound,
}


#[derive(Clone)]
pub struct UIMessage {
    pub thread_id: ThreadId,
    pub message: UIUserMessage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_sender_swallows_messages() {
        let sender = UISender::detached();
        sender.send(UIUserMessage::LogS("nothing listens"));
        sender.send(UIUserMessage::ExitUi { phase_duration: None });
    }

    #[test]
    fn render_thread_exits_on_finish() {
        let ui = UI::new();
        let sender = ui.get_sender();
        sender.send(UIUserMessage::StartPhase("Reduced Cost Pricing", 1));
        sender.send(UIUserMessage::StartWorker);
        sender.send(UIUserMessage::JobFinish(JobUIState {
            block: BlockId(0),
            mode: JobMode::Exact,
            status: JobStatus::OptimalNoImprovement,
            runtime: 0.01,
            num_columns: 0,
            lower_bound: 0.0,
        }));
        sender.send(UIUserMessage::Misprice { alpha: 0.6 });
        ui.finish(Some(Duration::from_millis(20)));

        // the render thread is gone, sending is still harmless
        sender.send(UIUserMessage::LogS("after exit"));
    }

    #[test]
    fn round_state_hides_missing_bound() {
        let state = RoundUIState {
            round: 3,
            pricing_type: PricingType::ReducedCost,
            chunk: 0,
            num_chunks: 2,
            num_jobs: 4,
            alpha: 0.5,
            stabilized: true,
            num_columns: 0,
            lower_bound: Some(f64::NEG_INFINITY),
        };
        let text = state.to_string();
        assert!(text.contains("chunk=<1/2>"));
        assert!(text.contains("bound=<->"));
    }
}
