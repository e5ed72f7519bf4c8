//! Splitting long CPU-bound work into bounded chunks.
//!
//! A [`WorkChunker`] advances a [`Workload`] by one chunk per call. Driven
//! through [`spawn_chunked`], every chunk runs as its own scheduler task and
//! the next chunk is enqueued for a later turn, so other ready work runs in
//! between. The chunk budget only changes scheduling, never the result.

mod workload;

pub use workload::{HashWorkload, SimulatedCost, Workload, HASH_BLOCK};

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::clock::{Clock, ManualClock};
use crate::error::ComputeError;
use crate::scheduler::{Promise, Scheduler, Task, TaskId};

/// How much work one chunk may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkBudget {
    /// At most this many iterations (minimum one).
    Iterations(u64),
    /// Keep stepping until this much loop time has passed (minimum one
    /// iteration per chunk).
    Time(Duration),
    /// Run the whole computation in one chunk.
    Unbounded,
}

/// Scheduling mode of a chunked computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// One chunk for the whole input. Nothing else runs until it is done,
    /// which makes it a stress/regression scenario, not a serving mode.
    Blocking,
    /// Bounded chunks with a yield point between them.
    Yielding(ChunkBudget),
}

impl ChunkMode {
    pub fn budget(&self) -> ChunkBudget {
        match self {
            ChunkMode::Blocking => ChunkBudget::Unbounded,
            ChunkMode::Yielding(budget) => *budget,
        }
    }
}

/// Result of running one chunk.
pub enum ChunkOutcome {
    Done(Bytes),
    Continue(WorkChunker),
}

/// Cursor over a [`Workload`] plus the per-chunk budget.
pub struct WorkChunker {
    workload: Box<dyn Workload>,
    budget: ChunkBudget,
    cursor: u64,
    chunks: u64,
}

impl WorkChunker {
    pub fn new(workload: Box<dyn Workload>, budget: ChunkBudget) -> Self {
        Self {
            workload,
            budget,
            cursor: 0,
            chunks: 0,
        }
    }

    pub fn with_mode(workload: Box<dyn Workload>, mode: ChunkMode) -> Self {
        Self::new(workload, mode.budget())
    }

    /// Iterations completed so far.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn remaining(&self) -> u64 {
        self.workload.total().saturating_sub(self.cursor)
    }

    /// Chunks run so far.
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn budget(&self) -> ChunkBudget {
        self.budget
    }

    /// Execute one bounded slice of the workload.
    ///
    /// `clock` is only consulted for [`ChunkBudget::Time`]. On
    /// [`ChunkOutcome::Continue`] the caller must run the next chunk from a
    /// new task rather than calling this again directly.
    pub fn run_chunk(mut self, clock: &dyn Clock) -> Result<ChunkOutcome, ComputeError> {
        let total = self.workload.total();
        let started = clock.now();
        let mut done_here = 0u64;

        while self.cursor < total {
            let within_budget = match self.budget {
                ChunkBudget::Iterations(n) => done_here < n.max(1),
                ChunkBudget::Time(limit) => {
                    done_here == 0 || clock.now().saturating_sub(started) < limit
                }
                ChunkBudget::Unbounded => true,
            };
            if !within_budget {
                break;
            }
            self.workload.step(self.cursor)?;
            self.cursor += 1;
            done_here += 1;
        }
        self.chunks += 1;

        if self.cursor >= total {
            Ok(ChunkOutcome::Done(self.workload.finish()))
        } else {
            Ok(ChunkOutcome::Continue(self))
        }
    }
}

impl fmt::Debug for WorkChunker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkChunker")
            .field("budget", &self.budget)
            .field("cursor", &self.cursor)
            .field("total", &self.workload.total())
            .field("chunks", &self.chunks)
            .finish()
    }
}

// ── Driving chunks on the scheduler ────────────────────────────────

/// Final value of a chunked computation.
pub type ChunkResult = Result<Bytes, ComputeError>;

/// Handle to a computation submitted with [`spawn_chunked`].
#[derive(Clone)]
pub struct ChunkedJob {
    scheduler: Scheduler,
    name: Rc<str>,
    current: Rc<Cell<Option<TaskId>>>,
    stop_requested: Rc<Cell<bool>>,
    result: Promise<ChunkResult>,
}

impl ChunkedJob {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_settled()
    }

    /// Shared completion promise.
    pub fn result(&self) -> &Promise<ChunkResult> {
        &self.result
    }

    pub fn try_take(&self) -> Option<ChunkResult> {
        self.result.try_take()
    }

    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(ChunkResult) + 'static,
    {
        self.result.on_settle(callback);
    }

    /// Abort between chunks. The result resolves with
    /// [`ComputeError::CancelledTask`]. Returns `false` once finished or
    /// already cancelled.
    ///
    /// Called from inside the job's own running chunk, the chunk completes
    /// and no further chunk is scheduled.
    pub fn cancel(&self) -> bool {
        if self.result.is_settled() {
            return false;
        }
        if let Some(id) = self.current.get() {
            if self.scheduler.cancel(id) {
                return true;
            }
        }
        !self.stop_requested.replace(true)
    }
}

impl fmt::Debug for ChunkedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedJob")
            .field("name", &self.name)
            .field("current", &self.current.get())
            .field("stop_requested", &self.stop_requested.get())
            .field("result", &self.result)
            .finish()
    }
}

/// Submit the first chunk of `chunker` to `scheduler`.
///
/// Each chunk runs as a separate task; the continuation is scheduled for
/// the next turn. A failing chunk resolves the job with its error and
/// leaves every other task untouched.
pub fn spawn_chunked(scheduler: &Scheduler, name: impl Into<String>, chunker: WorkChunker) -> ChunkedJob {
    let job = ChunkedJob {
        scheduler: scheduler.clone(),
        name: Rc::from(name.into()),
        current: Rc::new(Cell::new(None)),
        stop_requested: Rc::new(Cell::new(false)),
        result: Promise::new(),
    };
    if chunker.budget == ChunkBudget::Unbounded {
        warn!(
            job = %job.name,
            iterations = chunker.remaining(),
            "running computation as a single blocking chunk"
        );
    } else {
        info!(job = %job.name, budget = ?chunker.budget, iterations = chunker.remaining(), "chunked computation submitted");
    }
    schedule_chunk(scheduler, &job, chunker);
    job
}

fn schedule_chunk(scheduler: &Scheduler, job: &ChunkedJob, chunker: WorkChunker) {
    let runner = job.clone();
    let cancelled = job.clone();
    let task = Task::new(job.name.to_string(), move |s| run_one_chunk(s, runner, chunker)).on_cancel(
        move || {
            if let Some(id) = cancelled.current.get() {
                debug!(job = %cancelled.name, task = %id, "chunked computation cancelled");
                cancelled.result.resolve(Err(ComputeError::CancelledTask(id)));
            }
        },
    );
    let id = scheduler.schedule(task);
    job.current.set(Some(id));
}

fn run_one_chunk(scheduler: &Scheduler, job: ChunkedJob, chunker: WorkChunker) {
    let outcome = chunker.run_chunk(scheduler.clock().as_ref());
    if job.stop_requested.get() && outcome.is_ok() {
        if let Some(id) = job.current.take() {
            debug!(job = %job.name, task = %id, "chunked computation cancelled from its own chunk");
            job.result.resolve(Err(ComputeError::CancelledTask(id)));
        }
        return;
    }
    match outcome {
        Ok(ChunkOutcome::Continue(next)) => schedule_chunk(scheduler, &job, next),
        Ok(ChunkOutcome::Done(bytes)) => {
            job.current.set(None);
            debug!(job = %job.name, "chunked computation finished");
            job.result.resolve(Ok(bytes));
        }
        Err(e) => {
            job.current.set(None);
            warn!(job = %job.name, error = %e, "chunked computation failed");
            job.result.resolve(Err(e));
        }
    }
}

// ── Reference drivers ──────────────────────────────────────────────

/// Run the whole workload in a single chunk, without a scheduler.
pub fn run_as_one_chunk(workload: Box<dyn Workload>) -> ChunkResult {
    let clock = ManualClock::new();
    match WorkChunker::new(workload, ChunkBudget::Unbounded).run_chunk(&clock)? {
        ChunkOutcome::Done(bytes) => Ok(bytes),
        ChunkOutcome::Continue(chunker) => Err(ComputeError::Workload {
            index: chunker.cursor(),
            reason: "unbounded chunk stopped early".to_string(),
        }),
    }
}

/// Run the workload in chunks of `chunk_iterations` on a private scheduler,
/// one task per chunk.
pub fn run_fully_chunked(workload: Box<dyn Workload>, chunk_iterations: u64) -> ChunkResult {
    let scheduler = Scheduler::with_clock(Rc::new(ManualClock::new()));
    let chunker = WorkChunker::new(workload, ChunkBudget::Iterations(chunk_iterations));
    let job = spawn_chunked(&scheduler, "chunked", chunker);
    scheduler.run_until_idle();
    job.try_take().unwrap_or_else(|| {
        Err(ComputeError::Workload {
            index: 0,
            reason: "scheduler went idle before the computation finished".to_string(),
        })
    })
}
