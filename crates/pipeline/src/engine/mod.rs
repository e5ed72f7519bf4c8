//! Backpressure-aware chunk pipeline driven by scheduler tasks.
//!
//! ```text
//!  source ──pull──▶ transform₁ … transformₙ ──▶ [buffer ≤ hwm] ──write──▶ sink
//!    ▲                                                                   │
//!    └──────── ReadyHandle ◀── scheduler ──▶ ResumeHandle ◀──────────────┘
//! ```
//!
//! Each pump task pulls at most one source chunk, pushes it through every
//! transform and drains the buffer into the sink. Readiness notifications
//! only schedule another pump; stages are never re-entered synchronously.

mod drive;


use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::info;
use turnloop_compute::{Scheduler, SettleToken};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::traits::{Sink, Source, Transform};

type CompletionFn = Box<dyn FnOnce(Result<PipelineStats, PipelineError>)>;

/// Lifecycle of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Open,
    Flowing,
    Draining,
    Errored,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Chunks produced by the source.
    pub chunks_in: u64,
    pub bytes_in: u64,
    /// Bytes accepted by the sink.
    pub bytes_out: u64,
    /// Times the sink asked the engine to pause.
    pub pauses: u64,
}

struct FlowState {
    stages: Vec<StageState>,
    buffer: VecDeque<Bytes>,
    buffered: usize,
    source_waiting: bool,
    source_done: bool,
    sink_paused: bool,
    /// Set by a readiness notification that arrives while the stage that
    /// will report `Pending`/`Pause` is still running.
    ready_signal: bool,
    resume_signal: bool,
    pump_scheduled: bool,
    finished: bool,
    stats: PipelineStats,
}

pub(crate) struct Shared {
    scheduler: Scheduler,
    config: PipelineConfig,
    names: Vec<String>,
    source: RefCell<Box<dyn Source>>,
    transforms: RefCell<Vec<Box<dyn Transform>>>,
    sink: RefCell<Box<dyn Sink>>,
    flow: RefCell<FlowState>,
    settled: SettleToken,
    on_complete: RefCell<Option<CompletionFn>>,
}

impl Shared {
    fn sink_index(&self) -> usize {
        self.names.len() - 1
    }
}

/// A connected but not yet started pipeline.
pub struct PipelineEngine {
    shared: Rc<Shared>,
}

impl PipelineEngine {
    /// Wire `source → transforms → sink`. Nothing runs until [`run`](Self::run).
    pub fn connect(
        scheduler: &Scheduler,
        source: impl Source + 'static,
        transforms: Vec<Box<dyn Transform>>,
        sink: impl Sink + 'static,
    ) -> Self {
        Self::connect_with(scheduler, PipelineConfig::default(), Box::new(source), transforms, Box::new(sink))
    }

    pub fn connect_with(
        scheduler: &Scheduler,
        config: PipelineConfig,
        source: Box<dyn Source>,
        transforms: Vec<Box<dyn Transform>>,
        sink: Box<dyn Sink>,
    ) -> Self {
        let mut names = Vec::with_capacity(transforms.len() + 2);
        names.push(source.name().to_string());
        names.extend(transforms.iter().map(|t| t.name().to_string()));
        names.push(sink.name().to_string());

        let flow = FlowState {
            stages: vec![StageState::Open; names.len()],
            buffer: VecDeque::new(),
            buffered: 0,
            source_waiting: false,
            source_done: false,
            sink_paused: false,
            ready_signal: false,
            resume_signal: false,
            pump_scheduled: false,
            finished: false,
            stats: PipelineStats::default(),
        };

        Self {
            shared: Rc::new(Shared {
                scheduler: scheduler.clone(),
                config,
                names,
                source: RefCell::new(source),
                transforms: RefCell::new(transforms),
                sink: RefCell::new(sink),
                flow: RefCell::new(flow),
                settled: SettleToken::new(),
                on_complete: RefCell::new(None),
            }),
        }
    }

    /// Stage names in index order.
    pub fn stage_names(&self) -> &[String] {
        &self.shared.names
    }

    /// Start flowing. `on_complete` runs exactly once, with the stats on
    /// success or the first error.
    pub fn run<F>(self, on_complete: F) -> PipelineHandle
    where
        F: FnOnce(Result<PipelineStats, PipelineError>) + 'static,
    {
        *self.shared.on_complete.borrow_mut() = Some(Box::new(on_complete));
        {
            let mut flow = self.shared.flow.borrow_mut();
            flow.stages.fill(StageState::Flowing);
        }
        info!(
            stages = ?self.shared.names,
            hwm = self.shared.config.high_water_mark,
            "pipeline started"
        );
        Shared::request_pump(&self.shared);
        PipelineHandle {
            shared: self.shared,
        }
    }
}

impl fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("stages", &self.shared.names)
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Observes and controls a running pipeline.
///
/// Keep the handle alive while the pipeline runs; pending readiness
/// notifications only hold weak references.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Rc<Shared>,
}

impl PipelineHandle {
    pub fn is_finished(&self) -> bool {
        self.shared.flow.borrow().finished
    }

    pub fn stage_states(&self) -> Vec<StageState> {
        self.shared.flow.borrow().stages.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.flow.borrow().stats
    }

    /// Bytes currently buffered in front of the sink.
    pub fn buffered(&self) -> usize {
        self.shared.flow.borrow().buffered
    }

    /// Abort every stage that is not closed yet and complete with
    /// [`PipelineError::Aborted`]. Returns `false` if the pipeline had
    /// already finished. Must not be called from inside a stage method.
    pub fn abort(&self) -> bool {
        Shared::terminate(&self.shared, None)
    }
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flow = self.shared.flow.borrow();
        f.debug_struct("PipelineHandle")
            .field("stages", &flow.stages)
            .field("finished", &flow.finished)
            .field("stats", &flow.stats)
            .finish()
    }
}

/// Given to a [`Source`] so it can announce data after returning
/// `Pull::Pending`.
pub struct ReadyHandle {
    shared: Weak<Shared>,
}

impl ReadyHandle {
    fn new(shared: &Rc<Shared>) -> Self {
        Self {
            shared: Rc::downgrade(shared),
        }
    }

    /// The source has data again. The engine pulls in a later task.
    pub fn ready(&self) {
        if let Some(shared) = self.shared.upgrade() {
            {
                let mut flow = shared.flow.borrow_mut();
                flow.ready_signal = true;
                flow.source_waiting = false;
            }
            Shared::request_pump(&shared);
        }
    }

    /// Call [`ready`](Self::ready) after `delay` of loop time.
    pub fn ready_after(&self, delay: Duration) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let scheduler = shared.scheduler.clone();
        scheduler.set_timer("pipeline source ready", delay, move |_| {
            ReadyHandle::new(&shared).ready();
        });
    }
}

/// Given to a [`Sink`] so it can lift a `Backpressure::Pause`.
pub struct ResumeHandle {
    shared: Weak<Shared>,
}

impl ResumeHandle {
    fn new(shared: &Rc<Shared>) -> Self {
        Self {
            shared: Rc::downgrade(shared),
        }
    }

    /// The sink accepts writes again.
    pub fn resume(&self) {
        if let Some(shared) = self.shared.upgrade() {
            {
                let mut flow = shared.flow.borrow_mut();
                flow.resume_signal = true;
                flow.sink_paused = false;
            }
            Shared::request_pump(&shared);
        }
    }

    /// Call [`resume`](Self::resume) after `delay` of loop time.
    pub fn resume_after(&self, delay: Duration) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let scheduler = shared.scheduler.clone();
        scheduler.set_timer("pipeline sink resume", delay, move |_| {
            ResumeHandle::new(&shared).resume();
        });
    }
}
