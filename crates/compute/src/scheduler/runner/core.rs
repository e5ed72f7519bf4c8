use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::info;

use crate::clock::Clock;
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::task::QueuedTask;
use crate::scheduler::timers::TimerQueue;
use crate::scheduler::types::{IoStatus, SchedulerConfig};

/// A non-blocking readiness source polled once per turn (the loop's poll
/// phase). Implementations must return promptly.
pub trait IoSource {
    fn poll(&mut self, scheduler: &Scheduler) -> IoStatus;
}

pub(crate) struct NamedIo {
    pub(crate) name: String,
    pub(crate) source: Box<dyn IoSource>,
}

pub(crate) struct Inner {
    pub(crate) clock: Rc<dyn Clock>,
    pub(crate) config: SchedulerConfig,
    pub(crate) next_id: Cell<u64>,
    /// Snapshot being executed in the current turn.
    pub(crate) running: RefCell<VecDeque<QueuedTask>>,
    /// Work scheduled for the next turn.
    pub(crate) ready: RefCell<VecDeque<QueuedTask>>,
    pub(crate) timers: RefCell<TimerQueue>,
    pub(crate) io: RefCell<Vec<NamedIo>>,
    pub(crate) metrics: RefCell<SchedulerMetrics>,
}

/// Single-threaded cooperative executor.
///
/// Cloning yields another handle to the same loop. Tasks never run
/// concurrently and are never preempted; a task yields only by returning,
/// after scheduling its own continuation.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Rc<Inner>,
}

impl Scheduler {
    /// Create a new scheduler driven by `clock`.
    pub fn new(clock: Rc<dyn Clock>, config: SchedulerConfig) -> Self {
        info!(
            slow_task_ms = config.slow_task_threshold.as_millis() as u64,
            "scheduler created"
        );
        Self {
            inner: Rc::new(Inner {
                clock,
                config,
                next_id: Cell::new(1),
                running: RefCell::new(VecDeque::new()),
                ready: RefCell::new(VecDeque::new()),
                timers: RefCell::new(TimerQueue::default()),
                io: RefCell::new(Vec::new()),
                metrics: RefCell::new(SchedulerMetrics::default()),
            }),
        }
    }

    /// Scheduler with default config.
    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        Self::new(clock, SchedulerConfig::default())
    }

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    /// Current loop time.
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.inner.clock)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.inner.metrics.borrow().clone()
    }

    /// Tasks waiting to run, in this turn or the next.
    pub fn pending_tasks(&self) -> usize {
        self.inner.running.borrow().len() + self.inner.ready.borrow().len()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    pub fn has_ready_tasks(&self) -> bool {
        self.pending_tasks() > 0
    }

    pub fn has_io_sources(&self) -> bool {
        !self.inner.io.borrow().is_empty()
    }

    /// Earliest pending timer deadline.
    pub fn next_timer_deadline(&self) -> Option<Duration> {
        self.inner.timers.borrow_mut().next_deadline()
    }

    /// No ready tasks, no timers and no I/O sources.
    pub fn is_idle(&self) -> bool {
        !self.has_ready_tasks() && self.inner.timers.borrow().is_empty() && !self.has_io_sources()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now())
            .field("pending_tasks", &self.pending_tasks())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}
