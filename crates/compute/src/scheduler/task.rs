use std::fmt;

use super::runner::Scheduler;

/// Identity of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Identity of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Continuation run by the scheduler. Receives the scheduler so it can
/// enqueue follow-up work.
pub type TaskFn = Box<dyn FnOnce(&Scheduler)>;

/// Hook run when a queued task is cancelled instead of executed.
pub type CancelFn = Box<dyn FnOnce()>;

/// A unit of schedulable work.
///
/// Owned by the scheduler's ready queue from [`Scheduler::schedule`] until
/// it either runs or is cancelled; exactly one of `run` / `on_cancel` is
/// ever invoked.
pub struct Task {
    pub(crate) name: String,
    pub(crate) run: TaskFn,
    pub(crate) on_cancel: Option<CancelFn>,
}

impl Task {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
            on_cancel: None,
        }
    }

    /// Release held resources if the task is cancelled before it runs.
    pub fn on_cancel<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("cancellable", &self.on_cancel.is_some())
            .finish()
    }
}

/// A task sitting in the ready queue.
pub(crate) struct QueuedTask {
    pub(crate) id: TaskId,
    pub(crate) task: Task,
}
