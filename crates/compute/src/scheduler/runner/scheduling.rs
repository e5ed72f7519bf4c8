use std::time::Duration;

use tracing::{debug, trace};

use crate::scheduler::task::{QueuedTask, Task, TaskId, TimerId};
use crate::scheduler::timers::TimerEntry;

use super::core::{IoSource, NamedIo};
use super::Scheduler;

impl Scheduler {
    /// Enqueue a task. It runs in the next turn, never in the turn that
    /// scheduled it.
    pub fn schedule(&self, task: Task) -> TaskId {
        let id = TaskId(self.next_id());
        trace!(task = %id, name = %task.name, "task scheduled");
        self.inner.ready.borrow_mut().push_back(QueuedTask { id, task });
        id
    }

    /// Shorthand for scheduling a closure without a cancel hook.
    pub fn spawn<F>(&self, name: impl Into<String>, run: F) -> TaskId
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        self.schedule(Task::new(name, run))
    }

    /// Drop a queued task's continuation and run its cancel hook.
    ///
    /// Returns `false` if the task already ran, was already cancelled, or
    /// never existed.
    pub fn cancel(&self, id: TaskId) -> bool {
        let removed = take_by_id(&mut self.inner.running.borrow_mut(), id)
            .or_else(|| take_by_id(&mut self.inner.ready.borrow_mut(), id));

        let Some(queued) = removed else {
            trace!(task = %id, "cancel ignored, task not queued");
            return false;
        };

        self.inner.metrics.borrow_mut().tasks_cancelled += 1;
        debug!(task = %id, name = %queued.task.name, "task cancelled");
        if let Some(hook) = queued.task.on_cancel {
            hook();
        }
        true
    }

    /// Arm a timer `delay` from now.
    pub fn set_timer<F>(&self, name: impl Into<String>, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        let deadline = self.now() + delay;
        self.set_timer_at(name, deadline, callback)
    }

    /// Arm a timer for an absolute loop time. A deadline in the past fires
    /// in the next timers phase.
    pub fn set_timer_at<F>(&self, name: impl Into<String>, deadline: Duration, callback: F) -> TimerId
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        let id = TimerId(self.next_id());
        let name = name.into();
        trace!(timer = %id, name = %name, deadline_ms = deadline.as_millis() as u64, "timer armed");
        self.inner.timers.borrow_mut().insert(
            id,
            deadline,
            TimerEntry {
                name,
                callback: Box::new(callback),
            },
        );
        id
    }

    /// Disarm a timer. Returns `false` if it already fired or was cleared.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        let cleared = self.inner.timers.borrow_mut().remove(id);
        if cleared {
            trace!(timer = %id, "timer cleared");
        }
        cleared
    }

    /// Register a source polled once per turn until it reports closed.
    pub fn register_io(&self, name: impl Into<String>, source: Box<dyn IoSource>) {
        let name = name.into();
        debug!(source = %name, "io source registered");
        self.inner.io.borrow_mut().push(NamedIo { name, source });
    }
}

fn take_by_id(
    queue: &mut std::collections::VecDeque<QueuedTask>,
    id: TaskId,
) -> Option<QueuedTask> {
    let pos = queue.iter().position(|q| q.id == id)?;
    queue.remove(pos)
}
