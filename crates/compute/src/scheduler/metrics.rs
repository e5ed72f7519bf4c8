use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

/// Event loop counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Completed turns.
    pub turns: u64,
    /// Tasks executed, by task name.
    pub tasks_executed: HashMap<String, u64>,
    /// Tasks dropped by [`Scheduler::cancel`](super::Scheduler::cancel).
    pub tasks_cancelled: u64,
    /// Timer callbacks fired.
    pub timers_fired: u64,
    /// Longest single task; the worst latency any other task could see.
    pub longest_task: Duration,
    /// Name of the task that set `longest_task`.
    pub longest_task_name: Option<String>,
    /// Deepest ready queue observed at the start of a turn.
    pub max_queue_depth: usize,
}

impl SchedulerMetrics {
    /// Record a task execution.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration) {
        *self.tasks_executed.entry(task_name.to_string()).or_default() += 1;
        if duration > self.longest_task {
            self.longest_task = duration;
            self.longest_task_name = Some(task_name.to_string());
        }
    }

    pub fn record_queue_depth(&mut self, depth: usize) {
        self.max_queue_depth = self.max_queue_depth.max(depth);
    }

    /// Total tasks executed across all names.
    pub fn total_executed(&self) -> u64 {
        self.tasks_executed.values().sum()
    }
}
