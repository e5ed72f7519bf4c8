use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler configuration, typically built from the `[scheduler]` TOML section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// A task running longer than this is reported as blocking the loop.
    #[serde(default = "default_slow_task")]
    pub slow_task_threshold: Duration,
    /// Longest idle sleep while I/O sources are registered.
    #[serde(default = "default_idle_poll")]
    pub idle_poll_interval: Duration,
}

fn default_slow_task() -> Duration {
    Duration::from_millis(100)
}

fn default_idle_poll() -> Duration {
    Duration::from_millis(5)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slow_task_threshold: default_slow_task(),
            idle_poll_interval: default_idle_poll(),
        }
    }
}

impl From<&turnloop_core::SchedulerSettings> for SchedulerConfig {
    fn from(settings: &turnloop_core::SchedulerSettings) -> Self {
        Self {
            slow_task_threshold: Duration::from_millis(settings.slow_task_ms),
            idle_poll_interval: Duration::from_millis(settings.idle_poll_ms.max(1)),
        }
    }
}

/// What one call to [`Scheduler::turn`](super::Scheduler::turn) did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnReport {
    pub timers_fired: usize,
    pub io_progress: usize,
    pub tasks_run: usize,
}

impl TurnReport {
    pub fn did_work(&self) -> bool {
        self.timers_fired + self.io_progress + self.tasks_run > 0
    }
}

/// Result of polling an [`IoSource`](super::IoSource) once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// Nothing was ready.
    Idle,
    /// Some readiness was consumed.
    Progress,
    /// The source is exhausted and should be dropped.
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.slow_task_threshold, Duration::from_millis(100));
        assert_eq!(config.idle_poll_interval, Duration::from_millis(5));
    }

    #[test]
    fn scheduler_config_from_settings() {
        let settings = turnloop_core::SchedulerSettings {
            slow_task_ms: 40,
            idle_poll_ms: 0,
        };
        let config = SchedulerConfig::from(&settings);
        assert_eq!(config.slow_task_threshold, Duration::from_millis(40));
        // zero would make the idle loop spin
        assert_eq!(config.idle_poll_interval, Duration::from_millis(1));
    }

    #[test]
    fn turn_report_did_work() {
        assert!(!TurnReport::default().did_work());
        assert!(TurnReport { tasks_run: 1, ..Default::default() }.did_work());
    }
}
