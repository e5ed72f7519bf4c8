use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::ProbeError;

/// Terminal outcome of one probe attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
}

impl ProbeOutcome {
    pub(crate) fn from_result(result: Result<(), ProbeError>) -> Self {
        match result {
            Ok(()) => ProbeOutcome::Succeeded,
            Err(ProbeError::Timeout(_)) => ProbeOutcome::TimedOut,
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Succeeded)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Succeeded => "succeeded",
            ProbeOutcome::Failed(_) => "failed",
            ProbeOutcome::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// One emitted outcome. Times are loop time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeEvent {
    pub attempt: u64,
    pub outcome: ProbeOutcome,
    /// Nominal tick the probe belongs to; the timeout is measured from here.
    pub scheduled_at: Duration,
    pub resolved_at: Duration,
}

impl ProbeEvent {
    pub fn latency(&self) -> Duration {
        self.resolved_at.saturating_sub(self.scheduled_at)
    }
}

/// Receives every terminal probe outcome, exactly once per attempt.
pub trait ProbeObserver {
    fn on_outcome(&self, event: &ProbeEvent);
}

impl<F> ProbeObserver for F
where
    F: Fn(&ProbeEvent),
{
    fn on_outcome(&self, event: &ProbeEvent) {
        self(event)
    }
}

/// Logs outcomes through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    target: String,
}

impl TracingObserver {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl ProbeObserver for TracingObserver {
    fn on_outcome(&self, event: &ProbeEvent) {
        let latency_ms = event.latency().as_millis() as u64;
        match &event.outcome {
            ProbeOutcome::Succeeded => info!(
                target_route = %self.target,
                attempt = event.attempt,
                latency_ms,
                "health probe succeeded"
            ),
            ProbeOutcome::Failed(reason) => warn!(
                target_route = %self.target,
                attempt = event.attempt,
                reason = %reason,
                "health probe failed"
            ),
            ProbeOutcome::TimedOut => warn!(
                target_route = %self.target,
                attempt = event.attempt,
                latency_ms,
                "health probe timed out"
            ),
        }
    }
}

/// Records every event, for tests and reports.
#[derive(Debug, Clone, Default)]
pub struct OutcomeLog {
    events: Rc<RefCell<Vec<ProbeEvent>>>,
}

impl OutcomeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Number of events with the same outcome kind as `outcome`.
    pub fn count(&self, outcome: &ProbeOutcome) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| std::mem::discriminant(&e.outcome) == std::mem::discriminant(outcome))
            .count()
    }
}

impl ProbeObserver for OutcomeLog {
    fn on_outcome(&self, event: &ProbeEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(attempt: u64, outcome: ProbeOutcome) -> ProbeEvent {
        ProbeEvent {
            attempt,
            outcome,
            scheduled_at: Duration::from_millis(100),
            resolved_at: Duration::from_millis(130),
        }
    }

    #[test]
    fn outcome_log_counts_by_kind() {
        let log = OutcomeLog::new();
        log.on_outcome(&event(1, ProbeOutcome::Succeeded));
        log.on_outcome(&event(2, ProbeOutcome::Failed("refused".into())));
        log.on_outcome(&event(3, ProbeOutcome::Failed("reset".into())));

        assert_eq!(log.len(), 3);
        assert_eq!(log.count(&ProbeOutcome::Failed(String::new())), 2);
        assert_eq!(log.count(&ProbeOutcome::TimedOut), 0);
        assert_eq!(log.events()[0].latency(), Duration::from_millis(30));
    }

    #[test]
    fn outcome_from_result() {
        assert_eq!(ProbeOutcome::from_result(Ok(())), ProbeOutcome::Succeeded);
        assert_eq!(
            ProbeOutcome::from_result(Err(ProbeError::Transport("x".into()))),
            ProbeOutcome::Failed("probe transport error: x".into())
        );
        assert_eq!(
            ProbeOutcome::from_result(Err(ProbeError::Timeout(Duration::from_secs(2)))),
            ProbeOutcome::TimedOut
        );
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_string(&ProbeOutcome::Failed("boom".into())).unwrap();
        assert_eq!(json, r#"{"outcome":"failed","reason":"boom"}"#);
    }

    #[test]
    fn closures_are_observers() {
        let seen = Rc::new(RefCell::new(0));
        let s = seen.clone();
        let observer = move |_: &ProbeEvent| *s.borrow_mut() += 1;
        observer.on_outcome(&event(1, ProbeOutcome::TimedOut));
        assert_eq!(*seen.borrow(), 1);
    }
}
