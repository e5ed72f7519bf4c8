//! Deterministic starvation scenario on virtual time.
//!
//! A health poller probes the in-process `/health` route while one long
//! hash computation runs, either as a single blocking chunk (`/compute`) or
//! in yielding chunks (`/compute-fast`). CPU time is simulated with a
//! [`ManualClock`], so the outcome only depends on the configuration.
//!
//! Blocking mode exists to show the failure: probes scheduled while the
//! computation runs time out. It is a stress/regression scenario, never a
//! serving default.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};
use turnloop_core::PollerConfig;

use crate::chunker::{ChunkBudget, HashWorkload, SimulatedCost, Workload};
use crate::clock::{Clock, ManualClock};
use crate::dispatcher::{
    ok_handler, Dispatched, Dispatcher, Handler, Request, RouteTable, WorkloadFactory,
};
use crate::error::{DispatchError, RouteError};
use crate::poller::{
    DispatchProbe, HealthPoller, OutcomeLog, PollerStats, ProbeOutcome, TracingObserver,
};
use crate::scheduler::{Scheduler, SchedulerConfig};

pub const HEALTH_ROUTE: &str = "/health";
pub const BLOCKING_ROUTE: &str = "/compute";
pub const YIELDING_ROUTE: &str = "/compute-fast";

/// Which compute route the scenario dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioMode {
    Blocking,
    Yielding,
}

impl ScenarioMode {
    pub fn route(&self) -> &'static str {
        match self {
            ScenarioMode::Blocking => BLOCKING_ROUTE,
            ScenarioMode::Yielding => YIELDING_ROUTE,
        }
    }
}

impl fmt::Display for ScenarioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioMode::Blocking => f.write_str("blocking"),
            ScenarioMode::Yielding => f.write_str("yielding"),
        }
    }
}

impl FromStr for ScenarioMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blocking" => Ok(ScenarioMode::Blocking),
            "yielding" => Ok(ScenarioMode::Yielding),
            other => Err(format!("unknown scenario mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub mode: ScenarioMode,
    pub interval: Duration,
    pub timeout: Duration,
    /// Simulated CPU time of the whole computation.
    pub compute_duration: Duration,
    pub iterations: u64,
    /// Iterations per chunk in yielding mode.
    pub chunk_iterations: u64,
    pub seed: u64,
    /// Loop time at which the poller is stopped and the report taken.
    pub horizon: Duration,
}

impl ScenarioConfig {
    pub fn new(mode: ScenarioMode) -> Self {
        Self {
            mode,
            interval: Duration::from_millis(5000),
            timeout: Duration::from_millis(2000),
            compute_duration: Duration::from_millis(8000),
            iterations: 16_000,
            chunk_iterations: 200,
            seed: 0x5eed,
            horizon: Duration::from_millis(12_000),
        }
    }

    /// Take interval and timeout from the `[poller]` section.
    pub fn with_poller(mut self, poller: &PollerConfig) -> Self {
        self.interval = poller.interval();
        self.timeout = poller.timeout();
        self
    }

    /// Simulated duration of one yielding chunk.
    pub fn chunk_latency(&self) -> Duration {
        let per_step = self.compute_duration / u32::try_from(self.iterations.max(1)).unwrap_or(u32::MAX);
        per_step * u32::try_from(self.chunk_iterations).unwrap_or(u32::MAX)
    }
}

/// One probe outcome with loop times in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeRecord {
    pub attempt: u64,
    pub scheduled_at_ms: u64,
    pub resolved_at_ms: u64,
    pub outcome: ProbeOutcome,
}

/// Outcomes of probes whose tick fell inside the compute window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub mode: ScenarioMode,
    pub route: String,
    pub compute_finished_ms: Option<u64>,
    pub digest: Option<String>,
    pub probes: Vec<ProbeRecord>,
    pub window: WindowSummary,
    pub poller: PollerStats,
    pub longest_task_ms: u64,
    pub turns: u64,
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

fn routes(config: &ScenarioConfig, clock: &Rc<ManualClock>) -> Result<RouteTable, RouteError> {
    let costed: WorkloadFactory = {
        let clock = clock.clone();
        let (iterations, seed, total) = (config.iterations, config.seed, config.compute_duration);
        Rc::new(move |_: &Request| {
            let inner = Box::new(HashWorkload::new(iterations, seed));
            Ok(Box::new(SimulatedCost::spread(inner, clock.clone(), total)) as Box<dyn Workload>)
        })
    };

    let mut builder = RouteTable::builder();
    builder.register(HEALTH_ROUTE, Handler::plain(ok_handler))?;
    builder.register(BLOCKING_ROUTE, Handler::Chunked(costed.clone()))?;
    builder.register(
        YIELDING_ROUTE,
        Handler::Yielding {
            factory: costed,
            budget: ChunkBudget::Iterations(config.chunk_iterations),
        },
    )?;
    Ok(builder.build())
}

/// Run the scenario to `config.horizon` and report every probe outcome.
pub fn run(config: &ScenarioConfig) -> Result<ScenarioReport, DispatchError> {
    let clock = Rc::new(ManualClock::new());
    let scheduler = Scheduler::new(clock.clone(), SchedulerConfig::default());
    let table = routes(config, &clock).map_err(|e| DispatchError::Handler {
        route: config.mode.route().to_string(),
        reason: e.to_string(),
    })?;
    let dispatcher = Dispatcher::new(&scheduler, table);

    info!(
        mode = %config.mode,
        compute_ms = millis(config.compute_duration),
        chunk_ms = millis(config.chunk_latency()),
        "starting scenario"
    );

    // The compute request is already queued when the first probe tick
    // fires, as if it arrived just before the health check.
    let finished: Rc<RefCell<Option<(Duration, Result<Bytes, DispatchError>)>>> =
        Rc::new(RefCell::new(None));
    let pending = match dispatcher.dispatch(config.mode.route(), Bytes::new())? {
        Dispatched::Pending(pending) => pending,
        Dispatched::Ready(_) => {
            return Err(DispatchError::Handler {
                route: config.mode.route().to_string(),
                reason: "compute route answered inline".to_string(),
            })
        }
    };
    {
        let finished = finished.clone();
        let clock = clock.clone();
        pending.on_complete(move |result| {
            *finished.borrow_mut() = Some((clock.now(), result));
        });
    }

    let poller = HealthPoller::new(&scheduler, DispatchProbe::new(&dispatcher, HEALTH_ROUTE));
    let log = OutcomeLog::new();
    poller.add_observer(log.clone());
    poller.add_observer(TracingObserver::new(HEALTH_ROUTE));
    poller.start(config.interval, config.timeout);

    scheduler.run_until(config.horizon);
    poller.stop();

    let outcome = finished.borrow_mut().take();
    let (compute_finished, digest) = match outcome {
        Some((at, Ok(bytes))) => (
            Some(at),
            Some(String::from_utf8_lossy(&bytes).trim_end().to_string()),
        ),
        Some((at, Err(e))) => {
            warn!(at_ms = millis(at), error = %e, "scenario computation failed");
            return Err(e);
        }
        None => {
            warn!("computation still running at the horizon, cancelling");
            pending.cancel();
            (None, None)
        }
    };

    let window_end = compute_finished.unwrap_or(config.horizon);
    let mut window = WindowSummary::default();
    let probes: Vec<ProbeRecord> = log
        .events()
        .into_iter()
        .map(|e| {
            if e.scheduled_at < window_end {
                match e.outcome {
                    ProbeOutcome::Succeeded => window.succeeded += 1,
                    ProbeOutcome::Failed(_) => window.failed += 1,
                    ProbeOutcome::TimedOut => window.timed_out += 1,
                }
            }
            ProbeRecord {
                attempt: e.attempt,
                scheduled_at_ms: millis(e.scheduled_at),
                resolved_at_ms: millis(e.resolved_at),
                outcome: e.outcome,
            }
        })
        .collect();

    let metrics = scheduler.metrics();
    let report = ScenarioReport {
        mode: config.mode,
        route: config.mode.route().to_string(),
        compute_finished_ms: compute_finished.map(millis),
        digest,
        probes,
        window,
        poller: poller.stats(),
        longest_task_ms: millis(metrics.longest_task),
        turns: metrics.turns,
    };
    info!(
        mode = %report.mode,
        window_succeeded = report.window.succeeded,
        window_timed_out = report.window.timed_out,
        longest_task_ms = report.longest_task_ms,
        "scenario finished"
    );
    Ok(report)
}
