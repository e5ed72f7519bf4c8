//! A blocking computation starves the health poller; a yielding one does not.

use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;

use turnloop_compute::chunker::{ChunkBudget, HashWorkload, SimulatedCost, Workload};
use turnloop_compute::dispatcher::{ok_handler, Dispatched, Handler, Request};
use turnloop_compute::scenario::{self, ScenarioConfig, ScenarioMode};
use turnloop_compute::{
    DispatchError, DispatchProbe, Dispatcher, HealthPoller, ManualClock, OutcomeLog, ProbeOutcome,
    RouteTable, Scheduler,
};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn blocking_compute_times_out_probes_in_window() {
    let report = scenario::run(&ScenarioConfig::new(ScenarioMode::Blocking)).unwrap();

    let outcomes: Vec<(u64, ProbeOutcome)> = report
        .probes
        .iter()
        .map(|p| (p.scheduled_at_ms, p.outcome.clone()))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (0, ProbeOutcome::TimedOut),
            (5000, ProbeOutcome::TimedOut),
            (10_000, ProbeOutcome::Succeeded),
        ]
    );
    assert_eq!(report.compute_finished_ms, Some(8000));
    assert_eq!(report.window.timed_out, 2);
    assert_eq!(report.window.succeeded, 0);
    assert_eq!(report.longest_task_ms, 8000);
}

#[test]
fn yielding_compute_lets_probes_succeed() {
    let config = ScenarioConfig::new(ScenarioMode::Yielding);
    let chunk = config.chunk_latency().as_millis() as u64;
    let report = scenario::run(&config).unwrap();

    assert_eq!(report.window.timed_out, 0);
    assert_eq!(report.window.succeeded, 2);
    assert_eq!(report.probes.len(), 3);
    for probe in &report.probes {
        assert_eq!(probe.outcome, ProbeOutcome::Succeeded);
        assert!(
            probe.resolved_at_ms - probe.scheduled_at_ms <= chunk,
            "probe {} waited longer than one chunk",
            probe.attempt
        );
    }
    assert_eq!(report.longest_task_ms, chunk);
}

#[test]
fn both_modes_compute_the_same_digest() {
    let blocking = scenario::run(&ScenarioConfig::new(ScenarioMode::Blocking)).unwrap();
    let yielding = scenario::run(&ScenarioConfig::new(ScenarioMode::Yielding)).unwrap();
    assert!(blocking.digest.is_some());
    assert_eq!(blocking.digest, yielding.digest);
}

/// The same property for arbitrary D > T with chunk latency well below T,
/// assembled by hand instead of through the canned scenario.
#[test]
fn starvation_depends_on_chunk_latency_not_total_duration() {
    for (mode, expect_timeout) in [(false, true), (true, false)] {
        let clock = Rc::new(ManualClock::new());
        let scheduler = Scheduler::with_clock(clock.clone());

        let c = clock.clone();
        let factory = move |_: &Request| {
            let inner = Box::new(HashWorkload::new(300, 9));
            let costed: Box<dyn Workload> = Box::new(SimulatedCost::spread(inner, c.clone(), ms(3000)));
            Ok::<_, DispatchError>(costed)
        };
        let handler = if mode {
            Handler::yielding(ChunkBudget::Iterations(10), factory)
        } else {
            Handler::chunked(factory)
        };
        let mut routes = RouteTable::builder();
        routes.register("/health", Handler::plain(ok_handler)).unwrap();
        routes.register("/work", handler).unwrap();
        let dispatcher = Dispatcher::new(&scheduler, routes.build());

        let Dispatched::Pending(work) = dispatcher.dispatch("/work", Bytes::new()).unwrap() else {
            panic!("work route must be deferred");
        };
        let poller = HealthPoller::new(&scheduler, DispatchProbe::new(&dispatcher, "/health"));
        let log = OutcomeLog::new();
        poller.add_observer(log.clone());
        poller.start(ms(1000), ms(500));

        scheduler.run_until(ms(3200));
        poller.stop();
        scheduler.run_until_idle();

        assert!(work.is_ready());
        let timed_out = log.count(&ProbeOutcome::TimedOut);
        if expect_timeout {
            assert!(timed_out > 0, "blocking run should starve the poller");
        } else {
            assert_eq!(timed_out, 0, "yielding run must not starve the poller");
            assert_eq!(log.len(), 4);
        }
    }
}
