//! Periodic health probing with a bounded per-attempt timeout.
//!
//! State machine per attempt: `Idle -> Requesting -> {Succeeded, Failed,
//! TimedOut} -> Idle`. Every terminal transition emits exactly one
//! [`ProbeEvent`]; at most one probe is in flight at a time.
//!
//! Ticks are fixed-rate: tick `k` is nominally due at `start + k * interval`
//! and the probe's timeout runs from the nominal tick, not from the moment
//! the loop got around to servicing it. Time the loop spends blocked
//! therefore counts against the probe. Ticks that were missed entirely are
//! coalesced into the latest one. A tick that finds the previous probe
//! still in flight is skipped.

mod observer;
mod probe;

pub use observer::{OutcomeLog, ProbeEvent, ProbeObserver, ProbeOutcome, TracingObserver};
pub use probe::{DispatchProbe, Probe, ProbeAttempt};

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace, warn};
use turnloop_core::PollerConfig;

use crate::scheduler::{Scheduler, TimerId};

/// Coarse poller state. Terminal outcomes are reported through events and
/// [`HealthPoller::last_outcome`]; the poller is back to `Idle` by the time
/// observers see them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Stopped,
    Idle,
    Requesting,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollerStats {
    pub issued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Ticks skipped because a probe was still in flight.
    pub skipped_ticks: u64,
    /// Ticks that passed unobserved while the loop was blocked.
    pub missed_ticks: u64,
}

impl PollerStats {
    pub fn outcomes(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out
    }
}

struct Inflight {
    attempt: ProbeAttempt,
    scheduled_at: Duration,
    timeout_timer: TimerId,
}

struct Schedule {
    running: bool,
    probe_immediately: bool,
    interval: Duration,
    timeout: Duration,
    /// Loop time of tick 0.
    origin: Duration,
    tick_timer: Option<TimerId>,
    inflight: Option<Inflight>,
    attempts: u64,
    last_outcome: Option<ProbeOutcome>,
    stats: PollerStats,
}

impl Schedule {
    fn nominal(&self, tick: u64) -> Duration {
        self.origin + self.interval * u32::try_from(tick).unwrap_or(u32::MAX)
    }
}

struct PollerCore {
    scheduler: Scheduler,
    probe: Box<dyn Probe>,
    observers: RefCell<Vec<Rc<dyn ProbeObserver>>>,
    schedule: RefCell<Schedule>,
}

/// Repeating, bounded-duration health probe.
pub struct HealthPoller {
    core: Rc<PollerCore>,
}

impl HealthPoller {
    pub fn new(scheduler: &Scheduler, probe: impl Probe + 'static) -> Self {
        Self {
            core: Rc::new(PollerCore {
                scheduler: scheduler.clone(),
                probe: Box::new(probe),
                observers: RefCell::new(Vec::new()),
                schedule: RefCell::new(Schedule {
                    running: false,
                    probe_immediately: true,
                    interval: Duration::ZERO,
                    timeout: Duration::ZERO,
                    origin: Duration::ZERO,
                    tick_timer: None,
                    inflight: None,
                    attempts: 0,
                    last_outcome: None,
                    stats: PollerStats::default(),
                }),
            }),
        }
    }

    /// Issue the first probe at start (default) or one interval later.
    pub fn probe_immediately(self, yes: bool) -> Self {
        self.core.schedule.borrow_mut().probe_immediately = yes;
        self
    }

    pub fn add_observer(&self, observer: impl ProbeObserver + 'static) {
        self.core.observers.borrow_mut().push(Rc::new(observer));
    }

    /// Arm the repeating probe. A poller that is already running keeps its
    /// current schedule.
    pub fn start(&self, interval: Duration, timeout: Duration) {
        let mut s = self.core.schedule.borrow_mut();
        if s.running {
            warn!("health poller already running, start ignored");
            return;
        }
        let interval = if interval.is_zero() {
            warn!("zero poll interval, using 1ms");
            Duration::from_millis(1)
        } else {
            interval
        };
        let now = self.core.scheduler.now();
        s.running = true;
        s.interval = interval;
        s.timeout = timeout;
        s.origin = if s.probe_immediately { now } else { now + interval };
        let first = s.nominal(0);
        drop(s);

        info!(
            interval_ms = interval.as_millis() as u64,
            timeout_ms = timeout.as_millis() as u64,
            "health poller started"
        );
        PollerCore::arm_tick(&self.core, 0, first);
    }

    /// Start from the `[poller]` config section.
    pub fn start_with(&self, config: &PollerConfig) {
        self.core.schedule.borrow_mut().probe_immediately = config.probe_immediately;
        self.start(config.interval(), config.timeout());
    }

    /// Halt re-arming and abort any in-flight probe. An aborted probe emits
    /// no outcome.
    pub fn stop(&self) {
        let (tick, inflight) = {
            let mut s = self.core.schedule.borrow_mut();
            if !s.running {
                return;
            }
            s.running = false;
            (s.tick_timer.take(), s.inflight.take())
        };
        if let Some(id) = tick {
            self.core.scheduler.clear_timer(id);
        }
        if let Some(inflight) = inflight {
            self.core.scheduler.clear_timer(inflight.timeout_timer);
            if inflight.attempt.settle_externally() {
                debug!(attempt = inflight.attempt.number(), "in-flight probe aborted by stop");
                inflight.attempt.abort();
            }
        }
        info!("health poller stopped");
    }

    pub fn state(&self) -> PollerState {
        let s = self.core.schedule.borrow();
        match (s.running, s.inflight.is_some()) {
            (false, _) => PollerState::Stopped,
            (true, false) => PollerState::Idle,
            (true, true) => PollerState::Requesting,
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.schedule.borrow().running
    }

    pub fn last_outcome(&self) -> Option<ProbeOutcome> {
        self.core.schedule.borrow().last_outcome.clone()
    }

    pub fn stats(&self) -> PollerStats {
        self.core.schedule.borrow().stats
    }
}

impl fmt::Debug for HealthPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthPoller")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

// ── Tick / timeout / resolution ──────────────────────────────────────

impl PollerCore {
    fn arm_tick(core: &Rc<PollerCore>, tick: u64, at: Duration) {
        let weak = Rc::downgrade(core);
        let id = core.scheduler.set_timer_at("poller tick", at, move |_| {
            if let Some(core) = weak.upgrade() {
                PollerCore::on_tick(&core, tick);
            }
        });
        core.schedule.borrow_mut().tick_timer = Some(id);
    }

    fn on_tick(core: &Rc<PollerCore>, tick: u64) {
        let now = core.scheduler.now();
        let mut s = core.schedule.borrow_mut();
        if !s.running {
            return;
        }
        s.tick_timer = None;

        let late = now.saturating_sub(s.nominal(tick));
        let behind = (late.as_nanos() / s.interval.as_nanos()) as u64;
        let current = tick + behind;
        if behind > 0 {
            s.stats.missed_ticks += behind;
            debug!(missed = behind, "poller ticks coalesced after a blocked loop");
        }
        let scheduled_at = s.nominal(current);
        let next_at = s.nominal(current + 1);

        if let Some(outstanding) = s.inflight.as_ref().map(|i| i.attempt.number()) {
            s.stats.skipped_ticks += 1;
            debug!(
                attempt = outstanding,
                "previous probe still in flight, tick skipped"
            );
            drop(s);
            PollerCore::arm_tick(core, current + 1, next_at);
            return;
        }

        s.attempts += 1;
        s.stats.issued += 1;
        let number = s.attempts;
        let deadline = scheduled_at + s.timeout;

        let on_resolve = Rc::downgrade(core);
        let attempt = ProbeAttempt::new(number, move |result| {
            if let Some(core) = on_resolve.upgrade() {
                core.finish(number, ProbeOutcome::from_result(result));
            }
        });
        let on_timeout = Rc::downgrade(core);
        let timeout_timer = core.scheduler.set_timer_at("probe timeout", deadline, move |_| {
            if let Some(core) = on_timeout.upgrade() {
                core.timed_out(number);
            }
        });
        s.inflight = Some(Inflight {
            attempt: attempt.clone(),
            scheduled_at,
            timeout_timer,
        });
        drop(s);

        trace!(attempt = number, state = "requesting", "probe issued");
        PollerCore::arm_tick(core, current + 1, next_at);
        core.probe.issue(&core.scheduler, attempt);
    }

    fn timed_out(&self, number: u64) {
        let attempt = match &self.schedule.borrow().inflight {
            Some(inflight) if inflight.attempt.number() == number => inflight.attempt.clone(),
            _ => return,
        };
        if !attempt.settle_externally() {
            trace!(attempt = number, "timeout lost the race to the probe");
            return;
        }
        attempt.abort();
        self.finish(number, ProbeOutcome::TimedOut);
    }

    fn finish(&self, number: u64, outcome: ProbeOutcome) {
        let now = self.scheduler.now();
        let event = {
            let mut s = self.schedule.borrow_mut();
            let owns = matches!(&s.inflight, Some(i) if i.attempt.number() == number);
            if !owns {
                return;
            }
            let Some(inflight) = s.inflight.take() else {
                return;
            };
            self.scheduler.clear_timer(inflight.timeout_timer);
            match outcome {
                ProbeOutcome::Succeeded => s.stats.succeeded += 1,
                ProbeOutcome::Failed(_) => s.stats.failed += 1,
                ProbeOutcome::TimedOut => s.stats.timed_out += 1,
            }
            s.last_outcome = Some(outcome.clone());
            ProbeEvent {
                attempt: number,
                outcome,
                scheduled_at: inflight.scheduled_at,
                resolved_at: now,
            }
        };
        trace!(attempt = number, state = event.outcome.label(), "probe settled");

        let observers = self.observers.borrow().clone();
        for observer in observers {
            observer.on_outcome(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ProbeError;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn scheduler() -> Scheduler {
        Scheduler::with_clock(Rc::new(ManualClock::new()))
    }

    /// Resolves each attempt after a fixed latency.
    fn delayed(latency: Duration, fail: bool) -> impl Probe {
        move |s: &Scheduler, attempt: ProbeAttempt| {
            s.set_timer("fake probe", latency, move |_| {
                if fail {
                    attempt.fail(ProbeError::Transport("refused".into()));
                } else {
                    attempt.succeed();
                }
            });
        }
    }

    fn poller_with_log(s: &Scheduler, probe: impl Probe + 'static) -> (HealthPoller, OutcomeLog) {
        let poller = HealthPoller::new(s, probe);
        let log = OutcomeLog::new();
        poller.add_observer(log.clone());
        (poller, log)
    }

    #[test]
    fn fast_probe_succeeds_every_interval() {
        let s = scheduler();
        let (poller, log) = poller_with_log(&s, delayed(ms(10), false));
        poller.start(ms(100), ms(50));

        s.run_until(ms(350));
        poller.stop();

        let events = log.events();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.outcome == ProbeOutcome::Succeeded));
        assert_eq!(events[1].scheduled_at, ms(100));
        assert_eq!(events[1].resolved_at, ms(110));
        assert_eq!(poller.stats().issued, 4);
    }

    #[test]
    fn slow_probe_times_out_and_late_answer_is_ignored() {
        let s = scheduler();
        let (poller, log) = poller_with_log(&s, delayed(ms(80), false));
        poller.start(ms(100), ms(50));

        s.run_until(ms(99));
        assert_eq!(log.len(), 1);
        let event = &log.events()[0];
        assert_eq!(event.outcome, ProbeOutcome::TimedOut);
        assert_eq!(event.resolved_at, ms(50));
        assert_eq!(poller.state(), PollerState::Idle);
        poller.stop();
    }

    #[test]
    fn transport_failure_is_reported() {
        let s = scheduler();
        let (poller, log) = poller_with_log(&s, delayed(ms(5), true));
        poller.start(ms(100), ms(50));
        s.run_until(ms(10));
        poller.stop();

        assert_eq!(
            poller.last_outcome(),
            Some(ProbeOutcome::Failed("probe transport error: refused".into()))
        );
        assert_eq!(log.len(), 1);
        assert_eq!(poller.stats().failed, 1);
    }

    #[test]
    fn overlapping_tick_is_skipped() {
        let s = scheduler();
        // Timeout longer than the interval so a probe can still be in
        // flight when the next tick comes due.
        let (poller, log) = poller_with_log(&s, delayed(ms(150), false));
        poller.start(ms(100), ms(200));

        s.run_until(ms(160));
        assert_eq!(poller.stats().skipped_ticks, 1);
        assert_eq!(log.len(), 1);
        assert_eq!(log.events()[0].resolved_at, ms(150));
        poller.stop();
    }

    #[test]
    fn stop_aborts_in_flight_probe_without_outcome() {
        let s = scheduler();
        let aborted = Rc::new(std::cell::Cell::new(0));
        let a = aborted.clone();
        let probe = move |_: &Scheduler, attempt: ProbeAttempt| {
            let a = a.clone();
            attempt.on_abort(move || a.set(a.get() + 1));
        };
        let (poller, log) = poller_with_log(&s, probe);
        poller.start(ms(100), ms(50));

        s.run_until(ms(10));
        assert_eq!(poller.state(), PollerState::Requesting);
        poller.stop();
        poller.stop();

        assert_eq!(poller.state(), PollerState::Stopped);
        assert_eq!(aborted.get(), 1);
        assert!(log.is_empty());
        s.run_until_idle();
        assert!(s.is_idle());
    }

    #[test]
    fn delayed_first_probe() {
        let s = scheduler();
        let (poller, log) = poller_with_log(&s, delayed(ms(1), false));
        let poller = poller.probe_immediately(false);
        poller.start(ms(100), ms(50));

        s.run_until(ms(99));
        assert!(log.is_empty());
        s.run_until(ms(150));
        assert_eq!(log.len(), 1);
        assert_eq!(log.events()[0].scheduled_at, ms(100));
        poller.stop();
    }

    #[test]
    fn blocked_loop_coalesces_missed_ticks() {
        let clock = Rc::new(ManualClock::new());
        let s = Scheduler::with_clock(clock.clone());
        let (poller, log) = poller_with_log(&s, delayed(ms(1), false));
        poller.start(ms(100), ms(50));

        s.run_until(ms(10));
        let c = clock.clone();
        s.spawn("hog", move |_| c.advance(ms(350)));
        s.run_until(ms(400));
        poller.stop();

        // Tick 0 answered, ticks 1 and 2 were swallowed by the hog, tick 3
        // was serviced late and timed out against its nominal deadline.
        let stats = poller.stats();
        assert_eq!(stats.missed_ticks, 2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.events()[1].scheduled_at, ms(300));
        assert_eq!(log.events()[1].outcome, ProbeOutcome::TimedOut);
    }

    #[test]
    fn restart_after_stop() {
        let s = scheduler();
        let (poller, log) = poller_with_log(&s, delayed(ms(1), false));
        poller.start(ms(100), ms(50));
        s.run_until(ms(10));
        poller.stop();
        s.run_until(ms(500));
        assert_eq!(log.len(), 1);

        poller.start(ms(100), ms(50));
        s.run_until(ms(510));
        poller.stop();
        assert_eq!(log.len(), 2);
        assert_eq!(log.events()[1].scheduled_at, ms(500));
    }
}
