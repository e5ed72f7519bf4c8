use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::scheduler::task::QueuedTask;
use crate::scheduler::types::{IoStatus, TurnReport};

use super::Scheduler;

impl Scheduler {
    /// Run one loop iteration.
    ///
    /// 1. Snapshot the ready queue.
    /// 2. Fire every timer that was due when the phase started.
    /// 3. Poll each I/O source once.
    /// 4. Run the snapshot in FIFO order.
    ///
    /// Anything scheduled during 2-4 waits for a later turn.
    pub fn turn(&self) -> TurnReport {
        self.take_snapshot();
        let timers_fired = self.fire_due_timers();
        let io_progress = self.poll_io();
        let tasks_run = self.drain_snapshot();
        self.inner.metrics.borrow_mut().turns += 1;
        TurnReport {
            timers_fired,
            io_progress,
            tasks_run,
        }
    }

    /// Execute every currently-ready task exactly once, in arrival order,
    /// without firing timers. Tasks they schedule are left for later.
    pub fn run_ready_queue(&self) -> usize {
        self.take_snapshot();
        self.drain_snapshot()
    }

    /// Turn until there is no ready work, no timer and no I/O source left.
    pub fn run_until_idle(&self) {
        loop {
            if self.has_ready_tasks() {
                self.turn();
                continue;
            }
            if !self.idle_wait(None) {
                debug!("event loop idle");
                return;
            }
            self.turn();
        }
    }

    /// Turn until loop time reaches `deadline`. When idle, the loop sleeps
    /// to the next timer or to `deadline`, so timers due at `deadline` still
    /// fire. Ready work left at the deadline stays queued.
    pub fn run_until(&self, deadline: Duration) {
        while self.now() < deadline {
            if !self.has_ready_tasks() {
                self.idle_wait(Some(deadline));
            }
            self.turn();
        }
    }

    /// Run `duration` of loop time from now.
    pub fn run_for(&self, duration: Duration) {
        self.run_until(self.now() + duration);
    }

    /// Turn while `keep_going` holds and there is something left to do.
    pub fn run_while<P>(&self, mut keep_going: P)
    where
        P: FnMut() -> bool,
    {
        loop {
            if !keep_going() {
                return;
            }
            if self.has_ready_tasks() {
                self.turn();
                continue;
            }
            if !self.idle_wait(None) {
                return;
            }
            self.turn();
        }
    }

    // ── Phases ──────────────────────────────────────────────────────

    fn take_snapshot(&self) {
        let mut ready = self.inner.ready.borrow_mut();
        let mut running = self.inner.running.borrow_mut();
        running.extend(ready.drain(..));
        let depth = running.len();
        drop(running);
        drop(ready);
        self.inner.metrics.borrow_mut().record_queue_depth(depth);
    }

    fn fire_due_timers(&self) -> usize {
        let now = self.now();
        let due = self.inner.timers.borrow_mut().take_due(now);
        let fired = due.len();
        for (id, deadline, entry) in due {
            let lateness = now.saturating_sub(deadline);
            if lateness > self.inner.config.slow_task_threshold {
                debug!(
                    timer = %id,
                    name = %entry.name,
                    late_ms = lateness.as_millis() as u64,
                    "timer fired late"
                );
            } else {
                trace!(timer = %id, name = %entry.name, "timer fired");
            }
            (entry.callback)(self);
        }
        self.inner.metrics.borrow_mut().timers_fired += fired as u64;
        fired
    }

    fn poll_io(&self) -> usize {
        let mut sources = std::mem::take(&mut *self.inner.io.borrow_mut());
        if sources.is_empty() {
            return 0;
        }
        let mut progress = 0;
        sources.retain_mut(|io| match io.source.poll(self) {
            IoStatus::Idle => true,
            IoStatus::Progress => {
                progress += 1;
                true
            }
            IoStatus::Closed => {
                debug!(source = %io.name, "io source closed");
                false
            }
        });
        // Sources registered while polling were pushed onto the emptied vec.
        let mut io = self.inner.io.borrow_mut();
        let added = std::mem::take(&mut *io);
        *io = sources;
        io.extend(added);
        progress
    }

    fn drain_snapshot(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inner.running.borrow_mut().pop_front();
            let Some(queued) = next else {
                return ran;
            };
            self.run_one(queued);
            ran += 1;
        }
    }

    fn run_one(&self, queued: QueuedTask) {
        let QueuedTask { id, task } = queued;
        let name = task.name;
        let started = self.now();
        trace!(task = %id, name = %name, "running task");

        (task.run)(self);

        let elapsed = self.now().saturating_sub(started);
        if elapsed > self.inner.config.slow_task_threshold {
            warn!(
                task = %id,
                name = %name,
                elapsed_ms = elapsed.as_millis() as u64,
                "task blocked the event loop"
            );
        }
        self.inner
            .metrics
            .borrow_mut()
            .record_execution(&name, elapsed);
    }

    /// Sleep until the next thing can happen: the next timer, the next I/O
    /// poll, or `limit`. Returns `false` when there is nothing to wait for.
    fn idle_wait(&self, limit: Option<Duration>) -> bool {
        let mut wake = self.next_timer_deadline();
        if self.has_io_sources() {
            let poll_at = self.now() + self.inner.config.idle_poll_interval;
            wake = Some(wake.map_or(poll_at, |w| w.min(poll_at)));
        }
        if let Some(limit) = limit {
            wake = Some(wake.map_or(limit, |w| w.min(limit)));
        }
        match wake {
            Some(at) => {
                self.inner.clock.sleep_until(at);
                true
            }
            None => false,
        }
    }
}
