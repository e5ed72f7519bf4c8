//! Single-threaded cooperative event loop.
//!
//! The [`Scheduler`] owns a FIFO ready queue, a deadline-ordered timer set
//! and a list of non-blocking [`IoSource`]s. Every turn runs the timers
//! phase, the I/O poll phase and then the ready tasks captured at the start
//! of the turn. Work scheduled during a turn never runs in that same turn.
//!
//! Completion races (timeouts, cancellation, early errors) are resolved with
//! the primitives in [`settle`].

pub mod metrics;
pub mod runner;
pub mod settle;
pub mod task;
pub mod timers;
pub mod types;

pub use metrics::SchedulerMetrics;
pub use runner::{IoSource, Scheduler};
pub use settle::{Promise, SettleToken};
pub use task::{CancelFn, Task, TaskFn, TaskId, TimerId};
pub use timers::TimerFn;
pub use types::{IoStatus, SchedulerConfig, TurnReport};
