//! Event loop runner -- owns the ready queue, timers and I/O sources.
//!
//! Split into focused submodules:
//! - `core`: Scheduler handle, constructor and accessors
//! - `scheduling`: enqueueing, cancellation, timers, I/O registration
//! - `execution`: turn phases and run drivers

mod core;
mod execution;
mod scheduling;

pub use self::core::{IoSource, Scheduler};
