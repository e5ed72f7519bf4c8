use std::time::Duration;

use thiserror::Error;
use turnloop_core::RouteKind;

use crate::scheduler::TaskId;

/// Failure of a chunked computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    /// The computation was aborted between chunks; its partial state was
    /// dropped.
    #[error("computation cancelled ({0})")]
    CancelledTask(TaskId),

    #[error("workload failed at iteration {index}: {reason}")]
    Workload { index: u64, reason: String },
}

/// Errors surfaced by [`Dispatcher::dispatch`](crate::dispatcher::Dispatcher::dispatch).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("route not found: {0}")]
    RouteNotFound(String),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error("handler for {route} failed: {reason}")]
    Handler { route: String, reason: String },
}

impl DispatchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::RouteNotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Compute(ComputeError::CancelledTask(_)))
    }
}

/// Errors raised while building a route table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("route registered twice: {0}")]
    DuplicateRoute(String),

    #[error("route {route}: unknown handler {handler:?}")]
    UnknownHandler { route: String, handler: String },

    #[error("route {route}: handler {handler:?} cannot run as {kind}")]
    KindMismatch {
        route: String,
        handler: String,
        kind: RouteKind,
    },
}

/// Why a probe did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("probe transport error: {0}")]
    Transport(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}
