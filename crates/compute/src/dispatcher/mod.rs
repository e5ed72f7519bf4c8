//! Route key to handler dispatch.
//!
//! Routes are registered once into a [`RouteTableBuilder`] and frozen into
//! an immutable [`RouteTable`]. Plain handlers answer synchronously; chunked
//! and yielding handlers submit a [`WorkChunker`] to the scheduler and hand
//! back a [`PendingResponse`].

mod handlers;

pub use handlers::{echo_handler, hash_factory, ok_handler, HEALTH_BODY};

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use tracing::{debug, info, trace};
use turnloop_core::RouteKind;

use crate::chunker::{spawn_chunked, ChunkBudget, ChunkedJob, WorkChunker, Workload};
use crate::error::{DispatchError, RouteError};
use crate::scheduler::Scheduler;

/// An incoming request as seen by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub route: String,
    pub body: Bytes,
}

/// Synchronous handler body.
pub type PlainFn = Rc<dyn Fn(&Request) -> Result<Bytes, DispatchError>>;

/// Builds the workload a chunked or yielding route computes.
pub type WorkloadFactory = Rc<dyn Fn(&Request) -> Result<Box<dyn Workload>, DispatchError>>;

/// Handler descriptor. The set of kinds is closed.
#[derive(Clone)]
pub enum Handler {
    /// Invoked inline by `dispatch`.
    Plain(PlainFn),
    /// Whole computation in one chunk; blocks the loop while it runs.
    Chunked(WorkloadFactory),
    /// Bounded chunks with a yield between them.
    Yielding {
        factory: WorkloadFactory,
        budget: ChunkBudget,
    },
}

impl Handler {
    pub fn plain<F>(f: F) -> Self
    where
        F: Fn(&Request) -> Result<Bytes, DispatchError> + 'static,
    {
        Handler::Plain(Rc::new(f))
    }

    pub fn chunked<F>(factory: F) -> Self
    where
        F: Fn(&Request) -> Result<Box<dyn Workload>, DispatchError> + 'static,
    {
        Handler::Chunked(Rc::new(factory))
    }

    pub fn yielding<F>(budget: ChunkBudget, factory: F) -> Self
    where
        F: Fn(&Request) -> Result<Box<dyn Workload>, DispatchError> + 'static,
    {
        Handler::Yielding {
            factory: Rc::new(factory),
            budget,
        }
    }

    pub fn kind(&self) -> RouteKind {
        match self {
            Handler::Plain(_) => RouteKind::Plain,
            Handler::Chunked(_) => RouteKind::Chunked,
            Handler::Yielding { .. } => RouteKind::Yielding,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Yielding { budget, .. } => f
                .debug_struct("Yielding")
                .field("budget", budget)
                .finish_non_exhaustive(),
            other => write!(f, "{}", other.kind()),
        }
    }
}

// ── Route table ─────────────────────────────────────────────────────

/// Collects routes before the table is frozen.
#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    routes: HashMap<String, Handler>,
}

impl RouteTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`. A key can only be registered once.
    pub fn register(&mut self, key: impl Into<String>, handler: Handler) -> Result<&mut Self, RouteError> {
        let key = key.into();
        if self.routes.contains_key(&key) {
            return Err(RouteError::DuplicateRoute(key));
        }
        debug!(route = %key, kind = %handler.kind(), "route registered");
        self.routes.insert(key, handler);
        Ok(self)
    }

    pub fn build(self) -> RouteTable {
        info!(routes = self.routes.len(), "route table built");
        RouteTable {
            routes: self.routes,
        }
    }
}

/// Immutable route key to handler map.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, Handler>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::new()
    }

    pub fn get(&self, key: &str) -> Option<&Handler> {
        self.routes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.routes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

// ── Dispatch ───────────────────────────────────────────────────────

/// Result of a successful dispatch.
#[derive(Debug)]
pub enum Dispatched {
    /// A plain handler answered inline.
    Ready(Bytes),
    /// A computation was submitted to the scheduler.
    Pending(PendingResponse),
}

/// A response that a chunked or yielding handler is still computing.
#[derive(Debug, Clone)]
pub struct PendingResponse {
    route: Rc<str>,
    job: ChunkedJob,
}

impl PendingResponse {
    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn is_ready(&self) -> bool {
        self.job.is_finished()
    }

    pub fn try_take(&self) -> Option<Result<Bytes, DispatchError>> {
        self.job.try_take().map(|r| r.map_err(DispatchError::from))
    }

    /// Call `callback` once with the response. Fires immediately if the
    /// response is already available.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(Result<Bytes, DispatchError>) + 'static,
    {
        self.job
            .on_complete(move |r| callback(r.map_err(DispatchError::from)));
    }

    /// Abort the computation. Returns `false` if it already finished.
    pub fn cancel(&self) -> bool {
        self.job.cancel()
    }
}

/// Looks up handlers and starts them on the scheduler.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    scheduler: Scheduler,
    routes: Rc<RouteTable>,
}

impl Dispatcher {
    pub fn new(scheduler: &Scheduler, routes: RouteTable) -> Self {
        Self {
            scheduler: scheduler.clone(),
            routes: Rc::new(routes),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Route `key` with `body`.
    ///
    /// Plain handlers run before this returns. Chunked and yielding
    /// handlers only have their first chunk enqueued; the caller observes
    /// the result through the returned [`PendingResponse`].
    pub fn dispatch(&self, key: &str, body: Bytes) -> Result<Dispatched, DispatchError> {
        let handler = self
            .routes
            .get(key)
            .ok_or_else(|| DispatchError::RouteNotFound(key.to_string()))?;
        let request = Request {
            route: key.to_string(),
            body,
        };
        trace!(route = key, kind = %handler.kind(), "dispatching");

        let (factory, budget) = match handler {
            Handler::Plain(f) => return f(&request).map(Dispatched::Ready),
            Handler::Chunked(factory) => (factory, ChunkBudget::Unbounded),
            Handler::Yielding { factory, budget } => (factory, *budget),
        };
        let workload = factory(&request)?;
        let job = spawn_chunked(&self.scheduler, key, WorkChunker::new(workload, budget));
        Ok(Dispatched::Pending(PendingResponse {
            route: Rc::from(key),
            job,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::HashWorkload;
    use crate::clock::ManualClock;

    fn table() -> RouteTable {
        let mut b = RouteTable::builder();
        b.register("/health", Handler::plain(ok_handler)).unwrap();
        b.register(
            "/compute",
            Handler::chunked(|_| Ok(Box::new(HashWorkload::new(20, 1)) as Box<dyn Workload>)),
        )
        .unwrap();
        b.register(
            "/compute-fast",
            Handler::yielding(ChunkBudget::Iterations(5), |_| {
                Ok(Box::new(HashWorkload::new(20, 1)) as Box<dyn Workload>)
            }),
        )
        .unwrap();
        b.build()
    }

    fn setup() -> (Scheduler, Dispatcher) {
        let scheduler = Scheduler::with_clock(Rc::new(ManualClock::new()));
        let dispatcher = Dispatcher::new(&scheduler, table());
        (scheduler, dispatcher)
    }

    #[test]
    fn plain_route_answers_inline() {
        let (scheduler, d) = setup();
        match d.dispatch("/health", Bytes::new()).unwrap() {
            Dispatched::Ready(body) => assert_eq!(body, Bytes::from_static(HEALTH_BODY)),
            Dispatched::Pending(_) => panic!("plain route must not defer"),
        }
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[test]
    fn unknown_route_is_not_found() {
        let (_, d) = setup();
        let err = d.dispatch("/nope", Bytes::new()).unwrap_err();
        assert_eq!(err, DispatchError::RouteNotFound("/nope".into()));
        assert!(err.is_not_found());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut b = RouteTable::builder();
        b.register("/a", Handler::plain(ok_handler)).unwrap();
        let err = b.register("/a", Handler::plain(echo_handler)).unwrap_err();
        assert_eq!(err, RouteError::DuplicateRoute("/a".into()));
        assert_eq!(b.build().len(), 1);
    }

    #[test]
    fn chunked_and_yielding_routes_agree() {
        let (scheduler, d) = setup();
        let Dispatched::Pending(blocking) = d.dispatch("/compute", Bytes::new()).unwrap() else {
            panic!("expected pending");
        };
        let Dispatched::Pending(yielding) = d.dispatch("/compute-fast", Bytes::new()).unwrap() else {
            panic!("expected pending");
        };
        assert!(!blocking.is_ready());

        scheduler.run_until_idle();
        let a = blocking.try_take().unwrap().unwrap();
        let b = yielding.try_take().unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(scheduler.metrics().tasks_executed["/compute"], 1);
        assert_eq!(scheduler.metrics().tasks_executed["/compute-fast"], 4);
    }

    #[test]
    fn cancelled_pending_response_reports_cancelled() {
        let (scheduler, d) = setup();
        let Dispatched::Pending(p) = d.dispatch("/compute-fast", Bytes::new()).unwrap() else {
            panic!("expected pending");
        };
        let seen = Rc::new(std::cell::RefCell::new(None));
        let s = seen.clone();
        p.on_complete(move |r| *s.borrow_mut() = Some(r));

        assert!(p.cancel());
        scheduler.run_until_idle();
        let result = seen.borrow_mut().take().unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn keys_are_sorted() {
        assert_eq!(table().keys(), vec!["/compute", "/compute-fast", "/health"]);
    }
}
