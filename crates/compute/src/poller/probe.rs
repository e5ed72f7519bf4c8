use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::dispatcher::{Dispatched, Dispatcher};
use crate::error::ProbeError;
use crate::scheduler::{Scheduler, SettleToken};

type AbortHook = Box<dyn FnOnce()>;
type ResolveFn = Box<dyn FnOnce(Result<(), ProbeError>)>;

struct AttemptShared {
    number: u64,
    token: SettleToken,
    aborted: Cell<bool>,
    abort_hooks: RefCell<Vec<AbortHook>>,
    on_resolve: RefCell<Option<ResolveFn>>,
}

/// Resolver for one in-flight probe.
///
/// The probe implementation and the poller's timeout share one settle
/// token: whichever settles first owns the outcome. Resolving after the
/// timeout (or after a stop) is a logged no-op.
#[derive(Clone)]
pub struct ProbeAttempt {
    shared: Rc<AttemptShared>,
}

impl ProbeAttempt {
    pub(crate) fn new<F>(number: u64, on_resolve: F) -> Self
    where
        F: FnOnce(Result<(), ProbeError>) + 'static,
    {
        Self {
            shared: Rc::new(AttemptShared {
                number,
                token: SettleToken::new(),
                aborted: Cell::new(false),
                abort_hooks: RefCell::new(Vec::new()),
                on_resolve: RefCell::new(Some(Box::new(on_resolve))),
            }),
        }
    }

    /// 1-based attempt number.
    pub fn number(&self) -> u64 {
        self.shared.number
    }

    pub fn is_settled(&self) -> bool {
        self.shared.token.is_settled()
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.aborted.get()
    }

    /// Report success. Returns `false` if the attempt was already settled.
    pub fn succeed(&self) -> bool {
        self.resolve(Ok(()))
    }

    /// Report a transport failure. Returns `false` if already settled.
    pub fn fail(&self, error: ProbeError) -> bool {
        self.resolve(Err(error))
    }

    /// Register cleanup for the in-flight request. Runs at most once, when
    /// the attempt is aborted; runs immediately if it already was.
    pub fn on_abort<F>(&self, hook: F)
    where
        F: FnOnce() + 'static,
    {
        if self.shared.aborted.get() {
            hook();
        } else {
            self.shared.abort_hooks.borrow_mut().push(Box::new(hook));
        }
    }

    fn resolve(&self, result: Result<(), ProbeError>) -> bool {
        if !self.shared.token.try_settle() {
            debug!(attempt = self.number(), "late probe resolution ignored");
            return false;
        }
        // Nothing left to abort once the probe itself has answered.
        self.shared.abort_hooks.borrow_mut().clear();
        let callback = self.shared.on_resolve.borrow_mut().take();
        if let Some(callback) = callback {
            callback(result);
        }
        true
    }

    /// Claim the outcome on behalf of the poller (timeout or stop). Returns
    /// `false` if the probe already resolved.
    pub(crate) fn settle_externally(&self) -> bool {
        if !self.shared.token.try_settle() {
            return false;
        }
        self.shared.on_resolve.borrow_mut().take();
        true
    }

    /// Run the abort hooks. Idempotent.
    pub(crate) fn abort(&self) {
        if self.shared.aborted.replace(true) {
            return;
        }
        let hooks = std::mem::take(&mut *self.shared.abort_hooks.borrow_mut());
        trace!(attempt = self.number(), hooks = hooks.len(), "aborting probe");
        for hook in hooks {
            hook();
        }
    }
}

impl fmt::Debug for ProbeAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeAttempt")
            .field("number", &self.shared.number)
            .field("settled", &self.is_settled())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// A liveness check issued by the [`HealthPoller`](super::HealthPoller).
///
/// `issue` must not block. It starts the request and arranges for
/// `attempt` to be resolved later (or immediately), registering an abort
/// hook that tears the request down if the poller gives up on it.
pub trait Probe {
    fn issue(&self, scheduler: &Scheduler, attempt: ProbeAttempt);
}

impl<F> Probe for F
where
    F: Fn(&Scheduler, ProbeAttempt),
{
    fn issue(&self, scheduler: &Scheduler, attempt: ProbeAttempt) {
        self(scheduler, attempt)
    }
}

/// In-process loopback probe against a [`Dispatcher`] route.
///
/// Issuing models the probe request arriving at the server: a task is
/// enqueued that dispatches the route. The task, and any computation it
/// starts, is cancelled if the attempt is aborted.
#[derive(Debug, Clone)]
pub struct DispatchProbe {
    dispatcher: Dispatcher,
    route: String,
}

impl DispatchProbe {
    pub fn new(dispatcher: &Dispatcher, route: impl Into<String>) -> Self {
        Self {
            dispatcher: dispatcher.clone(),
            route: route.into(),
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }
}

impl Probe for DispatchProbe {
    fn issue(&self, scheduler: &Scheduler, attempt: ProbeAttempt) {
        let dispatcher = self.dispatcher.clone();
        let route = self.route.clone();
        let resolver = attempt.clone();

        let task = scheduler.spawn(format!("probe {route}"), move |_| {
            match dispatcher.dispatch(&route, Bytes::new()) {
                Ok(Dispatched::Ready(_)) => {
                    resolver.succeed();
                }
                Ok(Dispatched::Pending(pending)) => {
                    let canceller = pending.clone();
                    resolver.on_abort(move || {
                        canceller.cancel();
                    });
                    let resolver = resolver.clone();
                    pending.on_complete(move |result| {
                        match result {
                            Ok(_) => resolver.succeed(),
                            Err(e) => resolver.fail(ProbeError::Transport(e.to_string())),
                        };
                    });
                }
                Err(e) => {
                    resolver.fail(ProbeError::Transport(e.to_string()));
                }
            }
        });

        let scheduler = scheduler.clone();
        attempt.on_abort(move || {
            scheduler.cancel(task);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (ProbeAttempt, Rc<RefCell<Vec<Result<(), ProbeError>>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let attempt = ProbeAttempt::new(1, move |r| s.borrow_mut().push(r));
        (attempt, seen)
    }

    #[test]
    fn first_resolution_wins() {
        let (attempt, seen) = recording();
        assert!(attempt.succeed());
        assert!(!attempt.fail(ProbeError::Transport("late".into())));
        assert_eq!(*seen.borrow(), vec![Ok(())]);
    }

    #[test]
    fn external_settle_suppresses_probe_result() {
        let (attempt, seen) = recording();
        assert!(attempt.settle_externally());
        assert!(!attempt.succeed());
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn abort_hooks_run_once() {
        let (attempt, _) = recording();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        attempt.on_abort(move || c.set(c.get() + 1));
        attempt.abort();
        attempt.abort();
        assert_eq!(count.get(), 1);

        let late = Rc::new(Cell::new(false));
        let l = late.clone();
        attempt.on_abort(move || l.set(true));
        assert!(late.get(), "hooks registered after abort run immediately");
    }

    #[test]
    fn resolved_attempt_drops_abort_hooks() {
        let (attempt, _) = recording();
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        attempt.on_abort(move || r.set(true));
        attempt.succeed();
        attempt.abort();
        assert!(!ran.get());
    }
}
