//! Single-shot completion primitives.
//!
//! Everything that can finish in more than one way (probe vs. timeout,
//! chunk result vs. cancellation, pipeline success vs. error) settles through
//! one of these, so the first resolution wins and later ones are no-ops.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Shared "already resolved" flag.
///
/// Both racing paths hold a clone; whichever calls [`SettleToken::try_settle`]
/// first gets `true` and owns the outcome, the other sees `false` and must do
/// nothing.
#[derive(Clone, Default)]
pub struct SettleToken {
    settled: Rc<Cell<bool>>,
}

impl SettleToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the outcome. Returns `true` exactly once.
    pub fn try_settle(&self) -> bool {
        !self.settled.replace(true)
    }

    pub fn is_settled(&self) -> bool {
        self.settled.get()
    }
}

impl fmt::Debug for SettleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettleToken")
            .field("settled", &self.settled.get())
            .finish()
    }
}

struct PromiseState<T> {
    token: SettleToken,
    value: Option<T>,
    callback: Option<Box<dyn FnOnce(T)>>,
}

/// A value that is resolved at most once and consumed at most once.
///
/// The consumer either polls with [`Promise::try_take`] or registers a single
/// callback with [`Promise::on_settle`]; the callback fires with the value as
/// soon as both the value and the callback are present.
pub struct Promise<T> {
    state: Rc<RefCell<PromiseState<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: 'static> Promise<T> {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(PromiseState {
                token: SettleToken::new(),
                value: None,
                callback: None,
            })),
        }
    }

    /// Resolve with `value`. Returns `false` (and drops `value`) if the
    /// promise was already resolved.
    pub fn resolve(&self, value: T) -> bool {
        let callback = {
            let mut state = self.state.borrow_mut();
            if !state.token.try_settle() {
                return false;
            }
            match state.callback.take() {
                Some(cb) => cb,
                None => {
                    state.value = Some(value);
                    return true;
                }
            }
        };
        callback(value);
        true
    }

    pub fn is_settled(&self) -> bool {
        self.state.borrow().token.is_settled()
    }

    /// Take the value if it has been resolved and not yet consumed.
    pub fn try_take(&self) -> Option<T> {
        self.state.borrow_mut().value.take()
    }

    /// Run `callback` with the value once it is available. Replaces any
    /// previously registered callback.
    pub fn on_settle<F>(&self, callback: F)
    where
        F: FnOnce(T) + 'static,
    {
        let ready = self.state.borrow_mut().value.take();
        match ready {
            Some(value) => callback(value),
            None => self.state.borrow_mut().callback = Some(Box::new(callback)),
        }
    }
}

impl<T: 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Promise")
            .field("settled", &state.token.is_settled())
            .field("holds_value", &state.value.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_settles_once() {
        let a = SettleToken::new();
        let b = a.clone();
        assert!(a.try_settle());
        assert!(!b.try_settle());
        assert!(b.is_settled());
    }

    #[test]
    fn first_resolution_wins() {
        let p = Promise::new();
        assert!(p.resolve(1));
        assert!(!p.resolve(2));
        assert_eq!(p.try_take(), Some(1));
        assert_eq!(p.try_take(), None);
        assert!(p.is_settled());
    }

    #[test]
    fn callback_registered_before_resolution() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let p = Promise::new();
        let s = seen.clone();
        p.on_settle(move |v: u32| s.borrow_mut().push(v));
        assert!(seen.borrow().is_empty());
        p.resolve(7);
        p.resolve(8);
        assert_eq!(*seen.borrow(), vec![7]);
        assert_eq!(p.try_take(), None);
    }

    #[test]
    fn callback_registered_after_resolution() {
        let seen = Rc::new(Cell::new(0));
        let p = Promise::new();
        p.resolve(3);
        let s = seen.clone();
        p.on_settle(move |v: u32| s.set(v));
        assert_eq!(seen.get(), 3);
    }
}
