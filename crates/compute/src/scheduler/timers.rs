use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use super::runner::Scheduler;
use super::task::TimerId;

/// Callback fired when a timer's deadline passes.
pub type TimerFn = Box<dyn FnOnce(&Scheduler)>;

pub(crate) struct TimerEntry {
    pub(crate) name: String,
    pub(crate) callback: TimerFn,
}

/// Deadline-ordered timer set.
///
/// Entries are keyed by `(deadline, id)` so timers with equal deadlines
/// fire in arming order. Cleared timers are removed from the callback map
/// and their heap keys are skipped lazily.
#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<(Duration, TimerId)>>,
    entries: HashMap<TimerId, TimerEntry>,
}

impl TimerQueue {
    pub(crate) fn insert(&mut self, id: TimerId, deadline: Duration, entry: TimerEntry) {
        self.heap.push(Reverse((deadline, id)));
        self.entries.insert(id, entry);
    }

    pub(crate) fn remove(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest live deadline.
    pub(crate) fn next_deadline(&mut self) -> Option<Duration> {
        self.discard_cleared();
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Remove and return every live timer due at `now`, in firing order.
    pub(crate) fn take_due(&mut self, now: Duration) -> Vec<(TimerId, Duration, TimerEntry)> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(entry) = self.entries.remove(&id) {
                due.push((id, deadline, entry));
            }
        }
        due
    }

    fn discard_cleared(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.entries.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}
