use core::hash::Hash;
use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;

/// A shared FIFO worklist with quiescence detection.
///
/// Insertion order is first-in first-out, which approximates a breadth-first
/// construction of the exploded supergraph; any monotone order converges to
/// the same fixed point, FIFO just tends to get there faster. Items already
/// queued are not queued twice; an item that is popped and re-pushed while
/// being processed queues normally.
///
/// Workers loop on [`next`](Self::next) and acknowledge each item with
/// [`task_done`](Self::task_done). `next` blocks while the queue is empty
/// but items are still in flight, because an in-flight item may fan out new
/// work; it returns `None` once the queue is empty and nothing is in
/// flight, at which point every blocked worker is released.
pub struct Worklist<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

struct State<T> {
    queue: VecDeque<T>,
    queued: FxHashSet<T>,
    in_flight: usize,
    aborted: bool,
}

impl<T: Clone + Eq + Hash> Default for Worklist<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash> Worklist<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                queued: FxHashSet::default(),
                in_flight: 0,
                aborted: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        if state.aborted {
            return;
        }
        if state.queued.insert(item.clone()) {
            state.queue.push_back(item);
            self.cond.notify_one();
        }
    }

    /// Pops the next item, blocking while work is still in flight. Returns
    /// `None` on quiescence or after [`abort`](Self::abort).
    pub fn next(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return None;
            }
            if let Some(item) = state.queue.pop_front() {
                state.queued.remove(&item);
                state.in_flight += 1;
                return Some(item);
            }
            if state.in_flight == 0 {
                self.cond.notify_all();
                return None;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Acknowledges one item obtained from [`next`](Self::next). When this
    /// was the last item in flight and the queue is empty, all blocked
    /// workers are released.
    pub fn task_done(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.in_flight > 0);
        state.in_flight -= 1;
        if state.in_flight == 0 && state.queue.is_empty() {
            self.cond.notify_all();
        }
    }

    /// Drops all pending work and releases every worker. Items already in
    /// flight finish normally.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        state.queue.clear();
        state.queued.clear();
        self.cond.notify_all();
    }

    /// Resets the worklist for a fresh run. Must not be called while
    /// workers are active.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.in_flight, 0);
        state.queue.clear();
        state.queued.clear();
        state.aborted = false;
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }
}
