//! De-duplicating work queue keyed by resource identity.
//!
//! An identity sits in the queue at most once and is never handed to two
//! workers at the same time. Adding an identity that a worker currently
//! holds marks it dirty; it is queued again when the worker calls
//! [`WorkQueue::done`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::types::Identity;

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Identity>,
    queued: HashSet<Identity>,
    in_flight: HashSet<Identity>,
    dirty: HashSet<Identity>,
    /// Earliest due time per identity waiting on a delay.
    delayed: HashMap<Identity, Instant>,
    shutdown: bool,
}

impl QueueState {
    fn push(&mut self, id: Identity) {
        if self.in_flight.contains(&id) {
            self.dirty.insert(id);
        } else if self.queued.insert(id.clone()) {
            self.ready.push_back(id);
        }
    }

    /// Move every delayed entry that is due into the ready queue.
    fn promote(&mut self, now: Instant) {
        let due: Vec<Identity> = self
            .delayed
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            self.delayed.remove(&id);
            self.push(id);
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.values().min().copied()
    }

    fn pop(&mut self) -> Option<Identity> {
        let id = self.ready.pop_front()?;
        self.queued.remove(&id);
        self.in_flight.insert(id.clone());
        Some(id)
    }
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    wake: Condvar,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, id: Identity) {
        let mut st = self.lock();
        if st.shutdown {
            return;
        }
        st.delayed.remove(&id);
        st.push(id);
        self.wake.notify_one();
    }

    /// Queue `id` once `delay` has passed. An earlier pending delay wins.
    pub fn add_after(&self, id: Identity, delay: Duration) {
        if delay.is_zero() {
            self.add(id);
            return;
        }
        let mut st = self.lock();
        if st.shutdown || st.queued.contains(&id) {
            return;
        }
        let at = Instant::now() + delay;
        let entry = st.delayed.entry(id).or_insert(at);
        if at < *entry {
            *entry = at;
        }
        self.wake.notify_one();
    }

    /// Block until an identity is ready. `None` once the queue is shut down.
    pub fn take(&self) -> Option<Identity> {
        let mut st = self.lock();
        loop {
            if st.shutdown {
                return None;
            }
            st.promote(Instant::now());
            if let Some(id) = st.pop() {
                return Some(id);
            }
            st = match st.next_due() {
                Some(at) => {
                    let wait = at.saturating_duration_since(Instant::now());
                    self.wake
                        .wait_timeout(st, wait)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self.wake.wait(st).unwrap_or_else(|e| e.into_inner()),
            };
        }
    }

    /// Non-blocking [`take`](Self::take); delayed entries that are not due
    /// yet are left alone.
    pub fn try_take(&self) -> Option<Identity> {
        let mut st = self.lock();
        if st.shutdown {
            return None;
        }
        st.promote(Instant::now());
        st.pop()
    }

    /// Release `id` after processing; requeue it if it was added meanwhile.
    pub fn done(&self, id: &Identity) {
        let mut st = self.lock();
        st.in_flight.remove(id);
        if st.dirty.remove(id) && !st.shutdown {
            st.push(id.clone());
            self.wake.notify_one();
        }
    }

    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.wake.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Identities ready to be taken.
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identities waiting on a delay.
    pub fn delayed_len(&self) -> usize {
        self.lock().delayed.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(name: &str) -> Identity {
        Identity::new("ns", name)
    }

    #[test]
    fn deduplicates_queued_entries() {
        let q = WorkQueue::new();
        q.add(id("a"));
        q.add(id("a"));
        q.add(id("b"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_take(), Some(id("a")));
        assert_eq!(q.try_take(), Some(id("b")));
        assert_eq!(q.try_take(), None);
    }

    #[test]
    fn readd_while_in_flight_waits_for_done() {
        let q = WorkQueue::new();
        q.add(id("a"));
        let taken = q.try_take().unwrap();
        q.add(id("a"));
        assert_eq!(q.try_take(), None);
        q.done(&taken);
        assert_eq!(q.try_take(), Some(id("a")));
    }

    #[test]
    fn delayed_entries_become_ready() {
        let q = WorkQueue::new();
        q.add_after(id("a"), Duration::from_millis(20));
        assert_eq!(q.try_take(), None);
        assert_eq!(q.delayed_len(), 1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(q.try_take(), Some(id("a")));
    }

    #[test]
    fn immediate_add_cancels_delay() {
        let q = WorkQueue::new();
        q.add_after(id("a"), Duration::from_secs(60));
        q.add(id("a"));
        assert_eq!(q.try_take(), Some(id("a")));
        assert_eq!(q.delayed_len(), 0);
    }

    #[test]
    fn take_blocks_until_delay_passes() {
        let q = WorkQueue::new();
        q.add_after(id("a"), Duration::from_millis(20));
        let started = Instant::now();
        assert_eq!(q.take(), Some(id("a")));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn shutdown_wakes_blocked_workers() {
        let q = Arc::new(WorkQueue::new());
        let worker = {
            let q = q.clone();
            std::thread::spawn(move || q.take())
        };
        std::thread::sleep(Duration::from_millis(10));
        q.shutdown();
        assert_eq!(worker.join().unwrap(), None);
        q.add(id("a"));
        assert!(q.is_empty());
    }
}
