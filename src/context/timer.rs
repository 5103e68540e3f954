//! Deadline timers for timer contexts.
//!
//! Two backends, selected by [`TimerBackend`]:
//!
//! - **Dedicated**: one OS thread per deadline. The thread sleeps on a
//!   condvar until the deadline or an explicit stop, whichever comes first.
//! - **Shared**: a single reactor thread owns a min-heap of deadlines for
//!   every timer context in the process.
//!
//! Timers hold only a weak reference to their node, so a pending timer never
//! keeps a context alive. Dropping the [`DeadlineTimer`] stops it; for the
//! dedicated backend the thread is joined unless the drop happens on the
//! timer thread itself.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{JoinHandle, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::node::{self, Node};
use crate::config::{self, TimerBackend};
use crate::error::{Error, Result};
use crate::tracing_compat::{debug, trace, warn};

/// A running deadline timer. Stops on drop.
#[derive(Debug)]
pub(crate) enum DeadlineTimer {
    // Payloads are held only for their Drop.
    #[allow(dead_code)]
    Dedicated(DedicatedTimer),
    #[allow(dead_code)]
    Shared(SharedTimer),
}

impl DeadlineTimer {
    /// Arms a timer that cancels `node` with "deadline exceeded" at
    /// `deadline`, using the configured backend.
    pub(crate) fn start(node: Weak<Node>, deadline: Instant) -> Result<Self> {
        let config = config::global();
        match config.timer_backend {
            TimerBackend::Dedicated => {
                match DedicatedTimer::spawn(node.clone(), deadline, &config.timer_thread_name) {
                    Ok(timer) => Ok(Self::Dedicated(timer)),
                    Err(err) => {
                        warn!(error = %err, "timer thread spawn failed, using shared reactor");
                        Reactor::global().map(|r| Self::Shared(r.schedule(node, deadline)))
                    }
                }
            }
            TimerBackend::Shared => {
                Reactor::global().map(|r| Self::Shared(r.schedule(node, deadline)))
            }
        }
    }
}

fn fire(node: &Weak<Node>) {
    if let Some(node) = node.upgrade() {
        debug!("context deadline reached");
        node::cancel(&node, Error::deadline_exceeded());
    }
}

// ---------------------------------------------------------------------------
// Dedicated backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// One thread sleeping until a single deadline.
#[derive(Debug)]
pub(crate) struct DedicatedTimer {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl DedicatedTimer {
    fn spawn(node: Weak<Node>, deadline: Instant, name: &str) -> std::io::Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                trace!("timer thread started");
                let mut stopped = thread_signal.stopped.lock();
                while !*stopped && Instant::now() < deadline {
                    thread_signal.cond.wait_until(&mut stopped, deadline);
                }
                let expired = !*stopped;
                drop(stopped);
                if expired {
                    fire(&node);
                }
                trace!(expired, "timer thread exiting");
            })?;
        let thread_id = thread.thread().id();
        Ok(Self {
            signal,
            thread: Some(thread),
            thread_id,
        })
    }
}

impl Drop for DedicatedTimer {
    fn drop(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.cond.notify_all();
        if let Some(thread) = self.thread.take() {
            // The last handle can be released by the timer thread while it
            // fires; joining there would wait on ourselves.
            if std::thread::current().id() != self.thread_id {
                let _ = thread.join();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shared backend
// ---------------------------------------------------------------------------

/// A deadline entry in the reactor heap.
#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline: Instant,
    id: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of deadlines plus the nodes still waiting on them.
///
/// Cancelled timers are removed from `live` only; their heap entries are
/// skipped when they surface.
#[derive(Debug, Default)]
struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    live: HashMap<u64, Weak<Node>>,
    next_id: u64,
}

impl TimerHeap {
    fn insert(&mut self, node: Weak<Node>, deadline: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(TimerEntry { deadline, id });
        self.live.insert(id, node);
        id
    }

    fn remove(&mut self, id: u64) {
        self.live.remove(&id);
        if self.live.is_empty() {
            self.heap.clear();
        }
    }

    /// Earliest deadline that still has a live timer.
    fn peek_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            if self.live.contains_key(&entry.id) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops all live timers that have expired (deadline <= now).
    fn pop_expired(&mut self, now: Instant) -> Vec<Weak<Node>> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let id = entry.id;
            self.heap.pop();
            if let Some(node) = self.live.remove(&id) {
                expired.push(node);
            }
        }
        expired
    }

    fn len(&self) -> usize {
        self.live.len()
    }
}

/// The process-wide timer reactor.
#[derive(Debug, Default)]
struct Reactor {
    timers: Mutex<TimerHeap>,
    changed: Condvar,
}

static REACTOR: OnceLock<std::result::Result<Arc<Reactor>, Error>> = OnceLock::new();

impl Reactor {
    fn global() -> Result<&'static Arc<Self>> {
        REACTOR
            .get_or_init(|| {
                let reactor = Arc::new(Self::default());
                let worker = Arc::clone(&reactor);
                let name = format!("{}-reactor", config::global().timer_thread_name);
                std::thread::Builder::new()
                    .name(name)
                    .spawn(move || worker.run())
                    .map_err(|e| Error::internal("failed to start timer reactor").with_source(e))?;
                debug!("shared timer reactor started");
                Ok(reactor)
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    fn schedule(self: &Arc<Self>, node: Weak<Node>, deadline: Instant) -> SharedTimer {
        let mut timers = self.timers.lock();
        let id = timers.insert(node, deadline);
        trace!(id, pending = timers.len(), "deadline scheduled");
        drop(timers);
        self.changed.notify_one();
        SharedTimer {
            reactor: Arc::clone(self),
            id,
        }
    }

    fn run(&self) {
        let mut timers = self.timers.lock();
        loop {
            let expired = timers.pop_expired(Instant::now());
            if !expired.is_empty() {
                MutexGuard::unlocked(&mut timers, || {
                    for node in &expired {
                        fire(node);
                    }
                });
                continue;
            }
            match timers.peek_deadline() {
                Some(deadline) => {
                    self.changed.wait_until(&mut timers, deadline);
                }
                None => self.changed.wait(&mut timers),
            }
        }
    }
}

/// A deadline registered with the shared reactor.
#[derive(Debug)]
pub(crate) struct SharedTimer {
    reactor: Arc<Reactor>,
    id: u64,
}

impl Drop for SharedTimer {
    fn drop(&mut self) {
        self.reactor.timers.lock().remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_pops_earliest_first_and_skips_removed() {
        let now = Instant::now();
        let mut heap = TimerHeap::default();
        let late = heap.insert(Weak::new(), now + std::time::Duration::from_millis(30));
        let early = heap.insert(Weak::new(), now + std::time::Duration::from_millis(10));
        let removed = heap.insert(Weak::new(), now + std::time::Duration::from_millis(5));
        heap.remove(removed);

        assert_eq!(
            heap.peek_deadline(),
            Some(now + std::time::Duration::from_millis(10))
        );
        let expired = heap.pop_expired(now + std::time::Duration::from_millis(20));
        assert_eq!(expired.len(), 1);
        assert_eq!(heap.len(), 1);
        assert!(heap.live.contains_key(&late));
        assert!(!heap.live.contains_key(&early));
    }

    #[test]
    fn removing_last_timer_clears_heap() {
        let mut heap = TimerHeap::default();
        let id = heap.insert(Weak::new(), Instant::now());
        heap.remove(id);
        assert!(heap.heap.is_empty());
        assert_eq!(heap.peek_deadline(), None);
    }
}
