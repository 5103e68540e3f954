//! Readiness notification hooks used by [`Select`](crate::select::Select).
//!
//! A channel keeps two waiter lists, one for parties interested in receive
//! readiness and one for send readiness. Every registered [`Waiter`] is woken
//! whenever the matching readiness predicate could have flipped: a value was
//! deposited, a value was taken, or the channel closed.
//!
//! Waiters are always invoked after the channel lock has been released, so a
//! waiter may freely call back into the channel.

use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_WAITER_KEY: AtomicU64 = AtomicU64::new(1);

/// A notification callback attached to a channel.
pub trait Waiter: Send + Sync {
    /// Signals that the channel's readiness may have changed.
    ///
    /// A wake is only a hint: the readiness must be re-checked.
    fn wake(&self);
}

/// Handle identifying one waiter registration.
///
/// Returned by `register_recv_waiter`/`register_send_waiter` and consumed by
/// `unregister_waiter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterKey(u64);

impl WaiterKey {
    pub(crate) fn next() -> Self {
        Self(NEXT_WAITER_KEY.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw registration number, for logging.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WaiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "waiter#{}", self.0)
    }
}

/// Waiters gathered under the lock, woken after it is released.
pub(crate) type WakeBatch = SmallVec<[Arc<dyn Waiter>; 4]>;

/// Registered waiters for one direction of a channel.
#[derive(Default)]
pub(crate) struct WaiterList {
    entries: SmallVec<[(WaiterKey, Arc<dyn Waiter>); 2]>,
}

impl WaiterList {
    pub(crate) fn insert(&mut self, waiter: Arc<dyn Waiter>) -> WaiterKey {
        let key = WaiterKey::next();
        self.entries.push((key, waiter));
        key
    }

    /// Removes `key` if present. Returns whether it was found.
    pub(crate) fn remove(&mut self, key: WaiterKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| *k != key);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn collect_into(&self, batch: &mut WakeBatch) {
        batch.extend(self.entries.iter().map(|(_, w)| Arc::clone(w)));
    }
}

impl fmt::Debug for WaiterList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(k, _)| k))
            .finish()
    }
}

/// Wakes every waiter in the batch. Must be called without the channel lock.
pub(crate) fn wake_all(batch: WakeBatch) {
    for waiter in batch {
        waiter.wake();
    }
}
