//! Blocking MPMC channel with rendezvous and bounded-buffer modes.
//!
//! ```text
//! capacity == 0   rendezvous: one pending slot, send blocks until taken
//! capacity  > 0   bounded FIFO: send blocks only while the queue is full
//! ```
//!
//! # Closing
//!
//! [`Channel::close`] is idempotent. After close no send can add data, but
//! data already queued stays receivable until drained; only then does
//! [`Channel::recv`] return `None`.
//!
//! A blocking rendezvous sender whose value is still sitting in the slot
//! when the channel closes takes the value back and reports
//! [`SendError::Closed`]. If a receiver took it first, the send succeeded.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::error::{RecvTimeoutError, SendError, TryRecvError, TrySendError};
use super::waiter::{wake_all, WakeBatch, Waiter, WaiterKey, WaiterList};
use crate::tracing_compat::{debug, trace};

/// Ticket used for values deposited without a waiting sender.
const DETACHED_TICKET: u64 = 0;

/// A value parked in the rendezvous slot.
struct Pending<T> {
    value: T,
    /// Identifies the blocking sender waiting on this value.
    ticket: u64,
}

/// Internal channel state guarded by the channel mutex.
struct ChannelState<T> {
    /// Maximum number of buffered values; 0 selects rendezvous mode.
    capacity: usize,
    /// Write-once: never goes back to false.
    closed: bool,
    /// Buffered values (bounded mode).
    queue: VecDeque<T>,
    /// The single hand-off slot (rendezvous mode).
    pending: Option<Pending<T>>,
    next_ticket: u64,
    recv_waiters: WaiterList,
    send_waiters: WaiterList,
}

impl<T> ChannelState<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            closed: false,
            queue: if capacity == 0 {
                VecDeque::new()
            } else {
                VecDeque::with_capacity(capacity.min(1024))
            },
            pending: None,
            next_ticket: DETACHED_TICKET + 1,
            recv_waiters: WaiterList::default(),
            send_waiters: WaiterList::default(),
        }
    }

    const fn is_rendezvous(&self) -> bool {
        self.capacity == 0
    }

    /// True if a value could be added right now (ignores `closed`).
    fn has_room(&self) -> bool {
        if self.is_rendezvous() {
            self.pending.is_none()
        } else {
            self.queue.len() < self.capacity
        }
    }

    fn has_value(&self) -> bool {
        if self.is_rendezvous() {
            self.pending.is_some()
        } else {
            !self.queue.is_empty()
        }
    }

    fn len(&self) -> usize {
        if self.is_rendezvous() {
            usize::from(self.pending.is_some())
        } else {
            self.queue.len()
        }
    }

    /// Stores `value`; caller has checked `has_room`.
    fn deposit(&mut self, value: T, ticket: u64) {
        if self.is_rendezvous() {
            self.pending = Some(Pending { value, ticket });
        } else {
            self.queue.push_back(value);
        }
    }

    fn take(&mut self) -> Option<T> {
        if self.is_rendezvous() {
            self.pending.take().map(|p| p.value)
        } else {
            self.queue.pop_front()
        }
    }

    fn pending_ticket(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.ticket)
    }
}

/// Shared state wrapper with condition variables for notification.
struct ChannelShared<T> {
    inner: Mutex<ChannelState<T>>,
    /// Notifies receivers when a value is deposited.
    message_available: Condvar,
    /// Notifies senders when room appears.
    space_available: Condvar,
    /// Notifies rendezvous senders that their value was taken.
    delivered: Condvar,
}

impl<T> ChannelShared<T> {
    fn lock(&self) -> MutexGuard<'_, ChannelState<T>> {
        self.inner.lock().expect("channel lock poisoned")
    }
}

/// A typed channel shared by every holder.
///
/// Cloning a `Channel` produces another handle to the same channel; there is
/// no sender/receiver split. The channel is freed when the last handle drops.
///
/// # Example
///
/// ```
/// use cspsync::Channel;
///
/// let ch = Channel::new(2);
/// ch.send(1).unwrap();
/// ch.send(2).unwrap();
/// ch.close();
/// assert_eq!(ch.recv(), Some(1));
/// assert_eq!(ch.recv(), Some(2));
/// assert_eq!(ch.recv(), None);
/// assert!(ch.send(3).is_err());
/// ```
pub struct Channel<T> {
    shared: Arc<ChannelShared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Channel")
            .field("capacity", &state.capacity)
            .field("len", &state.len())
            .field("closed", &state.closed)
            .field("recv_waiters", &state.recv_waiters.len())
            .field("send_waiters", &state.send_waiters.len())
            .finish()
    }
}

impl<T> Channel<T> {
    /// Creates a channel. A `capacity` of 0 makes a rendezvous channel.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                inner: Mutex::new(ChannelState::new(capacity)),
                message_available: Condvar::new(),
                space_available: Condvar::new(),
                delivered: Condvar::new(),
            }),
        }
    }

    /// Sends a value, blocking until it is accepted.
    ///
    /// Bounded mode returns once the value is queued. Rendezvous mode
    /// returns once a receiver has taken the value.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Closed(value)` if the channel is closed before the
    /// value is accepted (or, in rendezvous mode, before it is taken).
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = self.shared.lock();
        while !state.closed && !state.has_room() {
            state = self
                .shared
                .space_available
                .wait(state)
                .expect("channel lock poisoned");
        }
        if state.closed {
            debug!(capacity = state.capacity, "send on closed channel");
            return Err(SendError::Closed(value));
        }

        let ticket = if state.is_rendezvous() {
            let t = state.next_ticket;
            state.next_ticket += 1;
            t
        } else {
            DETACHED_TICKET
        };
        state.deposit(value, ticket);
        let mut batch = WakeBatch::new();
        state.recv_waiters.collect_into(&mut batch);

        if !state.is_rendezvous() {
            drop(state); // Release lock before notifying
            self.shared.message_available.notify_one();
            wake_all(batch);
            return Ok(());
        }

        drop(state);
        self.shared.message_available.notify_one();
        wake_all(batch);

        // Rendezvous: wait until a receiver takes our value or close wins.
        let mut state = self.shared.lock();
        loop {
            if state.pending_ticket() != Some(ticket) {
                return Ok(());
            }
            if state.closed {
                let reclaimed = state.pending.take().map(|p| p.value);
                drop(state);
                self.shared.space_available.notify_all();
                debug!("rendezvous send reclaimed value after close");
                return reclaimed.map_or(Ok(()), |v| Err(SendError::Closed(v)));
            }
            state = self
                .shared
                .delivered
                .wait(state)
                .expect("channel lock poisoned");
        }
    }

    /// Receives a value, blocking until one is available.
    ///
    /// Returns `None` once the channel is closed and drained.
    pub fn recv(&self) -> Option<T> {
        let mut state = self.shared.lock();
        loop {
            if let Some(value) = state.take() {
                self.after_take(state);
                return Some(value);
            }
            if state.closed {
                return None;
            }
            state = self
                .shared
                .message_available
                .wait(state)
                .expect("channel lock poisoned");
        }
    }

    /// Receives a value, blocking for at most `timeout`.
    ///
    /// # Errors
    ///
    /// - `RecvTimeoutError::Closed` if the channel is closed and drained
    /// - `RecvTimeoutError::Timeout` if nothing arrived in time
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.lock();
        loop {
            if let Some(value) = state.take() {
                self.after_take(state);
                return Ok(value);
            }
            if state.closed {
                return Err(RecvTimeoutError::Closed);
            }
            let Some(deadline) = deadline else {
                // Too far out to represent; wait like a plain recv.
                state = self
                    .shared
                    .message_available
                    .wait(state)
                    .expect("channel lock poisoned");
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return Err(RecvTimeoutError::Timeout);
            }
            let (guard, _timeout_result) = self
                .shared
                .message_available
                .wait_timeout(state, deadline - now)
                .expect("channel lock poisoned");
            state = guard;
        }
    }

    /// Attempts to send without blocking.
    ///
    /// In rendezvous mode the value is parked in the slot for the next
    /// receiver; no sender waits on it, so it survives a later close.
    ///
    /// # Errors
    ///
    /// - `TrySendError::Closed(value)` if the channel is closed
    /// - `TrySendError::Busy(value)` if a rendezvous value is already pending
    /// - `TrySendError::Full(value)` if the buffer is at capacity
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(TrySendError::Closed(value));
        }
        if !state.has_room() {
            return Err(if state.is_rendezvous() {
                TrySendError::Busy(value)
            } else {
                TrySendError::Full(value)
            });
        }
        state.deposit(value, DETACHED_TICKET);
        let mut batch = WakeBatch::new();
        state.recv_waiters.collect_into(&mut batch);
        drop(state);

        self.shared.message_available.notify_one();
        wake_all(batch);
        Ok(())
    }

    /// Attempts to receive without blocking.
    ///
    /// # Errors
    ///
    /// - `TryRecvError::Closed` if the channel is closed and drained
    /// - `TryRecvError::Empty` if nothing is available yet
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.shared.lock();
        if let Some(value) = state.take() {
            self.after_take(state);
            return Ok(value);
        }
        if state.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Closes the channel. Later calls are no-ops.
    ///
    /// Wakes every blocked sender and receiver and every registered waiter.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let mut batch = WakeBatch::new();
        state.recv_waiters.collect_into(&mut batch);
        state.send_waiters.collect_into(&mut batch);
        debug!(
            capacity = state.capacity,
            buffered = state.len(),
            waiters = batch.len(),
            "channel closed"
        );
        drop(state);

        self.shared.message_available.notify_all();
        self.shared.space_available.notify_all();
        self.shared.delivered.notify_all();
        wake_all(batch);
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Returns true if [`try_send`](Self::try_send) would accept a value now.
    ///
    /// Always false once closed.
    #[must_use]
    pub fn can_send(&self) -> bool {
        let state = self.shared.lock();
        !state.closed && state.has_room()
    }

    /// Returns true if [`recv`](Self::recv) would return without blocking,
    /// either with a value or with `None` because the channel is closed.
    #[must_use]
    pub fn can_recv(&self) -> bool {
        let state = self.shared.lock();
        state.has_value() || state.closed
    }

    /// Returns the configured capacity (0 for rendezvous).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity
    }

    /// Number of values currently waiting to be received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    /// Returns true if no value is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.shared.lock().has_value()
    }

    /// Attaches a waiter woken whenever receive readiness may change.
    pub fn register_recv_waiter(&self, waiter: Arc<dyn Waiter>) -> WaiterKey {
        let key = self.shared.lock().recv_waiters.insert(waiter);
        trace!(key = %key, "registered recv waiter");
        key
    }

    /// Attaches a waiter woken whenever send readiness may change.
    pub fn register_send_waiter(&self, waiter: Arc<dyn Waiter>) -> WaiterKey {
        let key = self.shared.lock().send_waiters.insert(waiter);
        trace!(key = %key, "registered send waiter");
        key
    }

    /// Detaches a waiter. Unknown or already-removed keys are ignored, and
    /// the call is valid on a closed channel. Returns whether it was found.
    pub fn unregister_waiter(&self, key: WaiterKey) -> bool {
        let mut state = self.shared.lock();
        let found = state.recv_waiters.remove(key) || state.send_waiters.remove(key);
        drop(state);
        trace!(key = %key, found, "unregistered waiter");
        found
    }

    /// Returns a blocking iterator that ends when the channel is closed and
    /// drained.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { chan: self }
    }

    /// Returns an iterator over the values available right now.
    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter { chan: self }
    }

    /// (recv, send) waiter registrations currently attached.
    #[cfg(test)]
    pub(crate) fn waiter_counts(&self) -> (usize, usize) {
        let state = self.shared.lock();
        (state.recv_waiters.len(), state.send_waiters.len())
    }

    /// Wakes the parties that care about a value having been taken.
    fn after_take(&self, state: MutexGuard<'_, ChannelState<T>>) {
        let rendezvous = state.is_rendezvous();
        let mut batch = WakeBatch::new();
        state.send_waiters.collect_into(&mut batch);
        drop(state); // Release lock before notifying

        if rendezvous {
            self.shared.delivered.notify_all();
        }
        self.shared.space_available.notify_one();
        if !batch.is_empty() {
            trace!(waiters = batch.len(), "waking send waiters");
        }
        wake_all(batch);
    }
}

/// Blocking iterator returned by [`Channel::iter`].
#[derive(Debug)]
pub struct Iter<'a, T> {
    chan: &'a Channel<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.chan.recv()
    }
}

/// Non-blocking iterator returned by [`Channel::try_iter`].
#[derive(Debug)]
pub struct TryIter<'a, T> {
    chan: &'a Channel<T>,
}

impl<T> Iterator for TryIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.chan.try_recv().ok()
    }
}

/// Owning blocking iterator.
#[derive(Debug)]
pub struct IntoIter<T> {
    chan: Channel<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.chan.recv()
    }
}

impl<'a, T> IntoIterator for &'a Channel<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T> IntoIterator for Channel<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter { chan: self }
    }
}
