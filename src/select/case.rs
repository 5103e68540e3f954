//! Select cases and their type-erased execution arms.

use std::fmt;
use std::sync::Arc;

use crate::channel::{Channel, SendError, TryRecvError, TrySendError, Waiter};
use crate::tracing_compat::debug;

/// Undoes one waiter registration.
pub(crate) type Unregister<'a> = Box<dyn FnOnce() + 'a>;

/// Outcome of committing a chosen arm.
pub(crate) enum Attempt<R> {
    /// The operation ran and its handler produced a result.
    Done(R),
    /// Readiness vanished before the commit; nothing was consumed.
    Lost,
}

/// A channel operation the select loop can poll and commit.
pub(crate) trait Arm<'a, R> {
    fn register(&self, waiter: Arc<dyn Waiter>) -> Unregister<'a>;
    fn is_ready(&self) -> bool;
    fn attempt(&mut self) -> Attempt<R>;
}

pub(crate) enum CaseKind<'a, R> {
    Op(Box<dyn Arm<'a, R> + 'a>),
    Default(Box<dyn FnOnce() -> R + 'a>),
}

/// One alternative of a select.
///
/// Build with [`recv_case`], [`send_case`] or [`default_case`].
pub struct Case<'a, R> {
    pub(crate) kind: CaseKind<'a, R>,
}

impl<R> fmt::Debug for Case<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.kind {
            CaseKind::Op(_) => "Op",
            CaseKind::Default(_) => "Default",
        };
        f.debug_tuple("Case").field(&name).finish()
    }
}

struct RecvArm<T, F> {
    chan: Channel<T>,
    handler: Option<F>,
}

impl<'a, T: 'a, R, F> Arm<'a, R> for RecvArm<T, F>
where
    F: FnOnce(Option<T>) -> R,
{
    fn register(&self, waiter: Arc<dyn Waiter>) -> Unregister<'a> {
        let key = self.chan.register_recv_waiter(waiter);
        let chan = self.chan.clone();
        Box::new(move || {
            chan.unregister_waiter(key);
        })
    }

    fn is_ready(&self) -> bool {
        self.chan.can_recv()
    }

    fn attempt(&mut self) -> Attempt<R> {
        let Some(handler) = self.handler.take() else {
            return Attempt::Lost;
        };
        let value = match self.chan.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Closed) => None,
            Err(TryRecvError::Empty) => {
                debug!("polled-ready recv found nothing, blocking");
                self.chan.recv()
            }
        };
        Attempt::Done(handler(value))
    }
}

struct SendArm<T, F> {
    chan: Channel<T>,
    value: Option<T>,
    handler: Option<F>,
}

impl<'a, T: 'a, R, F> Arm<'a, R> for SendArm<T, F>
where
    F: FnOnce(Result<(), SendError<T>>) -> R,
{
    fn register(&self, waiter: Arc<dyn Waiter>) -> Unregister<'a> {
        let key = self.chan.register_send_waiter(waiter);
        let chan = self.chan.clone();
        Box::new(move || {
            chan.unregister_waiter(key);
        })
    }

    fn is_ready(&self) -> bool {
        self.chan.can_send() || self.chan.is_closed()
    }

    fn attempt(&mut self) -> Attempt<R> {
        let Some(value) = self.value.take() else {
            return Attempt::Lost;
        };
        let outcome = match self.chan.try_send(value) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(value)) => Err(SendError::Closed(value)),
            Err(TrySendError::Full(value) | TrySendError::Busy(value)) => {
                debug!("send readiness lost before commit, retrying");
                self.value = Some(value);
                return Attempt::Lost;
            }
        };
        match self.handler.take() {
            Some(handler) => Attempt::Done(handler(outcome)),
            None => Attempt::Lost,
        }
    }
}

/// A case that receives from `chan`.
///
/// The handler gets `Some(value)`, or `None` if the channel is closed and
/// drained.
pub fn recv_case<'a, T, R, F>(chan: &Channel<T>, handler: F) -> Case<'a, R>
where
    T: 'a,
    R: 'a,
    F: FnOnce(Option<T>) -> R + 'a,
{
    Case {
        kind: CaseKind::Op(Box::new(RecvArm {
            chan: chan.clone(),
            handler: Some(handler),
        })),
    }
}

/// A case that sends `value` into `chan`.
///
/// The handler gets `Ok(())` once the value is committed, or
/// `Err(SendError::Closed(value))` if the channel is closed.
pub fn send_case<'a, T, R, F>(chan: &Channel<T>, value: T, handler: F) -> Case<'a, R>
where
    T: 'a,
    R: 'a,
    F: FnOnce(Result<(), SendError<T>>) -> R + 'a,
{
    Case {
        kind: CaseKind::Op(Box::new(SendArm {
            chan: chan.clone(),
            value: Some(value),
            handler: Some(handler),
        })),
    }
}

/// A case taken when no other case is ready.
pub fn default_case<'a, R, F>(handler: F) -> Case<'a, R>
where
    F: FnOnce() -> R + 'a,
{
    Case {
        kind: CaseKind::Default(Box::new(handler)),
    }
}
