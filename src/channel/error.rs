//! Channel operation errors.
//!
//! Every error produced by a send hands the value back, so a failed send
//! never drops data on the floor.

use crate::error::{Error, ErrorKind};

/// Error returned by a blocking [`send`](super::Channel::send).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError<T> {
    /// The channel was closed before the value was delivered.
    #[error("send on closed channel")]
    Closed(T),
}

impl<T> SendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(value) => value,
        }
    }
}

/// Error returned by [`try_send`](super::Channel::try_send).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TrySendError<T> {
    /// The channel is closed.
    #[error("send on closed channel")]
    Closed(T),
    /// The buffer is at capacity.
    #[error("buffer full")]
    Full(T),
    /// A rendezvous value is already waiting for a receiver.
    #[error("channel busy")]
    Busy(T),
}

impl<T> TrySendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(value) | Self::Full(value) | Self::Busy(value) => value,
        }
    }

    /// Returns true if the failure is terminal rather than contention.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl<T> From<SendError<T>> for TrySendError<T> {
    fn from(err: SendError<T>) -> Self {
        match err {
            SendError::Closed(value) => Self::Closed(value),
        }
    }
}

/// Error returned by [`try_recv`](super::Channel::try_recv).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// The channel is closed and fully drained.
    #[error("channel closed")]
    Closed,
    /// Nothing is available right now.
    #[error("no data")]
    Empty,
}

/// Error returned by [`recv_timeout`](super::Channel::recv_timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvTimeoutError {
    /// The channel is closed and fully drained.
    #[error("channel closed")]
    Closed,
    /// No value arrived before the timeout elapsed.
    #[error("timed out waiting on channel")]
    Timeout,
}

impl<T> From<SendError<T>> for Error {
    fn from(_: SendError<T>) -> Self {
        Self::new(ErrorKind::SendOnClosed)
    }
}

impl<T> From<TrySendError<T>> for Error {
    fn from(err: TrySendError<T>) -> Self {
        let kind = match err {
            TrySendError::Closed(_) => ErrorKind::SendOnClosed,
            TrySendError::Full(_) => ErrorKind::ChannelFull,
            TrySendError::Busy(_) => ErrorKind::ChannelBusy,
        };
        Self::new(kind)
    }
}

impl From<TryRecvError> for Error {
    fn from(err: TryRecvError) -> Self {
        match err {
            TryRecvError::Closed => Self::new(ErrorKind::ChannelClosed),
            TryRecvError::Empty => Self::new(ErrorKind::ChannelEmpty),
        }
    }
}

impl From<RecvTimeoutError> for Error {
    fn from(err: RecvTimeoutError) -> Self {
        match err {
            RecvTimeoutError::Closed => Self::new(ErrorKind::ChannelClosed),
            RecvTimeoutError::Timeout => {
                Self::new(ErrorKind::ChannelEmpty).with_message("receive timed out")
            }
        }
    }
}
