//! Error types and error handling strategy for cspsync.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed; the canonical strings callers match on
//!   (`"context canceled"`, `"context deadline exceeded"`, ...) come from
//!   [`ErrorKind::as_str`] and are never built ad hoc.
//! - Expected conditions (a full buffer, a canceled context) are returned,
//!   never raised.
//! - Channel errors carry the rejected value back to the caller so a failed
//!   send never silently drops data.
//!
//! # Error Categories
//!
//! - **Channel**: protocol violations (send on closed) and non-blocking
//!   contention (full, busy, empty)
//! - **Cancellation**: manual cancellation or deadline expiry of a context
//! - **Context**: lookups and construction (missing key, no deadline, nil parent)
//! - **Config**: invalid configuration values
//! - **Internal**: invariant violations inside the library
//!
//! # Recovery Classification
//!
//! All errors can be classified by [`Recoverability`]:
//! - `Transient`: the caller's retry logic should try again
//! - `Permanent`: retrying the same operation cannot succeed
//! - `Unknown`: depends on what the caller is doing

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// The context was canceled explicitly (or by an ancestor).
    Cancelled,
    /// The context's deadline passed.
    DeadlineExceeded,

    // === Channels ===
    /// The channel is closed and has nothing left to deliver.
    ChannelClosed,
    /// A send was attempted on a closed channel.
    SendOnClosed,
    /// The bounded buffer is full (would block).
    ChannelFull,
    /// A rendezvous channel already holds a pending value (would block).
    ChannelBusy,
    /// No value is available (would block).
    ChannelEmpty,

    // === Context ===
    /// A context constructor was given no parent.
    NilParent,
    /// No context in the chain carries the requested key.
    KeyNotFound,
    /// No context in the chain carries a deadline.
    NoDeadline,

    // === Config ===
    /// A configuration value could not be parsed.
    InvalidConfig,

    // === Internal ===
    /// Internal library error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the canonical, caller-visible text for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "context canceled",
            Self::DeadlineExceeded => "context deadline exceeded",
            Self::ChannelClosed => "channel closed",
            Self::SendOnClosed => "send on closed channel",
            Self::ChannelFull => "buffer full",
            Self::ChannelBusy => "channel busy",
            Self::ChannelEmpty => "no data",
            Self::NilParent => "parent context is nil",
            Self::KeyNotFound => "key not found",
            Self::NoDeadline => "no deadline",
            Self::InvalidConfig => "invalid configuration",
            Self::Internal => "internal error",
        }
    }

    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled | Self::DeadlineExceeded => ErrorCategory::Cancellation,
            Self::ChannelClosed
            | Self::SendOnClosed
            | Self::ChannelFull
            | Self::ChannelBusy
            | Self::ChannelEmpty => ErrorCategory::Channel,
            Self::NilParent | Self::KeyNotFound | Self::NoDeadline => ErrorCategory::Context,
            Self::InvalidConfig => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns the recoverability classification for this error kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::ChannelFull | Self::ChannelBusy | Self::ChannelEmpty => {
                Recoverability::Transient
            }
            Self::Cancelled
            | Self::DeadlineExceeded
            | Self::ChannelClosed
            | Self::SendOnClosed
            | Self::NilParent
            | Self::InvalidConfig
            | Self::Internal => Recoverability::Permanent,
            Self::KeyNotFound | Self::NoDeadline => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of error recoverability for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary condition that may clear on retry.
    Transient,
    /// Retrying cannot succeed.
    Permanent,
    /// Depends on context and cannot be determined from the kind alone.
    Unknown,
}

impl Recoverability {
    /// Returns true if this error is safe to retry.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Returns true if this error should never be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Context cancellation and deadline expiry.
    Cancellation,
    /// Channel protocol and contention failures.
    Channel,
    /// Context construction and lookup failures.
    Context,
    /// Configuration failures.
    Config,
    /// Internal library errors.
    Internal,
}

/// The main error type for cspsync operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents manual cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error represents deadline expiry.
    #[must_use]
    pub const fn is_deadline_exceeded(&self) -> bool {
        matches!(self.kind, ErrorKind::DeadlineExceeded)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Error reported by a context canceled by hand.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Error reported by a context whose deadline passed.
    #[must_use]
    pub const fn deadline_exceeded() -> Self {
        Self::new(ErrorKind::DeadlineExceeded)
    }

    /// Error reported by a context constructor given no parent.
    #[must_use]
    pub const fn nil_parent() -> Self {
        Self::new(ErrorKind::NilParent)
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig).with_message(detail)
    }

    /// Creates an internal error (library bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_str())?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for cspsync operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;
