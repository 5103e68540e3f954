//! cspsync: CSP-style channels, select, and cancellation contexts for threads.
//!
//! # Overview
//!
//! cspsync gives blocking, thread-based code the coordination primitives of
//! communicating sequential processes:
//!
//! - **Channels**: a capacity of 0 is a rendezvous where each send waits for
//!   its receiver; a positive capacity is a bounded FIFO buffer. Channels are
//!   closed explicitly, and receivers drain buffered values before seeing the
//!   close.
//! - **Select**: waits on several channel operations at once and commits
//!   exactly one, chosen uniformly at random among those ready. An optional
//!   default case makes the whole select non-blocking.
//! - **Contexts**: a tree of cancellation scopes. Canceling a node cancels
//!   its whole subtree; timer nodes cancel themselves at a deadline; value
//!   nodes carry request-scoped data toward the leaves.
//!
//! # Module Structure
//!
//! - [`channel`]: [`Channel`], its error types, and waiter registration
//! - [`select`]: [`Select`] builder and the [`select()`] function
//! - [`context`]: [`Context`] tree, factories, and blocking helpers
//! - [`time`]: channel-based one-shot and periodic timers
//! - [`config`]: process-wide settings read from the environment
//! - [`error`]: [`Error`], [`ErrorKind`], and the crate [`Result`]
//! - [`util`]: seedable PRNG and a run-on-exit cleanup guard
//!
//! # Example
//!
//! ```
//! use cspsync::{context, Channel, Select};
//! use std::time::Duration;
//!
//! let (ctx, _cancel) = context::with_timeout(&context::background(), Duration::from_millis(10)).unwrap();
//! let results: Channel<u32> = Channel::new(1);
//!
//! let outcome = Select::new()
//!     .recv(&results, |v| format!("got {v:?}"))
//!     .recv(&ctx.done(), |_| String::from("timed out"))
//!     .run();
//! assert_eq!(outcome, "timed out");
//! assert!(ctx.err().unwrap_err().is_deadline_exceeded());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod select;
pub mod time;
pub mod tracing_compat;
pub mod util;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use channel::{Channel, RecvTimeoutError, SendError, TryRecvError, TrySendError};
pub use config::{Config, TimerBackend};
pub use context::{CancelFn, Context, ContextKey, ContextKind};
pub use error::{Error, ErrorCategory, ErrorKind, Result, ResultExt};
pub use select::{default_case, recv_case, select, send_case, Case, Select};
pub use util::ScopedCleanup;
