//! Blocking helpers built on [`Context::done`].

use std::time::{Duration, Instant};

use super::Context;
use crate::channel::RecvTimeoutError;
use crate::error::Result;

/// Sleeps for `duration` unless `ctx` is canceled first.
///
/// Waits on the context's done channel rather than polling, so a
/// cancellation ends the sleep right away.
///
/// # Errors
///
/// Returns the context's error if it is canceled before or during the sleep.
pub fn sleep_with_context(ctx: &Context, duration: Duration) -> Result<()> {
    ctx.err()?;
    match ctx.done().recv_timeout(duration) {
        Err(RecvTimeoutError::Timeout) => Ok(()),
        // The done channel only ever closes.
        Ok(_) | Err(RecvTimeoutError::Closed) => ctx.err(),
    }
}

/// Waits up to `timeout` for `ctx` to be canceled. Returns true if it was.
#[must_use]
pub fn wait_for_context(ctx: &Context, timeout: Duration) -> bool {
    if ctx.is_canceled() {
        return true;
    }
    match ctx.done().recv_timeout(timeout) {
        Err(RecvTimeoutError::Timeout) => ctx.is_canceled(),
        Ok(_) | Err(RecvTimeoutError::Closed) => true,
    }
}

/// Returns true if `ctx` has a deadline no more than `within` from now.
///
/// Contexts without a deadline are never predicted to expire.
#[must_use]
pub fn will_be_canceled_soon(ctx: &Context, within: Duration) -> bool {
    ctx.deadline()
        .is_ok_and(|deadline| deadline.saturating_duration_since(Instant::now()) <= within)
}
