//! Channel-based timers.
//!
//! - [`Timer`]: delivers one [`Instant`](std::time::Instant) on its channel
//!   after a delay. It can be stopped or re-armed.
//! - [`Ticker`]: delivers an instant every period until stopped.
//!
//! Both own a background thread that is stopped and joined when the value is
//! dropped. Their channels have capacity 1, so a reader that falls behind
//! sees the oldest undelivered tick and misses the rest.
//!
//! # Example
//!
//! ```
//! use cspsync::time::Timer;
//! use std::time::Duration;
//!
//! let timer = Timer::new(Duration::from_millis(5)).unwrap();
//! let fired_at = timer.c().recv().unwrap();
//! assert!(fired_at.elapsed() < Duration::from_secs(5));
//! ```

mod ticker;
mod timer;

pub use ticker::Ticker;
pub use timer::Timer;

use crate::config;
use crate::error::{Error, Result};

/// Spawns a named timer-family thread.
pub(crate) fn spawn_worker<F>(suffix: &str, f: F) -> Result<std::thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let name = format!("{}-{suffix}", config::global().timer_thread_name);
    std::thread::Builder::new()
        .name(name)
        .spawn(f)
        .map_err(|e| Error::internal("failed to spawn timer thread").with_source(e))
}
