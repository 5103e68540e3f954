use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::tracing_compat::trace;

#[derive(Debug, Default)]
struct StopFlag {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Delivers the current instant on a channel once per period.
///
/// Ticks are scheduled from the start time, not from the previous delivery,
/// so a slow reader does not make the ticker drift. Ticks that find the
/// channel full are dropped.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    flag: Arc<StopFlag>,
    chan: Channel<Instant>,
    thread: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Starts a ticker with the given period.
    ///
    /// # Errors
    ///
    /// Returns an invalid-config error for a zero period, or an internal
    /// error if the ticker thread cannot be spawned.
    pub fn new(period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::invalid_config("ticker period must be non-zero"));
        }
        let flag = Arc::new(StopFlag::default());
        let chan = Channel::new(1);
        let thread = {
            let flag = Arc::clone(&flag);
            let chan = chan.clone();
            super::spawn_worker("ticker", move || run(period, &flag, &chan))?
        };
        Ok(Self {
            period,
            flag,
            chan,
            thread: Some(thread),
        })
    }

    /// The channel ticks are delivered on. Closed once the ticker stops.
    #[must_use]
    pub fn c(&self) -> &Channel<Instant> {
        &self.chan
    }

    /// The tick period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Stops the ticker and closes its channel. A tick already buffered can
    /// still be received.
    pub fn stop(&self) {
        *self.flag.stopped.lock() = true;
        self.flag.cond.notify_all();
        self.chan.close();
    }
}

fn run(period: Duration, flag: &StopFlag, chan: &Channel<Instant>) {
    // `None`: the next tick lies beyond what `Instant` can represent.
    let mut next = Instant::now().checked_add(period);
    let mut stopped = flag.stopped.lock();
    loop {
        match next {
            Some(at) => {
                while !*stopped && Instant::now() < at {
                    flag.cond.wait_until(&mut stopped, at);
                }
            }
            None => {
                while !*stopped {
                    flag.cond.wait(&mut stopped);
                }
            }
        }
        if *stopped {
            break;
        }
        let now = Instant::now();
        let delivered = chan.try_send(now).is_ok();
        trace!(delivered, "tick");
        next = next.and_then(|at| following_tick(at, period, now));
    }
}

/// The first tick after `now` on the grid `previous + k * period`, skipping
/// ticks the thread slept through.
fn following_tick(previous: Instant, period: Duration, now: Instant) -> Option<Instant> {
    let mut next = previous.checked_add(period)?;
    while next <= now {
        next = next.checked_add(period)?;
    }
    Some(next)
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
