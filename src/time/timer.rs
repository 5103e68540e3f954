use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::channel::Channel;
use crate::error::Result;
use crate::tracing_compat::trace;

/// When the timer will fire next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Schedule {
    /// Fired or stopped.
    #[default]
    Idle,
    At(Instant),
    /// Armed with a delay too large to represent; never fires.
    Never,
}

impl Schedule {
    fn after(duration: Duration) -> Self {
        Instant::now()
            .checked_add(duration)
            .map_or(Self::Never, Self::At)
    }

    const fn is_pending(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

#[derive(Debug, Default)]
struct TimerState {
    schedule: Schedule,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<TimerState>,
    changed: Condvar,
}

/// A single event delivered on a channel after a delay.
///
/// The fire time is sent on [`c`](Self::c). Unlike a context deadline, a
/// timer can be re-armed with [`reset`](Self::reset) after firing.
#[derive(Debug)]
pub struct Timer {
    shared: Arc<Shared>,
    chan: Channel<Instant>,
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    /// Starts a timer that fires once after `duration`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the timer thread cannot be spawned.
    pub fn new(duration: Duration) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                schedule: Schedule::after(duration),
                shutdown: false,
            }),
            changed: Condvar::new(),
        });
        let chan = Channel::new(1);
        let thread = {
            let shared = Arc::clone(&shared);
            let chan = chan.clone();
            super::spawn_worker("timer", move || run(&shared, &chan))?
        };
        Ok(Self {
            shared,
            chan,
            thread: Some(thread),
        })
    }

    /// The channel the fire time is delivered on.
    #[must_use]
    pub fn c(&self) -> &Channel<Instant> {
        &self.chan
    }

    /// Prevents the timer from firing.
    ///
    /// Returns true if the call stopped a pending timer, false if it had
    /// already fired or been stopped. A value already delivered stays in the
    /// channel.
    pub fn stop(&self) -> bool {
        let pending = std::mem::take(&mut self.shared.state.lock().schedule).is_pending();
        self.shared.changed.notify_one();
        pending
    }

    /// Re-arms the timer to fire after `duration`.
    ///
    /// Returns true if the timer was still pending.
    pub fn reset(&self, duration: Duration) -> bool {
        let schedule = Schedule::after(duration);
        let previous = std::mem::replace(&mut self.shared.state.lock().schedule, schedule);
        let pending = previous.is_pending();
        self.shared.changed.notify_one();
        pending
    }
}

fn run(shared: &Shared, chan: &Channel<Instant>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        match state.schedule {
            Schedule::Idle | Schedule::Never => shared.changed.wait(&mut state),
            Schedule::At(deadline) if Instant::now() < deadline => {
                shared.changed.wait_until(&mut state, deadline);
            }
            Schedule::At(_) => {
                state.schedule = Schedule::Idle;
                // A full channel means the reader never took the last value.
                let delivered = chan.try_send(Instant::now()).is_ok();
                trace!(delivered, "timer fired");
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.schedule = Schedule::Idle;
        }
        self.shared.changed.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
