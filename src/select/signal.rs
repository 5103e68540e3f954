//! The wakeup primitive shared by one select and all of its channels.

use std::sync::{Condvar, Mutex};

use crate::channel::Waiter;

/// Epoch counter bumped by every channel notification.
///
/// The select loop reads the epoch, polls readiness, and then sleeps only
/// while the epoch is unchanged, so a notification that lands between the
/// poll and the wait is never lost. Channels call [`Waiter::wake`] without
/// holding their own lock, and the select never holds this lock while
/// polling channels.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    epoch: Mutex<u64>,
    changed: Condvar,
}

impl Signal {
    pub(crate) fn epoch(&self) -> u64 {
        *self.epoch.lock().expect("select signal lock poisoned")
    }

    /// Blocks until the epoch moves past `seen`.
    pub(crate) fn wait_past(&self, seen: u64) {
        let mut epoch = self.epoch.lock().expect("select signal lock poisoned");
        while *epoch == seen {
            epoch = self
                .changed
                .wait(epoch)
                .expect("select signal lock poisoned");
        }
    }
}

impl Waiter for Signal {
    fn wake(&self) {
        let mut epoch = self.epoch.lock().expect("select signal lock poisoned");
        *epoch = epoch.wrapping_add(1);
        drop(epoch);
        self.changed.notify_all();
    }
}
