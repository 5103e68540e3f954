//! Run-on-exit cleanup.
//!
//! [`ScopedCleanup`] owns a closure and runs it exactly once: when the guard
//! is dropped (normal exit, early return, or unwinding), or earlier through
//! [`ScopedCleanup::run_now`]. [`ScopedCleanup::dismiss`] disarms it.
//!
//! ```
//! use cspsync::util::ScopedCleanup;
//! use std::cell::Cell;
//!
//! let ran = Cell::new(false);
//! {
//!     let _guard = ScopedCleanup::new(|| ran.set(true));
//!     assert!(!ran.get());
//! }
//! assert!(ran.get());
//! ```

/// A deferred action that runs when the guard leaves scope.
#[must_use = "the cleanup runs immediately if the guard is not bound"]
pub struct ScopedCleanup<F: FnOnce()> {
    action: Option<F>,
}

impl<F: FnOnce()> ScopedCleanup<F> {
    /// Arms a guard that runs `action` on drop.
    pub const fn new(action: F) -> Self {
        Self {
            action: Some(action),
        }
    }

    /// Runs the action now instead of at end of scope.
    pub fn run_now(mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }

    /// Disarms the guard; the action never runs.
    pub fn dismiss(mut self) {
        self.action = None;
    }

    /// Returns true while the action has not run or been dismissed.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.action.is_some()
    }
}

impl<F: FnOnce()> Drop for ScopedCleanup<F> {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl<F: FnOnce()> std::fmt::Debug for ScopedCleanup<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCleanup")
            .field("armed", &self.is_armed())
            .finish()
    }
}
