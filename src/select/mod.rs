//! Multiplexed waiting over several channel operations.
//!
//! A select takes a set of cases, waits until at least one of them can make
//! progress, and runs exactly one. When several cases are ready at once the
//! winner is picked uniformly at random, so no case can starve the others.
//! A default case runs only when nothing else is ready; it is never drawn
//! against real cases.
//!
//! ```text
//! register waiters ──► poll readiness ──► ready? ──yes──► pick random ──► commit
//!                           ▲               │no                              │
//!                           │           default? ──yes──► run default        │lost race
//!                           │               │no                              │
//!                           └──── wait for any channel notification ◄────────┘
//! ```
//!
//! Waiter registrations are undone on every exit path, including a panic
//! inside a handler.
//!
//! # Example
//!
//! ```
//! use cspsync::select::{default_case, recv_case, select};
//! use cspsync::Channel;
//!
//! let numbers = Channel::new(1);
//! let words: Channel<&str> = Channel::new(1);
//! numbers.send(7).unwrap();
//!
//! let out = select(vec![
//!     recv_case(&numbers, |v| format!("number {v:?}")),
//!     recv_case(&words, |v| format!("word {v:?}")),
//!     default_case(|| "nothing".to_string()),
//! ]);
//! assert_eq!(out, "number Some(7)");
//! ```

mod case;
mod signal;

pub use case::{default_case, recv_case, send_case, Case};

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use self::case::{Arm, Attempt, CaseKind};
use self::signal::Signal;
use crate::channel::{Channel, SendError, Waiter};
use crate::config;
use crate::tracing_compat::{debug, trace};
use crate::util::{DetRng, ScopedCleanup};

thread_local! {
    static FAIRNESS_RNG: RefCell<DetRng> = RefCell::new(
        config::global()
            .select_seed
            .map_or_else(DetRng::from_entropy, DetRng::stream),
    );
}

fn pick(len: usize) -> usize {
    FAIRNESS_RNG.with(|rng| rng.borrow_mut().next_usize(len))
}

/// A single-use select over a set of cases.
///
/// Every handler returns the same type `R`, which [`Select::run`] hands
/// back.
pub struct Select<'a, R> {
    cases: Vec<Case<'a, R>>,
}

impl<R> fmt::Debug for Select<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Select")
            .field("cases", &self.cases)
            .finish()
    }
}

impl<'a, R: 'a> Default for Select<'a, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, R: 'a> Select<'a, R> {
    /// Creates an empty select.
    #[must_use]
    pub fn new() -> Self {
        Self { cases: Vec::new() }
    }

    /// Adds a prebuilt case.
    #[must_use]
    pub fn case(mut self, case: Case<'a, R>) -> Self {
        self.cases.push(case);
        self
    }

    /// Adds a receive from `chan`.
    #[must_use]
    pub fn recv<T: 'a>(self, chan: &Channel<T>, handler: impl FnOnce(Option<T>) -> R + 'a) -> Self {
        self.case(recv_case(chan, handler))
    }

    /// Adds a send of `value` into `chan`.
    #[must_use]
    pub fn send<T: 'a>(
        self,
        chan: &Channel<T>,
        value: T,
        handler: impl FnOnce(Result<(), SendError<T>>) -> R + 'a,
    ) -> Self {
        self.case(send_case(chan, value, handler))
    }

    /// Adds the default case.
    #[must_use]
    pub fn default(self, handler: impl FnOnce() -> R + 'a) -> Self {
        self.case(default_case(handler))
    }

    /// Waits for a case to become ready, runs it, and returns its result.
    ///
    /// # Panics
    ///
    /// Panics if there are no cases at all (the select could never finish)
    /// or more than one default case.
    pub fn run(self) -> R {
        assert!(
            !self.cases.is_empty(),
            "select with no cases would block forever"
        );

        let mut arms: Vec<Box<dyn Arm<'a, R> + 'a>> = Vec::with_capacity(self.cases.len());
        let mut default = None;
        for case in self.cases {
            match case.kind {
                CaseKind::Op(arm) => arms.push(arm),
                CaseKind::Default(handler) => {
                    assert!(default.is_none(), "select has more than one default case");
                    default = Some(handler);
                }
            }
        }

        let signal = Arc::new(Signal::default());
        let unregisters: Vec<_> = arms
            .iter()
            .map(|arm| arm.register(Arc::clone(&signal) as Arc<dyn Waiter>))
            .collect();
        let _cleanup = ScopedCleanup::new(move || {
            for unregister in unregisters {
                unregister();
            }
        });

        loop {
            let seen = signal.epoch();
            let ready: SmallVec<[usize; 8]> = arms
                .iter()
                .enumerate()
                .filter(|(_, arm)| arm.is_ready())
                .map(|(index, _)| index)
                .collect();

            if !ready.is_empty() {
                let chosen = ready[pick(ready.len())];
                trace!(chosen, ready = ready.len(), "select case chosen");
                match arms[chosen].attempt() {
                    Attempt::Done(result) => return result,
                    Attempt::Lost => {
                        debug!(chosen, "select case lost readiness, re-polling");
                        continue;
                    }
                }
            }

            if let Some(handler) = default.take() {
                trace!(cases = arms.len(), "select default taken");
                return handler();
            }

            signal.wait_past(seen);
        }
    }
}

/// Runs a select over `cases`. See [`Select::run`].
///
/// # Panics
///
/// Panics if `cases` is empty or holds more than one default case.
pub fn select<'a, R: 'a>(cases: Vec<Case<'a, R>>) -> R {
    Select { cases }.run()
}
