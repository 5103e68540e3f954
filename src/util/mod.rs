//! Internal utilities.
//!
//! Kept small and dependency-light: a seedable PRNG for select fairness and
//! a run-on-exit cleanup guard.

pub mod det_rng;
pub mod scoped;

pub use det_rng::DetRng;
pub use scoped::ScopedCleanup;
