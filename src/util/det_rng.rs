//! Small pseudo-random number generator used for select fairness.
//!
//! xorshift64: fast, no allocation, reproducible from a seed. NOT
//! cryptographically secure. Seeds come either from the configured
//! `select_seed` (reproducible runs) or from OS entropy.

use std::sync::atomic::{AtomicU64, Ordering};

/// Distinguishes per-thread generators derived from one configured seed.
static STREAM_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A pseudo-random number generator using xorshift64.
#[derive(Debug, Clone)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    /// Creates a new PRNG with the given seed.
    ///
    /// The seed must be non-zero. If zero is provided, it will be replaced with 1.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Creates a generator seeded from OS entropy.
    ///
    /// Falls back to a clock-derived seed if the OS source is unavailable.
    #[must_use]
    pub fn from_entropy() -> Self {
        let mut buf = [0u8; 8];
        if getrandom::getrandom(&mut buf).is_ok() {
            return Self::new(u64::from_le_bytes(buf));
        }
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.subsec_nanos());
        Self::new(u64::from(nanos) ^ STREAM_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates the next generator in a reproducible family rooted at `seed`.
    ///
    /// Each call yields a different stream, so threads sharing one configured
    /// seed do not pick in lockstep.
    #[must_use]
    pub fn stream(seed: u64) -> Self {
        let index = STREAM_COUNTER.fetch_add(1, Ordering::Relaxed);
        // splitmix64 step so adjacent indices give unrelated states
        let mut z = seed.wrapping_add(index.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        Self::new(z ^ (z >> 31))
    }

    /// Generates the next pseudo-random u64 value.
    #[allow(clippy::missing_const_for_fn)] // Cannot be const: mutates self
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Generates a pseudo-random usize value in the range [0, bound).
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_usize(&mut self, bound: usize) -> usize {
        assert!(bound > 0, "bound must be non-zero");
        (self.next_u64() as usize) % bound
    }
}
