//! Process-wide configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: a [`Config`] passed to [`install`] before first use
//! 2. **Environment variables**: `CSPSYNC_*`
//! 3. **Defaults**: [`Config::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `CSPSYNC_TIMER_BACKEND` | `dedicated` \| `shared` | `timer_backend` |
//! | `CSPSYNC_TIMER_THREAD_NAME` | `String` | `timer_thread_name` |
//! | `CSPSYNC_SELECT_SEED` | `u64` | `select_seed` |
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `timer_backend` | `Dedicated` |
//! | `timer_thread_name` | `"cspsync-timer"` |
//! | `select_seed` | `None` (OS entropy) |

use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::tracing_compat::warn;

/// Environment variable name for the deadline timer backend.
pub const ENV_TIMER_BACKEND: &str = "CSPSYNC_TIMER_BACKEND";
/// Environment variable name for the timer thread name prefix.
pub const ENV_TIMER_THREAD_NAME: &str = "CSPSYNC_TIMER_THREAD_NAME";
/// Environment variable name for the select fairness seed.
pub const ENV_SELECT_SEED: &str = "CSPSYNC_SELECT_SEED";

static GLOBAL: OnceLock<Config> = OnceLock::new();

/// How context deadlines are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerBackend {
    /// One OS thread per deadline context, joined when the context drops.
    #[default]
    Dedicated,
    /// One shared reactor thread servicing a deadline heap for all contexts.
    Shared,
}

impl TimerBackend {
    fn parse(var_name: &str, val: &str) -> Result<Self> {
        match val.trim().to_ascii_lowercase().as_str() {
            "dedicated" | "thread" => Ok(Self::Dedicated),
            "shared" | "reactor" => Ok(Self::Shared),
            other => Err(Error::invalid_config(format!(
                "invalid value for {var_name}: expected \"dedicated\" or \"shared\", got {other:?}"
            ))),
        }
    }
}

/// Library configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backend used by deadline contexts.
    pub timer_backend: TimerBackend,
    /// Name prefix for timer threads.
    pub timer_thread_name: String,
    /// Fixed seed for select fairness; `None` draws from OS entropy.
    pub select_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timer_backend: TimerBackend::Dedicated,
            timer_thread_name: "cspsync-timer".to_string(),
            select_seed: None,
        }
    }
}

impl Config {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Sets the timer backend.
    #[must_use]
    pub fn timer_backend(mut self, backend: TimerBackend) -> Self {
        self.timer_backend = backend;
        self
    }

    /// Sets the timer thread name prefix.
    #[must_use]
    pub fn timer_thread_name(mut self, name: impl Into<String>) -> Self {
        self.timer_thread_name = name.into();
        self
    }

    /// Sets a fixed select seed.
    #[must_use]
    pub fn select_seed(mut self, seed: u64) -> Self {
        self.select_seed = Some(seed);
        self
    }
}

/// Apply environment variable overrides to a [`Config`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(val) = read_env(ENV_TIMER_BACKEND) {
        config.timer_backend = TimerBackend::parse(ENV_TIMER_BACKEND, &val)?;
    }
    if let Some(val) = read_env(ENV_TIMER_THREAD_NAME) {
        config.timer_thread_name = val;
    }
    if let Some(val) = read_env(ENV_SELECT_SEED) {
        config.select_seed = Some(parse_u64(ENV_SELECT_SEED, &val)?);
    }
    Ok(())
}

/// Installs `config` as the process-wide configuration.
///
/// Only effective before anything has read the configuration; otherwise the
/// rejected config is handed back.
pub fn install(config: Config) -> std::result::Result<(), Config> {
    GLOBAL.set(config)
}

/// Returns the process-wide configuration, resolving it on first use.
pub fn global() -> &'static Config {
    GLOBAL.get_or_init(|| {
        Config::from_env().unwrap_or_else(|err| {
            warn!(error = %err, "ignoring invalid cspsync environment configuration");
            Config::default()
        })
    })
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64> {
    val.trim().parse::<u64>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}
