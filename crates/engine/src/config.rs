use std::time::Duration;

use bulkops_core::options::{
    OptionDefaults, DEFAULT_BATCH_DELAY_MS, DEFAULT_BATCH_SIZE, DEFAULT_MAX_BATCH_SIZE,
};
use bulkops_core::query::DEFAULT_RECENT_OPERATIONS;

/// Default scheduler tick.
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Default event bus buffer.
const DEFAULT_EVENT_CAPACITY: usize = 1_024;

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Fixed scheduler cadence. Enqueues also wake the scheduler directly.
    pub tick_interval: Duration,
    /// Batch size used when the caller does not pick one.
    pub default_batch_size: usize,
    /// Largest batch size a caller may request.
    pub max_batch_size: usize,
    /// Default pause between batches.
    pub batch_delay_ms: u64,
    /// Engine-wide per-item timeout; handlers may override.
    pub item_timeout_ms: Option<u64>,
    /// How many operations `statistics()` lists as recent.
    pub recent_operations: usize,
    /// Event bus buffer capacity.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            item_timeout_ms: None,
            recent_operations: DEFAULT_RECENT_OPERATIONS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `BULKOPS_TICK_INTERVAL_MS`   | `1000`  |
    /// | `BULKOPS_DEFAULT_BATCH_SIZE` | `10`    |
    /// | `BULKOPS_MAX_BATCH_SIZE`     | `100`   |
    /// | `BULKOPS_BATCH_DELAY_MS`     | `100`   |
    /// | `BULKOPS_ITEM_TIMEOUT_MS`    | unset   |
    /// | `BULKOPS_RECENT_OPERATIONS`  | `10`    |
    /// | `BULKOPS_EVENT_CAPACITY`     | `1024`  |
    ///
    /// Unparseable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let tick_ms = parse_or(
            &lookup,
            "BULKOPS_TICK_INTERVAL_MS",
            DEFAULT_TICK_INTERVAL_MS,
        );

        Self {
            tick_interval: Duration::from_millis(tick_ms.max(1)),
            default_batch_size: parse_or(
                &lookup,
                "BULKOPS_DEFAULT_BATCH_SIZE",
                defaults.default_batch_size,
            )
            .max(1),
            max_batch_size: parse_or(&lookup, "BULKOPS_MAX_BATCH_SIZE", defaults.max_batch_size)
                .max(1),
            batch_delay_ms: parse_or(&lookup, "BULKOPS_BATCH_DELAY_MS", defaults.batch_delay_ms),
            item_timeout_ms: lookup("BULKOPS_ITEM_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|ms: &u64| *ms > 0),
            recent_operations: parse_or(
                &lookup,
                "BULKOPS_RECENT_OPERATIONS",
                defaults.recent_operations,
            ),
            event_capacity: parse_or(&lookup, "BULKOPS_EVENT_CAPACITY", defaults.event_capacity)
                .max(1),
        }
    }

    /// Option defaults handed to operation creation.
    pub fn option_defaults(&self) -> OptionDefaults {
        OptionDefaults {
            batch_size: self.default_batch_size.min(self.max_batch_size),
            max_batch_size: self.max_batch_size,
            delay_between_batches_ms: self.batch_delay_ms,
            item_timeout_ms: self.item_timeout_ms,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparseable configuration value");
            default
        }),
    }
}
