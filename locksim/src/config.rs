//! Simulation configuration.
//!
//! Configuration is loaded from environment variables. Every variable is
//! optional; unset variables fall back to the scenario defaults.
//!
//! # Environment Variables
//!
//! - `LOCKSIM_PESSIMISTIC_LONG_HOLD_MS`: think-time of the first pessimistic worker (default: `10000`)
//! - `LOCKSIM_PESSIMISTIC_SHORT_HOLD_MS`: think-time of the second pessimistic worker (default: `3000`)
//! - `LOCKSIM_OPTIMISTIC_LONG_HOLD_MS`: think-time of the first optimistic worker (default: `10000`)
//! - `LOCKSIM_OPTIMISTIC_SHORT_HOLD_MS`: think-time of the second optimistic worker (default: `200`)
//! - `LOCKSIM_MAX_NAME_LENGTH`: longest `name` a commit accepts (default: `50`)
//! - `LOCKSIM_LOCK_WAIT_MS`: bound on lock waits; unset waits forever
//! - `LOCKSIM_START_ORDER`: `gated` or `priority` (default: `gated`)
//! - `LOCKSIM_SEED`: seed for generated record ids (default: `42`)
//! - `LOCKSIM_REPORT_JSON`: print results as JSON, `true` or `false` (default: `false`)
//!
//! # Invariants
//!
//! - `max_name_length` is at least 1

use std::time::Duration;

use crate::simulation::StartOrder;
use crate::store::{DEFAULT_MAX_NAME_LENGTH, RecordStore};

/// Simulation configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Think-time of the first (High priority) pessimistic worker.
    pub pessimistic_long_hold: Duration,
    /// Think-time of the second (Low priority) pessimistic worker.
    pub pessimistic_short_hold: Duration,
    /// Think-time of the first optimistic worker.
    pub optimistic_long_hold: Duration,
    /// Think-time of the second optimistic worker.
    pub optimistic_short_hold: Duration,
    /// Longest `name` a commit accepts.
    pub max_name_length: usize,
    /// Bound on lock waits. `None` waits forever.
    pub lock_wait: Option<Duration>,
    /// How drivers order worker starts.
    pub start_order: StartOrder,
    /// Seed for generated record ids.
    pub seed: u64,
    /// Whether the binary prints its results as JSON.
    pub report_json: bool,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pessimistic_long_hold: Duration::from_millis(Self::DEFAULT_PESSIMISTIC_LONG_HOLD_MS),
            pessimistic_short_hold: Duration::from_millis(Self::DEFAULT_PESSIMISTIC_SHORT_HOLD_MS),
            optimistic_long_hold: Duration::from_millis(Self::DEFAULT_OPTIMISTIC_LONG_HOLD_MS),
            optimistic_short_hold: Duration::from_millis(Self::DEFAULT_OPTIMISTIC_SHORT_HOLD_MS),
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            lock_wait: None,
            start_order: StartOrder::default(),
            seed: Self::DEFAULT_SEED,
            report_json: false,
        }
    }
}

impl SimulationConfig {
    /// Default think-time of the first pessimistic worker.
    pub const DEFAULT_PESSIMISTIC_LONG_HOLD_MS: u64 = 10_000;
    /// Default think-time of the second pessimistic worker.
    pub const DEFAULT_PESSIMISTIC_SHORT_HOLD_MS: u64 = 3_000;
    /// Default think-time of the first optimistic worker.
    pub const DEFAULT_OPTIMISTIC_LONG_HOLD_MS: u64 = 10_000;
    /// Default think-time of the second optimistic worker.
    pub const DEFAULT_OPTIMISTIC_SHORT_HOLD_MS: u64 = 200;
    /// Default seed for generated record ids.
    pub const DEFAULT_SEED: u64 = 42;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_name_length = parse_or(&lookup, "LOCKSIM_MAX_NAME_LENGTH", defaults.max_name_length)?;
        if max_name_length == 0 {
            return Err(ConfigError::InvalidValue {
                name: "LOCKSIM_MAX_NAME_LENGTH".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            pessimistic_long_hold: millis_or(
                &lookup,
                "LOCKSIM_PESSIMISTIC_LONG_HOLD_MS",
                defaults.pessimistic_long_hold,
            )?,
            pessimistic_short_hold: millis_or(
                &lookup,
                "LOCKSIM_PESSIMISTIC_SHORT_HOLD_MS",
                defaults.pessimistic_short_hold,
            )?,
            optimistic_long_hold: millis_or(
                &lookup,
                "LOCKSIM_OPTIMISTIC_LONG_HOLD_MS",
                defaults.optimistic_long_hold,
            )?,
            optimistic_short_hold: millis_or(
                &lookup,
                "LOCKSIM_OPTIMISTIC_SHORT_HOLD_MS",
                defaults.optimistic_short_hold,
            )?,
            max_name_length,
            lock_wait: lookup("LOCKSIM_LOCK_WAIT_MS")
                .map(|value| parse_value::<u64>("LOCKSIM_LOCK_WAIT_MS", &value))
                .transpose()?
                .map(Duration::from_millis),
            start_order: parse_or(&lookup, "LOCKSIM_START_ORDER", defaults.start_order)?,
            seed: parse_or(&lookup, "LOCKSIM_SEED", defaults.seed)?,
            report_json: parse_or(&lookup, "LOCKSIM_REPORT_JSON", defaults.report_json)?,
        })
    }

    /// Build an empty store that enforces this configuration.
    #[must_use]
    pub fn store(&self) -> RecordStore {
        RecordStore::new()
            .with_max_name_length(self.max_name_length)
            .with_lock_wait(self.lock_wait)
    }
}

fn parse_value<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}': {e}"),
        })
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name).map_or(Ok(default), |value| parse_value(name, &value))
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    lookup(name).map_or(Ok(default), |value| {
        parse_value::<u64>(name, &value).map(Duration::from_millis)
    })
}
