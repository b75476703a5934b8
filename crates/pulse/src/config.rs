//! Layered configuration: a file plus `PULSE__*` environment overrides.

use crate::error::{PulseError, PulseErrorExt};
use crate::logging::LoggingConfig;
use config::{Config, Environment, File, Map};
use pulse_events::{
    BatcherConfig, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT, DEFAULT_INPUT_CAPACITY,
    DEFAULT_OUTPUT_CAPACITY, DEFAULT_QUEUE_CAPACITY, DEFAULT_WINDOW, EventBusConfig,
    EventFilterManager, EventType, FilterRule,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const ENV_PREFIX: &str = "PULSE";
const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

/// Loads `T` from `path` (format picked by extension), then overlays
/// environment variables prefixed with `PULSE__`. Nested keys use `__`,
/// e.g. `PULSE__BUS__QUEUE_CAPACITY=256`.
///
/// # Errors
/// Returns [`PulseError::Config`] if the file is missing or unreadable, or
/// if the merged values do not deserialize into `T`.
///
/// # Example
/// ```rust,no_run
/// use pulse::{PulseConfig, load_config};
///
/// let config: PulseConfig = load_config("config/pulse.toml").unwrap_or_default();
/// ```
pub fn load_config<T>(path: impl AsRef<Path>) -> Result<T, PulseError>
where
    T: DeserializeOwned,
{
    load_layered(path.as_ref(), None)
}

/// `vars` replaces the process environment when given.
fn load_layered<T>(path: &Path, vars: Option<Map<String, String>>) -> Result<T, PulseError>
where
    T: DeserializeOwned,
{
    info!("Loading config from {}", path.display());

    Config::builder()
        .add_source(File::from(path).required(true))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .convert_case(config::Case::Snake)
                .try_parsing(true)
                .source(vars),
        )
        .build()
        .context("Failed to build config")?
        .try_deserialize::<T>()
        .context("Failed to deserialize config")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub bus: BusSettings,
    pub middleware: MiddlewareSettings,
    pub filter: FilterSettings,
    pub batcher: BatcherSettings,
    pub logging: LoggingConfig,
}

impl PulseConfig {
    /// Checks every section before anything is started.
    ///
    /// # Errors
    /// Returns [`PulseError::InvalidConfiguration`] naming the offending field.
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.bus.queue_capacity == 0 {
            return Err(invalid("queue capacity must be greater than zero", "bus.queue_capacity"));
        }
        if self.filter.window_ms == 0 {
            return Err(invalid("window must be greater than zero", "filter.window_ms"));
        }
        if self.batcher.enabled {
            self.batcher.to_batcher_config().validate().context("batcher")?;
        }
        self.filter.rules()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub queue_capacity: usize,
    /// How long `shutdown` waits for subscriber workers.
    pub stop_timeout_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self { queue_capacity: DEFAULT_QUEUE_CAPACITY, stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS }
    }
}

impl BusSettings {
    #[must_use]
    pub const fn to_bus_config(&self) -> EventBusConfig {
        EventBusConfig { queue_capacity: self.queue_capacity }
    }

    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareSettings {
    /// Converts handler panics into logged failures.
    pub recovery: bool,
    /// Logs every publish and delivery.
    pub tracing: bool,
}

impl Default for MiddlewareSettings {
    fn default() -> Self {
        Self { recovery: true, tracing: false }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    pub min_interval_ms: Option<u64>,
    pub max_per_second: Option<u32>,
}

impl From<RuleSettings> for FilterRule {
    fn from(rule: RuleSettings) -> Self {
        Self {
            min_interval: rule.min_interval_ms.map(Duration::from_millis),
            max_per_second: rule.max_per_second,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub window_ms: u64,
    /// Rules keyed by event type name, e.g. `key_input`.
    pub rules: BTreeMap<String, RuleSettings>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            window_ms: u64::try_from(DEFAULT_WINDOW.as_millis()).unwrap_or(u64::MAX),
            rules: BTreeMap::new(),
        }
    }
}

impl FilterSettings {
    /// Resolves the rule table's type names.
    ///
    /// # Errors
    /// Returns [`PulseError::InvalidConfiguration`] for an empty or `*` type name.
    pub fn rules(&self) -> Result<Vec<(EventType, FilterRule)>, PulseError> {
        self.rules
            .iter()
            .map(|(name, rule)| {
                let event_type = EventType::parse(name).map_err(|err| {
                    invalid(err.to_string(), format!("filter.rules.{name}"))
                })?;
                Ok((event_type, FilterRule::from(*rule)))
            })
            .collect()
    }

    /// # Errors
    /// Same as [`rules`](Self::rules).
    pub fn build(&self) -> Result<EventFilterManager, PulseError> {
        let filter = EventFilterManager::with_rules(self.rules()?);
        filter.set_window_size(Duration::from_millis(self.window_ms));
        Ok(filter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherSettings {
    /// Subscribes a batcher to every event type.
    pub enabled: bool,
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub input_capacity: usize,
    pub output_capacity: usize,
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_ms: u64::try_from(DEFAULT_BATCH_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            input_capacity: DEFAULT_INPUT_CAPACITY,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
        }
    }
}

impl BatcherSettings {
    #[must_use]
    pub const fn to_batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            batch_size: self.batch_size,
            timeout: Duration::from_millis(self.timeout_ms),
            input_capacity: self.input_capacity,
            output_capacity: self.output_capacity,
        }
    }
}

fn invalid(
    message: impl Into<std::borrow::Cow<'static, str>>,
    field: impl Into<std::borrow::Cow<'static, str>>,
) -> PulseError {
    PulseError::InvalidConfiguration { message: message.into(), context: Some(field.into()) }
}
