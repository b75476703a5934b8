//! Global `tracing` subscriber setup.
//!
//! Installs an [`EnvFilter`] (config default, `RUST_LOG` wins), an optional
//! compact console layer and an optional rolling file layer written through a
//! non-blocking appender. Keep the returned [`LogGuard`] alive until exit or
//! buffered file output is lost.

use crate::error::PulseError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_MAX_FILES: usize = 10;
const LOG_FILE_SUFFIX: &str = "log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Self::MINUTELY,
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when neither `directives` nor `RUST_LOG` say otherwise.
    pub level: String,
    /// Extra directives, e.g. `pulse_events=debug`.
    pub directives: Option<String>,
    pub console: bool,
    /// Directory for rolling log files. No file output when unset.
    pub path: Option<PathBuf>,
    pub json: bool,
    pub rotation: LogRotation,
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            directives: None,
            console: true,
            path: None,
            json: false,
            rotation: LogRotation::Daily,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

/// Keeps the file writer thread alive.
#[must_use = "Dropping this handle stops the background log writer."]
#[derive(Debug)]
pub struct LogGuard {
    guard: Option<WorkerGuard>,
}

impl LogGuard {
    /// Whether a file layer was installed.
    #[must_use]
    pub const fn has_file_output(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if self.guard.is_some() {
            tracing::info!("Logging shutting down, flushing buffers");
        }
    }
}

/// Installs the global subscriber. `name` prefixes rolling file names.
///
/// # Errors
/// * [`PulseError::InvalidConfiguration`] for a blank name, an unknown level,
///   bad directives, `max_files == 0` or no enabled output.
/// * [`PulseError::Logging`] if the log directory or appender cannot be
///   created, or a global subscriber is already installed.
pub fn init(name: &str, config: &LoggingConfig) -> Result<LogGuard, PulseError> {
    if name.trim().is_empty() {
        return Err(invalid("logger name must not be empty".into()));
    }
    if config.max_files == 0 {
        return Err(invalid("max_files must be greater than zero".into()));
    }
    if !config.console && config.path.is_none() {
        return Err(invalid("enable console or file output".into()));
    }

    let env_filter = build_env_filter(config)?;
    let mut layers = Vec::new();

    if config.console {
        layers.push(layer().compact().with_ansi(true).boxed());
    }

    let guard = match &config.path {
        Some(path) => {
            fs::create_dir_all(path).map_err(|err| PulseError::Logging {
                message: err.to_string().into(),
                context: Some(format!("Failed to create {}", path.display()).into()),
            })?;
            let appender = RollingFileAppender::builder()
                .rotation(config.rotation.into())
                .filename_prefix(name)
                .filename_suffix(LOG_FILE_SUFFIX)
                .max_log_files(config.max_files)
                .build(path)
                .map_err(|err| PulseError::Logging {
                    message: err.to_string().into(),
                    context: Some(Cow::Borrowed("rolling file appender")),
                })?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = layer().with_writer(writer).with_ansi(false);
            layers.push(if config.json { file.json().boxed() } else { file.boxed() });
            Some(guard)
        },
        None => None,
    };

    tracing_subscriber::registry().with(env_filter).with(layers).try_init().map_err(|err| {
        PulseError::Logging {
            message: err.to_string().into(),
            context: Some(Cow::Borrowed("global subscriber")),
        }
    })?;

    Ok(LogGuard { guard })
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, PulseError> {
    let level = config
        .level
        .parse::<LevelFilter>()
        .map_err(|err| invalid(format!("unknown level '{}': {err}", config.level).into()))?;
    let builder = EnvFilter::builder().with_default_directive(level.into());
    config.directives.as_ref().map_or_else(
        || Ok(builder.from_env_lossy()),
        |directives| {
            builder
                .parse(directives)
                .map_err(|err| invalid(format!("invalid directives '{directives}': {err}").into()))
        },
    )
}

const fn invalid(message: Cow<'static, str>) -> PulseError {
    PulseError::InvalidConfiguration { message, context: Some(Cow::Borrowed("logging")) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unusable_settings_before_touching_global_state() {
        let blank = init(" ", &LoggingConfig::default()).unwrap_err();
        assert!(matches!(blank, PulseError::InvalidConfiguration { .. }));

        let silent = LoggingConfig { console: false, ..LoggingConfig::default() };
        assert!(init("pulse", &silent).is_err());

        let level = LoggingConfig { level: "loud".to_owned(), ..LoggingConfig::default() };
        assert!(init("pulse", &level).unwrap_err().to_string().contains("loud"));

        let no_files = LoggingConfig { max_files: 0, ..LoggingConfig::default() };
        assert!(init("pulse", &no_files).is_err());
    }

    #[test]
    fn rotation_names_deserialize() {
        let config: LoggingConfig =
            serde_json::from_str(r#"{ "rotation": "hourly", "json": true }"#).unwrap();
        assert_eq!(config.rotation, LogRotation::Hourly);
        assert!(config.json);
        assert!(config.console);
    }
}
