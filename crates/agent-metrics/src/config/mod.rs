// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration Module
//!
//! Settings are merged from the following sources, later sources overriding earlier ones:
//!
//! 1. **Defaults** - Hard-coded defaults in [`crate::constants`]
//! 2. **YAML file** - `nginx-agent.yaml` in the configuration directory (if present)
//! 3. **Environment variables** - `NGINX_AGENT_*` variables (highest priority)
//!
//! ## Edge Cases and Behaviors
//!
//! ### Durations
//!
//! - **Numbers**: Interpreted as seconds, floats allowed (`0.5` is 500ms)
//! - **Strings**: Accept a `ms`, `s`, `m` or `h` suffix (`"15s"`, `"500ms"`, `"1m"`)
//! - **Zero**: Intervals and flush timeout fall back to their defaults
//! - **Invalid or negative**: Logged and ignored, the previous value is kept
//!
//! ### Metrics Mode
//!
//! - **Case insensitive**: `"Aggregated"` and `"aggregated"` are the same
//! - **Unknown values**: Logged and ignored, falls back to `aggregated`
//!
//! ### Server URL
//!
//! - **Whitespace** is trimmed and a trailing `/` removed
//! - **Empty after trimming**: No server is configured and reports are logged instead

pub mod env;
pub mod log_level;
pub mod metrics_mode;
pub mod yaml;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::{
    env::EnvConfigSource, log_level::LogLevel, metrics_mode::MetricsMode, yaml::YamlConfigSource,
};
use crate::constants::{
    DEFAULT_BULK_SIZE, DEFAULT_COLLECTION_INTERVAL, DEFAULT_COMPRESSION_LEVEL,
    DEFAULT_FLUSH_TIMEOUT, DEFAULT_REPORT_INTERVAL,
};
use crate::errors::ParseError;

pub const CONFIG_FILE_NAME: &str = "nginx-agent.yaml";

/// Copies an `Option` field from a source struct when it is set. The four-argument form maps
/// between differently named fields.
#[macro_export]
macro_rules! merge_option {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if $source.$source_field.is_some() {
            $config.$config_field.clone_from(&$source.$source_field);
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if $source.$field.is_some() {
            $config.$field.clone_from(&$source.$field);
        }
    };
}

/// Like [`merge_option!`] but unwraps into a plain field.
#[macro_export]
macro_rules! merge_option_to_value {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if let Some(value) = &$source.$source_field {
            $config.$config_field = value.clone();
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if let Some(value) = &$source.$field {
            $config.$field = value.clone();
        }
    };
}

#[derive(Debug, PartialEq, thiserror::Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    ParseError(String),
}

#[allow(clippy::module_name_repetitions)]
pub trait ConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError>;
}

#[derive(Default)]
#[allow(clippy::module_name_repetitions)]
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    config: Config,
}

#[allow(clippy::module_name_repetitions)]
impl ConfigBuilder {
    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn build(&mut self) -> Config {
        let mut failed_sources = 0;
        for source in &self.sources {
            if let Err(e) = source.load(&mut self.config) {
                error!("Failed to load config: {e}");
                failed_sources += 1;
            }
        }

        if !self.sources.is_empty() && failed_sources == self.sources.len() {
            debug!("All sources failed to load config, using default config.");
        }

        self.config.metrics.sanitize();

        if self.config.flush_timeout.is_zero() {
            warn!("Flush timeout of 0 is not allowed, using default");
            self.config.flush_timeout = DEFAULT_FLUSH_TIMEOUT;
        }

        self.config.server_url = self
            .config
            .server_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        self.config.clone()
    }
}

/// Settings the metrics pipeline reads. Every field can change at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub collection_interval: Duration,
    pub report_interval: Duration,
    pub bulk_size: usize,
    pub mode: MetricsMode,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            collection_interval: DEFAULT_COLLECTION_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            bulk_size: DEFAULT_BULK_SIZE,
            mode: MetricsMode::default(),
        }
    }
}

impl MetricsConfig {
    /// Replaces values the pipeline cannot run with by their defaults.
    pub fn sanitize(&mut self) {
        if self.collection_interval.is_zero() {
            warn!("Collection interval of 0 is not allowed, using default");
            self.collection_interval = DEFAULT_COLLECTION_INTERVAL;
        }
        if self.report_interval.is_zero() {
            warn!("Report interval of 0 is not allowed, using default");
            self.report_interval = DEFAULT_REPORT_INTERVAL;
        }
        if self.bulk_size == 0 {
            warn!("Bulk size of 0 is not allowed, using default");
            self.bulk_size = DEFAULT_BULK_SIZE;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_level: LogLevel,
    pub metrics: MetricsConfig,
    pub server_url: Option<String>,
    pub flush_timeout: Duration,
    pub compression_level: i32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: LogLevel::default(),
            metrics: MetricsConfig::default(),
            server_url: None,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Loads the configuration from `config_directory` and the environment.
#[must_use]
pub fn get_config(config_directory: &Path) -> Config {
    let path = config_directory.join(CONFIG_FILE_NAME);
    ConfigBuilder::default()
        .add_source(Box::new(YamlConfigSource { path }))
        .add_source(Box::new(EnvConfigSource))
        .build()
}

/// Parses `"500ms"`, `"15s"`, `"2m"`, `"1h"` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, ParseError> {
    let value = value.trim();
    let (number, millis_per_unit) = if let Some(n) = value.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 3_600_000.0)
    } else {
        (value, 1_000.0)
    };

    let amount: f64 = number
        .trim()
        .parse()
        .map_err(|_| ParseError::Duration(value.to_string()))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(ParseError::Duration(value.to_string()));
    }
    Ok(Duration::from_secs_f64(amount * millis_per_unit / 1_000.0))
}

pub fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(s)),
        Value::Null => Ok(None),
        other => {
            error!(
                "Failed to parse value, expected a string, got: {}, ignoring",
                other
            );
            Ok(None)
        }
    }
}

pub fn deserialize_option_lossless<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<T>::deserialize(deserializer) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Failed to deserialize optional value: {}, ignoring", e);
            Ok(None)
        }
    }
}

pub fn deserialize_optional_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    struct DurationVisitor;
    impl serde::de::Visitor<'_> for DurationVisitor {
        type Value = Option<Duration>;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a duration in seconds or a string such as \"15s\"")
        }
        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(Duration::from_secs(v)))
        }
        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
            match u64::try_from(v) {
                Ok(v) => self.visit_u64(v),
                Err(_) => {
                    error!("Failed to parse duration: negative durations are not allowed, ignoring");
                    Ok(None)
                }
            }
        }
        fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
            if !v.is_finite() || v < 0f64 {
                error!("Failed to parse duration: {v} is not a valid number of seconds, ignoring");
                return Ok(None);
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }
        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            match parse_duration(v) {
                Ok(duration) => Ok(Some(duration)),
                Err(e) => {
                    error!("Failed to parse duration: {e}, ignoring");
                    Ok(None)
                }
            }
        }
        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }
    deserializer.deserialize_any(DurationVisitor)
}
