// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use figment::{providers::Env, Figment};
use serde::Deserialize;

use crate::{
    config::{
        deserialize_option_lossless, deserialize_optional_duration, deserialize_optional_string,
        log_level::LogLevel, metrics_mode::MetricsMode, Config, ConfigError, ConfigSource,
    },
    merge_option, merge_option_to_value,
};

pub const ENV_PREFIX: &str = "NGINX_AGENT_";

/// Every `NGINX_AGENT_*` variable the agent understands, lower-cased and
/// stripped of the prefix.
#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct EnvConfig {
    pub log_level: Option<LogLevel>,

    #[serde(deserialize_with = "deserialize_optional_string")]
    pub server_url: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub flush_timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub compression_level: Option<i32>,

    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub metrics_collection_interval: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub metrics_report_interval: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub metrics_bulk_size: Option<usize>,
    pub metrics_mode: Option<MetricsMode>,
}

fn merge_config(config: &mut Config, env_config: &EnvConfig) {
    merge_option_to_value!(config, env_config, log_level);
    merge_option!(config, env_config, server_url);
    merge_option_to_value!(config, env_config, flush_timeout);
    merge_option_to_value!(config, env_config, compression_level);

    merge_option_to_value!(
        config.metrics,
        collection_interval,
        env_config,
        metrics_collection_interval
    );
    merge_option_to_value!(
        config.metrics,
        report_interval,
        env_config,
        metrics_report_interval
    );
    merge_option_to_value!(config.metrics, bulk_size, env_config, metrics_bulk_size);
    merge_option_to_value!(config.metrics, mode, env_config, metrics_mode);
}

#[derive(Debug, PartialEq, Clone, Copy)]
#[allow(clippy::module_name_repetitions)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<EnvConfig>() {
            Ok(env_config) => merge_config(config, &env_config),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "Failed to parse config from environment variables: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}
