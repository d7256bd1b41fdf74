// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! YAML file-based configuration.
//!
//! ```yaml
//! log_level: debug
//! server:
//!   url: https://collector.example.com
//!   flush_timeout: 5s
//!   compression_level: 3
//! metrics:
//!   collection_interval: 15s
//!   report_interval: 1m
//!   bulk_size: 20
//!   mode: aggregated
//! ```

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::Deserialize;

use crate::{
    config::{
        deserialize_option_lossless, deserialize_optional_duration, deserialize_optional_string,
        log_level::LogLevel, metrics_mode::MetricsMode, Config, ConfigError, ConfigSource,
    },
    merge_option, merge_option_to_value,
};

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlConfig {
    pub log_level: Option<LogLevel>,
    pub server: ServerConfig,
    pub metrics: MetricsSection,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub url: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub flush_timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub compression_level: Option<i32>,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MetricsSection {
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub collection_interval: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub report_interval: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub bulk_size: Option<usize>,
    pub mode: Option<MetricsMode>,
}

fn merge_config(config: &mut Config, yaml_config: &YamlConfig) {
    merge_option_to_value!(config, yaml_config, log_level);

    merge_option!(config, server_url, yaml_config.server, url);
    merge_option_to_value!(config, flush_timeout, yaml_config.server, flush_timeout);
    merge_option_to_value!(
        config,
        compression_level,
        yaml_config.server,
        compression_level
    );

    merge_option_to_value!(
        config.metrics,
        collection_interval,
        yaml_config.metrics,
        collection_interval
    );
    merge_option_to_value!(
        config.metrics,
        report_interval,
        yaml_config.metrics,
        report_interval
    );
    merge_option_to_value!(config.metrics, bulk_size, yaml_config.metrics, bulk_size);
    merge_option_to_value!(config.metrics, mode, yaml_config.metrics, mode);
}

#[derive(Debug, PartialEq, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlConfigSource {
    pub path: PathBuf,
}

impl ConfigSource for YamlConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Yaml::file(self.path.clone()));

        match figment.extract::<YamlConfig>() {
            Ok(yaml_config) => merge_config(config, &yaml_config),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "Failed to parse config from yaml file: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_merge_config_overrides_with_yaml_file() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "nginx-agent.yaml",
                r#"
log_level: "debug"
server:
  url: "https://collector.example.com"
  flush_timeout: 7
  compression_level: 9
metrics:
  collection_interval: "10s"
  report_interval: 30
  bulk_size: 50
  mode: "streaming"
"#,
            )?;

            let mut config = Config::default();
            let yaml_config_source = YamlConfigSource {
                path: Path::new("nginx-agent.yaml").to_path_buf(),
            };
            yaml_config_source
                .load(&mut config)
                .expect("Failed to load config");

            assert_eq!(config.log_level, LogLevel::Debug);
            assert_eq!(
                config.server_url,
                Some("https://collector.example.com".to_string())
            );
            assert_eq!(config.flush_timeout, Duration::from_secs(7));
            assert_eq!(config.compression_level, 9);
            assert_eq!(config.metrics.collection_interval, Duration::from_secs(10));
            assert_eq!(config.metrics.report_interval, Duration::from_secs(30));
            assert_eq!(config.metrics.bulk_size, 50);
            assert_eq!(config.metrics.mode, MetricsMode::Streaming);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "nginx-agent.yaml",
                r#"
metrics:
  collection_interval: "whenever"
  bulk_size: "many"
  mode: "batched"
"#,
            )?;

            let mut config = Config::default();
            let yaml_config_source = YamlConfigSource {
                path: Path::new("nginx-agent.yaml").to_path_buf(),
            };
            yaml_config_source
                .load(&mut config)
                .expect("Failed to load config");

            assert_eq!(config.metrics, crate::config::MetricsConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("nginx-agent.yaml", "metrics: [unclosed")?;

            let mut config = Config::default();
            let yaml_config_source = YamlConfigSource {
                path: Path::new("nginx-agent.yaml").to_path_buf(),
            };
            let result = yaml_config_source.load(&mut config);
            assert!(matches!(result, Err(ConfigError::ParseError(_))));
            assert_eq!(config, Config::default());
            Ok(())
        });
    }
}
