// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;

use crate::errors::ParseError;

/// How reports are released to the sink.
///
/// - `Aggregated`: samples are folded into running statistics and reduced on
///   the report timer.
/// - `Streaming`: reports are buffered verbatim and sent once the buffer
///   reaches the bulk size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MetricsMode {
    #[default]
    Aggregated,
    Streaming,
}

impl MetricsMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MetricsMode::Aggregated => "aggregated",
            MetricsMode::Streaming => "streaming",
        }
    }
}

impl fmt::Display for MetricsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricsMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aggregated" => Ok(MetricsMode::Aggregated),
            "streaming" => Ok(MetricsMode::Streaming),
            _ => Err(ParseError::MetricsMode(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for MetricsMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(s.parse().unwrap_or_else(|e| {
                error!("{e}, using {}", MetricsMode::default());
                MetricsMode::default()
            })),
            other => {
                error!("Expected a string for metrics mode, got {other}, using default");
                Ok(MetricsMode::default())
            }
        }
    }
}
