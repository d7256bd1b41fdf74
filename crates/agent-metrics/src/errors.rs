// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Failure raised by a single source while collecting. Never fatal to the tick.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source {id} failed to collect: {reason}")]
    Collection { id: String, reason: String },
    #[error("source {0} has been stopped")]
    Stopped(String),
    #[error("source i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to prepare payload: {0}")]
    Payload(String),
    #[error("destination rejected reports: {0:?} {1}")]
    Destination(Option<StatusCode>, String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown report type: {0}")]
    ReportType(String),
    #[error("unknown metrics mode: {0}")]
    MetricsMode(String),
    #[error("invalid duration: {0}")]
    Duration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_display() {
        let err = SourceError::Collection {
            id: "host/loadavg".to_string(),
            reason: "no such file".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "source host/loadavg failed to collect: no such file"
        );
    }

    #[test]
    fn test_sink_error_display_with_status() {
        let err = SinkError::Destination(
            Some(StatusCode::SERVICE_UNAVAILABLE),
            "try later".to_string(),
        );
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("try later"));
    }

    #[test]
    fn test_io_error_converts_into_source_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SourceError = io.into();
        assert!(matches!(err, SourceError::Io(_)));
    }
}
