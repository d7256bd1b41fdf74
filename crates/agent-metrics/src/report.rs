// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::sample::{unix_timestamp, Dimensions, ReportType, Sample, SimpleMetric, TypedSample};

/// One dimension set with its measurements inside a report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub dimensions: Dimensions,
    pub measurements: Vec<SimpleMetric>,
}

impl Entity {
    #[must_use]
    pub fn measurement(&self, name: &str) -> Option<f64> {
        self.measurements
            .iter()
            .find(|m| m.name.as_str() == name)
            .map(|m| m.value)
    }
}

impl From<Sample> for Entity {
    fn from(sample: Sample) -> Self {
        Entity {
            dimensions: sample.dimensions,
            measurements: sample.measurements,
        }
    }
}

/// Report handed to a sink. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub timestamp: i64,
    pub entities: Vec<Entity>,
}

impl MetricsReport {
    #[must_use]
    pub fn new(report_type: ReportType, entities: Vec<Entity>) -> Self {
        MetricsReport {
            report_type,
            timestamp: unix_timestamp(),
            entities,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn entity(&self, dimensions: &Dimensions) -> Option<&Entity> {
        self.entities.iter().find(|e| &e.dimensions == dimensions)
    }

    /// Groups the samples of one collection tick into one report per category,
    /// in the order each category was first seen.
    #[must_use]
    pub fn bundle(samples: Vec<TypedSample>) -> Vec<MetricsReport> {
        let mut reports: Vec<MetricsReport> = Vec::new();
        for TypedSample {
            report_type,
            sample,
        } in samples
        {
            match reports.iter_mut().find(|r| r.report_type == report_type) {
                Some(report) => report.entities.push(sample.into()),
                None => reports.push(MetricsReport::new(report_type, vec![sample.into()])),
            }
        }
        reports
    }

    /// Inverse of [`MetricsReport::bundle`] for a single report, used when folding.
    #[must_use]
    pub fn into_samples(self) -> Vec<Sample> {
        let timestamp = self.timestamp;
        self.entities
            .into_iter()
            .map(|entity| Sample {
                dimensions: entity.dimensions,
                measurements: entity.measurements,
                timestamp,
            })
            .collect()
    }
}
