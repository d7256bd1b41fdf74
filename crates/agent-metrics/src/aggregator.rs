// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Running statistics keyed by report category and dimension fingerprint.

use fnv::FnvHashMap;
use tracing::debug;
use ustr::Ustr;

use crate::catalog::reducer_for;
use crate::report::{Entity, MetricsReport};
use crate::sample::{Dimensions, Fingerprint, ReportType, Sample, SimpleMetric};

/// Accumulator for every sample sharing one dimension set.
#[derive(Debug, Clone)]
pub struct RunningGroup {
    dimensions: Dimensions,
    running_sum: FnvHashMap<Ustr, f64>,
    sample_count: FnvHashMap<Ustr, u64>,
}

impl RunningGroup {
    fn new(dimensions: Dimensions) -> Self {
        RunningGroup {
            dimensions,
            running_sum: FnvHashMap::default(),
            sample_count: FnvHashMap::default(),
        }
    }

    fn fold(&mut self, measurements: &[SimpleMetric]) {
        for metric in measurements {
            *self.running_sum.entry(metric.name).or_insert(0.0) += metric.value;
            *self.sample_count.entry(metric.name).or_insert(0) += 1;
        }
    }

    fn reduce(self) -> Entity {
        let mut measurements = Vec::with_capacity(self.running_sum.len());
        for (name, running_sum) in self.running_sum {
            let Some(reducer) = reducer_for(&name) else {
                debug!("Dropping unclassified metric {name}");
                continue;
            };
            let count = self.sample_count.get(&name).copied().unwrap_or_default();
            measurements.push(SimpleMetric {
                name,
                value: reducer.apply(running_sum, count),
            });
        }
        measurements.sort_unstable_by(|a, b| a.name.as_str().cmp(b.name.as_str()));

        Entity {
            dimensions: self.dimensions,
            measurements,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Collection {
    groups: FnvHashMap<Fingerprint, RunningGroup>,
}

/// Owns all running groups. Callers submit samples and ask for reports; nothing
/// else mutates the groups.
#[derive(Debug, Default)]
pub struct Aggregator {
    collections: FnvHashMap<ReportType, Collection>,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `samples` into the running groups of `report_type`. State from
    /// earlier calls is kept until the category is reduced.
    pub fn save_batch(&mut self, report_type: ReportType, samples: impl IntoIterator<Item = Sample>) {
        let collection = self.collections.entry(report_type).or_default();
        for sample in samples {
            let group = collection
                .groups
                .entry(sample.fingerprint())
                .or_insert_with(|| RunningGroup::new(sample.dimensions.clone()));
            group.fold(&sample.measurements);
        }
    }

    /// Reduces every group of `report_type` and empties the category.
    pub fn reduce(&mut self, report_type: ReportType) -> MetricsReport {
        let collection = self
            .collections
            .remove(&report_type)
            .unwrap_or_default();
        let entities = collection
            .groups
            .into_values()
            .map(RunningGroup::reduce)
            .collect();
        MetricsReport::new(report_type, entities)
    }

    /// Reduces every category holding at least one group.
    pub fn reduce_all(&mut self) -> Vec<MetricsReport> {
        let pending: Vec<ReportType> = ReportType::ALL
            .into_iter()
            .filter(|t| self.group_count(*t) > 0)
            .collect();
        let reports: Vec<MetricsReport> = pending.into_iter().map(|t| self.reduce(t)).collect();
        self.collections.clear();
        reports
    }

    pub fn clear(&mut self) {
        self.collections.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.values().all(|c| c.groups.is_empty())
    }

    #[must_use]
    pub fn group_count(&self, report_type: ReportType) -> usize {
        self.collections
            .get(&report_type)
            .map_or(0, |c| c.groups.len())
    }
}
