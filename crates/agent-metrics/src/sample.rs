// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::hash::Hasher;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use ustr::{ustr, Ustr};

use crate::errors::ParseError;

/// Category a report belongs to. Statistics of different categories are never mixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    System,
    Instance,
    Agent,
    CacheZone,
    Upstreams,
}

impl ReportType {
    pub const ALL: [ReportType; 5] = [
        ReportType::System,
        ReportType::Instance,
        ReportType::Agent,
        ReportType::CacheZone,
        ReportType::Upstreams,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::System => "system",
            ReportType::Instance => "instance",
            ReportType::Agent => "agent",
            ReportType::CacheZone => "cache_zone",
            ReportType::Upstreams => "upstreams",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseError::ReportType(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dimension {
    pub name: Ustr,
    pub value: Ustr,
}

/// Canonical dimension set of a sample.
///
/// Pairs are kept sorted and deduplicated regardless of the order they were
/// attached in, so equal sets compare, serialize and fingerprint identically.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Dimension>", into = "Vec<Dimension>")]
pub struct Dimensions {
    values: Vec<Dimension>,
}

impl Dimensions {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        pairs
            .into_iter()
            .map(|(name, value)| Dimension {
                name: ustr(name.as_ref()),
                value: ustr(value.as_ref()),
            })
            .collect::<Vec<_>>()
            .into()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Ustr> {
        self.values
            .iter()
            .find(|d| d.name.as_str() == name)
            .map(|d| d.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.values.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Content hash of the canonical set. Every pair is written length-prefixed
    /// so that `("ab", "c")` and `("a", "bc")` cannot collide by concatenation.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = FnvHasher::default();
        hasher.write_usize(self.values.len());
        for dimension in &self.values {
            hasher.write_usize(dimension.name.len());
            hasher.write(dimension.name.as_bytes());
            hasher.write_usize(dimension.value.len());
            hasher.write(dimension.value.as_bytes());
        }
        Fingerprint(hasher.finish())
    }
}

impl From<Vec<Dimension>> for Dimensions {
    fn from(mut values: Vec<Dimension>) -> Self {
        values.sort_unstable();
        values.dedup();
        Dimensions { values }
    }
}

impl From<Dimensions> for Vec<Dimension> {
    fn from(dimensions: Dimensions) -> Self {
        dimensions.values
    }
}

/// Grouping key of a running group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimpleMetric {
    pub name: Ustr,
    pub value: f64,
}

impl SimpleMetric {
    pub fn new(name: impl AsRef<str>, value: f64) -> Self {
        SimpleMetric {
            name: ustr(name.as_ref()),
            value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub dimensions: Dimensions,
    pub measurements: Vec<SimpleMetric>,
    pub timestamp: i64,
}

impl Sample {
    #[must_use]
    pub fn new(dimensions: Dimensions, measurements: Vec<SimpleMetric>) -> Self {
        Sample {
            dimensions,
            measurements,
            timestamp: unix_timestamp(),
        }
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.dimensions.fingerprint()
    }
}

/// What a source emits onto the collection channel.
#[derive(Clone, Debug, PartialEq)]
pub struct TypedSample {
    pub report_type: ReportType,
    pub sample: Sample,
}

impl TypedSample {
    #[must_use]
    pub fn new(report_type: ReportType, sample: Sample) -> Self {
        TypedSample {
            report_type,
            sample,
        }
    }
}

#[must_use]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dimensions_are_order_independent() {
        let a = Dimensions::new([("host", "a"), ("upstream", "backend")]);
        let b = Dimensions::new([("upstream", "backend"), ("host", "a")]);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_dimensions_dedup_identical_pairs() {
        let dims = Dimensions::new([("host", "a"), ("host", "a"), ("zone", "z1")]);
        assert_eq!(dims.len(), 2);
        assert_eq!(dims.get("zone"), Some(ustr("z1")));
        assert_eq!(dims.get("missing"), None);
    }

    #[test]
    fn test_distinct_entities_do_not_share_fingerprint() {
        let first = Dimensions::new([("upstream", "backend-1")]);
        let second = Dimensions::new([("upstream", "backend-2")]);
        assert_ne!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_not_fooled_by_concatenation() {
        let first = Dimensions::new([("ab", "c")]);
        let second = Dimensions::new([("a", "bc")]);
        assert_ne!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_deserialized_dimensions_are_canonical() {
        let json = r#"[{"name":"z","value":"1"},{"name":"a","value":"2"}]"#;
        let dims: Dimensions = serde_json::from_str(json).expect("failed to parse dimensions");
        assert_eq!(dims, Dimensions::new([("a", "2"), ("z", "1")]));
    }

    #[test]
    fn test_fingerprint_display_is_fixed_width_hex() {
        let rendered = Dimensions::default().fingerprint().to_string();
        assert_eq!(rendered.len(), 16);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_report_type_parse_and_display() {
        for report_type in ReportType::ALL {
            let parsed: ReportType = report_type
                .to_string()
                .parse()
                .expect("failed to parse report type");
            assert_eq!(parsed, report_type);
        }
        assert_eq!(
            "cache".parse::<ReportType>(),
            Err(ParseError::ReportType("cache".to_string()))
        );
    }

    #[test]
    fn test_report_type_serializes_snake_case() {
        let json = serde_json::to_string(&ReportType::CacheZone).expect("failed to serialize");
        assert_eq!(json, r#""cache_zone""#);
    }

    proptest! {
        #[test]
        fn fingerprint_ignores_attachment_order(
            (pairs, shuffled) in proptest::collection::vec(("[a-z]{1,8}", "[a-z0-9]{0,8}"), 0..8)
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
        ) {
            let original = Dimensions::new(pairs);
            let reordered = Dimensions::new(shuffled);
            prop_assert_eq!(original.fingerprint(), reordered.fingerprint());
        }
    }
}
