//! Core data model: the five upstream services, the canonical Snapshot shape,
//! chart-ready datasets and collection-run outcomes.
//!
//! Every payload that enters the system is normalized into a `Snapshot` at the
//! ingestion boundary; downstream code (resolver, charts, reports) relies on
//! that canonical shape and never re-probes the raw upstream JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// The five upstream microservices we pull metrics from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    #[serde(rename = "directory")]
    Directory,
    #[serde(rename = "courseBuilder")]
    CourseBuilder,
    #[serde(rename = "assessment")]
    Assessment,
    #[serde(rename = "contentStudio")]
    ContentStudio,
    #[serde(rename = "learningAnalytics")]
    LearningAnalytics,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::Directory,
        ServiceKind::CourseBuilder,
        ServiceKind::Assessment,
        ServiceKind::ContentStudio,
        ServiceKind::LearningAnalytics,
    ];

    /// Stable wire id, also used as the key segment in the snapshot store.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Directory => "directory",
            ServiceKind::CourseBuilder => "courseBuilder",
            ServiceKind::Assessment => "assessment",
            ServiceKind::ContentStudio => "contentStudio",
            ServiceKind::LearningAnalytics => "learningAnalytics",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directory" => Ok(ServiceKind::Directory),
            "courseBuilder" => Ok(ServiceKind::CourseBuilder),
            "assessment" => Ok(ServiceKind::Assessment),
            "contentStudio" => Ok(ServiceKind::ContentStudio),
            "learningAnalytics" => Ok(ServiceKind::LearningAnalytics),
            other => Err(format!("unknown service: {other}")),
        }
    }
}

/// One normalized, timestamped capture of a single upstream service.
///
/// `metrics` holds top-level numbers plus nested breakdown objects
/// (role/department/type counts); `details` holds named arrays of records
/// (courses, assessments, trends...). Both are fully defaulted at ingestion:
/// expected numeric fields are 0 when the upstream omitted them, arrays are
/// empty, never absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub service: ServiceKind,
    #[serde(with = "time::serde::rfc3339")]
    pub collected_at: OffsetDateTime,
    pub metrics: Map<String, Value>,
    pub details: Map<String, Value>,
    pub schema_version: String,
}

impl Snapshot {
    pub fn new(service: ServiceKind, collected_at: OffsetDateTime) -> Self {
        Self {
            service,
            collected_at,
            metrics: Map::new(),
            details: Map::new(),
            schema_version: "v1".to_string(),
        }
    }

    /// Top-level numeric metric, 0.0 when absent or non-numeric.
    pub fn metric_f64(&self, key: &str) -> f64 {
        self.metrics.get(key).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// Nested breakdown (e.g. usersByRole) flattened to label -> count.
    pub fn nested_metric(&self, key: &str) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        if let Some(Value::Object(map)) = self.metrics.get(key) {
            for (label, v) in map {
                if let Some(n) = v.as_f64() {
                    out.insert(label.clone(), n);
                }
            }
        }
        out
    }

    /// Named detail array, empty slice when absent.
    pub fn detail_records(&self, key: &str) -> &[Value] {
        self.details
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Latest resolved snapshot for one service, as returned by the store scan.
#[derive(Debug, Clone, Serialize)]
pub struct LatestEntry {
    pub service: ServiceKind,
    pub data: Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Area,
}

/// One category row: a label plus one or more numeric series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartRow {
    pub name: String,
    #[serde(flatten)]
    pub series: BTreeMap<String, f64>,
}

impl ChartRow {
    pub fn new(name: impl Into<String>, series: &[(&str, f64)]) -> Self {
        Self {
            name: name.into(),
            series: series.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    /// Rows where every series value is zero are dropped before a chart is emitted.
    pub fn is_all_zero(&self) -> bool {
        self.series.values().all(|v| *v == 0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Provenance: which services' snapshots fed this chart.
    pub services: Vec<ServiceKind>,
    /// Discriminator for detail charts (e.g. "usersByRole", "courseStatus").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_kind: Option<String>,
    /// Primary dashboard placement vs. secondary "box" placement.
    pub is_priority: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    pub color_scheme: String,
}

/// A derived, disposable view over one or more snapshots. Recomputed on every
/// dashboard/report request, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub description: String,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub data: Vec<ChartRow>,
    pub metadata: ChartMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSuccess {
    pub service: ServiceKind,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionFailure {
    pub service: ServiceKind,
    pub reason: String,
}

/// Structured result of one collection run. A failing service never hides the
/// outcome of its siblings: every requested service lands in exactly one of
/// the two lists.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionOutcome {
    pub successful: Vec<CollectionSuccess>,
    pub failed: Vec<CollectionFailure>,
    pub partial: bool,
}

impl CollectionOutcome {
    pub fn finalize(successful: Vec<CollectionSuccess>, failed: Vec<CollectionFailure>) -> Self {
        let partial = !failed.is_empty() && !successful.is_empty();
        Self {
            successful,
            failed,
            partial,
        }
    }
}
