//! Chart Composition Engine: pure functions from latest snapshots to
//! chart-ready datasets.
//!
//! Two families: single-service charts (a fixed "main" metrics chart and one
//! "detail" breakdown per service) and the nine cross-service combined charts.
//! Every builder returns `Option<Chart>`: `None` means the chart's inputs are
//! missing or the dataset came out empty, and the chart is simply omitted.
//! All-zero rows never survive into an emitted chart.

pub mod combined;
pub mod single;

use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::models::{Chart, ChartMetadata, ChartRow, ChartType, ServiceKind, Snapshot};
use crate::resolver::LatestSnapshots;

/// Fixed allow-list deciding primary-dashboard vs. secondary "box" placement.
/// Placement is policy, not data-derived.
const PRIORITY_CHART_IDS: &[&str] = &[
    "chart-directory",
    "chart-courseBuilder",
    "chart-assessment",
    "chart-contentStudio",
    "chart-learningAnalytics",
    "combined-enrollments-comparison",
    "combined-top-courses",
    "combined-monthly-growth",
];

/// Ratings arrive on a 0-5 scale; wherever a rating is compared against a
/// percentage-scale metric it is rescaled to 0-100.
pub(crate) fn scale_rating(rating: f64) -> f64 {
    rating * 20.0
}

pub(crate) struct ChartSpec {
    pub id: &'static str,
    pub title: &'static str,
    pub subtitle: &'static str,
    pub description: &'static str,
    pub chart_type: ChartType,
    pub services: &'static [ServiceKind],
    pub detail_kind: Option<&'static str>,
    pub color_scheme: &'static str,
}

/// Drops all-zero rows and suppresses the chart entirely when nothing is left.
pub(crate) fn finalize(
    spec: ChartSpec,
    mut rows: Vec<ChartRow>,
    last_updated: OffsetDateTime,
) -> Option<Chart> {
    rows.retain(|row| !row.is_all_zero());
    if rows.is_empty() {
        debug!(target: "charts", id = spec.id, "chart suppressed, no non-zero rows");
        return None;
    }
    Some(Chart {
        id: spec.id.to_string(),
        title: spec.title.to_string(),
        subtitle: spec.subtitle.to_string(),
        description: spec.description.to_string(),
        chart_type: spec.chart_type,
        data: rows,
        metadata: ChartMetadata {
            services: spec.services.to_vec(),
            detail_kind: spec.detail_kind.map(str::to_string),
            is_priority: PRIORITY_CHART_IDS.contains(&spec.id),
            last_updated,
            color_scheme: spec.color_scheme.to_string(),
        },
    })
}

/// Typed view over a canonical detail array. Records that fail to deserialize
/// are skipped; the ingestion boundary makes that rare, but a chart must never
/// fail over one odd record.
pub(crate) fn records<T: DeserializeOwned>(snapshot: &Snapshot, key: &str) -> Vec<T> {
    snapshot
        .detail_records(key)
        .iter()
        .filter_map(|record: &Value| serde_json::from_value(record.clone()).ok())
        .collect()
}

/// Chart-side view over the courseBuilder `courses` detail. Only the fields
/// the chart derivations read; the canonical record carries more.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct CourseRecord {
    pub course_name: String,
    pub total_enrollments: f64,
    pub active_enrollments: f64,
    pub completion_rate: f64,
    pub average_rating: f64,
    pub duration_hours: f64,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct OrganizationRecord {
    pub name: String,
    pub user_count: f64,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct AssessmentRecord {
    pub final_grade: f64,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ContentRecord {
    pub generation_method: String,
    pub view_count: f64,
}

/// Trend fields stay optional: the growth chart drops incomplete periods
/// instead of plotting zeros for them.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct TrendRecord {
    pub period_start: Option<String>,
    pub new_users: Option<f64>,
    pub learning_hours: Option<f64>,
}

/// Every chart the engine can produce for the given snapshots, single-service
/// charts first, then the combined charts in their fixed order.
pub fn compose_all(latest: &LatestSnapshots) -> Vec<Chart> {
    let mut charts = Vec::new();
    for (_, snapshot) in latest.iter() {
        charts.extend(single::main_chart(snapshot));
        charts.extend(single::detail_chart(snapshot));
    }
    charts.extend(combined::compose_combined(latest));
    charts
}

/// Primary dashboard: priority charts only.
pub fn dashboard_charts(latest: &LatestSnapshots) -> Vec<Chart> {
    compose_all(latest)
        .into_iter()
        .filter(|c| c.metadata.is_priority)
        .collect()
}
