//! Report aggregation: cross-service totals, a report-type-specific chart
//! selection, an executive summary and a flat data table. The resulting
//! Report JSON is the contract handed to the PDF/AI collaborators; those stay
//! outside the kernel.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::charts::{self, CourseRecord};
use crate::models::{Chart, ServiceKind};
use crate::resolver::LatestSnapshots;

/// The twelve report kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportType {
    #[serde(rename = "executive-summary")]
    ExecutiveSummary,
    #[serde(rename = "user-activity")]
    UserActivity,
    #[serde(rename = "course-performance")]
    CoursePerformance,
    #[serde(rename = "enrollment-trends")]
    EnrollmentTrends,
    #[serde(rename = "assessment-outcomes")]
    AssessmentOutcomes,
    #[serde(rename = "content-production")]
    ContentProduction,
    #[serde(rename = "learning-engagement")]
    LearningEngagement,
    #[serde(rename = "organization-overview")]
    OrganizationOverview,
    #[serde(rename = "completion-analysis")]
    CompletionAnalysis,
    #[serde(rename = "platform-adoption")]
    PlatformAdoption,
    #[serde(rename = "monthly-operations")]
    MonthlyOperations,
    #[serde(rename = "annual-review")]
    AnnualReview,
}

impl ReportType {
    pub const ALL: [ReportType; 12] = [
        ReportType::ExecutiveSummary,
        ReportType::UserActivity,
        ReportType::CoursePerformance,
        ReportType::EnrollmentTrends,
        ReportType::AssessmentOutcomes,
        ReportType::ContentProduction,
        ReportType::LearningEngagement,
        ReportType::OrganizationOverview,
        ReportType::CompletionAnalysis,
        ReportType::PlatformAdoption,
        ReportType::MonthlyOperations,
        ReportType::AnnualReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::ExecutiveSummary => "executive-summary",
            ReportType::UserActivity => "user-activity",
            ReportType::CoursePerformance => "course-performance",
            ReportType::EnrollmentTrends => "enrollment-trends",
            ReportType::AssessmentOutcomes => "assessment-outcomes",
            ReportType::ContentProduction => "content-production",
            ReportType::LearningEngagement => "learning-engagement",
            ReportType::OrganizationOverview => "organization-overview",
            ReportType::CompletionAnalysis => "completion-analysis",
            ReportType::PlatformAdoption => "platform-adoption",
            ReportType::MonthlyOperations => "monthly-operations",
            ReportType::AnnualReview => "annual-review",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ReportType::ExecutiveSummary => "Executive Summary",
            ReportType::UserActivity => "User Activity Report",
            ReportType::CoursePerformance => "Course Performance Report",
            ReportType::EnrollmentTrends => "Enrollment Trends Report",
            ReportType::AssessmentOutcomes => "Assessment Outcomes Report",
            ReportType::ContentProduction => "Content Production Report",
            ReportType::LearningEngagement => "Learning Engagement Report",
            ReportType::OrganizationOverview => "Organization Overview Report",
            ReportType::CompletionAnalysis => "Completion Analysis Report",
            ReportType::PlatformAdoption => "Platform Adoption Report",
            ReportType::MonthlyOperations => "Monthly Operations Report",
            ReportType::AnnualReview => "Annual Review",
        }
    }

    /// Chart-id fragments this report pulls in, matched against every composed
    /// chart. Selection is capped at six, priority charts first.
    fn chart_keywords(&self) -> &'static [&'static str] {
        match self {
            ReportType::ExecutiveSummary => &["top-courses", "monthly-growth", "enrollments", "chart-"],
            ReportType::UserActivity => &["directory", "users", "monthly-growth"],
            ReportType::CoursePerformance => &["courseBuilder", "top-courses", "enrollments", "dropoff"],
            ReportType::EnrollmentTrends => &["enrollments", "monthly-growth"],
            ReportType::AssessmentOutcomes => &["assessment", "skill-gap"],
            ReportType::ContentProduction => &["contentStudio", "content-usage"],
            ReportType::LearningEngagement => &["learningAnalytics", "rating-engagement", "monthly-growth"],
            ReportType::OrganizationOverview => &["organization", "directory"],
            ReportType::CompletionAnalysis => &["completion", "dropoff", "courseBuilder"],
            ReportType::PlatformAdoption => &["learningAnalytics", "monthly-growth", "users"],
            ReportType::MonthlyOperations => &["monthly-growth", "chart-"],
            ReportType::AnnualReview => &["combined-", "chart-"],
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown report type: {s}"))
    }
}

const MAX_REPORT_CHARTS: usize = 6;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetrics {
    pub total_users: f64,
    pub total_courses: f64,
    pub total_enrollments: f64,
    pub active_enrollments: f64,
    pub total_assessments: f64,
    pub total_learning_hours: f64,
    pub average_completion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutiveSummary {
    pub title: String,
    pub key_metrics: KeyMetrics,
    /// Report-type-specific derived metrics; only defined entries appear.
    pub enhanced_metrics: BTreeMap<String, f64>,
    pub data_sources: Vec<ServiceKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataTableRow {
    pub service: ServiceKind,
    pub metric: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub report_type: ReportType,
    pub executive_summary: ExecutiveSummary,
    pub charts: Vec<Chart>,
    pub data_table: Vec<DataTableRow>,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

pub fn build_report(report_type: ReportType, latest: &LatestSnapshots) -> Report {
    let key_metrics = aggregate_key_metrics(latest);
    let enhanced_metrics = enhanced_metrics(report_type, &key_metrics, latest);
    let charts = select_charts(report_type, charts::compose_all(latest));

    Report {
        id: Uuid::new_v4().to_string(),
        report_type,
        executive_summary: ExecutiveSummary {
            title: report_type.title().to_string(),
            key_metrics,
            enhanced_metrics,
            data_sources: latest.services(),
        },
        charts,
        data_table: data_table(latest),
        generated_at: OffsetDateTime::now_utc(),
    }
}

fn metric_of(latest: &LatestSnapshots, service: ServiceKind, key: &str) -> f64 {
    latest
        .get(service)
        .map(|s| s.metric_f64(key))
        .unwrap_or(0.0)
}

fn aggregate_key_metrics(latest: &LatestSnapshots) -> KeyMetrics {
    KeyMetrics {
        total_users: metric_of(latest, ServiceKind::Directory, "totalUsers"),
        total_courses: metric_of(latest, ServiceKind::CourseBuilder, "totalCourses"),
        total_enrollments: metric_of(latest, ServiceKind::CourseBuilder, "totalEnrollments"),
        active_enrollments: metric_of(latest, ServiceKind::CourseBuilder, "activeEnrollments"),
        total_assessments: metric_of(latest, ServiceKind::Assessment, "totalAssessments"),
        total_learning_hours: metric_of(latest, ServiceKind::LearningAnalytics, "totalLearningHours"),
        average_completion_rate: weighted_completion_rate(latest),
    }
}

/// Average completion rate weighted by each course's total enrollments. Falls
/// back to the plain mean when every weight is zero, and to the snapshot's own
/// aggregate when no course records exist.
fn weighted_completion_rate(latest: &LatestSnapshots) -> f64 {
    let Some(snapshot) = latest.get(ServiceKind::CourseBuilder) else {
        return 0.0;
    };
    let courses: Vec<CourseRecord> = charts::records(snapshot, "courses");
    if courses.is_empty() {
        return snapshot.metric_f64("averageCompletionRate");
    }
    let weight_sum: f64 = courses.iter().map(|c| c.total_enrollments).sum();
    if weight_sum == 0.0 {
        return courses.iter().map(|c| c.completion_rate).sum::<f64>() / courses.len() as f64;
    }
    courses
        .iter()
        .map(|c| c.completion_rate * c.total_enrollments)
        .sum::<f64>()
        / weight_sum
}

fn enhanced_metrics(
    report_type: ReportType,
    key: &KeyMetrics,
    latest: &LatestSnapshots,
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    let mut insert_ratio = |name: &str, numerator: f64, denominator: f64| {
        if denominator != 0.0 {
            out.insert(name.to_string(), numerator / denominator);
        }
    };

    match report_type {
        ReportType::ExecutiveSummary
        | ReportType::EnrollmentTrends
        | ReportType::CompletionAnalysis
        | ReportType::MonthlyOperations
        | ReportType::AnnualReview => {
            // Drop-off rate is undefined without enrollments.
            insert_ratio(
                "dropOffRate",
                (key.total_enrollments - key.active_enrollments) * 100.0,
                key.total_enrollments,
            );
        }
        ReportType::UserActivity | ReportType::OrganizationOverview => {
            insert_ratio(
                "usersPerOrganization",
                key.total_users,
                metric_of(latest, ServiceKind::Directory, "totalOrganizations"),
            );
        }
        ReportType::CoursePerformance => {
            insert_ratio("enrollmentsPerCourse", key.total_enrollments, key.total_courses);
        }
        ReportType::AssessmentOutcomes => {
            insert_ratio(
                "assessmentCompletionShare",
                metric_of(latest, ServiceKind::Assessment, "completedAssessments") * 100.0,
                key.total_assessments,
            );
        }
        ReportType::ContentProduction => {
            insert_ratio(
                "viewsPerContentItem",
                metric_of(latest, ServiceKind::ContentStudio, "totalViews"),
                metric_of(latest, ServiceKind::ContentStudio, "totalContent"),
            );
        }
        ReportType::LearningEngagement | ReportType::PlatformAdoption => {
            insert_ratio(
                "learningHoursPerActiveLearner",
                key.total_learning_hours,
                metric_of(latest, ServiceKind::LearningAnalytics, "activeLearners"),
            );
        }
    }
    out
}

/// Keyword/id selection over the composed charts: priority charts first,
/// stable order otherwise, capped at six.
fn select_charts(report_type: ReportType, charts: Vec<Chart>) -> Vec<Chart> {
    let keywords = report_type.chart_keywords();
    let mut selected: Vec<Chart> = charts
        .into_iter()
        .filter(|c| keywords.iter().any(|k| c.id.contains(k)))
        .collect();
    selected.sort_by_key(|c| !c.metadata.is_priority);
    selected.truncate(MAX_REPORT_CHARTS);
    selected
}

/// Flat rows of every resolved snapshot's top-level numeric metrics. Nested
/// breakdowns and null signals are not table material.
fn data_table(latest: &LatestSnapshots) -> Vec<DataTableRow> {
    let mut rows = Vec::new();
    for (service, snapshot) in latest.iter() {
        for (metric, value) in &snapshot.metrics {
            if let Some(value) = value.as_f64() {
                rows.push(DataTableRow {
                    service,
                    metric: metric.clone(),
                    value,
                });
            }
        }
    }
    rows
}
