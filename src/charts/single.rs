//! Single-service charts: one "main" chart over a fixed allow-list of
//! top-level metrics per service, and one service-specific "detail" breakdown.

use crate::models::{ChartRow, ChartType, ServiceKind, Snapshot};

use super::{finalize, records, ChartSpec, CourseRecord};

/// Fixed metric allow-list per service: (canonical key, display label).
fn main_metrics(service: ServiceKind) -> &'static [(&'static str, &'static str)] {
    match service {
        ServiceKind::Directory => &[
            ("totalUsers", "Total Users"),
            ("activeUsers", "Active Users"),
            ("totalOrganizations", "Organizations"),
        ],
        ServiceKind::CourseBuilder => &[
            ("totalCourses", "Total Courses"),
            ("totalEnrollments", "Total Enrollments"),
            ("activeEnrollments", "Active Enrollments"),
            ("averageCompletionRate", "Avg Completion Rate"),
            ("averageRating", "Avg Rating"),
        ],
        ServiceKind::Assessment => &[
            ("totalAssessments", "Total Assessments"),
            ("completedAssessments", "Completed Assessments"),
            ("averageScore", "Average Score"),
            ("passRate", "Pass Rate"),
        ],
        ServiceKind::ContentStudio => &[
            ("totalContent", "Total Content"),
            ("totalViews", "Total Views"),
        ],
        ServiceKind::LearningAnalytics => &[
            ("totalLearningHours", "Learning Hours"),
            ("activeLearners", "Active Learners"),
            ("platformUsageRate", "Platform Usage Rate"),
        ],
    }
}

fn main_spec(service: ServiceKind) -> ChartSpec {
    let (id, title, services): (&'static str, &'static str, &'static [ServiceKind]) = match service
    {
        ServiceKind::Directory => (
            "chart-directory",
            "Directory Overview",
            &[ServiceKind::Directory],
        ),
        ServiceKind::CourseBuilder => (
            "chart-courseBuilder",
            "Course Builder Overview",
            &[ServiceKind::CourseBuilder],
        ),
        ServiceKind::Assessment => (
            "chart-assessment",
            "Assessment Overview",
            &[ServiceKind::Assessment],
        ),
        ServiceKind::ContentStudio => (
            "chart-contentStudio",
            "Content Studio Overview",
            &[ServiceKind::ContentStudio],
        ),
        ServiceKind::LearningAnalytics => (
            "chart-learningAnalytics",
            "Learning Analytics Overview",
            &[ServiceKind::LearningAnalytics],
        ),
    };
    ChartSpec {
        id,
        title,
        subtitle: "Key metrics",
        description: "Top-level metrics from the latest snapshot",
        chart_type: ChartType::Bar,
        services,
        detail_kind: None,
        color_scheme: "default",
    }
}

/// One row per allow-listed metric.
pub fn main_chart(snapshot: &Snapshot) -> Option<crate::models::Chart> {
    let rows: Vec<ChartRow> = main_metrics(snapshot.service)
        .iter()
        .map(|(key, label)| ChartRow::new(*label, &[("Value", snapshot.metric_f64(key))]))
        .collect();
    finalize(main_spec(snapshot.service), rows, snapshot.collected_at)
}

/// Service-specific breakdown chart.
pub fn detail_chart(snapshot: &Snapshot) -> Option<crate::models::Chart> {
    match snapshot.service {
        ServiceKind::Directory => users_by_role(snapshot),
        ServiceKind::CourseBuilder => course_status(snapshot),
        ServiceKind::Assessment => score_distribution(snapshot),
        ServiceKind::ContentStudio => content_by_type(snapshot),
        ServiceKind::LearningAnalytics => trend_line(snapshot),
    }
}

fn users_by_role(snapshot: &Snapshot) -> Option<crate::models::Chart> {
    let rows: Vec<ChartRow> = snapshot
        .nested_metric("usersByRole")
        .into_iter()
        .map(|(role, count)| ChartRow::new(role, &[("Users", count)]))
        .collect();
    finalize(
        ChartSpec {
            id: "chart-directory-detail",
            title: "Users by Role",
            subtitle: "Role distribution",
            description: "Registered users broken down by role",
            chart_type: ChartType::Pie,
            services: &[ServiceKind::Directory],
            detail_kind: Some("usersByRole"),
            color_scheme: "cool",
        },
        rows,
        snapshot.collected_at,
    )
}

/// Course status is computed, not reported: completed at completion rate >= 80,
/// in progress above zero, not started at zero.
fn course_status(snapshot: &Snapshot) -> Option<crate::models::Chart> {
    let courses: Vec<CourseRecord> = records(snapshot, "courses");
    if courses.is_empty() {
        return None;
    }
    let mut completed = 0.0;
    let mut in_progress = 0.0;
    let mut not_started = 0.0;
    for course in &courses {
        if course.completion_rate >= 80.0 {
            completed += 1.0;
        } else if course.completion_rate > 0.0 {
            in_progress += 1.0;
        } else {
            not_started += 1.0;
        }
    }
    let rows = vec![
        ChartRow::new("Completed", &[("Courses", completed)]),
        ChartRow::new("In Progress", &[("Courses", in_progress)]),
        ChartRow::new("Not Started", &[("Courses", not_started)]),
    ];
    finalize(
        ChartSpec {
            id: "chart-courseBuilder-detail",
            title: "Course Status",
            subtitle: "Completion state",
            description: "Courses by computed completion status",
            chart_type: ChartType::Pie,
            services: &[ServiceKind::CourseBuilder],
            detail_kind: Some("courseStatus"),
            color_scheme: "warm",
        },
        rows,
        snapshot.collected_at,
    )
}

fn score_distribution(snapshot: &Snapshot) -> Option<crate::models::Chart> {
    let pass_rate = snapshot.metric_f64("passRate");
    if snapshot.metric_f64("totalAssessments") == 0.0 {
        return None;
    }
    let rows = vec![
        ChartRow::new("Passed", &[("Share", pass_rate)]),
        ChartRow::new("Failed", &[("Share", 100.0 - pass_rate)]),
    ];
    finalize(
        ChartSpec {
            id: "chart-assessment-detail",
            title: "Pass / Fail Split",
            subtitle: "Assessment outcomes",
            description: "Share of assessments passed vs failed",
            chart_type: ChartType::Pie,
            services: &[ServiceKind::Assessment],
            detail_kind: Some("passFail"),
            color_scheme: "warm",
        },
        rows,
        snapshot.collected_at,
    )
}

fn content_by_type(snapshot: &Snapshot) -> Option<crate::models::Chart> {
    let rows: Vec<ChartRow> = snapshot
        .nested_metric("contentByType")
        .into_iter()
        .map(|(kind, count)| ChartRow::new(kind, &[("Items", count)]))
        .collect();
    finalize(
        ChartSpec {
            id: "chart-contentStudio-detail",
            title: "Content by Type",
            subtitle: "Catalog composition",
            description: "Published content items per content type",
            chart_type: ChartType::Pie,
            services: &[ServiceKind::ContentStudio],
            detail_kind: Some("contentByType"),
            color_scheme: "cool",
        },
        rows,
        snapshot.collected_at,
    )
}

fn trend_line(snapshot: &Snapshot) -> Option<crate::models::Chart> {
    let rows: Vec<ChartRow> = snapshot
        .detail_records("trends")
        .iter()
        .filter_map(|t| {
            let period = t.get("periodStart").and_then(|v| v.as_str())?;
            let new_users = t.get("newUsers").and_then(|v| v.as_f64())?;
            Some(ChartRow::new(period, &[("New Users", new_users)]))
        })
        .collect();
    finalize(
        ChartSpec {
            id: "chart-learningAnalytics-detail",
            title: "New Users per Period",
            subtitle: "Platform adoption",
            description: "New users over the reported periods",
            chart_type: ChartType::Line,
            services: &[ServiceKind::LearningAnalytics],
            detail_kind: Some("trends"),
            color_scheme: "default",
        },
        rows,
        snapshot.collected_at,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn snapshot(service: ServiceKind) -> Snapshot {
        Snapshot::new(service, datetime!(2024-01-15 08:00 UTC))
    }

    #[test]
    fn test_main_chart_uses_allow_list() {
        let mut s = snapshot(ServiceKind::CourseBuilder);
        s.metrics.insert("totalCourses".into(), json!(12));
        s.metrics.insert("totalEnrollments".into(), json!(340));
        // Not on the allow-list, must not appear.
        s.metrics.insert("internalCounter".into(), json!(999));

        let chart = main_chart(&s).unwrap();
        assert_eq!(chart.id, "chart-courseBuilder");
        let names: Vec<&str> = chart.data.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&"Total Courses"));
        assert!(!names.iter().any(|n| n.contains("internal")));
    }

    #[test]
    fn test_main_chart_suppressed_when_all_zero() {
        let s = snapshot(ServiceKind::Directory);
        assert!(main_chart(&s).is_none());
    }

    #[test]
    fn test_course_status_buckets() {
        let mut s = snapshot(ServiceKind::CourseBuilder);
        s.details.insert(
            "courses".into(),
            json!([
                {"courseName": "a", "completionRate": 92.0},
                {"courseName": "b", "completionRate": 80.0},
                {"courseName": "c", "completionRate": 15.0},
                {"courseName": "d", "completionRate": 0.0},
            ]),
        );
        let chart = detail_chart(&s).unwrap();
        let by_name = |name: &str| {
            chart
                .data
                .iter()
                .find(|r| r.name == name)
                .map(|r| r.series["Courses"])
        };
        assert_eq!(by_name("Completed"), Some(2.0));
        assert_eq!(by_name("In Progress"), Some(1.0));
        assert_eq!(by_name("Not Started"), Some(1.0));
    }

    #[test]
    fn test_users_by_role_pie() {
        let mut s = snapshot(ServiceKind::Directory);
        s.metrics.insert("usersByRole".into(), json!({"admin": 3, "learner": 57}));
        let chart = detail_chart(&s).unwrap();
        assert_eq!(chart.chart_type, ChartType::Pie);
        assert_eq!(chart.data.len(), 2);
        assert_eq!(chart.metadata.detail_kind.as_deref(), Some("usersByRole"));
        assert!(!chart.metadata.is_priority);
    }

    #[test]
    fn test_pass_fail_needs_assessments() {
        let mut s = snapshot(ServiceKind::Assessment);
        assert!(detail_chart(&s).is_none());
        s.metrics.insert("totalAssessments".into(), json!(10));
        s.metrics.insert("passRate".into(), json!(70.0));
        let chart = detail_chart(&s).unwrap();
        assert_eq!(chart.data.len(), 2);
    }
}
