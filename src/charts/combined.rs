//! The nine combined charts: joins, derived metrics, ranking and bucketing
//! over two or more services' latest snapshots.
//!
//! Every builder follows the same skeleton: extract the required detail
//! arrays (missing input -> `None`, the chart is omitted), transform, drop
//! zero rows, and return `None` for an empty result. Top-N sorts are
//! descending by the named score and stable; there is no secondary tie-break
//! key, original record order decides ties.

use std::cmp::Ordering;

use time::macros::format_description;
use time::Date;

use crate::models::{Chart, ChartRow, ChartType, ServiceKind, Snapshot};
use crate::resolver::LatestSnapshots;

use super::{
    finalize, records, scale_rating, AssessmentRecord, ChartSpec, ContentRecord, CourseRecord,
    OrganizationRecord, TrendRecord,
};

/// All nine combined charts that materialize for the given snapshots, in
/// fixed order.
pub fn compose_combined(latest: &LatestSnapshots) -> Vec<Chart> {
    let directory = latest.get(ServiceKind::Directory);
    let course_builder = latest.get(ServiceKind::CourseBuilder);
    let assessment = latest.get(ServiceKind::Assessment);
    let content_studio = latest.get(ServiceKind::ContentStudio);
    let analytics = latest.get(ServiceKind::LearningAnalytics);

    let mut charts = Vec::new();
    let mut push = |chart: Option<Chart>| charts.extend(chart);

    push(course_builder.and_then(enrollments_comparison));
    push(directory.and_then(users_per_organization));
    if let (Some(dir), Some(cb)) = (directory, course_builder) {
        push(completion_per_organization(dir, cb));
    }
    if let (Some(cb), Some(la)) = (course_builder, analytics) {
        push(rating_vs_engagement(cb, la));
    }
    push(assessment.and_then(skill_gap));
    push(content_studio.and_then(content_usage));
    push(analytics.and_then(monthly_growth));
    push(course_builder.and_then(top_courses));
    push(course_builder.and_then(dropoff_by_duration));
    charts
}

fn sort_desc_by<T>(items: &mut [T], score: impl Fn(&T) -> f64) {
    // Stable: ties keep original record order.
    items.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(Ordering::Equal));
}

/// 1. Top 15 courses by total enrollments, active vs total paired per course.
pub fn enrollments_comparison(course_builder: &Snapshot) -> Option<Chart> {
    let mut courses: Vec<CourseRecord> = records(course_builder, "courses");
    if courses.is_empty() {
        return None;
    }
    sort_desc_by(&mut courses, |c| c.total_enrollments);
    let rows: Vec<ChartRow> = courses
        .iter()
        .take(15)
        .map(|c| {
            ChartRow::new(
                c.course_name.clone(),
                &[
                    ("Total Enrollments", c.total_enrollments),
                    ("Active Enrollments", c.active_enrollments),
                ],
            )
        })
        .collect();
    finalize(
        ChartSpec {
            id: "combined-enrollments-comparison",
            title: "Enrollments Comparison",
            subtitle: "Top courses by enrollment",
            description: "Active vs total enrollments for the top 15 courses",
            chart_type: ChartType::Bar,
            services: &[ServiceKind::CourseBuilder],
            detail_kind: None,
            color_scheme: "default",
        },
        rows,
        course_builder.collected_at,
    )
}

/// 2. Users per organization, descending. A directory reporting zero total
/// users yields no chart at all.
pub fn users_per_organization(directory: &Snapshot) -> Option<Chart> {
    if directory.metric_f64("totalUsers") == 0.0 {
        return None;
    }
    let mut orgs: Vec<OrganizationRecord> = records(directory, "organizations");
    if orgs.is_empty() {
        return None;
    }
    sort_desc_by(&mut orgs, |o| o.user_count);
    let rows: Vec<ChartRow> = orgs
        .iter()
        .map(|o| ChartRow::new(o.name.clone(), &[("Users", o.user_count)]))
        .collect();
    finalize(
        ChartSpec {
            id: "combined-users-per-organization",
            title: "Users per Organization",
            subtitle: "Directory headcount",
            description: "Registered users per organization",
            chart_type: ChartType::Bar,
            services: &[ServiceKind::Directory],
            detail_kind: None,
            color_scheme: "cool",
        },
        rows,
        directory.collected_at,
    )
}

/// 3. Completion rate per organization. No per-course-to-organization mapping
/// exists in the data model, so every organization carries the same global
/// average completion rate. Known modeling gap, kept as documented behavior.
pub fn completion_per_organization(directory: &Snapshot, course_builder: &Snapshot) -> Option<Chart> {
    let orgs: Vec<OrganizationRecord> = records(directory, "organizations");
    let courses: Vec<CourseRecord> = records(course_builder, "courses");
    if orgs.is_empty() || courses.is_empty() {
        return None;
    }
    let global_avg =
        courses.iter().map(|c| c.completion_rate).sum::<f64>() / courses.len() as f64;
    let rows: Vec<ChartRow> = orgs
        .iter()
        .map(|o| ChartRow::new(o.name.clone(), &[("Completion Rate", global_avg)]))
        .collect();
    finalize(
        ChartSpec {
            id: "combined-completion-per-organization",
            title: "Completion Rate per Organization",
            subtitle: "Global average, applied uniformly",
            description: "Average course completion rate shown per organization",
            chart_type: ChartType::Bar,
            services: &[ServiceKind::Directory, ServiceKind::CourseBuilder],
            detail_kind: None,
            color_scheme: "default",
        },
        rows,
        directory.collected_at.max(course_builder.collected_at),
    )
}

/// 4. Rating vs engagement index. Requires the analytics platform-usage rate
/// and satisfaction score to both be present and non-zero; otherwise the
/// chart is inapplicable and omitted.
pub fn rating_vs_engagement(course_builder: &Snapshot, analytics: &Snapshot) -> Option<Chart> {
    let usage_rate = analytics.metric_f64("platformUsageRate");
    let satisfaction = analytics.metric_f64("userSatisfactionScore");
    if usage_rate == 0.0 || satisfaction == 0.0 {
        return None;
    }
    let courses: Vec<CourseRecord> = records(course_builder, "courses");
    if courses.is_empty() {
        return None;
    }
    // Base index: platform usage weighted by how satisfied users are overall.
    let base_engagement = usage_rate * scale_rating(satisfaction) / 100.0;
    let rows: Vec<ChartRow> = courses
        .iter()
        .map(|c| {
            let scaled = scale_rating(c.average_rating);
            let engagement = base_engagement * (scaled / 100.0) * (c.completion_rate / 100.0);
            ChartRow::new(
                c.course_name.clone(),
                &[("Rating", scaled), ("Engagement Index", engagement)],
            )
        })
        .collect();
    finalize(
        ChartSpec {
            id: "combined-rating-engagement",
            title: "Rating vs Engagement",
            subtitle: "Scaled rating against derived engagement",
            description: "Per-course engagement index derived from rating, completion and platform usage",
            chart_type: ChartType::Bar,
            services: &[ServiceKind::CourseBuilder, ServiceKind::LearningAnalytics],
            detail_kind: None,
            color_scheme: "warm",
        },
        rows,
        course_builder.collected_at.max(analytics.collected_at),
    )
}

/// 5. Skill gap: final grades bucketed into four fixed bands.
pub fn skill_gap(assessment: &Snapshot) -> Option<Chart> {
    let assessments: Vec<AssessmentRecord> = records(assessment, "assessments");
    if assessments.is_empty() {
        return None;
    }
    let bands = [
        ("Excellent (90-100)", 90.0),
        ("Good (80-89)", 80.0),
        ("Average (70-79)", 70.0),
        ("Needs Improvement (<70)", f64::NEG_INFINITY),
    ];
    let rows: Vec<ChartRow> = bands
        .iter()
        .enumerate()
        .map(|(i, (label, floor))| {
            let ceiling = if i == 0 { f64::INFINITY } else { bands[i - 1].1 };
            let count = assessments
                .iter()
                .filter(|a| a.final_grade >= *floor && a.final_grade < ceiling)
                .count() as f64;
            ChartRow::new(*label, &[("Assessments", count)])
        })
        .collect();
    finalize(
        ChartSpec {
            id: "combined-skill-gap",
            title: "Skill Gap Analysis",
            subtitle: "Final grade distribution",
            description: "Assessments per grade band",
            chart_type: ChartType::Bar,
            services: &[ServiceKind::Assessment],
            detail_kind: None,
            color_scheme: "warm",
        },
        rows,
        assessment.collected_at,
    )
}

/// 6. Content usage by creator type: the four generation methods collapse into
/// three display buckets; view counts are summed per bucket. Unknown methods
/// fall in no bucket.
pub fn content_usage(content_studio: &Snapshot) -> Option<Chart> {
    let content: Vec<ContentRecord> = records(content_studio, "content");
    if content.is_empty() {
        return None;
    }
    let mut trainer = 0.0;
    let mut mixed = 0.0;
    let mut ai = 0.0;
    for item in &content {
        match item.generation_method.as_str() {
            "manual" => trainer += item.view_count,
            "ai_assisted" | "mixed" => mixed += item.view_count,
            "full_ai" => ai += item.view_count,
            _ => {}
        }
    }
    let rows = vec![
        ChartRow::new("Trainer-Generated", &[("Views", trainer)]),
        ChartRow::new("Mixed", &[("Views", mixed)]),
        ChartRow::new("AI-Generated", &[("Views", ai)]),
    ];
    finalize(
        ChartSpec {
            id: "combined-content-usage",
            title: "Content Usage by Creator Type",
            subtitle: "Views per creation method",
            description: "Content views grouped by how the content was produced",
            chart_type: ChartType::Pie,
            services: &[ServiceKind::ContentStudio],
            detail_kind: None,
            color_scheme: "cool",
        },
        rows,
        content_studio.collected_at,
    )
}

/// 7. Monthly growth: periods missing a parseable start date or either metric
/// are dropped; the remainder is sorted chronologically ascending.
pub fn monthly_growth(analytics: &Snapshot) -> Option<Chart> {
    let trends: Vec<TrendRecord> = records(analytics, "trends");
    let format = format_description!("[year]-[month]-[day]");
    let mut periods: Vec<(Date, f64, f64)> = trends
        .iter()
        .filter_map(|t| {
            let date = Date::parse(t.period_start.as_deref()?, &format).ok()?;
            Some((date, t.new_users?, t.learning_hours?))
        })
        .collect();
    if periods.is_empty() {
        return None;
    }
    periods.sort_by_key(|(date, _, _)| *date);
    let rows: Vec<ChartRow> = periods
        .iter()
        .map(|(date, new_users, hours)| {
            ChartRow::new(
                month_label(*date),
                &[("New Users", *new_users), ("Learning Hours", *hours)],
            )
        })
        .collect();
    finalize(
        ChartSpec {
            id: "combined-monthly-growth",
            title: "Monthly Growth",
            subtitle: "New users and learning hours",
            description: "Platform growth over the reported periods",
            chart_type: ChartType::Line,
            services: &[ServiceKind::LearningAnalytics],
            detail_kind: None,
            color_scheme: "default",
        },
        rows,
        analytics.collected_at,
    )
}

fn month_label(date: Date) -> String {
    let month = match u8::from(date.month()) {
        1 => "Jan",
        2 => "Feb",
        3 => "Mar",
        4 => "Apr",
        5 => "May",
        6 => "Jun",
        7 => "Jul",
        8 => "Aug",
        9 => "Sep",
        10 => "Oct",
        11 => "Nov",
        _ => "Dec",
    };
    format!("{month} {}", date.year())
}

/// 8. Top 5 courses by weighted score: completion x0.6 + scaled rating x0.4.
pub fn top_courses(course_builder: &Snapshot) -> Option<Chart> {
    let mut courses: Vec<CourseRecord> = records(course_builder, "courses");
    if courses.is_empty() {
        return None;
    }
    let score = |c: &CourseRecord| c.completion_rate * 0.6 + scale_rating(c.average_rating) * 0.4;
    sort_desc_by(&mut courses, score);
    let rows: Vec<ChartRow> = courses
        .iter()
        .take(5)
        .map(|c| {
            ChartRow::new(
                c.course_name.clone(),
                &[("Score", score(c)), ("Completion Rate", c.completion_rate)],
            )
        })
        .collect();
    finalize(
        ChartSpec {
            id: "combined-top-courses",
            title: "Top Courses",
            subtitle: "Weighted by completion and rating",
            description: "Five best courses by weighted completion/rating score",
            chart_type: ChartType::Bar,
            services: &[ServiceKind::CourseBuilder],
            detail_kind: None,
            color_scheme: "default",
        },
        rows,
        course_builder.collected_at,
    )
}

const DURATION_BUCKETS: [(&str, f64); 4] = [
    ("Short", 5.0),
    ("Medium", 15.0),
    ("Long", 30.0),
    ("Extended", f64::INFINITY),
];

/// 9. Drop-off by duration: average (100 - completion rate) per duration
/// bucket, always displayed in bucket order, empty buckets omitted.
pub fn dropoff_by_duration(course_builder: &Snapshot) -> Option<Chart> {
    let courses: Vec<CourseRecord> = records(course_builder, "courses");
    if courses.is_empty() {
        return None;
    }
    let mut sums = [0.0f64; 4];
    let mut counts = [0usize; 4];
    for course in &courses {
        let idx = DURATION_BUCKETS
            .iter()
            .position(|(_, max)| course.duration_hours <= *max)
            .unwrap_or(3);
        sums[idx] += 100.0 - course.completion_rate;
        counts[idx] += 1;
    }
    let rows: Vec<ChartRow> = DURATION_BUCKETS
        .iter()
        .enumerate()
        .filter(|(i, _)| counts[*i] > 0)
        .map(|(i, (label, _))| {
            ChartRow::new(*label, &[("Drop-off Rate", sums[i] / counts[i] as f64)])
        })
        .collect();
    finalize(
        ChartSpec {
            id: "combined-dropoff-duration",
            title: "Drop-off by Duration",
            subtitle: "Average drop-off per course length",
            description: "Average drop-off rate for short, medium, long and extended courses",
            chart_type: ChartType::Bar,
            services: &[ServiceKind::CourseBuilder],
            detail_kind: None,
            color_scheme: "warm",
        },
        rows,
        course_builder.collected_at,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LatestEntry;
    use serde_json::json;
    use time::macros::datetime;

    fn snapshot(service: ServiceKind) -> Snapshot {
        Snapshot::new(service, datetime!(2024-01-15 08:00 UTC))
    }

    fn course(name: &str, total: f64, active: f64, completion: f64, rating: f64, hours: f64) -> serde_json::Value {
        json!({
            "courseName": name,
            "totalEnrollments": total,
            "activeEnrollments": active,
            "completionRate": completion,
            "averageRating": rating,
            "durationHours": hours,
        })
    }

    fn course_builder_with(courses: Vec<serde_json::Value>) -> Snapshot {
        let mut s = snapshot(ServiceKind::CourseBuilder);
        s.details.insert("courses".into(), json!(courses));
        s
    }

    #[test]
    fn test_enrollments_comparison_single_course() {
        let s = course_builder_with(vec![course("X", 100.0, 40.0, 85.0, 4.5, 10.0)]);
        let chart = enrollments_comparison(&s).unwrap();
        assert_eq!(chart.data.len(), 1);
        assert_eq!(chart.data[0].name, "X");
        assert_eq!(chart.data[0].series["Total Enrollments"], 100.0);
        assert_eq!(chart.data[0].series["Active Enrollments"], 40.0);
    }

    #[test]
    fn test_enrollments_comparison_ranks_and_caps_at_15() {
        let courses: Vec<_> = (0..20)
            .map(|i| course(&format!("c{i}"), i as f64 + 1.0, 1.0, 50.0, 3.0, 10.0))
            .collect();
        let chart = enrollments_comparison(&course_builder_with(courses)).unwrap();
        assert_eq!(chart.data.len(), 15);
        assert_eq!(chart.data[0].name, "c19");
        let totals: Vec<f64> = chart.data.iter().map(|r| r.series["Total Enrollments"]).collect();
        assert!(totals.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_users_per_org_null_when_no_users() {
        let mut s = snapshot(ServiceKind::Directory);
        s.metrics.insert("totalUsers".into(), json!(0));
        s.details.insert(
            "organizations".into(),
            json!([{"name": "Acme", "userCount": 10}]),
        );
        assert!(users_per_organization(&s).is_none());
    }

    #[test]
    fn test_users_per_org_sorted_descending() {
        let mut s = snapshot(ServiceKind::Directory);
        s.metrics.insert("totalUsers".into(), json!(30));
        s.details.insert(
            "organizations".into(),
            json!([
                {"name": "Small", "userCount": 5},
                {"name": "Big", "userCount": 20},
                {"name": "Mid", "userCount": 5},
            ]),
        );
        let chart = users_per_organization(&s).unwrap();
        let names: Vec<&str> = chart.data.iter().map(|r| r.name.as_str()).collect();
        // Stable sort: Small and Mid tie and keep input order.
        assert_eq!(names, vec!["Big", "Small", "Mid"]);
    }

    #[test]
    fn test_completion_per_org_uniform_average() {
        let mut dir = snapshot(ServiceKind::Directory);
        dir.details.insert(
            "organizations".into(),
            json!([{"name": "A", "userCount": 1}, {"name": "B", "userCount": 2}]),
        );
        let cb = course_builder_with(vec![
            course("x", 1.0, 1.0, 60.0, 3.0, 5.0),
            course("y", 1.0, 1.0, 80.0, 3.0, 5.0),
        ]);
        let chart = completion_per_organization(&dir, &cb).unwrap();
        assert_eq!(chart.data.len(), 2);
        for row in &chart.data {
            assert_eq!(row.series["Completion Rate"], 70.0);
        }
    }

    #[test]
    fn test_rating_engagement_requires_analytics_signals() {
        let cb = course_builder_with(vec![course("X", 10.0, 5.0, 50.0, 4.0, 8.0)]);
        let mut la = snapshot(ServiceKind::LearningAnalytics);

        // Absent (null) signals -> no chart.
        assert!(rating_vs_engagement(&cb, &la).is_none());

        la.metrics.insert("platformUsageRate".into(), json!(80.0));
        la.metrics.insert("userSatisfactionScore".into(), json!(0.0));
        assert!(rating_vs_engagement(&cb, &la).is_none());

        la.metrics.insert("userSatisfactionScore".into(), json!(4.0));
        let chart = rating_vs_engagement(&cb, &la).unwrap();
        assert_eq!(chart.data[0].series["Rating"], 80.0);
        // base = 80 * 80/100 = 64; engagement = 64 * 0.8 * 0.5 = 25.6
        let engagement = chart.data[0].series["Engagement Index"];
        assert!((engagement - 25.6).abs() < 1e-9);
    }

    #[test]
    fn test_skill_gap_bands() {
        let mut s = snapshot(ServiceKind::Assessment);
        s.details.insert(
            "assessments".into(),
            json!([
                {"finalGrade": 95.0},
                {"finalGrade": 90.0},
                {"finalGrade": 85.0},
                {"finalGrade": 70.0},
                {"finalGrade": 42.0},
            ]),
        );
        let chart = skill_gap(&s).unwrap();
        let count = |label: &str| {
            chart
                .data
                .iter()
                .find(|r| r.name == label)
                .map(|r| r.series["Assessments"])
        };
        assert_eq!(count("Excellent (90-100)"), Some(2.0));
        assert_eq!(count("Good (80-89)"), Some(1.0));
        assert_eq!(count("Average (70-79)"), Some(1.0));
        assert_eq!(count("Needs Improvement (<70)"), Some(1.0));
    }

    #[test]
    fn test_content_usage_bucket_mapping() {
        let mut s = snapshot(ServiceKind::ContentStudio);
        s.details.insert(
            "content".into(),
            json!([
                {"generationMethod": "manual", "viewCount": 10},
                {"generationMethod": "ai_assisted", "viewCount": 5},
                {"generationMethod": "mixed", "viewCount": 7},
                {"generationMethod": "full_ai", "viewCount": 3},
                {"generationMethod": "unknown", "viewCount": 100},
            ]),
        );
        let chart = content_usage(&s).unwrap();
        let views = |label: &str| {
            chart
                .data
                .iter()
                .find(|r| r.name == label)
                .map(|r| r.series["Views"])
        };
        assert_eq!(views("Trainer-Generated"), Some(10.0));
        assert_eq!(views("Mixed"), Some(12.0));
        assert_eq!(views("AI-Generated"), Some(3.0));
        assert_eq!(chart.data.len(), 3);
    }

    #[test]
    fn test_monthly_growth_drops_incomplete_and_sorts() {
        let mut s = snapshot(ServiceKind::LearningAnalytics);
        s.details.insert(
            "trends".into(),
            json!([
                {"periodStart": "2024-03-01", "newUsers": 30, "learningHours": 900},
                {"periodStart": "2024-01-01", "newUsers": 10, "learningHours": 300},
                {"periodStart": "not-a-date", "newUsers": 99, "learningHours": 99},
                {"periodStart": "2024-02-01", "newUsers": 20},
                {"periodStart": "2024-04-01", "learningHours": 1200},
            ]),
        );
        let chart = monthly_growth(&s).unwrap();
        let names: Vec<&str> = chart.data.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Jan 2024", "Mar 2024"]);
    }

    #[test]
    fn test_top_courses_bounded_and_monotonic() {
        let courses: Vec<_> = (0..8)
            .map(|i| course(&format!("c{i}"), 10.0, 5.0, 40.0 + i as f64 * 5.0, 3.5, 10.0))
            .collect();
        let chart = top_courses(&course_builder_with(courses)).unwrap();
        assert!(chart.data.len() <= 5);
        let scores: Vec<f64> = chart.data.iter().map(|r| r.series["Score"]).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        // 0.6 x completion + 0.4 x scaled rating for the best course.
        assert!((scores[0] - (75.0 * 0.6 + 70.0 * 0.4)).abs() < 1e-9);
    }

    #[test]
    fn test_dropoff_fixed_order_and_omitted_buckets() {
        // Input deliberately out of bucket order; no Long-bucket course.
        let cb = course_builder_with(vec![
            course("ext", 1.0, 1.0, 20.0, 3.0, 40.0),
            course("short-a", 1.0, 1.0, 90.0, 3.0, 4.0),
            course("med", 1.0, 1.0, 60.0, 3.0, 12.0),
            course("short-b", 1.0, 1.0, 70.0, 3.0, 5.0),
        ]);
        let chart = dropoff_by_duration(&cb).unwrap();
        let names: Vec<&str> = chart.data.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Short", "Medium", "Extended"]);
        // Short: avg(10, 30) = 20.
        assert_eq!(chart.data[0].series["Drop-off Rate"], 20.0);
    }

    #[test]
    fn test_compose_combined_skips_missing_services() {
        let cb = course_builder_with(vec![course("X", 100.0, 40.0, 85.0, 4.5, 10.0)]);
        let latest = LatestSnapshots::from_entries(vec![LatestEntry {
            service: ServiceKind::CourseBuilder,
            data: cb,
        }]);
        let charts = compose_combined(&latest);
        let ids: Vec<&str> = charts.iter().map(|c| c.id.as_str()).collect();
        assert!(ids.contains(&"combined-enrollments-comparison"));
        assert!(ids.contains(&"combined-top-courses"));
        assert!(ids.contains(&"combined-dropoff-duration"));
        // Everything needing directory/analytics/assessment/content is absent.
        assert!(!ids.iter().any(|id| id.contains("organization")));
        assert!(!ids.contains(&"combined-rating-engagement"));
        assert!(!ids.contains(&"combined-skill-gap"));
    }
}
