//! Ingestion: fetch raw upstream payloads, normalize them into the canonical
//! Snapshot shape, and persist one snapshot per service per calendar day.
//!
//! Normalization is the single place where upstream field-name variants are
//! resolved (snake_case vs camelCase, singular vs plural); everything past the
//! store boundary sees only the canonical keys. Missing numeric fields become
//! 0, missing arrays become empty, with one exception: the learning-analytics
//! rate/satisfaction metrics and trend fields stay null when absent, because
//! downstream charts must distinguish "not reported" from a real zero.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::fetch::{FetchError, MetricsSource};
use crate::models::{
    CollectionFailure, CollectionOutcome, CollectionSuccess, ServiceKind, Snapshot,
};
use crate::store::{SnapshotStore, StoreError};

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BASE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("normalization failed: {0}")]
    Normalize(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("collection already in progress")]
    AlreadyRunning,
}

/// Runs collection cycles: fetch + normalize + persist across services.
/// Services are fully isolated from each other; one failure never aborts the
/// rest of the run.
pub struct Ingestor {
    store: Arc<SnapshotStore>,
    source: Arc<dyn MetricsSource>,
    in_flight: Mutex<HashSet<ServiceKind>>,
}

impl Ingestor {
    pub fn new(store: Arc<SnapshotStore>, source: Arc<dyn MetricsSource>) -> Self {
        Self {
            store,
            source,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// One collection run. Every requested service ends up in exactly one of
    /// `successful` / `failed`; `partial` flags a mixed outcome.
    pub async fn run_collection(&self, services: &[ServiceKind]) -> CollectionOutcome {
        let mut successful = Vec::new();
        let mut failed = Vec::new();

        for &service in services {
            match self.collect_one(service).await {
                Ok(last_updated) => {
                    info!(target: "ingest", %service, "snapshot stored");
                    successful.push(CollectionSuccess {
                        service,
                        last_updated,
                    });
                }
                Err(e) => {
                    warn!(target: "ingest", %service, "collection failed: {e}");
                    failed.push(CollectionFailure {
                        service,
                        reason: e.to_string(),
                    });
                }
            }
        }

        CollectionOutcome::finalize(successful, failed)
    }

    async fn collect_one(&self, service: ServiceKind) -> Result<OffsetDateTime, IngestError> {
        if !self.try_begin(service) {
            return Err(IngestError::AlreadyRunning);
        }
        let result = self.fetch_and_persist(service).await;
        self.finish(service);
        result
    }

    async fn fetch_and_persist(&self, service: ServiceKind) -> Result<OffsetDateTime, IngestError> {
        let raw = self.source.fetch(service).await?;
        let collected_at = OffsetDateTime::now_utc();
        let snapshot = normalize(service, &raw, collected_at)?;

        // Upsert by day: re-ingesting the same service on the same date
        // overwrites rather than duplicates.
        let key = self.store.snapshot_key(service, collected_at.date());
        retry_with_backoff(PERSIST_ATTEMPTS, PERSIST_BASE_DELAY, || {
            self.store.set(&key, &snapshot)
        })
        .await?;
        Ok(collected_at)
    }

    /// Best-effort in-flight guard: a service already being collected is
    /// skipped instead of written twice.
    fn try_begin(&self, service: ServiceKind) -> bool {
        self.in_flight.lock().insert(service)
    }

    fn finish(&self, service: ServiceKind) {
        self.in_flight.lock().remove(&service);
    }
}

/// Retries `op` on transient store errors with doubling delays. Non-transient
/// errors fail immediately.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut delay = base_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(target: "ingest", "transient store error (attempt {attempt}/{attempts}), retrying in {delay:?}: {e}");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Normalizes one raw upstream payload into the canonical snapshot for its
/// service. Never fails on missing fields, only on a payload whose top level
/// is neither an object nor (for services whose payload may be a bare record
/// list) an array.
pub fn normalize(
    service: ServiceKind,
    raw: &Value,
    collected_at: OffsetDateTime,
) -> Result<Snapshot, IngestError> {
    if !raw.is_object() && !raw.is_array() {
        return Err(IngestError::Normalize(format!(
            "{service} payload is neither an object nor an array"
        )));
    }
    let snapshot = match service {
        ServiceKind::Directory => normalize_directory(raw, collected_at),
        ServiceKind::CourseBuilder => normalize_course_builder(raw, collected_at),
        ServiceKind::Assessment => normalize_assessment(raw, collected_at),
        ServiceKind::ContentStudio => normalize_content_studio(raw, collected_at),
        ServiceKind::LearningAnalytics => normalize_learning_analytics(raw, collected_at),
    };
    Ok(snapshot)
}

fn normalize_directory(raw: &Value, collected_at: OffsetDateTime) -> Snapshot {
    let mut snapshot = Snapshot::new(ServiceKind::Directory, collected_at);
    let orgs: Vec<Value> = records_of(raw, &["organizations", "orgs"])
        .iter()
        .map(|org| {
            json!({
                "name": str_alias(org, &["name", "organizationName", "organization_name"]),
                "userCount": num_alias(org, &["userCount", "user_count", "users"]),
            })
        })
        .collect();

    snapshot.metrics.insert("totalUsers".into(), json!(num_alias_root(raw, &["totalUsers", "total_users"])));
    snapshot.metrics.insert("activeUsers".into(), json!(num_alias_root(raw, &["activeUsers", "active_users"])));
    let total_orgs = opt_num_alias_root(raw, &["totalOrganizations", "total_organizations"])
        .unwrap_or(orgs.len() as f64);
    snapshot.metrics.insert("totalOrganizations".into(), json!(total_orgs));
    snapshot.metrics.insert(
        "usersByRole".into(),
        object_alias_root(raw, &["usersByRole", "users_by_role"]),
    );
    snapshot.metrics.insert(
        "usersByDepartment".into(),
        object_alias_root(raw, &["usersByDepartment", "users_by_department"]),
    );
    snapshot.details.insert("organizations".into(), Value::Array(orgs));
    snapshot
}

fn normalize_course_builder(raw: &Value, collected_at: OffsetDateTime) -> Snapshot {
    let mut snapshot = Snapshot::new(ServiceKind::CourseBuilder, collected_at);
    let courses: Vec<Value> = records_of(raw, &["courses"])
        .iter()
        .map(|course| {
            json!({
                "courseId": str_alias(course, &["courseId", "course_id", "id"]),
                "courseName": str_alias(course, &["courseName", "course_name", "name", "title"]),
                "totalEnrollments": num_alias(course, &["totalEnrollments", "total_enrollments", "enrollments"]),
                "activeEnrollments": num_alias(course, &["activeEnrollments", "activeEnrollment", "active_enrollments"]),
                "completionRate": num_alias(course, &["completionRate", "completion_rate"]),
                "averageRating": num_alias(course, &["averageRating", "average_rating", "rating"]),
                "durationHours": num_alias(course, &["durationHours", "duration_hours", "duration"]),
                "createdAt": str_alias(course, &["createdAt", "created_at"]),
            })
        })
        .collect();

    let sum = |key: &str| -> f64 {
        courses
            .iter()
            .map(|c| c.get(key).and_then(Value::as_f64).unwrap_or(0.0))
            .sum()
    };
    let mean = |key: &str| -> f64 {
        if courses.is_empty() {
            0.0
        } else {
            sum(key) / courses.len() as f64
        }
    };

    // Upstream aggregates win; otherwise they are recomputed from the records.
    let total_courses = opt_num_alias_root(raw, &["totalCourses", "total_courses"])
        .unwrap_or(courses.len() as f64);
    let total_enrollments = opt_num_alias_root(raw, &["totalEnrollments", "total_enrollments"])
        .unwrap_or_else(|| sum("totalEnrollments"));
    let active_enrollments = opt_num_alias_root(raw, &["activeEnrollments", "active_enrollments"])
        .unwrap_or_else(|| sum("activeEnrollments"));
    let avg_completion = opt_num_alias_root(raw, &["averageCompletionRate", "average_completion_rate"])
        .unwrap_or_else(|| mean("completionRate"));
    let avg_rating = opt_num_alias_root(raw, &["averageRating", "average_rating"])
        .unwrap_or_else(|| mean("averageRating"));

    snapshot.metrics.insert("totalCourses".into(), json!(total_courses));
    snapshot.metrics.insert("totalEnrollments".into(), json!(total_enrollments));
    snapshot.metrics.insert("activeEnrollments".into(), json!(active_enrollments));
    snapshot.metrics.insert("averageCompletionRate".into(), json!(avg_completion));
    snapshot.metrics.insert("averageRating".into(), json!(avg_rating));
    snapshot.details.insert("courses".into(), Value::Array(courses));
    snapshot
}

fn normalize_assessment(raw: &Value, collected_at: OffsetDateTime) -> Snapshot {
    let mut snapshot = Snapshot::new(ServiceKind::Assessment, collected_at);
    let assessments: Vec<Value> = records_of(raw, &["assessments"])
        .iter()
        .map(|a| {
            json!({
                "assessmentId": str_alias(a, &["assessmentId", "assessment_id", "id"]),
                "title": str_alias(a, &["title", "name"]),
                "finalGrade": num_alias(a, &["finalGrade", "final_grade", "score"]),
                "completedAt": str_alias(a, &["completedAt", "completed_at"]),
            })
        })
        .collect();

    let total = opt_num_alias_root(raw, &["totalAssessments", "total_assessments"])
        .unwrap_or(assessments.len() as f64);
    snapshot.metrics.insert("totalAssessments".into(), json!(total));
    snapshot.metrics.insert(
        "completedAssessments".into(),
        json!(num_alias_root(raw, &["completedAssessments", "completed_assessments"])),
    );
    snapshot.metrics.insert(
        "averageScore".into(),
        json!(num_alias_root(raw, &["averageScore", "average_score"])),
    );
    snapshot.metrics.insert(
        "passRate".into(),
        json!(num_alias_root(raw, &["passRate", "pass_rate"])),
    );
    snapshot.details.insert("assessments".into(), Value::Array(assessments));
    snapshot
}

fn normalize_content_studio(raw: &Value, collected_at: OffsetDateTime) -> Snapshot {
    let mut snapshot = Snapshot::new(ServiceKind::ContentStudio, collected_at);
    let content: Vec<Value> = records_of(raw, &["content", "items"])
        .iter()
        .map(|item| {
            json!({
                "contentId": str_alias(item, &["contentId", "content_id", "id"]),
                "title": str_alias(item, &["title", "name"]),
                "generationMethod": str_alias(item, &["generationMethod", "generation_method"]),
                "viewCount": num_alias(item, &["viewCount", "view_count", "views"]),
            })
        })
        .collect();

    let total_content = opt_num_alias_root(raw, &["totalContent", "total_content"])
        .unwrap_or(content.len() as f64);
    let total_views = opt_num_alias_root(raw, &["totalViews", "total_views"]).unwrap_or_else(|| {
        content
            .iter()
            .map(|c| c.get("viewCount").and_then(Value::as_f64).unwrap_or(0.0))
            .sum()
    });
    snapshot.metrics.insert("totalContent".into(), json!(total_content));
    snapshot.metrics.insert("totalViews".into(), json!(total_views));
    snapshot.metrics.insert(
        "contentByType".into(),
        object_alias_root(raw, &["contentByType", "content_by_type"]),
    );
    snapshot.details.insert("content".into(), Value::Array(content));
    snapshot
}

fn normalize_learning_analytics(raw: &Value, collected_at: OffsetDateTime) -> Snapshot {
    let mut snapshot = Snapshot::new(ServiceKind::LearningAnalytics, collected_at);
    let trends: Vec<Value> = records_of(raw, &["trends", "monthlyTrends", "monthly_trends"])
        .iter()
        .map(|t| {
            // newUsers / learningHours stay null when missing: the growth
            // chart drops incomplete periods instead of plotting zeros.
            json!({
                "periodStart": record_str_opt(t, &["periodStart", "period_start", "startDate", "start_date"]),
                "newUsers": record_num_opt(t, &["newUsers", "new_users"]),
                "learningHours": record_num_opt(t, &["learningHours", "learning_hours"]),
            })
        })
        .collect();

    snapshot.metrics.insert(
        "totalLearningHours".into(),
        json!(num_alias_root(raw, &["totalLearningHours", "total_learning_hours"])),
    );
    snapshot.metrics.insert(
        "platformUsageRate".into(),
        opt_num_alias_root(raw, &["platformUsageRate", "platform_usage_rate"])
            .map(|v| json!(v))
            .unwrap_or(Value::Null),
    );
    snapshot.metrics.insert(
        "userSatisfactionScore".into(),
        opt_num_alias_root(raw, &["userSatisfactionScore", "user_satisfaction_score"])
            .map(|v| json!(v))
            .unwrap_or(Value::Null),
    );
    snapshot.metrics.insert(
        "activeLearners".into(),
        json!(num_alias_root(raw, &["activeLearners", "active_learners"])),
    );
    snapshot.details.insert("trends".into(), Value::Array(trends));
    snapshot
}

/// Primary record array for a service: either the payload itself (some
/// upstreams return a bare list) or the first present named array.
fn records_of<'a>(raw: &'a Value, keys: &[&str]) -> &'a [Value] {
    if let Value::Array(records) = raw {
        return records;
    }
    for key in keys {
        if let Some(Value::Array(records)) = raw.get(key) {
            return records;
        }
    }
    &[]
}

fn num_alias(record: &Value, aliases: &[&str]) -> f64 {
    record_num_opt(record, aliases).unwrap_or(0.0)
}

fn record_num_opt(record: &Value, aliases: &[&str]) -> Option<f64> {
    aliases
        .iter()
        .find_map(|key| record.get(*key).and_then(Value::as_f64))
}

fn str_alias(record: &Value, aliases: &[&str]) -> String {
    record_str_opt(record, aliases).unwrap_or_default()
}

fn record_str_opt(record: &Value, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .find_map(|key| record.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn num_alias_root(raw: &Value, aliases: &[&str]) -> f64 {
    opt_num_alias_root(raw, aliases).unwrap_or(0.0)
}

fn opt_num_alias_root(raw: &Value, aliases: &[&str]) -> Option<f64> {
    record_num_opt(raw, aliases)
}

fn object_alias_root(raw: &Value, aliases: &[&str]) -> Value {
    aliases
        .iter()
        .find_map(|key| raw.get(*key).filter(|v| v.is_object()).cloned())
        .unwrap_or_else(|| Value::Object(Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use time::macros::datetime;

    struct ScriptedSource {
        payloads: HashMap<ServiceKind, Value>,
        failing: Vec<ServiceKind>,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self {
                payloads: HashMap::new(),
                failing: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl MetricsSource for ScriptedSource {
        async fn fetch(&self, service: ServiceKind) -> Result<Value, FetchError> {
            if self.failing.contains(&service) {
                return Err(FetchError::Request {
                    service,
                    message: "connection refused".into(),
                });
            }
            Ok(self
                .payloads
                .get(&service)
                .cloned()
                .unwrap_or_else(|| json!({})))
        }
    }

    fn now() -> OffsetDateTime {
        datetime!(2024-01-15 08:00 UTC)
    }

    #[test]
    fn test_course_builder_bare_list_payload() {
        // Upstream returns a bare array of courses with snake_case ids and the
        // singular "activeEnrollment" variant.
        let raw = json!([{
            "course_id": "c1",
            "course_name": "X",
            "totalEnrollments": 100,
            "activeEnrollment": 40,
            "completionRate": 85,
            "averageRating": 4.5,
            "createdAt": "2024-01-01"
        }]);
        let snapshot = normalize(ServiceKind::CourseBuilder, &raw, now()).unwrap();

        assert_eq!(snapshot.metric_f64("totalCourses"), 1.0);
        assert_eq!(snapshot.metric_f64("totalEnrollments"), 100.0);
        assert_eq!(snapshot.metric_f64("activeEnrollments"), 40.0);
        assert_eq!(snapshot.metric_f64("averageCompletionRate"), 85.0);
        let course = &snapshot.detail_records("courses")[0];
        assert_eq!(course["courseId"], "c1");
        assert_eq!(course["courseName"], "X");
        assert_eq!(course["activeEnrollments"], 40.0);
    }

    #[test]
    fn test_defensive_defaults_on_empty_payload() {
        let snapshot = normalize(ServiceKind::Directory, &json!({}), now()).unwrap();
        assert_eq!(snapshot.metric_f64("totalUsers"), 0.0);
        assert_eq!(snapshot.metric_f64("totalOrganizations"), 0.0);
        assert!(snapshot.detail_records("organizations").is_empty());
        assert!(snapshot.nested_metric("usersByRole").is_empty());

        let snapshot = normalize(ServiceKind::CourseBuilder, &json!({}), now()).unwrap();
        assert_eq!(snapshot.metric_f64("averageCompletionRate"), 0.0);
        assert!(snapshot.detail_records("courses").is_empty());
    }

    #[test]
    fn test_analytics_missing_rates_stay_null() {
        let snapshot =
            normalize(ServiceKind::LearningAnalytics, &json!({"totalLearningHours": 12}), now())
                .unwrap();
        assert!(snapshot.metrics["platformUsageRate"].is_null());
        assert!(snapshot.metrics["userSatisfactionScore"].is_null());
        assert_eq!(snapshot.metric_f64("totalLearningHours"), 12.0);
    }

    #[test]
    fn test_trend_records_keep_absent_fields_null() {
        let raw = json!({"trends": [
            {"period_start": "2024-01-01", "new_users": 10},
            {"period_start": "2024-02-01", "new_users": 12, "learning_hours": 300}
        ]});
        let snapshot = normalize(ServiceKind::LearningAnalytics, &raw, now()).unwrap();
        let trends = snapshot.detail_records("trends");
        assert!(trends[0]["learningHours"].is_null());
        assert_eq!(trends[1]["learningHours"], 300.0);
    }

    #[test]
    fn test_scalar_payload_is_rejected() {
        assert!(normalize(ServiceKind::Assessment, &json!(42), now()).is_err());
    }

    #[tokio::test]
    async fn test_collection_isolates_service_failures() {
        let mut source = ScriptedSource::new();
        source.failing.push(ServiceKind::Directory);
        source.payloads.insert(
            ServiceKind::CourseBuilder,
            json!({"courses": [{"courseId": "c1", "courseName": "X", "totalEnrollments": 5}]}),
        );
        let store = Arc::new(SnapshotStore::in_memory());
        let ingestor = Ingestor::new(store.clone(), Arc::new(source));

        let requested = [ServiceKind::Directory, ServiceKind::CourseBuilder];
        let outcome = ingestor.run_collection(&requested).await;

        assert_eq!(outcome.successful.len() + outcome.failed.len(), requested.len());
        assert!(outcome.partial);
        assert_eq!(outcome.successful[0].service, ServiceKind::CourseBuilder);
        assert_eq!(outcome.failed[0].service, ServiceKind::Directory);
        assert!(outcome.failed[0].reason.contains("connection refused"));
        assert!(store
            .get_latest_by_service(ServiceKind::CourseBuilder)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_same_day_reingestion_upserts() {
        let mut source = ScriptedSource::new();
        source
            .payloads
            .insert(ServiceKind::Assessment, json!({"totalAssessments": 7}));
        let store = Arc::new(SnapshotStore::in_memory());
        let ingestor = Ingestor::new(store.clone(), Arc::new(source));

        ingestor.run_collection(&[ServiceKind::Assessment]).await;
        ingestor.run_collection(&[ServiceKind::Assessment]).await;

        let all = store.get_multiple("snapshot:assessment:*").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].metric_f64("totalAssessments"), 7.0);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_defaulted_form() {
        let mut source = ScriptedSource::new();
        source
            .payloads
            .insert(ServiceKind::ContentStudio, json!({"items": [{"id": "i1", "views": 9}]}));
        let store = Arc::new(SnapshotStore::in_memory());
        let ingestor = Ingestor::new(store.clone(), Arc::new(source));
        ingestor.run_collection(&[ServiceKind::ContentStudio]).await;

        let stored = store
            .get_latest_by_service(ServiceKind::ContentStudio)
            .await
            .unwrap()
            .unwrap();
        // Missing upstream fields read back as defaulted values, not absent keys.
        assert_eq!(stored.metric_f64("totalContent"), 1.0);
        assert_eq!(stored.metric_f64("totalViews"), 9.0);
        let item = &stored.detail_records("content")[0];
        assert_eq!(item["contentId"], "i1");
        assert_eq!(item["generationMethod"], "");
        assert_eq!(item["viewCount"], 9.0);
    }

    #[tokio::test]
    async fn test_in_flight_service_is_skipped() {
        let store = Arc::new(SnapshotStore::in_memory());
        let ingestor = Ingestor::new(store, Arc::new(ScriptedSource::new()));

        assert!(ingestor.try_begin(ServiceKind::Directory));
        let outcome = ingestor.run_collection(&[ServiceKind::Directory]).await;
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].reason.contains("already in progress"));
        ingestor.finish(ServiceKind::Directory);

        let outcome = ingestor.run_collection(&[ServiceKind::Directory]).await;
        assert_eq!(outcome.successful.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let mut calls = 0;
        let result = retry_with_backoff(3, Duration::from_millis(1), || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(StoreError::Transient("timeout".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_fails_fast_on_non_transient() {
        let mut calls = 0;
        let result: Result<(), StoreError> = retry_with_backoff(3, Duration::from_millis(1), || {
            calls += 1;
            async { Err(StoreError::Backend("constraint violation".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_transient_attempts() {
        let mut calls = 0;
        let result: Result<(), StoreError> = retry_with_backoff(3, Duration::from_millis(1), || {
            calls += 1;
            async { Err(StoreError::Transient("timeout".into())) }
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls, 3);
    }
}
