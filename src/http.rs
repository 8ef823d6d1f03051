//! REST surface of the kernel: dashboard reads, combined analytics, on-demand
//! collection runs and report generation.
//!
//! Every route except /health requires the x-api-key header to match
//! INSIGHT_API_KEY. Dashboard reads never fail because upstream data is
//! partial; they degrade to fewer charts. A collection run always answers
//! with its structured outcome rather than an HTTP error.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use crate::charts;
use crate::ingest::Ingestor;
use crate::models::{Chart, CollectionOutcome, ServiceKind, Snapshot};
use crate::report::{self, Report, ReportType};
use crate::resolver;
use crate::store::SnapshotStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub ingestor: Arc<Ingestor>,
    pub started_at: Instant,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/dashboard", get(get_dashboard))
        .route("/analytics/combined", get(get_combined_analytics))
        .route("/snapshots/{service}", get(get_snapshot))
        .route("/collect", post(run_collection))
        .route("/reports/{report_type}", get(get_report))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("INSIGHT_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!(target: "http", "INSIGHT_API_KEY not set, refusing API access");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);
    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

// GET /health (liveness + store mode)
async fn get_health(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "storeMode": app.store.mode(),
        "uptimeSeconds": app.started_at.elapsed().as_secs(),
    }))
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardView {
    charts: Vec<Chart>,
    last_updated: Option<String>,
}

fn to_dashboard_view(charts: Vec<Chart>) -> DashboardView {
    // Max collection timestamp among the charts that actually materialized;
    // a snapshot whose charts were all suppressed does not count.
    let last_updated = charts
        .iter()
        .map(|c| c.metadata.last_updated)
        .max()
        .and_then(|ts| ts.format(&Rfc3339).ok());
    DashboardView {
        charts,
        last_updated,
    }
}

// GET /dashboard (priority charts)
async fn get_dashboard(State(app): State<AppState>) -> Json<DashboardView> {
    let latest = resolver::resolve_latest(&app.store).await;
    Json(to_dashboard_view(charts::dashboard_charts(&latest)))
}

// GET /analytics/combined (the cross-service charts)
async fn get_combined_analytics(State(app): State<AppState>) -> Json<DashboardView> {
    let latest = resolver::resolve_latest(&app.store).await;
    Json(to_dashboard_view(charts::combined::compose_combined(&latest)))
}

// GET /snapshots/{service} (latest snapshot for one service)
async fn get_snapshot(
    State(app): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<Snapshot>, StatusCode> {
    let service: ServiceKind = service.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    match app.store.get_latest_by_service(service).await {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!(target: "http", %service, "snapshot read failed: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CollectParams {
    services: Option<Vec<String>>,
}

// POST /collect (on-demand collection run, defaults to all five services)
async fn run_collection(
    State(app): State<AppState>,
    body: Option<Json<CollectParams>>,
) -> Result<Json<CollectionOutcome>, (StatusCode, Json<serde_json::Value>)> {
    let params = body.map(|Json(p)| p).unwrap_or_default();
    let services = match params.services {
        None => ServiceKind::ALL.to_vec(),
        Some(names) => {
            let mut services = Vec::with_capacity(names.len());
            for name in &names {
                let service = name.parse::<ServiceKind>().map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({"error": e})),
                    )
                })?;
                services.push(service);
            }
            services
        }
    };

    Ok(Json(app.ingestor.run_collection(&services).await))
}

// GET /reports/{report_type}
async fn get_report(
    State(app): State<AppState>,
    Path(report_type): Path<String>,
) -> Result<Json<Report>, (StatusCode, Json<serde_json::Value>)> {
    let report_type: ReportType = report_type
        .parse()
        .map_err(|e: String| (StatusCode::BAD_REQUEST, Json(json!({"error": e}))))?;
    let latest = resolver::resolve_latest(&app.store).await;
    Ok(Json(report::build_report(report_type, &latest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChartMetadata, ChartRow, ChartType};
    use time::macros::datetime;

    fn chart_at(id: &str, last_updated: time::OffsetDateTime) -> Chart {
        Chart {
            id: id.into(),
            title: "t".into(),
            subtitle: "s".into(),
            description: "d".into(),
            chart_type: ChartType::Bar,
            data: vec![ChartRow::new("a", &[("Users", 1.0)])],
            metadata: ChartMetadata {
                services: vec![ServiceKind::Directory],
                detail_kind: None,
                is_priority: true,
                last_updated,
                color_scheme: "default".into(),
            },
        }
    }

    #[test]
    fn test_dashboard_last_updated_follows_emitted_charts() {
        // Only charts that materialized contribute; a newer snapshot whose
        // charts were all suppressed never shows up here.
        let view = to_dashboard_view(vec![
            chart_at("chart-directory", datetime!(2024-01-10 08:00 UTC)),
            chart_at("combined-top-courses", datetime!(2024-01-12 08:00 UTC)),
        ]);
        assert_eq!(view.last_updated.as_deref(), Some("2024-01-12T08:00:00Z"));
    }

    #[test]
    fn test_dashboard_last_updated_absent_without_charts() {
        let view = to_dashboard_view(vec![]);
        assert!(view.charts.is_empty());
        assert!(view.last_updated.is_none());
    }
}
