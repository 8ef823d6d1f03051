//! Upstream service fetchers. Each of the five services exposes a metrics
//! endpoint returning a service-specific JSON payload; the payload is opaque
//! here and only gains shape in the normalization step.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::ServicesConf;
use crate::models::ServiceKind;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no base URL configured for {0}")]
    NotConfigured(ServiceKind),
    #[error("request to {service} failed: {message}")]
    Request {
        service: ServiceKind,
        message: String,
    },
    #[error("{service} returned a malformed payload: {message}")]
    MalformedPayload {
        service: ServiceKind,
        message: String,
    },
}

/// Seam between collection runs and the network. Production uses
/// [`HttpMetricsSource`]; tests substitute a scripted source.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self, service: ServiceKind) -> Result<Value, FetchError>;
}

/// HTTP fetcher: bearer-authenticated GET against each service's metrics
/// endpoint, with a bounded timeout so a hung upstream counts as a failed
/// fetch instead of stalling a collection run.
pub struct HttpMetricsSource {
    client: reqwest::Client,
    services: ServicesConf,
}

impl HttpMetricsSource {
    pub fn new(services: ServicesConf) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(services.fetch_timeout_secs))
            .build()?;
        Ok(Self { client, services })
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self, service: ServiceKind) -> Result<Value, FetchError> {
        let base = self
            .services
            .base_url(service)
            .ok_or(FetchError::NotConfigured(service))?;
        let url = format!("{}/metrics", base.trim_end_matches('/'));
        debug!(target: "fetch", %service, %url, "fetching upstream metrics");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.services.auth_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| FetchError::Request {
                service,
                message: e.to_string(),
            })?;

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::MalformedPayload {
                service,
                message: e.to_string(),
            })
    }
}
