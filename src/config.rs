use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::warn;

use crate::models::ServiceKind;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub store: StoreConf,
    pub services: ServicesConf,
    pub collection: CollectionConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConf {
    /// "memory" or "redis". Anything else falls back to memory.
    pub backend: String,
    pub redis_url: String,
    pub key_prefix: String,
    /// Advisory cache hygiene; latest-entry resolution never depends on it.
    pub ttl_days: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServicesConf {
    /// Base URL per upstream service, keyed by wire id (directory, courseBuilder...).
    pub base_urls: HashMap<String, String>,
    pub auth_token: String,
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CollectionConf {
    /// Daily batch refresh by default.
    pub interval_hours: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            http: HttpConf::default(),
            store: StoreConf::default(),
            services: ServicesConf::default(),
            collection: CollectionConf::default(),
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Default for StoreConf {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            redis_url: "redis://localhost:6379".into(),
            key_prefix: "snapshot".into(),
            ttl_days: 45,
        }
    }
}

impl Default for ServicesConf {
    fn default() -> Self {
        let base_urls = ServiceKind::ALL
            .iter()
            .map(|s| {
                (
                    s.as_str().to_string(),
                    format!("http://localhost:9000/{}", s.as_str()),
                )
            })
            .collect();
        Self {
            base_urls,
            auth_token: String::new(),
            fetch_timeout_secs: 30,
        }
    }
}

impl Default for CollectionConf {
    fn default() -> Self {
        Self { interval_hours: 24 }
    }
}

impl ServicesConf {
    pub fn base_url(&self, service: ServiceKind) -> Option<&str> {
        self.base_urls.get(service.as_str()).map(String::as_str)
    }
}

/// Loads kernel.yaml (or INSIGHT_KERNEL_CONFIG), falling back to defaults on a
/// missing or invalid file so the kernel always boots.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var("INSIGHT_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            KernelConfig::default()
        } else {
            serde_yaml::from_str(&txt).unwrap_or_else(|e| {
                warn!(target: "config", %path, "invalid config, using defaults: {e}");
                KernelConfig::default()
            })
        }
    } else {
        warn!(target: "config", %path, "no config file found, using defaults");
        KernelConfig::default()
    };

    // Env overrides for the secrets and the store backing.
    if let Ok(token) = std::env::var("INSIGHT_SERVICE_TOKEN") {
        cfg.services.auth_token = token;
    }
    if let Ok(url) = std::env::var("INSIGHT_REDIS_URL") {
        cfg.store.redis_url = url;
        cfg.store.backend = "redis".into();
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_all_services() {
        let cfg = KernelConfig::default();
        for service in ServiceKind::ALL {
            assert!(cfg.services.base_url(service).is_some());
        }
        assert_eq!(cfg.store.ttl_days, 45);
        assert_eq!(cfg.collection.interval_hours, 24);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let cfg: KernelConfig = serde_yaml::from_str("http:\n  port: 9090\n").unwrap();
        assert_eq!(cfg.http.port, 9090);
        assert_eq!(cfg.store.backend, "memory");
    }
}
