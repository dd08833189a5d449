//! GCP Client
//!
//! Region-scoped client combining resolved credentials, the shared HTTP
//! client and the service endpoint table.

use super::auth::RegionCredentials;
use super::http::GcpHttpClient;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Base URLs of the GCP services the pipeline talks to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub compute: String,
    pub sqladmin: String,
    pub cloudfunctions: String,
    pub run: String,
    pub redis: String,
    pub apigateway: String,
    pub monitoring: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: "https://compute.googleapis.com".to_string(),
            sqladmin: "https://sqladmin.googleapis.com".to_string(),
            cloudfunctions: "https://cloudfunctions.googleapis.com".to_string(),
            run: "https://run.googleapis.com".to_string(),
            redis: "https://redis.googleapis.com".to_string(),
            apigateway: "https://apigateway.googleapis.com".to_string(),
            monitoring: "https://monitoring.googleapis.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Route every service to one base URL (emulators, mock servers)
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            compute: base.clone(),
            sqladmin: base.clone(),
            cloudfunctions: base.clone(),
            run: base.clone(),
            redis: base.clone(),
            apigateway: base.clone(),
            monitoring: base,
        }
    }

    /// Check every endpoint parses as an absolute http(s) URL
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("compute", &self.compute),
            ("sqladmin", &self.sqladmin),
            ("cloudfunctions", &self.cloudfunctions),
            ("run", &self.run),
            ("redis", &self.redis),
            ("apigateway", &self.apigateway),
            ("monitoring", &self.monitoring),
        ] {
            let parsed = url::Url::parse(value)
                .with_context(|| format!("Invalid {} endpoint: {}", name, value))?;
            if parsed.scheme() != "https" && parsed.scheme() != "http" {
                anyhow::bail!("Unsupported scheme for {} endpoint: {}", name, value);
            }
        }
        Ok(())
    }
}

/// Client for one account (GCP project) in one region
#[derive(Clone)]
pub struct GcpClient {
    credentials: RegionCredentials,
    http: GcpHttpClient,
    endpoints: Arc<Endpoints>,
    pub project_id: String,
    pub region: String,
}

impl GcpClient {
    pub fn new(
        http: GcpHttpClient,
        endpoints: Arc<Endpoints>,
        project_id: &str,
        region: &str,
        credentials: RegionCredentials,
    ) -> Self {
        Self {
            credentials,
            http,
            endpoints,
            project_id: project_id.to_string(),
            region: region.to_string(),
        }
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value> {
        if self.credentials.is_expired() {
            tracing::warn!(region = %self.region, "using expired credentials");
        }
        self.http.get(url, &self.credentials.token).await
    }

    // =========================================================================
    // Compute Engine API helpers
    // =========================================================================

    /// Build Compute Engine API URL
    pub fn compute_url(&self, path: &str) -> String {
        format!(
            "{}/compute/v1/projects/{}/{}",
            self.endpoints.compute, self.project_id, path
        )
    }

    /// Build regional Compute Engine API URL
    pub fn compute_regional_url(&self, resource: &str) -> String {
        self.compute_url(&format!("regions/{}/{}", self.region, resource))
    }

    /// Build aggregated Compute Engine API URL (all zones)
    pub fn compute_aggregated_url(&self, resource: &str) -> String {
        self.compute_url(&format!("aggregated/{}", resource))
    }

    // =========================================================================
    // Cloud SQL Admin API helpers
    // =========================================================================

    pub fn sqladmin_url(&self, resource: &str) -> String {
        format!(
            "{}/v1/projects/{}/{}",
            self.endpoints.sqladmin, self.project_id, resource
        )
    }

    // =========================================================================
    // Location-scoped APIs (functions, run, redis, apigateway)
    // =========================================================================

    fn location_url(&self, base: &str, version: &str, resource: &str) -> String {
        format!(
            "{}/{}/projects/{}/locations/{}/{}",
            base, version, self.project_id, self.region, resource
        )
    }

    pub fn cloudfunctions_url(&self, resource: &str) -> String {
        self.location_url(&self.endpoints.cloudfunctions, "v2", resource)
    }

    pub fn run_url(&self, resource: &str) -> String {
        self.location_url(&self.endpoints.run, "v2", resource)
    }

    pub fn redis_url(&self, resource: &str) -> String {
        self.location_url(&self.endpoints.redis, "v1", resource)
    }

    pub fn apigateway_url(&self, resource: &str) -> String {
        self.location_url(&self.endpoints.apigateway, "v1", resource)
    }

    // =========================================================================
    // Cloud Monitoring API helpers
    // =========================================================================

    pub fn monitoring_url(&self, resource: &str) -> String {
        format!(
            "{}/v3/projects/{}/{}",
            self.endpoints.monitoring, self.project_id, resource
        )
    }
}
