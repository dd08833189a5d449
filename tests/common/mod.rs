//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cloudsweep::breaker::CircuitBreakerConfig;
use cloudsweep::gcp::accounts::ConfigAccountDirectory;
use cloudsweep::gcp::auth::{CredentialError, CredentialResolver, RegionCredentials, StaticCredentialResolver};
use cloudsweep::gcp::client::Endpoints;
use cloudsweep::gcp::http::GcpHttpClient;
use cloudsweep::pipeline::{Pipeline, PipelineSettings};
use cloudsweep::store::{MemoryStore, ResourceStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

pub const PROJECT: &str = "demo-project";
pub const ORG: &str = "org-1";
pub const TOKEN: &str = "test-token";

/// Answer every unmatched GET with an empty list response
pub async fn mount_empty_fallback(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .with_priority(10)
        .mount(server)
        .await;
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        default_region: "us-east1".to_string(),
        ..Default::default()
    }
}

pub fn breaker_settings(threshold: u32, cooldown: Duration) -> PipelineSettings {
    PipelineSettings {
        breaker: CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown,
        },
        ..settings()
    }
}

pub fn pipeline_with(
    server: &MockServer,
    resolver: Arc<dyn CredentialResolver>,
    store: Arc<dyn ResourceStore>,
    settings: PipelineSettings,
) -> Pipeline {
    let http = GcpHttpClient::new(Duration::from_secs(5)).expect("http client");
    Pipeline::new(
        resolver,
        Arc::new(ConfigAccountDirectory::new(HashMap::new())),
        store,
        http,
        Arc::new(Endpoints::single(&server.uri())),
        settings,
    )
}

pub fn pipeline(server: &MockServer, store: Arc<MemoryStore>) -> Pipeline {
    pipeline_with(
        server,
        Arc::new(StaticCredentialResolver::new(TOKEN)),
        store,
        settings(),
    )
}

/// Aggregated compute response with `count` instances in `zone`
pub fn aggregated_instances(zone: &str, count: usize) -> Value {
    let instances: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "id": format!("{}", 1000 + i),
                "name": format!("web-{i}"),
                "status": "RUNNING",
                "zone": format!("https://www.googleapis.com/compute/v1/projects/{PROJECT}/zones/{zone}"),
                "machineType": format!("zones/{zone}/machineTypes/e2-medium")
            })
        })
        .collect();

    json!({
        "items": {
            format!("zones/{zone}"): { "instances": instances },
            "zones/asia-east1-a": { "warning": { "code": "NO_RESULTS_ON_PAGE" } }
        }
    })
}

pub fn compute_aggregated_path() -> String {
    format!("/compute/v1/projects/{PROJECT}/aggregated/instances")
}

pub fn time_series_path() -> String {
    format!("/v3/projects/{PROJECT}/timeSeries")
}

/// One Cloud Monitoring series with a single int64 point
pub fn int_series(end_time: &str, value: i64) -> Value {
    json!({
        "metric": { "type": "compute.googleapis.com/instance/network/received_bytes_count" },
        "points": [{
            "interval": { "startTime": end_time, "endTime": end_time },
            "value": { "int64Value": value.to_string() }
        }]
    })
}

pub fn double_series(end_time: &str, value: f64) -> Value {
    json!({
        "points": [{
            "interval": { "endTime": end_time },
            "value": { "doubleValue": value }
        }]
    })
}

/// Matches a timeSeries query for one metric with one aligner
pub struct MetricQuery {
    pub metric_suffix: &'static str,
    pub aligner: &'static str,
}

impl Match for MetricQuery {
    fn matches(&self, request: &Request) -> bool {
        let pairs: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let filter_ok = pairs
            .get("filter")
            .map(|f| f.contains(&format!("/{}\"", self.metric_suffix)))
            .unwrap_or(false);
        let aligner_ok = pairs.get("aggregation.perSeriesAligner").map(String::as_str) == Some(self.aligner);
        filter_ok && aligner_ok
    }
}

/// Matches a query whose `filter` parameter contains a fragment
pub struct FilterContains(pub String);

impl Match for FilterContains {
    fn matches(&self, request: &Request) -> bool {
        request
            .url
            .query_pairs()
            .any(|(k, v)| k == "filter" && v.contains(self.0.as_str()))
    }
}

/// Resolver that refuses every account
pub struct DenyingResolver;

#[async_trait]
impl CredentialResolver for DenyingResolver {
    async fn resolve(&self, account_id: &str, _region: &str) -> Result<RegionCredentials, CredentialError> {
        Err(CredentialError::Denied(format!("no access to {account_id}")))
    }
}

/// Resolver that fails for one region only
pub struct RegionOutageResolver {
    pub broken_region: &'static str,
}

#[async_trait]
impl CredentialResolver for RegionOutageResolver {
    async fn resolve(&self, account_id: &str, region: &str) -> Result<RegionCredentials, CredentialError> {
        if region == self.broken_region {
            return Err(CredentialError::Unavailable("token service timed out".to_string()));
        }
        StaticCredentialResolver::new(TOKEN).resolve(account_id, region).await
    }
}

/// Resolver that records every region it is asked for
#[derive(Default)]
pub struct CountingResolver {
    calls: Mutex<Vec<String>>,
}

impl CountingResolver {
    pub fn calls_for(&self, region: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| *r == region).count()
    }
}

#[async_trait]
impl CredentialResolver for CountingResolver {
    async fn resolve(&self, account_id: &str, region: &str) -> Result<RegionCredentials, CredentialError> {
        self.calls.lock().unwrap().push(region.to_string());
        StaticCredentialResolver::new(TOKEN).resolve(account_id, region).await
    }
}

/// Number of requests the server has seen whose path contains `fragment`
pub async fn requests_to(server: &MockServer, fragment: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().contains(fragment))
        .count()
}
