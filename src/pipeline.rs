//! Discovery pipeline entrypoint
//!
//! One invocation: resolve regions, check credentials, discover resources,
//! collect their metrics, persist both and summarize. The whole invocation
//! runs under the circuit `discovery:<account_id>`.

use crate::breaker::{CircuitBreakerConfig, CircuitRegistry};
use crate::error::{DiscoveryFailure, PipelineError};
use crate::gcp::accounts::AccountDirectory;
use crate::gcp::auth::CredentialResolver;
use crate::gcp::client::Endpoints;
use crate::gcp::http::GcpHttpClient;
use crate::metrics::{MetricCollector, MetricDatapoint, Period};
use crate::resource::{DiscoveredResource, DiscoveryOrchestrator};
use crate::store::{BatchPersister, PersistReport, ResourceStore, Scope};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Region used when neither the request nor the directory names any
pub const FALLBACK_REGION: &str = "us-central1";

/// Input of one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<String>>,
    #[serde(default)]
    pub period: Period,
}

impl DiscoveryRequest {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            regions: None,
            period: Period::default(),
        }
    }

    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = Some(regions);
        self
    }

    pub fn with_period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }
}

/// Summary returned by one invocation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub success: bool,
    pub resources_found: usize,
    pub metrics_collected: usize,
    pub regions_scanned: Vec<String>,
    pub resources: Vec<DiscoveredResource>,
    pub metrics: Vec<MetricDatapoint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permission_errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<DiscoveryFailure>,
    pub persistence: PersistReport,
    /// Wall-clock duration in milliseconds
    pub duration: u64,
}

/// Tunables for a [`Pipeline`]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub default_region: String,
    /// Regions scanned at once; 0 scans every requested region concurrently
    pub region_width: usize,
    pub metric_batch_concurrency: usize,
    pub breaker: CircuitBreakerConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_region: FALLBACK_REGION.to_string(),
            region_width: 0,
            metric_batch_concurrency: crate::metrics::collector::DEFAULT_BATCH_CONCURRENCY,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

pub struct Pipeline {
    resolver: Arc<dyn CredentialResolver>,
    directory: Arc<dyn AccountDirectory>,
    orchestrator: DiscoveryOrchestrator,
    collector: MetricCollector,
    persister: BatchPersister,
    circuits: CircuitRegistry,
    default_region: String,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<dyn CredentialResolver>,
        directory: Arc<dyn AccountDirectory>,
        store: Arc<dyn ResourceStore>,
        http: GcpHttpClient,
        endpoints: Arc<Endpoints>,
        settings: PipelineSettings,
    ) -> Self {
        let orchestrator =
            DiscoveryOrchestrator::new(resolver.clone(), http, endpoints, settings.region_width);

        Self {
            resolver,
            directory,
            orchestrator,
            collector: MetricCollector::new(settings.metric_batch_concurrency),
            persister: BatchPersister::new(store),
            circuits: CircuitRegistry::new(settings.breaker),
            default_region: settings.default_region,
        }
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    /// Run one invocation for `request` under its account circuit
    pub async fn run(
        &self,
        organization_id: &str,
        request: &DiscoveryRequest,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryResponse, PipelineError> {
        if request.account_id.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("accountId is required".to_string()));
        }

        let circuit = self
            .circuits
            .get(&format!("discovery:{}", request.account_id));

        circuit
            .call(|| self.execute(organization_id, request, cancel))
            .await
    }

    async fn execute(
        &self,
        organization_id: &str,
        request: &DiscoveryRequest,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryResponse, PipelineError> {
        let started = Instant::now();
        let account_id = request.account_id.as_str();
        let regions = self.resolve_regions(organization_id, request).await;

        tracing::info!(
            organization_id,
            account_id,
            regions = ?regions,
            period = ?request.period,
            "starting discovery"
        );

        // An account the resolver refuses outright fails before any discovery
        let preflight = match regions.first() {
            Some(first) => {
                let credentials = self
                    .resolver
                    .resolve(account_id, first)
                    .await
                    .map_err(|source| {
                        tracing::error!(account_id, "credential preflight failed: {}", source);
                        PipelineError::Credentials {
                            account_id: account_id.to_string(),
                            source,
                        }
                    })?;
                Some((first.as_str(), credentials))
            }
            None => None,
        };

        let discovery = self
            .orchestrator
            .discover(
                account_id,
                &regions,
                preflight.as_ref().map(|(region, credentials)| (*region, credentials)),
                cancel,
            )
            .await;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if discovery.upstream_unavailable() {
            return Err(PipelineError::UpstreamUnavailable {
                failures: discovery.failures,
            });
        }

        let collection = self
            .collector
            .collect(
                &discovery.resources,
                &discovery.clients,
                request.period.lookback(),
                cancel,
            )
            .await;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let persistence = self
            .persister
            .persist(
                &Scope::new(organization_id, account_id),
                &discovery.resources,
                &collection.datapoints,
            )
            .await;

        let permission_errors = discovery.permission_errors();
        let response = DiscoveryResponse {
            success: true,
            resources_found: discovery.resources.len(),
            metrics_collected: collection.datapoints.len(),
            regions_scanned: discovery.regions_scanned,
            resources: discovery.resources,
            metrics: collection.datapoints,
            permission_errors,
            failures: discovery.failures,
            persistence,
            duration: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            account_id,
            resources = response.resources_found,
            metrics = response.metrics_collected,
            errors = response.permission_errors.len(),
            duration_ms = response.duration,
            "discovery finished"
        );

        Ok(response)
    }

    /// Request regions, else the account's configured regions, else the default
    async fn resolve_regions(&self, organization_id: &str, request: &DiscoveryRequest) -> Vec<String> {
        let requested = request.regions.clone().unwrap_or_default();
        let candidates = if !requested.is_empty() {
            requested
        } else {
            match self
                .directory
                .configured_regions(organization_id, &request.account_id)
                .await
            {
                Ok(regions) => regions,
                Err(err) => {
                    tracing::warn!(
                        account_id = %request.account_id,
                        "account region lookup failed, using default region: {:#}",
                        err
                    );
                    Vec::new()
                }
            }
        };

        let regions = dedupe_regions(candidates);
        if regions.is_empty() {
            vec![self.default_region.clone()]
        } else {
            regions
        }
    }
}

/// Trim, drop blanks and duplicates, keep first-seen order
fn dedupe_regions(regions: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    regions
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty() && seen.insert(r.clone()))
        .collect()
}
