//! Discovery Orchestrator
//!
//! Runs every resource-type discoverer in every requested region. Regions
//! run concurrently; within a region credentials are resolved once and all
//! discoverers run concurrently. A failing (region, type) pair is recorded
//! and never aborts the others.

use super::{DiscoveredResource, ResourceType};
use crate::error::{DiscoveryFailure, FailureKind};
use crate::fanout::settle_all;
use crate::gcp::auth::{CredentialResolver, RegionCredentials};
use crate::gcp::client::{Endpoints, GcpClient};
use crate::gcp::http::{format_gcp_error, GcpHttpClient};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything one discovery pass produced
#[derive(Default)]
pub struct DiscoveryOutcome {
    pub resources: Vec<DiscoveredResource>,
    pub failures: Vec<DiscoveryFailure>,
    /// Regions whose credentials resolved, in request order
    pub regions_scanned: Vec<String>,
    /// One client per scanned region, reused for metric collection
    pub clients: HashMap<String, GcpClient>,
    /// Number of discoverer calls that returned successfully
    pub calls_succeeded: usize,
}

impl DiscoveryOutcome {
    /// Every attempted call failed, and none of the failures was an access denial
    pub fn upstream_unavailable(&self) -> bool {
        self.calls_succeeded == 0
            && !self.failures.is_empty()
            && self.failures.iter().all(|f| f.kind != FailureKind::AuthDenied)
    }

    /// Failure list in the `"{region}/{resourceType}: {message}"` form
    pub fn permission_errors(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.to_string()).collect()
    }
}

/// Result of scanning one region
struct RegionScan {
    client: GcpClient,
    resources: Vec<DiscoveredResource>,
    failures: Vec<DiscoveryFailure>,
    calls_succeeded: usize,
}

pub struct DiscoveryOrchestrator {
    resolver: Arc<dyn CredentialResolver>,
    http: GcpHttpClient,
    endpoints: Arc<Endpoints>,
    region_width: usize,
}

impl DiscoveryOrchestrator {
    pub fn new(
        resolver: Arc<dyn CredentialResolver>,
        http: GcpHttpClient,
        endpoints: Arc<Endpoints>,
        region_width: usize,
    ) -> Self {
        Self {
            resolver,
            http,
            endpoints,
            region_width,
        }
    }

    /// Discover all resource types in all regions of an account.
    ///
    /// `resolved` carries credentials already obtained for one region, which
    /// is then not resolved again.
    pub async fn discover(
        &self,
        account_id: &str,
        regions: &[String],
        resolved: Option<(&str, &RegionCredentials)>,
        cancel: &CancellationToken,
    ) -> DiscoveryOutcome {
        // Zero width means every requested region at once
        let width = match self.region_width {
            0 => regions.len(),
            n => n,
        };
        let settled = settle_all(regions, width, cancel, |region| {
            self.scan_region(account_id, region, resolved, cancel)
        })
        .await;

        let mut outcome = DiscoveryOutcome {
            failures: settled.failed,
            ..Default::default()
        };

        for scan in settled.succeeded {
            outcome.resources.extend(scan.resources);
            outcome.failures.extend(scan.failures);
            outcome.calls_succeeded += scan.calls_succeeded;
            outcome
                .clients
                .insert(scan.client.region.clone(), scan.client);
        }

        outcome.regions_scanned = regions
            .iter()
            .filter(|r| outcome.clients.contains_key(*r))
            .cloned()
            .collect();

        if settled.cancelled > 0 {
            tracing::info!(
                cancelled = settled.cancelled,
                "discovery cancelled before all regions finished"
            );
        }

        tracing::info!(
            account_id,
            regions = regions.len(),
            resources = outcome.resources.len(),
            failures = outcome.failures.len(),
            "discovery complete"
        );

        outcome
    }

    async fn scan_region(
        &self,
        account_id: &str,
        region: &str,
        resolved: Option<(&str, &RegionCredentials)>,
        cancel: &CancellationToken,
    ) -> Result<RegionScan, DiscoveryFailure> {
        let credentials = match resolved {
            Some((known, credentials)) if known == region => credentials.clone(),
            _ => self.resolver.resolve(account_id, region).await.map_err(|err| {
                tracing::warn!(region, "credential resolution failed: {}", err);
                DiscoveryFailure {
                    region: region.to_string(),
                    resource_type: None,
                    kind: err.kind(),
                    message: err.to_string(),
                }
            })?,
        };

        let client = GcpClient::new(
            self.http.clone(),
            self.endpoints.clone(),
            account_id,
            region,
            credentials,
        );

        let settled = settle_all(
            ResourceType::ALL,
            ResourceType::ALL.len(),
            cancel,
            |resource_type| {
                let client = &client;
                async move {
                    resource_type
                        .discover(client)
                        .await
                        .map_err(|err| (resource_type, err))
                }
            },
        )
        .await;

        let failures = settled
            .failed
            .into_iter()
            .map(|(resource_type, err)| {
                let kind = FailureKind::classify(&err);
                let message = format_gcp_error(&err);
                tracing::warn!(
                    region,
                    resource_type = %resource_type,
                    kind = %kind,
                    "discovery failed: {}",
                    message
                );
                DiscoveryFailure {
                    region: region.to_string(),
                    resource_type: Some(resource_type),
                    kind,
                    message,
                }
            })
            .collect();

        let calls_succeeded = settled.succeeded.len();
        Ok(RegionScan {
            client,
            resources: settled.succeeded.into_iter().flatten().collect(),
            failures,
            calls_succeeded,
        })
    }
}
