//! Persistence
//!
//! Discovered resources are upserted by `(organization, account, resource id,
//! resource type)`; datapoints are inserted with duplicates skipped by
//! `(organization, account, resource id, metric, timestamp)`. Writes happen
//! in bounded chunks and a failed chunk never blocks the others.
//!
//! - [`postgres`] - Postgres backend over a shared connection pool
//! - [`memory`] - in-process backend for dry runs and tests

pub mod memory;
pub mod postgres;

use crate::metrics::MetricDatapoint;
use crate::resource::DiscoveredResource;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use postgres::PgResourceStore;

/// Resources per upsert transaction
pub const RESOURCE_CHUNK_SIZE: usize = 50;

/// Datapoints per insert batch
pub const DATAPOINT_CHUNK_SIZE: usize = 100;

/// Tenant scope every row is written under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub organization_id: String,
    pub account_id: String,
}

impl Scope {
    pub fn new(organization_id: &str, account_id: &str) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            account_id: account_id.to_string(),
        }
    }
}

/// Durable storage for discovery output
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Insert or update one chunk of resources; returns rows affected
    async fn upsert_resources(&self, scope: &Scope, resources: &[DiscoveredResource]) -> Result<u64>;

    /// Insert one chunk of datapoints, skipping existing keys; returns rows inserted
    async fn insert_datapoints(&self, scope: &Scope, datapoints: &[MetricDatapoint]) -> Result<u64>;
}

/// Outcome of one persist call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistReport {
    pub resources_written: u64,
    pub datapoints_written: u64,
    pub failed_resource_chunks: usize,
    pub failed_datapoint_chunks: usize,
}

impl PersistReport {
    pub fn is_clean(&self) -> bool {
        self.failed_resource_chunks == 0 && self.failed_datapoint_chunks == 0
    }
}

/// Chunked writer in front of a [`ResourceStore`]
#[derive(Clone)]
pub struct BatchPersister {
    store: Arc<dyn ResourceStore>,
}

impl BatchPersister {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Write resources then datapoints, chunk by chunk
    pub async fn persist(
        &self,
        scope: &Scope,
        resources: &[DiscoveredResource],
        datapoints: &[MetricDatapoint],
    ) -> PersistReport {
        let mut report = PersistReport::default();

        // Postgres rejects an upsert that touches the same key twice in one statement
        let resources = dedupe_resources(resources);

        for (index, chunk) in resources.chunks(RESOURCE_CHUNK_SIZE).enumerate() {
            match self.store.upsert_resources(scope, chunk).await {
                Ok(rows) => report.resources_written += rows,
                Err(err) => {
                    report.failed_resource_chunks += 1;
                    tracing::error!(
                        chunk = index,
                        size = chunk.len(),
                        account_id = %scope.account_id,
                        "resource chunk failed: {:#}",
                        err
                    );
                }
            }
        }

        for (index, chunk) in datapoints.chunks(DATAPOINT_CHUNK_SIZE).enumerate() {
            match self.store.insert_datapoints(scope, chunk).await {
                Ok(rows) => report.datapoints_written += rows,
                Err(err) => {
                    report.failed_datapoint_chunks += 1;
                    tracing::error!(
                        chunk = index,
                        size = chunk.len(),
                        account_id = %scope.account_id,
                        "datapoint chunk failed: {:#}",
                        err
                    );
                }
            }
        }

        tracing::info!(
            resources = report.resources_written,
            datapoints = report.datapoints_written,
            failed_chunks = report.failed_resource_chunks + report.failed_datapoint_chunks,
            "persisted"
        );
        report
    }
}

/// Keep the last occurrence of each `(resource_id, resource_type)`
fn dedupe_resources(resources: &[DiscoveredResource]) -> Vec<DiscoveredResource> {
    let mut index: HashMap<(&str, crate::resource::ResourceType), usize> = HashMap::new();
    let mut unique: Vec<DiscoveredResource> = Vec::with_capacity(resources.len());

    for resource in resources {
        match index.get(&resource.key()) {
            Some(&pos) => unique[pos] = resource.clone(),
            None => {
                index.insert(resource.key(), unique.len());
                unique.push(resource.clone());
            }
        }
    }
    unique
}
