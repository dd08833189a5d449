//! In-memory store
//!
//! Same keying and conflict rules as the Postgres store, kept in process.

use super::{ResourceStore, Scope};
use crate::metrics::MetricDatapoint;
use crate::resource::{DiscoveredResource, ResourceType};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

type ResourceKey = (Scope, String, ResourceType);
type DatapointKey = (Scope, String, String, DateTime<Utc>);

/// A resource row as stored
#[derive(Debug, Clone)]
pub struct StoredResource {
    pub id: Uuid,
    pub resource: DiscoveredResource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStore {
    resources: RwLock<HashMap<ResourceKey, StoredResource>>,
    datapoints: RwLock<HashMap<DatapointKey, MetricDatapoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resource_count(&self) -> usize {
        self.resources.read().await.len()
    }

    pub async fn datapoint_count(&self) -> usize {
        self.datapoints.read().await.len()
    }

    /// Look up one stored resource row
    pub async fn resource(
        &self,
        scope: &Scope,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> Option<StoredResource> {
        self.resources
            .read()
            .await
            .get(&(scope.clone(), resource_id.to_string(), resource_type))
            .cloned()
    }

    /// Every stored datapoint for one resource metric, oldest first
    pub async fn series(&self, scope: &Scope, resource_id: &str, metric_name: &str) -> Vec<MetricDatapoint> {
        let mut points: Vec<MetricDatapoint> = self
            .datapoints
            .read()
            .await
            .iter()
            .filter(|((s, id, metric, _), _)| s == scope && id == resource_id && metric == metric_name)
            .map(|(_, point)| point.clone())
            .collect();
        points.sort_by_key(|p| p.timestamp);
        points
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn upsert_resources(&self, scope: &Scope, resources: &[DiscoveredResource]) -> Result<u64> {
        let now = Utc::now();
        let mut rows = self.resources.write().await;

        for resource in resources {
            let key = (scope.clone(), resource.resource_id.clone(), resource.resource_type);
            rows.entry(key)
                .and_modify(|row| {
                    row.resource = resource.clone();
                    row.updated_at = now;
                })
                .or_insert_with(|| StoredResource {
                    id: Uuid::new_v4(),
                    resource: resource.clone(),
                    created_at: now,
                    updated_at: now,
                });
        }

        Ok(resources.len() as u64)
    }

    async fn insert_datapoints(&self, scope: &Scope, datapoints: &[MetricDatapoint]) -> Result<u64> {
        let mut rows = self.datapoints.write().await;
        let mut inserted = 0;

        for point in datapoints {
            let key = (
                scope.clone(),
                point.resource_id.clone(),
                point.metric_name.clone(),
                point.timestamp,
            );
            if let std::collections::hash_map::Entry::Vacant(slot) = rows.entry(key) {
                slot.insert(point.clone());
                inserted += 1;
            }
        }

        Ok(inserted)
    }
}
