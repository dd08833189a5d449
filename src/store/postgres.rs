//! Postgres store
//!
//! Every chunk runs in its own transaction on a connection taken from the
//! shared pool. The transaction guard returns the connection to the pool on
//! every path, rolling back if the chunk fails before commit.

use super::{ResourceStore, Scope};
use crate::metrics::MetricDatapoint;
use crate::resource::DiscoveredResource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use uuid::Uuid;

/// Connection pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct PgResourceStore {
    pool: PgPool,
}

impl PgResourceStore {
    /// Connect a pool to `database_url`
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(database_url)
            .await
            // Security: the URL may carry a password, keep it out of the error
            .context("Failed to connect to Postgres")?;

        Ok(Self { pool })
    }
}

/// Multi-row upsert for one resource chunk; a rerun refreshes the mutable
/// columns and keeps `id` and `created_at`
fn resource_upsert<'a>(
    scope: &'a Scope,
    resources: &'a [DiscoveredResource],
    now: DateTime<Utc>,
) -> QueryBuilder<'a, Postgres> {
    let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO discovered_resources \
         (id, organization_id, account_id, resource_id, resource_type, \
          resource_name, region, status, metadata, created_at, updated_at) ",
    );
    query.push_values(resources, |mut row, resource| {
        row.push_bind(Uuid::new_v4())
            .push_bind(scope.organization_id.as_str())
            .push_bind(scope.account_id.as_str())
            .push_bind(resource.resource_id.as_str())
            .push_bind(resource.resource_type.as_str())
            .push_bind(resource.resource_name.as_str())
            .push_bind(resource.region.as_str())
            .push_bind(resource.status.as_str())
            .push_bind(Json(&resource.metadata))
            .push_bind(now)
            .push_bind(now);
    });
    query.push(
        " ON CONFLICT (organization_id, account_id, resource_id, resource_type) DO UPDATE SET \
         resource_name = EXCLUDED.resource_name, \
         region = EXCLUDED.region, \
         status = EXCLUDED.status, \
         metadata = EXCLUDED.metadata, \
         updated_at = EXCLUDED.updated_at",
    );
    query
}

/// Multi-row insert for one datapoint chunk; existing points are left alone
fn datapoint_insert<'a>(scope: &'a Scope, datapoints: &'a [MetricDatapoint]) -> QueryBuilder<'a, Postgres> {
    let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO resource_metrics \
         (id, organization_id, account_id, resource_id, resource_name, resource_type, \
          metric_name, value, unit, timestamp) ",
    );
    query.push_values(datapoints, |mut row, point| {
        row.push_bind(Uuid::new_v4())
            .push_bind(scope.organization_id.as_str())
            .push_bind(scope.account_id.as_str())
            .push_bind(point.resource_id.as_str())
            .push_bind(point.resource_name.as_str())
            .push_bind(point.resource_type.as_str())
            .push_bind(point.metric_name.as_str())
            .push_bind(point.value)
            .push_bind(point.unit.as_str())
            .push_bind(point.timestamp);
    });
    query.push(" ON CONFLICT (organization_id, account_id, resource_id, metric_name, timestamp) DO NOTHING");
    query
}

#[async_trait]
impl ResourceStore for PgResourceStore {
    async fn upsert_resources(&self, scope: &Scope, resources: &[DiscoveredResource]) -> Result<u64> {
        if resources.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let result = resource_upsert(scope, resources, Utc::now())
            .build()
            .execute(&mut *tx)
            .await
            .context("Failed to upsert resources")?;
        tx.commit().await.context("Failed to commit resource chunk")?;

        Ok(result.rows_affected())
    }

    async fn insert_datapoints(&self, scope: &Scope, datapoints: &[MetricDatapoint]) -> Result<u64> {
        if datapoints.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let result = datapoint_insert(scope, datapoints)
            .build()
            .execute(&mut *tx)
            .await
            .context("Failed to insert datapoints")?;
        tx.commit().await.context("Failed to commit datapoint chunk")?;

        Ok(result.rows_affected())
    }
}
