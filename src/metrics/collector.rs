//! Metric Collector
//!
//! Pulls time series for discovered resources from Cloud Monitoring.
//! Resources are grouped by region (one client per region) and processed in
//! fixed-size batches; a failed fetch for one (resource, metric) pair is
//! logged and yields no datapoints.

use super::registry::{metrics_for, statistic_for, unit_for, ResourceMetrics};
use super::{granularity, MetricDatapoint};
use crate::fanout::settle_all;
use crate::gcp::client::GcpClient;
use crate::resource::fetcher::{drain_pages, items_at};
use crate::resource::DiscoveredResource;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Resources per metric batch
pub const METRIC_BATCH_SIZE: usize = 10;

/// Default number of batches in flight at once
pub const DEFAULT_BATCH_CONCURRENCY: usize = 4;

/// A batch of resources sharing one region client
#[derive(Debug)]
pub struct Batch<'a> {
    pub region: &'a str,
    pub resources: Vec<&'a DiscoveredResource>,
}

/// Result of one collection pass
#[derive(Debug, Default)]
pub struct CollectionReport {
    pub datapoints: Vec<MetricDatapoint>,
    /// Size of every batch that was planned
    pub batch_sizes: Vec<usize>,
    /// (resource, metric) fetches that failed
    pub failed_fetches: usize,
}

/// Group resources that have metric configuration by region, then split
/// each region into batches of [`METRIC_BATCH_SIZE`].
pub fn plan_batches(resources: &[DiscoveredResource]) -> Vec<Batch<'_>> {
    let mut by_region: BTreeMap<&str, Vec<&DiscoveredResource>> = BTreeMap::new();
    for resource in resources {
        if metrics_for(resource.resource_type).is_some() {
            by_region.entry(resource.region.as_str()).or_default().push(resource);
        }
    }

    by_region
        .into_iter()
        .flat_map(|(region, members)| {
            members
                .chunks(METRIC_BATCH_SIZE)
                .map(|chunk| Batch {
                    region,
                    resources: chunk.to_vec(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

pub struct MetricCollector {
    batch_concurrency: usize,
}

impl Default for MetricCollector {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_CONCURRENCY)
    }
}

impl MetricCollector {
    pub fn new(batch_concurrency: usize) -> Self {
        Self {
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    /// Collect metrics for `resources` over `[now - window, now]`
    pub async fn collect(
        &self,
        resources: &[DiscoveredResource],
        clients: &HashMap<String, GcpClient>,
        window: Duration,
        cancel: &CancellationToken,
    ) -> CollectionReport {
        let batches = plan_batches(resources);
        let mut report = CollectionReport {
            batch_sizes: batches.iter().map(|b| b.resources.len()).collect(),
            ..Default::default()
        };
        let end = Utc::now();

        tracing::info!(
            resources = resources.len(),
            batches = batches.len(),
            window_secs = window.as_secs(),
            "collecting metrics"
        );

        let settled = settle_all(batches, self.batch_concurrency, cancel, |batch| {
            self.collect_batch(batch, clients, window, end, cancel)
        })
        .await;

        for (datapoints, failed) in settled.succeeded {
            report.datapoints.extend(datapoints);
            report.failed_fetches += failed;
        }
        for (batch_size, err) in settled.failed {
            tracing::warn!("skipping metric batch of {}: {:#}", batch_size, err);
        }

        tracing::info!(
            datapoints = report.datapoints.len(),
            failed_fetches = report.failed_fetches,
            "metric collection complete"
        );
        report
    }

    async fn collect_batch(
        &self,
        batch: Batch<'_>,
        clients: &HashMap<String, GcpClient>,
        window: Duration,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(Vec<MetricDatapoint>, usize), (usize, anyhow::Error)> {
        let Some(client) = clients.get(batch.region) else {
            return Err((
                batch.resources.len(),
                anyhow::anyhow!("no client for region {}", batch.region),
            ));
        };

        tracing::debug!(region = batch.region, size = batch.resources.len(), "metric batch");

        let settled = settle_all(batch.resources.iter().copied(), METRIC_BATCH_SIZE, cancel, |resource| {
            collect_resource(client, resource, window, end, cancel)
        })
        .await;

        let mut datapoints = Vec::new();
        let mut failed = 0;
        for (points, failures) in settled.succeeded {
            datapoints.extend(points);
            failed += failures;
        }
        Ok((datapoints, failed))
    }
}

/// Fetch every configured metric of one resource; never fails as a whole
async fn collect_resource(
    client: &GcpClient,
    resource: &DiscoveredResource,
    window: Duration,
    end: DateTime<Utc>,
    cancel: &CancellationToken,
) -> std::result::Result<(Vec<MetricDatapoint>, usize), std::convert::Infallible> {
    let Some(config) = metrics_for(resource.resource_type) else {
        return Ok((Vec::new(), 0));
    };

    let settled = settle_all(config.metrics.iter(), config.metrics.len(), cancel, |metric_name| async move {
        fetch_metric(client, resource, config, metric_name, window, end)
            .await
            .map_err(|err| (metric_name, err))
    })
    .await;

    for (metric_name, err) in &settled.failed {
        tracing::warn!(
            resource_id = %resource.resource_id,
            resource_type = %resource.resource_type,
            metric = %metric_name,
            "metric fetch failed: {:#}",
            err
        );
    }

    let failed = settled.failed.len();
    Ok((settled.succeeded.into_iter().flatten().collect(), failed))
}

/// Query one metric for one resource and turn the series into datapoints
async fn fetch_metric(
    client: &GcpClient,
    resource: &DiscoveredResource,
    config: &ResourceMetrics,
    metric_name: &str,
    window: Duration,
    end: DateTime<Utc>,
) -> Result<Vec<MetricDatapoint>> {
    let statistic = statistic_for(metric_name)
        .with_context(|| format!("No statistic configured for {}", metric_name))?;

    let start = end - chrono::Duration::from_std(window).context("Lookback window out of range")?;
    let filter = config.filter(metric_name, resource);
    let start_time = start.to_rfc3339_opts(SecondsFormat::Secs, true);
    let end_time = end.to_rfc3339_opts(SecondsFormat::Secs, true);
    let alignment = format!("{}s", granularity(window).as_secs());

    let params = [
        ("filter", filter.as_str()),
        ("interval.startTime", start_time.as_str()),
        ("interval.endTime", end_time.as_str()),
        ("aggregation.alignmentPeriod", alignment.as_str()),
        ("aggregation.perSeriesAligner", statistic.aligner()),
    ];

    let series = drain_pages(client, &client.monitoring_url("timeSeries"), &params, |page| {
        items_at(page, "timeSeries")
    })
    .await?;

    // Several series can come back for one resource (split by metric labels);
    // points sharing a bucket are merged with the metric's own statistic.
    let mut buckets: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
    for s in &series {
        for point in items_at(s, "points") {
            if let Some((timestamp, value)) = parse_point(&point) {
                buckets.entry(timestamp).or_default().push(value);
            }
        }
    }

    let unit = unit_for(metric_name);
    Ok(buckets
        .into_iter()
        .filter_map(|(timestamp, samples)| {
            Some(MetricDatapoint {
                resource_id: resource.resource_id.clone(),
                resource_name: resource.resource_name.clone(),
                resource_type: resource.resource_type,
                metric_name: metric_name.to_string(),
                value: statistic.reduce(&samples)?,
                unit: unit.to_string(),
                timestamp,
            })
        })
        .collect())
}

/// Parse a Cloud Monitoring point into (bucket end time, value)
fn parse_point(point: &Value) -> Option<(DateTime<Utc>, f64)> {
    let end_time = point.get("interval")?.get("endTime")?.as_str()?;
    let timestamp = DateTime::parse_from_rfc3339(end_time)
        .ok()?
        .with_timezone(&Utc);

    let value = point.get("value")?;
    let number = if let Some(v) = value.get("doubleValue") {
        v.as_f64()?
    } else if let Some(v) = value.get("int64Value") {
        // int64 values are JSON strings
        v.as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| v.as_f64())?
    } else if let Some(v) = value.get("boolValue") {
        if v.as_bool()? {
            1.0
        } else {
            0.0
        }
    } else if let Some(v) = value.get("distributionValue") {
        v.get("mean")?.as_f64()?
    } else {
        return None;
    };

    Some((timestamp, number))
}
