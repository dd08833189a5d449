//! Metrics Registry - Load metric definitions from JSON
//!
//! Which metrics are collected for each resource type, and for each metric
//! its unit and aggregation statistic. The table is embedded at compile
//! time and parsed once.

use crate::resource::{DiscoveredResource, ResourceType};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Embedded metric definitions (compiled into the binary)
const METRICS_FILE: &str = include_str!("metrics.json");

/// How samples inside one aggregation bucket are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    /// Counters: invocations, errors, bytes
    Sum,
    /// Utilization and ratio gauges
    Average,
    /// Concurrency and peak gauges
    Maximum,
}

impl Statistic {
    /// Cloud Monitoring per-series aligner
    pub fn aligner(&self) -> &'static str {
        match self {
            Statistic::Sum => "ALIGN_SUM",
            Statistic::Average => "ALIGN_MEAN",
            Statistic::Maximum => "ALIGN_MAX",
        }
    }

    /// Combine samples of the same bucket; `None` for an empty slice
    pub fn reduce(&self, samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        Some(match self {
            Statistic::Sum => samples.iter().sum(),
            Statistic::Average => samples.iter().sum::<f64>() / samples.len() as f64,
            Statistic::Maximum => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Which resource field fills the dimension label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionSource {
    #[default]
    Id,
    Name,
}

/// Metrics collected for one resource type
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceMetrics {
    /// Metric type prefix, e.g. `compute.googleapis.com`
    pub namespace: String,
    /// Monitored-resource label identifying the resource
    pub dimension_key: String,
    #[serde(default)]
    pub dimension_source: DimensionSource,
    /// Monitored-resource label carrying the region, for types whose
    /// dimension value is only unique within one region
    #[serde(default)]
    pub region_key: Option<String>,
    pub metrics: Vec<String>,
}

impl ResourceMetrics {
    /// Fully qualified metric type
    pub fn metric_type(&self, metric_name: &str) -> String {
        format!("{}/{}", self.namespace, metric_name)
    }

    /// Cloud Monitoring filter selecting one metric of one resource
    pub fn filter(&self, metric_name: &str, resource: &DiscoveredResource) -> String {
        let value = match self.dimension_source {
            DimensionSource::Id => &resource.resource_id,
            DimensionSource::Name => &resource.resource_name,
        };
        let mut filter = format!(
            "metric.type = \"{}\" AND resource.labels.{} = \"{}\"",
            self.metric_type(metric_name),
            self.dimension_key,
            value
        );
        if let Some(region_key) = &self.region_key {
            filter.push_str(&format!(" AND resource.labels.{} = \"{}\"", region_key, resource.region));
        }
        filter
    }
}

/// Per-metric unit and statistic
#[derive(Debug, Clone, Deserialize)]
pub struct MetricDef {
    #[serde(default)]
    pub unit: Option<String>,
    pub statistic: Statistic,
}

/// Root structure of metrics.json
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub default_unit: String,
    #[serde(default)]
    pub resource_types: HashMap<ResourceType, ResourceMetrics>,
    #[serde(default)]
    pub metrics: HashMap<String, MetricDef>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<MetricsConfig> = OnceLock::new();

/// Get the metrics registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static MetricsConfig {
    REGISTRY.get_or_init(|| {
        serde_json::from_str(METRICS_FILE)
            .unwrap_or_else(|e| panic!("Failed to parse embedded metrics JSON: {}", e))
    })
}

/// Metric configuration for a resource type, if it has any
pub fn metrics_for(resource_type: ResourceType) -> Option<&'static ResourceMetrics> {
    get_registry().resource_types.get(&resource_type)
}

/// Unit for a metric name, defaulting to the generic "None" unit
pub fn unit_for(metric_name: &str) -> &'static str {
    let registry = get_registry();
    registry
        .metrics
        .get(metric_name)
        .and_then(|m| m.unit.as_deref())
        .unwrap_or(registry.default_unit.as_str())
}

/// Statistic for a metric name
pub fn statistic_for(metric_name: &str) -> Option<Statistic> {
    get_registry().metrics.get(metric_name).map(|m| m.statistic)
}
