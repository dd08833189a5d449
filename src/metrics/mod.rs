//! Metric collection
//!
//! - [`registry`] - which metrics each resource type has, their units and statistics
//! - [`collector`] - fetches time series from Cloud Monitoring in bounded batches

pub mod collector;
pub mod registry;

use crate::resource::ResourceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use collector::{CollectionReport, MetricCollector, METRIC_BATCH_SIZE};
pub use registry::Statistic;

/// One timestamped observation of a named metric for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDatapoint {
    pub resource_id: String,
    pub resource_name: String,
    pub resource_type: ResourceType,
    pub metric_name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

/// Lookback period accepted by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum Period {
    #[serde(rename = "3h")]
    #[value(name = "3h")]
    ThreeHours,
    #[default]
    #[serde(rename = "24h")]
    #[value(name = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    #[value(name = "7d")]
    SevenDays,
}

impl Period {
    pub fn lookback(&self) -> Duration {
        match self {
            Period::ThreeHours => Duration::from_secs(3 * 3600),
            Period::OneDay => Duration::from_secs(24 * 3600),
            Period::SevenDays => Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Aggregation bucket size for a lookback window
pub fn granularity(window: Duration) -> Duration {
    const THREE_HOURS: Duration = Duration::from_secs(3 * 3600);
    const ONE_DAY: Duration = Duration::from_secs(24 * 3600);

    if window <= THREE_HOURS {
        Duration::from_secs(5 * 60)
    } else if window <= ONE_DAY {
        Duration::from_secs(15 * 60)
    } else {
        Duration::from_secs(3600)
    }
}
