//! Resource discovery
//!
//! Each supported resource type is a variant of [`ResourceType`]; its
//! discoverer is selected by a `match` over the variant, so the set of
//! discoverers is fixed at compile time.
//!
//! # Architecture
//!
//! - [`fetcher`] - paginated list calls and JSON extraction helpers
//! - [`discoverers`] - one discovery function per resource type
//! - [`orchestrator`] - fans discoverers out across regions and types
//!
//! # Example
//!
//! ```ignore
//! use cloudsweep::resource::ResourceType;
//!
//! async fn list_functions(client: &GcpClient) -> anyhow::Result<()> {
//!     let found = ResourceType::ServerlessFunction.discover(client).await?;
//!     println!("{} functions", found.len());
//!     Ok(())
//! }
//! ```

pub mod discoverers;
pub mod fetcher;
pub mod orchestrator;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub use orchestrator::{DiscoveryOrchestrator, DiscoveryOutcome};

/// Supported resource types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Compute Engine VM instances
    ComputeInstance,
    /// Cloud SQL instances
    ManagedDatabase,
    /// Cloud Functions (2nd gen)
    ServerlessFunction,
    /// Cloud Run services
    ContainerService,
    /// Memorystore for Redis instances
    Cache,
    /// Regional forwarding rules
    LoadBalancer,
    /// API Gateway gateways
    ApiGateway,
}

impl ResourceType {
    /// Every type, in discovery order
    pub const ALL: [ResourceType; 7] = [
        ResourceType::ComputeInstance,
        ResourceType::ManagedDatabase,
        ResourceType::ServerlessFunction,
        ResourceType::ContainerService,
        ResourceType::Cache,
        ResourceType::LoadBalancer,
        ResourceType::ApiGateway,
    ];

    /// Stable identifier, also the value stored in the `resource_type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::ComputeInstance => "compute_instance",
            ResourceType::ManagedDatabase => "managed_database",
            ResourceType::ServerlessFunction => "serverless_function",
            ResourceType::ContainerService => "container_service",
            ResourceType::Cache => "cache",
            ResourceType::LoadBalancer => "load_balancer",
            ResourceType::ApiGateway => "api_gateway",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live resource found during one discovery run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredResource {
    /// Provider identifier, unique across the account's regions
    pub resource_id: String,
    pub resource_name: String,
    pub resource_type: ResourceType,
    pub region: String,
    /// Provider-defined lifecycle state
    pub status: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DiscoveredResource {
    pub fn new(
        resource_type: ResourceType,
        region: &str,
        resource_id: impl Into<String>,
        resource_name: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            resource_name: resource_name.into(),
            resource_type,
            region: region.to_string(),
            status: status.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry; `None` values are skipped
    pub fn with_meta(mut self, key: &str, value: Option<impl Into<Value>>) -> Self {
        if let Some(value) = value {
            self.metadata.insert(key.to_string(), value.into());
        }
        self
    }

    /// Identity within one account: `(resource_id, resource_type)`
    pub fn key(&self) -> (&str, ResourceType) {
        (&self.resource_id, self.resource_type)
    }
}
