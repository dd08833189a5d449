//! cloudsweep - cloud resource & metrics discovery pipeline
//!
//! Enumerates infrastructure resources across GCP regions and resource types,
//! pulls operational time series for each discovered resource from Cloud
//! Monitoring, and persists both idempotently in bounded batches.
//!
//! # Module Structure
//!
//! - [`gcp`] - credentials, HTTP plumbing and the per-region API client
//! - [`resource`] - resource types, per-type discoverers and the orchestrator
//! - [`metrics`] - metric registry and the metric collector
//! - [`store`] - batched, idempotent persistence
//! - [`breaker`] - circuit breaker guarding a whole pipeline invocation
//! - [`fanout`] - the bounded "run all, settle all" concurrency primitive
//! - [`pipeline`] - the entrypoint tying everything together
//!
//! # Example
//!
//! ```ignore
//! use cloudsweep::pipeline::{DiscoveryRequest, Pipeline};
//!
//! async fn example(pipeline: &Pipeline) -> anyhow::Result<()> {
//!     let request = DiscoveryRequest::new("my-project");
//!     let response = pipeline.run("org-1", &request, &Default::default()).await?;
//!     println!("{} resources", response.resources_found);
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod config;
pub mod error;
pub mod fanout;
pub mod gcp;
pub mod metrics;
pub mod pipeline;
pub mod resource;
pub mod store;

/// Version injected at compile time via CLOUDSWEEP_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDSWEEP_VERSION") {
    Some(v) => v,
    None => "dev",
};
