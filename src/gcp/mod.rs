//! GCP API interaction module
//!
//! Credentials, HTTP plumbing and the per-region client used by the
//! discoverers and the metric collector.
//!
//! # Module Structure
//!
//! - [`auth`] - credential resolution (ADC or a fixed token)
//! - [`accounts`] - per-account region lookup
//! - [`client`] - region-scoped client with service URL builders
//! - [`http`] - HTTP utilities for REST API calls
//!
//! # Example
//!
//! ```ignore
//! use cloudsweep::gcp::client::{Endpoints, GcpClient};
//!
//! async fn example(client: &GcpClient) -> anyhow::Result<()> {
//!     let rules = client.get(&client.compute_regional_url("forwardingRules")).await?;
//!     Ok(())
//! }
//! ```

pub mod accounts;
pub mod auth;
pub mod client;
pub mod http;
