//! Discoverers
//!
//! Maps each resource type to the GCP list call that enumerates it in one
//! region, and converts the raw items into [`DiscoveredResource`]s.

use super::fetcher::{drain_pages, extract_short_name, flatten_aggregated_response, items_at, json_str};
use super::{DiscoveredResource, ResourceType};
use crate::gcp::client::GcpClient;
use anyhow::{Context, Result};
use serde_json::Value;

impl ResourceType {
    /// Enumerate every live resource of this type in the client's region.
    ///
    /// Provider pagination is fully drained before returning.
    pub async fn discover(self, client: &GcpClient) -> Result<Vec<DiscoveredResource>> {
        tracing::debug!(region = %client.region, resource_type = %self, "discover");

        let found = match self {
            ResourceType::ComputeInstance => discover_compute_instances(client).await,
            ResourceType::ManagedDatabase => discover_sql_instances(client).await,
            ResourceType::ServerlessFunction => discover_functions(client).await,
            ResourceType::ContainerService => discover_run_services(client).await,
            ResourceType::Cache => discover_redis_instances(client).await,
            ResourceType::LoadBalancer => discover_forwarding_rules(client).await,
            ResourceType::ApiGateway => discover_gateways(client).await,
        }
        .with_context(|| format!("Failed to list {} in {}", self, client.region))?;

        tracing::debug!(
            region = %client.region,
            resource_type = %self,
            count = found.len(),
            "discovered"
        );
        Ok(found)
    }
}

// =============================================================================
// Compute Engine
// =============================================================================

async fn discover_compute_instances(client: &GcpClient) -> Result<Vec<DiscoveredResource>> {
    let url = client.compute_aggregated_url("instances");
    let zone_prefix = format!("zones/{}-", client.region);

    let items = drain_pages(client, &url, &[("returnPartialSuccess", "true")], |page| {
        flatten_aggregated_response(page, &zone_prefix)
    })
    .await?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let id = json_str(item, "id")?;
            let name = json_str(item, "name").unwrap_or_else(|| id.clone());
            let status = json_str(item, "status").unwrap_or_else(|| "UNKNOWN".to_string());
            Some(
                DiscoveredResource::new(ResourceType::ComputeInstance, &client.region, id, name, status)
                    .with_meta("zone", short(item, "zone"))
                    .with_meta("machineType", short(item, "machineType"))
                    .with_meta("cpuPlatform", json_str(item, "cpuPlatform"))
                    .with_meta("creationTimestamp", json_str(item, "creationTimestamp"))
                    .with_meta("labels", item.get("labels").cloned()),
            )
        })
        .collect())
}

async fn discover_forwarding_rules(client: &GcpClient) -> Result<Vec<DiscoveredResource>> {
    let url = client.compute_regional_url("forwardingRules");
    let items = drain_pages(client, &url, &[], |page| items_at(page, "items")).await?;

    Ok(items
        .iter()
        .filter_map(|item| {
            // Rule names repeat across regions; the resource path does not
            let name = json_str(item, "name")?;
            let path = format!(
                "projects/{}/regions/{}/forwardingRules/{}",
                client.project_id, client.region, name
            );
            Some(
                DiscoveredResource::new(ResourceType::LoadBalancer, &client.region, path, name, "ACTIVE")
                    .with_meta("id", json_str(item, "id"))
                    .with_meta("IPAddress", json_str(item, "IPAddress"))
                    .with_meta("IPProtocol", json_str(item, "IPProtocol"))
                    .with_meta("loadBalancingScheme", json_str(item, "loadBalancingScheme"))
                    .with_meta("target", short(item, "target"))
                    .with_meta("backendService", short(item, "backendService")),
            )
        })
        .collect())
}

// =============================================================================
// Cloud SQL
// =============================================================================

async fn discover_sql_instances(client: &GcpClient) -> Result<Vec<DiscoveredResource>> {
    let url = client.sqladmin_url("instances");
    let filter = format!("region:{}", client.region);
    let items = drain_pages(client, &url, &[("filter", filter.as_str())], |page| items_at(page, "items")).await?;

    Ok(items
        .iter()
        // The filter is advisory on some API versions
        .filter(|item| json_str(item, "region").as_deref() == Some(client.region.as_str()))
        .filter_map(|item| {
            let name = json_str(item, "name")?;
            let database_id = format!("{}:{}", client.project_id, name);
            let state = json_str(item, "state").unwrap_or_else(|| "UNKNOWN".to_string());
            Some(
                DiscoveredResource::new(ResourceType::ManagedDatabase, &client.region, database_id, name, state)
                    .with_meta("databaseVersion", json_str(item, "databaseVersion"))
                    .with_meta("tier", json_str(item, "settings.tier"))
                    .with_meta("availabilityType", json_str(item, "settings.availabilityType"))
                    .with_meta("gceZone", json_str(item, "gceZone")),
            )
        })
        .collect())
}

// =============================================================================
// Cloud Functions / Cloud Run
// =============================================================================

async fn discover_functions(client: &GcpClient) -> Result<Vec<DiscoveredResource>> {
    let url = client.cloudfunctions_url("functions");
    let items = drain_pages(client, &url, &[], |page| items_at(page, "functions")).await?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let full_name = json_str(item, "name")?;
            let name = extract_short_name(&full_name);
            let state = json_str(item, "state").unwrap_or_else(|| "UNKNOWN".to_string());
            Some(
                DiscoveredResource::new(ResourceType::ServerlessFunction, &client.region, full_name, name, state)
                    .with_meta("runtime", json_str(item, "buildConfig.runtime"))
                    .with_meta("entryPoint", json_str(item, "buildConfig.entryPoint"))
                    .with_meta("environment", json_str(item, "environment"))
                    .with_meta("availableMemory", json_str(item, "serviceConfig.availableMemory"))
                    .with_meta("url", json_str(item, "url")),
            )
        })
        .collect())
}

async fn discover_run_services(client: &GcpClient) -> Result<Vec<DiscoveredResource>> {
    let url = client.run_url("services");
    let items = drain_pages(client, &url, &[], |page| items_at(page, "services")).await?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let full_name = json_str(item, "name")?;
            let name = extract_short_name(&full_name);
            let state = json_str(item, "terminalCondition.state")
                .unwrap_or_else(|| "UNKNOWN".to_string());
            Some(
                DiscoveredResource::new(ResourceType::ContainerService, &client.region, full_name, name, state)
                    .with_meta("uri", json_str(item, "uri"))
                    .with_meta("ingress", json_str(item, "ingress"))
                    .with_meta("latestReadyRevision", short(item, "latestReadyRevision"))
                    .with_meta("image", json_str(item, "template.containers.0.image")),
            )
        })
        .collect())
}

// =============================================================================
// Memorystore / API Gateway
// =============================================================================

async fn discover_redis_instances(client: &GcpClient) -> Result<Vec<DiscoveredResource>> {
    let url = client.redis_url("instances");
    let items = drain_pages(client, &url, &[], |page| items_at(page, "instances")).await?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let full_name = json_str(item, "name")?;
            let name = extract_short_name(&full_name);
            let state = json_str(item, "state").unwrap_or_else(|| "UNKNOWN".to_string());
            Some(
                DiscoveredResource::new(ResourceType::Cache, &client.region, full_name, name, state)
                    .with_meta("tier", json_str(item, "tier"))
                    .with_meta("memorySizeGb", json_str(item, "memorySizeGb"))
                    .with_meta("redisVersion", json_str(item, "redisVersion"))
                    .with_meta("host", json_str(item, "host")),
            )
        })
        .collect())
}

async fn discover_gateways(client: &GcpClient) -> Result<Vec<DiscoveredResource>> {
    let url = client.apigateway_url("gateways");
    let items = drain_pages(client, &url, &[], |page| items_at(page, "gateways")).await?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let full_name = json_str(item, "name")?;
            let display = json_str(item, "displayName").unwrap_or_else(|| extract_short_name(&full_name));
            let state = json_str(item, "state").unwrap_or_else(|| "UNKNOWN".to_string());
            Some(
                DiscoveredResource::new(ResourceType::ApiGateway, &client.region, full_name, display, state)
                    .with_meta("apiConfig", short(item, "apiConfig"))
                    .with_meta("defaultHostname", json_str(item, "defaultHostname")),
            )
        })
        .collect())
}

// =============================================================================
// Helpers
// =============================================================================

fn short(item: &Value, path: &str) -> Option<String> {
    json_str(item, path).map(|s| extract_short_name(&s))
}
