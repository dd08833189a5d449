//! Resource Fetcher
//!
//! Paginated list calls against GCP APIs plus helpers for pulling fields out
//! of the JSON the APIs return.

use crate::gcp::client::GcpClient;
use crate::gcp::http::with_query;
use anyhow::{Context, Result};
use serde_json::Value;

/// Upper bound on pages drained by a single list call
pub const MAX_PAGES: usize = 500;

/// Fetch all pages of a list call.
///
/// `extract` pulls the items out of one page. The loop follows
/// `nextPageToken` until the provider stops returning one.
pub async fn drain_pages<F>(
    client: &GcpClient,
    url: &str,
    params: &[(&str, &str)],
    mut extract: F,
) -> Result<Vec<Value>>
where
    F: FnMut(&Value) -> Vec<Value>,
{
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    for page in 0..MAX_PAGES {
        let mut query: Vec<(&str, &str)> = params.to_vec();
        if let Some(token) = page_token.as_deref() {
            query.push(("pageToken", token));
        }

        let response = client
            .get(&with_query(url, &query))
            .await
            .with_context(|| format!("Failed to fetch page {}", page + 1))?;

        all_items.extend(extract(&response));

        match response.get("nextPageToken").and_then(|v| v.as_str()) {
            Some(token) if !token.is_empty() => page_token = Some(token.to_string()),
            _ => return Ok(all_items),
        }
    }

    tracing::warn!(
        "Stopped paginating {} after {} pages, results may be incomplete",
        url,
        MAX_PAGES
    );
    Ok(all_items)
}

/// Items stored as an array under `key`
pub fn items_at(response: &Value, key: &str) -> Vec<Value> {
    response
        .get(key)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Flatten an aggregated API response, keeping only scopes that start with `scope_prefix`.
/// Aggregated responses have format: { "items": { "zones/us-central1-a": { "instances": [...] }, ... } }
pub fn flatten_aggregated_response(response: &Value, scope_prefix: &str) -> Vec<Value> {
    let Some(items) = response.get("items").and_then(|v| v.as_object()) else {
        return vec![];
    };

    let mut all_items: Vec<Value> = Vec::new();

    for (scope_key, scope_data) in items {
        if !scope_key.starts_with(scope_prefix) {
            continue;
        }
        if let Some(obj) = scope_data.as_object() {
            for (key, value) in obj {
                // Skip warning field and other metadata
                if key == "warning" {
                    continue;
                }
                if let Some(arr) = value.as_array() {
                    all_items.extend(arr.iter().cloned());
                }
            }
        }
    }

    all_items
}

/// Extract short name from GCP resource URL or path
/// e.g., "projects/p/locations/us-east1/functions/resize" -> "resize"
pub fn extract_short_name(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

/// Extract a scalar from JSON using a dot-notation path, as a string
pub fn json_str(item: &Value, path: &str) -> Option<String> {
    let mut current = item;

    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(idx) => current.get(idx)?,
            Err(_) => current.get(part)?,
        };
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
