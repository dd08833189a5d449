//! HTTP utilities for GCP REST API calls

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Maximum length of a provider message carried into failure reports
const MAX_MESSAGE_LENGTH: usize = 160;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = floor_char_boundary(body, MAX_LOG_BODY_LENGTH);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// A non-2xx response from a GCP API
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("API request failed: {status} {message}")]
pub struct ApiError {
    pub status: u16,
    /// Provider message from the Google error envelope, sanitized
    pub message: String,
}

impl ApiError {
    fn from_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(|s| s.to_string())
            })
            .unwrap_or_default();

        let message = message
            .chars()
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .take(MAX_MESSAGE_LENGTH)
            .collect();

        Self { status, message }
    }
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("cloudsweep/{}", crate::VERSION))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::debug!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiError::from_body(status.as_u16(), &body).into());
        }

        // Handle empty response
        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}

/// Append query parameters to a URL, percent-encoding the values
pub fn with_query(url: &str, params: &[(&str, &str)]) -> String {
    let query_parts: Vec<String> = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect();

    if query_parts.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&{}", url, query_parts.join("&"))
    } else {
        format!("{}?{}", url, query_parts.join("&"))
    }
}

/// Format a GCP API error for failure reports
/// Security: Generic prefixes avoid leaking API structure details
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    if let Some(api) = error.chain().find_map(|c| c.downcast_ref::<ApiError>()) {
        let prefix = match api.status {
            403 => "Permission denied (403)",
            401 => "Authentication failed (401)",
            404 => "Not found (404)",
            429 => "Rate limit exceeded (429)",
            400 => "Invalid request (400)",
            409 => "Conflict (409)",
            500..=599 => "Service temporarily unavailable",
            _ => "Request failed",
        };
        return if api.message.is_empty() {
            prefix.to_string()
        } else {
            format!("{}: {}", prefix, api.message)
        };
    }

    let error_str = format!("{:#}", error);

    // Truncate long error messages and remove potential sensitive data
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(MAX_MESSAGE_LENGTH)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
