//! GCP Authentication
//!
//! Resolves time-scoped access credentials for an account and region.
//! Production uses Application Default Credentials (ADC); tests and
//! emulators use a fixed token.

use crate::error::FailureKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gcp_auth::TokenProvider;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default scopes for GCP API access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Token expiry buffer - refresh tokens this much before they actually expire
/// This prevents using tokens that are about to expire during a request
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if we can't determine expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Access credentials valid for one region of one account
#[derive(Clone)]
pub struct RegionCredentials {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl RegionCredentials {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl std::fmt::Debug for RegionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Security: never print the bearer token
        f.debug_struct("RegionCredentials")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credential resolution failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CredentialError {
    /// The account is not accessible with the configured identity
    #[error("access denied: {0}")]
    Denied(String),
    /// Credentials could not be obtained right now
    #[error("credentials unavailable: {0}")]
    Unavailable(String),
}

impl CredentialError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CredentialError::Denied(_) => FailureKind::AuthDenied,
            CredentialError::Unavailable(_) => FailureKind::Unavailable,
        }
    }
}

/// Source of access credentials, one call per (account, region)
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(
        &self,
        account_id: &str,
        region: &str,
    ) -> std::result::Result<RegionCredentials, CredentialError>;
}

#[derive(Clone)]
struct CachedToken {
    credentials: RegionCredentials,
    /// When this token expires (with buffer applied)
    refresh_at: Instant,
}

impl CachedToken {
    /// Check if this cached token is still valid
    fn is_valid(&self) -> bool {
        Instant::now() < self.refresh_at
    }
}

/// Application Default Credentials with token caching.
///
/// ADC tokens are not region scoped, so every region of an account shares
/// the same cached token.
#[derive(Clone)]
pub struct AdcCredentialResolver {
    provider: Arc<dyn TokenProvider>,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

impl AdcCredentialResolver {
    /// Create new GCP credentials using Application Default Credentials
    pub async fn new() -> Result<Self> {
        let provider = gcp_auth::provider().await.context(
            "Failed to initialize GCP authentication. Run 'gcloud auth application-default login'",
        )?;

        Ok(Self {
            provider,
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Get an access token for API calls
    /// Security: Checks token expiry before returning cached token
    async fn get_token(&self) -> std::result::Result<RegionCredentials, CredentialError> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.credentials.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let token = self
            .provider
            .token(DEFAULT_SCOPES)
            .await
            .map_err(|e| CredentialError::Unavailable(e.to_string()))?;

        let lifetime = DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(DEFAULT_TOKEN_TTL).unwrap_or_else(|_| chrono::Duration::zero());
        let credentials = RegionCredentials::new(token.as_str(), expires_at);

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                credentials: credentials.clone(),
                refresh_at: Instant::now() + lifetime,
            });
        }

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            lifetime.as_secs() / 60
        );

        Ok(credentials)
    }
}

#[async_trait]
impl CredentialResolver for AdcCredentialResolver {
    async fn resolve(
        &self,
        account_id: &str,
        region: &str,
    ) -> std::result::Result<RegionCredentials, CredentialError> {
        if !validate_project_id(account_id) {
            return Err(CredentialError::Denied(format!(
                "'{}' is not a valid project id",
                account_id
            )));
        }
        tracing::debug!(account_id, region, "resolving ADC credentials");
        self.get_token().await
    }
}

/// Fixed bearer token for every account and region
#[derive(Clone)]
pub struct StaticCredentialResolver {
    token: String,
}

impl StaticCredentialResolver {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(
        &self,
        _account_id: &str,
        _region: &str,
    ) -> std::result::Result<RegionCredentials, CredentialError> {
        let expires_at = Utc::now() + chrono::Duration::hours(1);
        Ok(RegionCredentials::new(self.token.clone(), expires_at))
    }
}

/// Get the gcloud configuration directory
pub fn get_gcloud_config_dir() -> Option<PathBuf> {
    // Check CLOUDSDK_CONFIG environment variable first
    if let Ok(path) = std::env::var("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(path));
    }

    // Default to ~/.config/gcloud on Linux/macOS
    dirs::config_dir().map(|p| p.join("gcloud"))
}

/// Validate a GCP project ID format
/// Project IDs must be 6-30 characters, lowercase letters, digits, and hyphens
/// Must start with a letter and cannot end with a hyphen
pub fn validate_project_id(project: &str) -> bool {
    if project.len() < 6 || project.len() > 30 {
        return false;
    }

    match project.chars().next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }

    if project.ends_with('-') {
        return false;
    }

    project
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Read `[compute] region` from the active gcloud configuration
pub fn get_default_region() -> Option<String> {
    if let Ok(region) = std::env::var("CLOUDSDK_COMPUTE_REGION") {
        if !region.trim().is_empty() {
            return Some(region.trim().to_string());
        }
    }

    let config_dir = get_gcloud_config_dir()?;
    let active_config = std::fs::read_to_string(config_dir.join("active_config")).ok()?;
    let config_name = active_config.trim();

    // Security: Validate config name to prevent path traversal
    if !config_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        tracing::warn!("Invalid characters in active_config name");
        return None;
    }

    let content = std::fs::read_to_string(
        config_dir
            .join("configurations")
            .join(format!("config_{}", config_name)),
    )
    .ok()?;

    parse_compute_region(&content)
}

/// Extract the `region` key of the `[compute]` section of a gcloud properties file
fn parse_compute_region(content: &str) -> Option<String> {
    let mut in_compute_section = false;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line == "[compute]" {
            in_compute_section = true;
        } else if line.starts_with('[') {
            in_compute_section = false;
        } else if in_compute_section {
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == "region" && !value.trim().is_empty() {
                    return Some(value.trim().to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_project_id() {
        assert!(validate_project_id("my-project-123"));
        assert!(!validate_project_id("short"));
        assert!(!validate_project_id("1starts-with-digit"));
        assert!(!validate_project_id("ends-with-hyphen-"));
        assert!(!validate_project_id("Has-Upper-Case"));
    }

    #[test]
    fn test_parse_compute_region() {
        let content = "[core]\nproject = demo-project\n\n[compute]\nzone = europe-west1-b\nregion = europe-west1\n";
        assert_eq!(parse_compute_region(content), Some("europe-west1".to_string()));
        assert_eq!(parse_compute_region("[core]\nregion = nope\n"), None);
    }

    #[tokio::test]
    async fn test_static_resolver_issues_unexpired_token() {
        let resolver = StaticCredentialResolver::new("test-token");
        let creds = resolver.resolve("demo-project", "us-east1").await.unwrap();
        assert_eq!(creds.token, "test-token");
        assert!(!creds.is_expired());
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = RegionCredentials::new("secret-token", Utc::now());
        assert!(!format!("{:?}", creds).contains("secret-token"));
    }

    #[test]
    fn test_credential_error_kind() {
        assert_eq!(
            CredentialError::Denied("x".into()).kind(),
            FailureKind::AuthDenied
        );
        assert_eq!(
            CredentialError::Unavailable("x".into()).kind(),
            FailureKind::Unavailable
        );
    }
}
