//! Failure classification
//!
//! Provider failures are sorted into a small set of kinds so callers can
//! branch on the class of a failure rather than string-matching messages.

use crate::gcp::auth::CredentialError;
use crate::gcp::http::ApiError;
use crate::resource::ResourceType;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Class of an upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 401/403, or the credential resolver refused the account
    AuthDenied,
    /// 429 / quota exhausted
    Throttled,
    /// Request or connect timeout
    Timeout,
    /// 5xx or connection failure
    Unavailable,
    Unknown,
}

impl FailureKind {
    /// Map an HTTP status code to a failure kind
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => FailureKind::AuthDenied,
            429 => FailureKind::Throttled,
            408 | 504 => FailureKind::Timeout,
            500..=599 => FailureKind::Unavailable,
            _ => FailureKind::Unknown,
        }
    }

    /// Classify an error by walking its cause chain
    pub fn classify(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if let Some(api) = cause.downcast_ref::<ApiError>() {
                return Self::from_status(api.status);
            }
            if let Some(err) = cause.downcast_ref::<reqwest::Error>() {
                if err.is_timeout() {
                    return FailureKind::Timeout;
                }
                if err.is_connect() {
                    return FailureKind::Unavailable;
                }
                if let Some(status) = err.status() {
                    return Self::from_status(status.as_u16());
                }
            }
            if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
                return FailureKind::Timeout;
            }
            if let Some(err) = cause.downcast_ref::<CredentialError>() {
                return err.kind();
            }
        }
        FailureKind::Unknown
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::AuthDenied => "auth_denied",
            FailureKind::Throttled => "throttled",
            FailureKind::Timeout => "timeout",
            FailureKind::Unavailable => "unavailable",
            FailureKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One (region, resource type) pair that could not be discovered.
///
/// `resource_type` is `None` when the whole region failed before any
/// discoverer ran (credential resolution).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryFailure {
    pub region: String,
    pub resource_type: Option<ResourceType>,
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for DiscoveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resource_type {
            Some(rt) => write!(f, "{}/{}: {}", self.region, rt, self.message),
            None => write!(f, "{}/credentials: {}", self.region, self.message),
        }
    }
}

/// Errors that fail a whole pipeline invocation
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("circuit '{circuit}' is open, retry in {}s", retry_after.as_secs())]
    CircuitOpen {
        circuit: String,
        retry_after: Duration,
    },

    #[error("credential resolution failed for account {account_id}: {source}")]
    Credentials {
        account_id: String,
        #[source]
        source: CredentialError,
    },

    #[error("upstream unavailable: all {} discovery calls failed", failures.len())]
    UpstreamUnavailable { failures: Vec<DiscoveryFailure> },

    #[error("invocation cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PipelineError {
    /// Whether this outcome should count against the circuit breaker
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            PipelineError::Cancelled
                | PipelineError::CircuitOpen { .. }
                | PipelineError::InvalidRequest(_)
        )
    }
}
