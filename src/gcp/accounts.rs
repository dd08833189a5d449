//! Account Directory
//!
//! Looks up which regions an account is configured to scan.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Source of per-account region lists
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Regions configured for the account; an empty list means "not configured"
    async fn configured_regions(&self, organization_id: &str, account_id: &str)
        -> Result<Vec<String>>;
}

/// Region lists read from the configuration file
#[derive(Debug, Clone, Default)]
pub struct ConfigAccountDirectory {
    regions: HashMap<String, Vec<String>>,
}

impl ConfigAccountDirectory {
    pub fn new(regions: HashMap<String, Vec<String>>) -> Self {
        Self { regions }
    }
}

#[async_trait]
impl AccountDirectory for ConfigAccountDirectory {
    async fn configured_regions(
        &self,
        _organization_id: &str,
        account_id: &str,
    ) -> Result<Vec<String>> {
        Ok(self.regions.get(account_id).cloned().unwrap_or_default())
    }
}
