use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::TxnError;

/// Default region capacity, in transactions.
pub const DEFAULT_MAX_TRANSACTIONS: usize = 20;
/// Default ceiling for region growth.
pub const DEFAULT_MAX_REGION_TRANSACTIONS: usize = 1 << 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Initial capacity hint of the region.
    pub max_transactions: usize,
    /// Hard ceiling on region growth.
    pub max_region_transactions: usize,
    /// Open a file-backed log under the manager directory when no log
    /// facility is supplied.
    pub logging: bool,
    /// Do not force the log on top-level commit.
    pub no_sync: bool,
    pub lock_stats_enabled: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
            max_region_transactions: DEFAULT_MAX_REGION_TRANSACTIONS,
            logging: true,
            no_sync: false,
            lock_stats_enabled: false,
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, TxnError> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn max_transactions(mut self, max: usize) -> Self {
        self.max_transactions = max;
        self
    }

    pub fn max_region_transactions(mut self, max: usize) -> Self {
        self.max_region_transactions = max;
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    pub fn no_sync(mut self, no_sync: bool) -> Self {
        self.no_sync = no_sync;
        self
    }

    pub fn lock_stats_enabled(mut self, enabled: bool) -> Self {
        self.lock_stats_enabled = enabled;
        self
    }
}
