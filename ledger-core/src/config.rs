//! Configuration for the store

use serde::{Deserialize, Serialize};

/// Connection settings for the Postgres store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Postgres connection URL
    pub url: String,

    /// Pool size ceiling
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection before giving up
    pub acquire_timeout_secs: u64,
}

impl StoreConfig {
    /// Settings for the given URL with default pool sizing
    pub fn new(url: impl Into<String>) -> Self {
        StoreConfig {
            url: url.into(),
            ..Default::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            url: String::new(),
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}
