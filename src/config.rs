//! Session configuration.
//!
//! Every section deserializes with defaults so a configuration file only needs
//! to name what it changes.

use crate::error::SyncError;
use crate::schema::TableSchema;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one sync session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Store contract whose logs are synchronized
    pub store_address: Address,
    /// First block of the historical range
    pub start_block: u64,
    /// Maximum number of blocks covered by one range request
    pub max_block_range: u64,
    /// Number of range requests in flight at once
    pub fetch_concurrency: usize,
    /// Capacity of the producer to merge-stage channel
    pub channel_capacity: usize,
    /// Complete the session once every block up to this one has been applied
    pub exit_at: Option<u64>,
    pub retry: RetryConfig,
    pub live: LiveConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_address: Address::ZERO,
            start_block: 0,
            max_block_range: 1000,
            fetch_concurrency: 4,
            channel_capacity: 64,
            exit_at: None,
            retry: RetryConfig::default(),
            live: LiveConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.max_block_range == 0 {
            return Err(SyncError::Config("maxBlockRange must be at least 1".to_string()));
        }
        if self.fetch_concurrency == 0 {
            return Err(SyncError::Config("fetchConcurrency must be at least 1".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(SyncError::Config("channelCapacity must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config("retry.maxAttempts must be at least 1".to_string()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(SyncError::Config("retry.multiplier must be >= 1.0".to_string()));
        }
        if let Some(exit_at) = self.exit_at {
            if exit_at < self.start_block {
                return Err(SyncError::Config(format!(
                    "exitAt {} is before startBlock {}",
                    exit_at, self.start_block
                )));
            }
        }
        Ok(())
    }
}

/// Bounded exponential backoff applied to every remote call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    /// Timeout of a single attempt
    pub request_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval_ms: 250,
            max_interval_ms: 10_000,
            multiplier: 2.0,
            request_timeout_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Live tail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LiveConfig {
    /// Resubscribe when no new head arrives within this window
    pub heartbeat_timeout_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 30_000,
        }
    }
}

impl LiveConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Configuration file read by the `store-sync` binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub rpc_url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub snapshot_url: Option<String>,
    /// SQLite database for the relational indexer; records are kept in memory only without it
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
    #[serde(default)]
    pub session: SessionConfig,
    /// Schemas known up front; other tables are resolved from the store contract
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SyncError> {
        let config: Self = serde_json::from_str(json)?;
        config.session.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_take_defaults() {
        let config = AppConfig::from_json_str(
            r#"{
                "rpcUrl": "http://localhost:8545",
                "session": { "startBlock": 10, "retry": { "maxAttempts": 3 } },
                "tables": [{
                    "tableId": "0x00000000000000000000000000000000496e76656e746f727900000000000000",
                    "keySchema": [{ "name": "owner", "type": "address" }],
                    "valueSchema": [{ "name": "amount", "type": "uint32" }]
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.session.start_block, 10);
        assert_eq!(config.session.max_block_range, 1000);
        assert_eq!(config.session.retry.max_attempts, 3);
        assert_eq!(config.session.retry.initial_interval_ms, 250);
        assert_eq!(config.tables[0].table_id.name(), "Inventory");
        assert!(config.ws_url.is_none());
        assert!(config.sqlite_path.is_none());
    }

    #[test]
    fn rejects_zero_sized_settings() {
        let config = SessionConfig {
            max_block_range: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let config = SessionConfig {
            start_block: 10,
            exit_at: Some(5),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
