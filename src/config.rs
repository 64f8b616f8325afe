//! Gateway Configuration
//!
//! Configurable parameters for the validator query gateway.
//! Defaults mirror the behaviour of the subnet's reference validator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aggregate::PolicyKind;
use crate::dispatch::DEFAULT_MAX_CONCURRENT_CALLS;

/// Main configuration for the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    // === Subnet ===

    /// Subnet the gateway queries
    pub netuid: u16,

    /// Key this validator is registered under (SS58)
    pub validator_key: String,

    /// Subnet snapshot exported by the chain indexer
    pub chain_snapshot: PathBuf,

    // === Query round ===

    /// Number of heaviest miners queried per round
    pub top_k: usize,

    /// Timeout applied to each miner call (seconds)
    pub call_timeout_secs: u64,

    /// Maximum miner calls in flight at once
    pub max_concurrent_calls: usize,

    /// How one answer is picked among successful miners
    pub selection_policy: PolicyKind,

    /// Largest reply accepted from a miner (bytes)
    pub max_response_bytes: usize,

    // === HTTP API ===

    /// Interface the HTTP API binds to
    pub api_host: String,

    /// Port for the HTTP API
    pub api_port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            // Subnet
            netuid: 30,
            validator_key: String::new(),
            chain_snapshot: PathBuf::from("chain-snapshot.json"),

            // Query round
            top_k: 5,
            call_timeout_secs: 60,
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            selection_policy: PolicyKind::UniformRandom,
            max_response_bytes: 1024 * 1024,

            // HTTP API
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    // Builder-style methods for CLI overrides

    pub fn with_api_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.api_port = port;
        }
        self
    }

    pub fn with_top_k(mut self, top_k: Option<usize>) -> Self {
        if let Some(top_k) = top_k {
            self.top_k = top_k;
        }
        self
    }

    pub fn with_call_timeout(mut self, secs: Option<u64>) -> Self {
        if let Some(secs) = secs {
            self.call_timeout_secs = secs;
        }
        self
    }

    pub fn with_chain_snapshot(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.chain_snapshot = path;
        }
        self
    }

    pub fn with_validator_key(mut self, key: Option<String>) -> Self {
        if let Some(key) = key {
            self.validator_key = key;
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.validator_key.trim().is_empty() {
            anyhow::bail!("validator_key must be set");
        }

        if self.top_k == 0 {
            anyhow::bail!("top_k must be at least 1");
        }

        if self.max_concurrent_calls == 0 {
            anyhow::bail!("max_concurrent_calls must be at least 1");
        }

        if self.call_timeout_secs == 0 {
            anyhow::bail!("call_timeout_secs must be at least 1");
        }

        if self.max_response_bytes == 0 {
            anyhow::bail!("max_response_bytes must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn valid_config() -> GatewayConfig {
        GatewayConfig::default().with_validator_key(Some("5Validator".to_string()))
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.call_timeout(), Duration::from_secs(60));
        assert_eq!(config.max_concurrent_calls, 8);
        assert_eq!(config.selection_policy, PolicyKind::UniformRandom);
    }

    #[test]
    fn test_config_validation() {
        assert!(GatewayConfig::default().validate().is_err());

        let mut config = valid_config();
        assert!(config.validate().is_ok());

        config.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.max_concurrent_calls = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = valid_config()
            .with_api_port(Some(9090))
            .with_top_k(Some(3))
            .with_call_timeout(None);

        assert_eq!(config.api_port, 9090);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.call_timeout_secs, 60);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.toml");

        let mut config = valid_config();
        config.selection_policy = PolicyKind::LowestLatency;
        config.save(&path).unwrap();

        let loaded = GatewayConfig::load(&path).unwrap();
        assert_eq!(loaded.validator_key, "5Validator");
        assert_eq!(loaded.selection_policy, PolicyKind::LowestLatency);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "validator_key = \"5Validator\"\ntop_k = 7\n").unwrap();

        let loaded = GatewayConfig::load(&path).unwrap();
        assert_eq!(loaded.top_k, 7);
        assert_eq!(loaded.api_port, 8000);
        assert!(loaded.validate().is_ok());
    }
}
