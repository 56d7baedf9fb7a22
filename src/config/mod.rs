//! Operation manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::resource_pool::ClassCapacities;

/// Constructor-time configuration for the operation manager. There is no
/// dynamic reconfiguration at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Concurrent read-class operations.
    pub read_capacity: usize,
    /// Concurrent write-class operations.
    pub write_capacity: usize,
    /// Concurrent transaction-class operations.
    pub transaction_capacity: usize,
    /// Maximum total operations waiting across all priority queues.
    pub max_queue_depth: usize,
    /// Default per-operation timeout in seconds.
    pub default_timeout_secs: u64,
    /// Whether the periodic cleanup sweep runs.
    pub cleanup_enabled: bool,
    /// Seconds between cleanup sweeps.
    pub cleanup_interval_secs: u64,
    /// Minimum age in seconds a terminal record must reach before the
    /// sweep may remove it. Zero is allowed (useful in tests).
    pub retention_secs: u64,
    /// Capacity of the completed-operation history ring buffer.
    pub history_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            read_capacity: 10,
            write_capacity: 5,
            transaction_capacity: 3,
            max_queue_depth: 100,
            default_timeout_secs: 30,
            cleanup_enabled: true,
            cleanup_interval_secs: 60,
            retention_secs: 3600,
            history_capacity: 256,
        }
    }
}

impl ManagerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.read_capacity == 0 {
            return Err("read_capacity must be greater than 0".into());
        }
        if self.write_capacity == 0 {
            return Err("write_capacity must be greater than 0".into());
        }
        if self.transaction_capacity == 0 {
            return Err("transaction_capacity must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.default_timeout_secs == 0 {
            return Err("default_timeout_secs must be greater than 0".into());
        }
        if self.cleanup_interval_secs == 0 {
            return Err("cleanup_interval_secs must be greater than 0".into());
        }
        if self.history_capacity == 0 {
            return Err("history_capacity must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate it.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Per-class limiter capacities.
    #[must_use]
    pub const fn capacities(&self) -> ClassCapacities {
        ClassCapacities {
            read: self.read_capacity,
            write: self.write_capacity,
            transaction: self.transaction_capacity,
        }
    }

    /// Default per-operation timeout.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Cleanup sweep interval.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Retention window for terminal records.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_capacities_rejected() {
        let mut cfg = ManagerConfig::default();
        cfg.read_capacity = 0;
        assert!(cfg.validate().unwrap_err().contains("read_capacity"));

        let mut cfg = ManagerConfig::default();
        cfg.write_capacity = 0;
        assert!(cfg.validate().unwrap_err().contains("write_capacity"));

        let mut cfg = ManagerConfig::default();
        cfg.transaction_capacity = 0;
        assert!(cfg
            .validate()
            .unwrap_err()
            .contains("transaction_capacity"));
    }

    #[test]
    fn zero_retention_is_allowed() {
        let mut cfg = ManagerConfig::default();
        cfg.retention_secs = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn json_round_trip() {
        let json = r#"{
            "read_capacity": 2,
            "write_capacity": 1,
            "transaction_capacity": 1,
            "max_queue_depth": 50,
            "default_timeout_secs": 10,
            "cleanup_enabled": false,
            "cleanup_interval_secs": 30,
            "retention_secs": 600,
            "history_capacity": 64
        }"#;
        let cfg = ManagerConfig::from_json_str(json).unwrap();
        assert_eq!(cfg.read_capacity, 2);
        assert_eq!(cfg.default_timeout(), Duration::from_secs(10));
        assert!(!cfg.cleanup_enabled);
        assert_eq!(cfg.capacities().write, 1);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(ManagerConfig::from_json_str("not json").is_err());
        assert!(ManagerConfig::from_json_str("{}").is_err());
    }
}
