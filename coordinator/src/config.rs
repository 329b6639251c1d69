//! Coordinator configuration.

use std::time::Duration;

use ethsettle_common::time::constants;
use ethsettle_ledger::StoreRetryPolicy;

/// Per-account lock configuration.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Interval at which idle account locks are pruned.
    pub cleanup_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

/// Main coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Time to wait for the chain call before reporting an unknown outcome.
    pub chain_call_timeout: Duration,
    /// How long a timed-out chain call may still resolve and be applied.
    pub late_outcome_grace: Duration,
    /// How long `stop` waits for in-flight withdrawals.
    pub drain_timeout: Duration,
    /// PostgreSQL URL. The in-memory store is used when absent.
    pub database_url: Option<String>,
    /// Pool size for the PostgreSQL store. One connection is always kept
    /// free of account leases, so at least two are needed.
    pub database_max_connections: u32,
    /// Lock configuration.
    pub lock_config: LockConfig,
    /// Retry budget for transient store faults.
    pub store_retry: StoreRetryPolicy,
    /// Interval at which the binary logs a metrics snapshot.
    pub metrics_log_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            chain_call_timeout: constants::CHAIN_CALL_TIMEOUT,
            late_outcome_grace: constants::LATE_OUTCOME_GRACE,
            drain_timeout: constants::DRAIN_TIMEOUT,
            database_url: None,
            database_max_connections: 10,
            lock_config: LockConfig::default(),
            store_retry: StoreRetryPolicy::default(),
            metrics_log_interval: Duration::from_secs(60),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(secs) = std::env::var("CHAIN_CALL_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.chain_call_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(secs) = std::env::var("LATE_OUTCOME_GRACE_SECS") {
            if let Ok(secs) = secs.parse() {
                config.late_outcome_grace = Duration::from_secs(secs);
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = Some(url);
            }
        }

        if let Ok(attempts) = std::env::var("STORE_RETRY_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse() {
                config.store_retry.max_attempts = attempts;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.chain_call_timeout.is_zero() {
            return Err("Chain call timeout cannot be zero".to_string());
        }

        if self.late_outcome_grace.is_zero() {
            return Err("Late outcome grace cannot be zero".to_string());
        }

        if self.drain_timeout.is_zero() {
            return Err("Drain timeout cannot be zero".to_string());
        }

        if self.store_retry.max_attempts == 0 {
            return Err("Store retry attempts cannot be zero".to_string());
        }

        if self.lock_config.cleanup_interval.is_zero() {
            return Err("Lock cleanup interval cannot be zero".to_string());
        }

        if self.database_url.is_some() && self.database_max_connections < 2 {
            return Err("Database pool size must be at least 2".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chain_call_timeout, Duration::from_secs(60));
        assert_eq!(config.store_retry.max_attempts, 3);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = CoordinatorConfig::default();
        config.chain_call_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.store_retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.database_url = Some("postgres://localhost/ethsettle".to_string());
        config.database_max_connections = 1;
        assert!(config.validate().is_err());
        config.database_max_connections = 2;
        assert!(config.validate().is_ok());
    }
}
