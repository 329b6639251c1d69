//! Chain client configuration.

use std::time::Duration;

use ethsettle_common::time::constants;
use ethsettle_common::WalletAddress;

/// Configuration for the vault contract client.
#[derive(Clone)]
pub struct ChainConfig {
    /// JSON-RPC endpoint of the chain node.
    pub rpc_url: String,
    /// Address of the settlement vault contract.
    pub contract_address: String,
    /// Hex private key used to sign withdrawals locally. When absent the
    /// transaction is sent from the wallet through the node's managed accounts.
    pub signer_key: Option<String>,
    /// Timeout for a single connection check.
    pub connect_timeout: Duration,
    /// Maximum connection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Initial delay between connection attempts.
    pub reconnect_delay: Duration,
    /// Maximum delay between connection attempts.
    pub max_reconnect_delay: Duration,
}

impl std::fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_url", &self.rpc_url)
            .field("contract_address", &self.contract_address)
            .field("signer_key", &self.signer_key.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("max_reconnect_delay", &self.max_reconnect_delay)
            .finish()
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            contract_address: String::new(),
            signer_key: None,
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: constants::CHAIN_RECONNECT_ATTEMPTS,
            reconnect_delay: constants::CHAIN_RECONNECT_DELAY,
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

impl ChainConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CHAIN_RPC_URL") {
            config.rpc_url = url;
        }

        if let Ok(address) = std::env::var("CONTRACT_ADDRESS") {
            config.contract_address = address;
        }

        if let Ok(key) = std::env::var("SETTLEMENT_SIGNER_KEY") {
            if !key.trim().is_empty() {
                config.signer_key = Some(key.trim().to_string());
            }
        }

        if let Ok(attempts) = std::env::var("CHAIN_RECONNECT_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                config.max_reconnect_attempts = n;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.rpc_url.trim().is_empty() {
            return Err("Chain RPC URL cannot be empty".to_string());
        }

        if let Err(e) = url::Url::parse(&self.rpc_url) {
            return Err(format!("Invalid chain RPC URL: {e}"));
        }

        if let Err(e) = WalletAddress::parse(&self.contract_address) {
            return Err(format!("Invalid contract address: {e}"));
        }

        if self.connect_timeout.is_zero() {
            return Err("Connect timeout cannot be zero".to_string());
        }

        if self.max_reconnect_attempts == 0 {
            return Err("Reconnect attempts cannot be zero".to_string());
        }

        if self.reconnect_delay > self.max_reconnect_delay {
            return Err("Reconnect delay cannot exceed the maximum delay".to_string());
        }

        Ok(())
    }
}
