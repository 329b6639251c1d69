//! Settlement vault contract client.

use std::str::FromStr;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol;
use async_trait::async_trait;
use ethsettle_common::time::backoff_delay;
use ethsettle_common::WalletAddress;
use parking_lot::RwLock;
use tracing::{error, info, instrument, warn};

use crate::config::ChainConfig;
use crate::service::{ChainError, ChainReceipt, ChainSettlementService};

sol! {
    #[sol(rpc)]
    interface ISettlementVault {
        function withdraw(uint256 amount) external;
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected.
    Disconnected,
    /// Probing the endpoint.
    Connecting,
    /// Endpoint answered the last check.
    Connected,
}

/// Client for the settlement vault contract.
///
/// Owned by whoever constructs the coordinator and shared through
/// [`ChainSettlementService`]. Reconnects lazily: a withdrawal on a
/// disconnected client checks the endpoint first and fails with
/// [`ChainError::Unavailable`] if it cannot be reached.
pub struct VaultContractClient {
    config: ChainConfig,
    vault: Address,
    provider: DynProvider,
    /// Sender when signing locally.
    local_signer: Option<Address>,
    state: RwLock<ClientState>,
    chain_id: RwLock<Option<u64>>,
}

impl VaultContractClient {
    /// Build a client. No network traffic happens until [`connect`](Self::connect).
    pub fn new(config: ChainConfig) -> Result<Self, ChainError> {
        config
            .validate()
            .map_err(|e| ChainError::Unavailable(format!("invalid chain configuration: {e}")))?;

        let url: url::Url = config.rpc_url.parse().map_err(|e: url::ParseError| {
            ChainError::Unavailable(format!("invalid RPC URL: {e}"))
        })?;
        let vault = Address::from_str(&config.contract_address)
            .map_err(|e| ChainError::Unavailable(format!("invalid contract address: {e}")))?;

        let (provider, local_signer) = match config.signer_key.as_deref() {
            Some(key) => {
                let signer = parse_signer(key)?;
                let sender = Signer::address(&signer);
                let provider = ProviderBuilder::new()
                    .wallet(EthereumWallet::from(signer))
                    .connect_http(url)
                    .erased();
                (provider, Some(sender))
            }
            None => (ProviderBuilder::new().connect_http(url).erased(), None),
        };

        Ok(Self {
            config,
            vault,
            provider,
            local_signer,
            state: RwLock::new(ClientState::Disconnected),
            chain_id: RwLock::new(None),
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        *self.state.read()
    }

    /// Chain ID reported by the last successful check.
    pub fn chain_id(&self) -> Option<u64> {
        *self.chain_id.read()
    }

    /// Sender used for withdrawals when signing locally.
    pub fn local_signer(&self) -> Option<Address> {
        self.local_signer
    }

    /// Query the endpoint until it answers or the attempt budget runs out.
    #[instrument(skip(self), fields(rpc_url = %self.config.rpc_url))]
    pub async fn connect(&self) -> Result<u64, ChainError> {
        *self.state.write() = ClientState::Connecting;

        let attempts = self.config.max_reconnect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = backoff_delay(
                    self.config.reconnect_delay,
                    attempt - 1,
                    self.config.max_reconnect_delay,
                );
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %last_error, "Chain check failed, retrying");
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.config.connect_timeout, self.provider.get_chain_id()).await
            {
                Ok(Ok(chain_id)) => {
                    *self.chain_id.write() = Some(chain_id);
                    *self.state.write() = ClientState::Connected;
                    info!(chain_id, vault = %self.vault, "Connected to chain");
                    return Ok(chain_id);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = "check timed out".to_string(),
            }
        }

        *self.state.write() = ClientState::Disconnected;
        error!(attempts, error = %last_error, "Chain endpoint unreachable");
        Err(ChainError::Unavailable(last_error))
    }

    async fn ensure_connected(&self) -> Result<(), ChainError> {
        if self.state() == ClientState::Connected {
            return Ok(());
        }
        self.connect().await.map(|_| ())
    }
}

#[async_trait]
impl ChainSettlementService for VaultContractClient {
    fn name(&self) -> &str {
        "vault-contract"
    }

    #[instrument(skip(self), fields(wallet = %wallet))]
    async fn withdraw(
        &self,
        wallet: &WalletAddress,
        amount_wei: u128,
    ) -> Result<ChainReceipt, ChainError> {
        self.ensure_connected().await?;

        let recipient = Address::from_str(wallet.as_str())
            .map_err(|e| ChainError::Rejected(format!("wallet address: {e}")))?;

        let vault = ISettlementVault::new(self.vault, self.provider.clone());
        let mut call = vault.withdraw(U256::from(amount_wei));
        if self.local_signer.is_none() {
            call = call.from(recipient);
        }

        let pending = call.send().await.map_err(|e| {
            let err = classify_send_error(e);
            if matches!(err, ChainError::Indeterminate(_)) {
                *self.state.write() = ClientState::Disconnected;
            }
            err
        })?;

        let tx_hash = format!("{:?}", pending.tx_hash());
        info!(tx_hash = %tx_hash, amount_wei = %amount_wei, "Withdrawal submitted");

        let receipt = pending.get_receipt().await.map_err(|e| {
            *self.state.write() = ClientState::Disconnected;
            ChainError::Indeterminate(format!("{tx_hash}: {e}"))
        })?;

        if !receipt.status() {
            return Err(ChainError::Reverted(tx_hash));
        }

        Ok(ChainReceipt {
            tx_hash,
            block_number: receipt.block_number,
        })
    }
}

fn parse_signer(key: &str) -> Result<PrivateKeySigner, ChainError> {
    let hex = key.trim();
    let hex = hex.strip_prefix("0x").unwrap_or(hex);

    let bytes = alloy::hex::decode(hex)
        .map_err(|e| ChainError::Unavailable(format!("invalid signer key: {e}")))?;

    PrivateKeySigner::from_slice(&bytes)
        .map_err(|e| ChainError::Unavailable(format!("invalid signer key: {e}")))
}

/// Classify a failure from submitting the withdrawal.
///
/// A JSON-RPC error response means the node saw and refused the transaction.
/// A transport failure leaves open whether it was broadcast.
fn classify_send_error(err: alloy::contract::Error) -> ChainError {
    match err {
        alloy::contract::Error::TransportError(rpc) => match rpc.as_error_resp() {
            Some(payload) => classify_node_error(&payload.message),
            None => ChainError::Indeterminate(rpc.to_string()),
        },
        other => ChainError::Rejected(other.to_string()),
    }
}

fn classify_node_error(message: &str) -> ChainError {
    if message.to_ascii_lowercase().contains("insufficient funds") {
        ChainError::InsufficientFunds(message.to_string())
    } else {
        ChainError::Rejected(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // Well-known development key.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn config() -> ChainConfig {
        ChainConfig {
            rpc_url: "http://127.0.0.1:1".to_string(),
            contract_address: "0x5fbdb2315678afecb367f032d93f642f64180aa3".to_string(),
            connect_timeout: Duration::from_secs(1),
            max_reconnect_attempts: 2,
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(20),
            ..ChainConfig::default()
        }
    }

    #[test]
    fn test_node_errors_are_classified() {
        assert!(matches!(
            classify_node_error("insufficient funds for gas * price + value"),
            ChainError::InsufficientFunds(_)
        ));
        assert!(matches!(
            classify_node_error("execution reverted: Insufficient Funds"),
            ChainError::InsufficientFunds(_)
        ));
        assert!(matches!(
            classify_node_error("nonce too low"),
            ChainError::Rejected(_)
        ));
    }

    #[test]
    fn test_signer_key_sets_sender() {
        let client = VaultContractClient::new(ChainConfig {
            signer_key: Some(DEV_KEY.to_string()),
            ..config()
        })
        .unwrap();

        let sender = client.local_signer().unwrap();
        assert_eq!(format!("{sender:?}").to_lowercase(), DEV_ADDRESS);
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        assert!(VaultContractClient::new(ChainConfig {
            signer_key: Some("zz".to_string()),
            ..config()
        })
        .is_err());

        assert!(VaultContractClient::new(ChainConfig {
            contract_address: "0x1234".to_string(),
            ..config()
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let client = VaultContractClient::new(config()).unwrap();
        let wallet = WalletAddress::parse(DEV_ADDRESS).unwrap();

        let err = client.withdraw(&wallet, 1_000).await.unwrap_err();
        assert!(matches!(err, ChainError::Unavailable(_)));
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(client.chain_id(), None);
    }
}
