//! In-process chain used by tests and the simulator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ethsettle_common::WalletAddress;
use parking_lot::Mutex;
use tracing::debug;

use crate::service::{ChainError, ChainReceipt, ChainSettlementService};

/// Scripted outcome for one withdrawal call.
#[derive(Debug, Clone)]
pub enum SimulatedOutcome {
    /// Confirm if the vault holds enough liquidity.
    Confirm,
    /// Fail with the given error.
    Fail(ChainError),
    /// Wait, then resolve the inner outcome.
    Delay(Duration, Box<SimulatedOutcome>),
    /// Never resolve.
    Hang,
}

/// A withdrawal the simulated chain confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedWithdrawal {
    /// Recipient wallet.
    pub wallet: WalletAddress,
    /// Amount paid out.
    pub amount_wei: u128,
    /// Transaction hash issued for the payout.
    pub tx_hash: String,
}

/// Simulated settlement vault.
///
/// Outcomes are taken from a script in call order; once the script is empty
/// every call confirms. Confirmation fails with insufficient funds when the
/// vault's liquidity (unlimited unless set) cannot cover the payout.
#[derive(Debug, Default)]
pub struct SimulatedChain {
    script: Mutex<VecDeque<SimulatedOutcome>>,
    liquidity_wei: Mutex<Option<u128>>,
    latency: Mutex<Duration>,
    confirmed: Mutex<Vec<SimulatedWithdrawal>>,
    calls: AtomicU64,
    tx_counter: AtomicU64,
}

impl SimulatedChain {
    /// Create a chain that confirms everything with no latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the vault's liquidity.
    pub fn with_liquidity(self, wei: u128) -> Self {
        *self.liquidity_wei.lock() = Some(wei);
        self
    }

    /// Set the latency applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Append an outcome to the script.
    pub fn push_outcome(&self, outcome: SimulatedOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Fail the next call.
    pub fn fail_next(&self, error: ChainError) {
        self.push_outcome(SimulatedOutcome::Fail(error));
    }

    /// Make the next call never resolve.
    pub fn hang_next(&self) {
        self.push_outcome(SimulatedOutcome::Hang);
    }

    /// Number of withdrawal calls received.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Withdrawals confirmed so far.
    pub fn confirmed_withdrawals(&self) -> Vec<SimulatedWithdrawal> {
        self.confirmed.lock().clone()
    }

    /// Total wei paid out.
    pub fn total_withdrawn_wei(&self) -> u128 {
        self.confirmed.lock().iter().map(|w| w.amount_wei).sum()
    }

    fn confirm(&self, wallet: &WalletAddress, amount_wei: u128) -> Result<ChainReceipt, ChainError> {
        {
            let mut liquidity = self.liquidity_wei.lock();
            if let Some(available) = liquidity.as_mut() {
                if *available < amount_wei {
                    return Err(ChainError::InsufficientFunds(format!(
                        "vault holds {available} wei, requested {amount_wei} wei"
                    )));
                }
                *available -= amount_wei;
            }
        }

        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let tx_hash = format!("0x{n:064x}");

        self.confirmed.lock().push(SimulatedWithdrawal {
            wallet: wallet.clone(),
            amount_wei,
            tx_hash: tx_hash.clone(),
        });

        Ok(ChainReceipt {
            tx_hash,
            block_number: Some(n),
        })
    }
}

#[async_trait]
impl ChainSettlementService for SimulatedChain {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn withdraw(
        &self,
        wallet: &WalletAddress,
        amount_wei: u128,
    ) -> Result<ChainReceipt, ChainError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(SimulatedOutcome::Confirm);

        debug!(call, wallet = %wallet, amount_wei = %amount_wei, ?outcome, "Simulated withdrawal");

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        loop {
            match outcome {
                SimulatedOutcome::Confirm => return self.confirm(wallet, amount_wei),
                SimulatedOutcome::Fail(err) => return Err(err),
                SimulatedOutcome::Delay(delay, next) => {
                    tokio::time::sleep(delay).await;
                    outcome = *next;
                }
                SimulatedOutcome::Hang => return std::future::pending().await,
            }
        }
    }
}
