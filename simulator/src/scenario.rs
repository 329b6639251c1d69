//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario. Wallets are referred to by label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Create the wallet's account if missing.
    OpenAccount { wallet: String },
    /// Deposit into a wallet.
    Deposit { wallet: String, amount: String },
    /// Withdraw from a wallet.
    Withdraw { wallet: String, amount: String },
    /// Issue several withdrawals for one wallet at once.
    ConcurrentWithdrawals {
        wallet: String,
        amount: String,
        count: usize,
    },
    /// Inject a fault.
    InjectFault { fault_type: FaultType },
    /// Clear latency faults.
    ClearFaults,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FaultType {
    /// The next chain call reports insufficient vault funds.
    ChainInsufficientFunds,
    /// The next chain call reverts.
    ChainRevert,
    /// The next chain call answers only after a delay.
    ChainSlowConfirm { delay_ms: u64 },
    /// The next chain call never answers.
    ChainHang,
    /// Every chain call takes this long.
    ChainLatency { delay_ms: u64 },
    /// The next ledger writes fail.
    StoreOutage { failed_writes: u32 },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// The wallet's ledger balance equals the amount.
    BalanceEquals { wallet: String, amount: String },
    /// The last step's outcome had this error code, or `OK`.
    LastOutcome { code: String },
    /// The chain received this many withdrawal calls in total.
    ChainCalls { count: u64 },
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "basic-flow" => Ok(Self::basic_flow()),
            "concurrent-withdrawals" => Ok(Self::concurrent_withdrawals()),
            "chain-failure" => Ok(Self::chain_failure()),
            "chain-timeout" => Ok(Self::chain_timeout()),
            "persist-mismatch" => Ok(Self::persist_mismatch()),
            "chain-hang" => Ok(Self::chain_hang()),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Names accepted by [`Scenario::load`].
    pub fn names() -> &'static [&'static str] {
        &[
            "basic-flow",
            "concurrent-withdrawals",
            "chain-failure",
            "chain-timeout",
            "persist-mismatch",
            "chain-hang",
        ]
    }

    /// Deposit, drain the balance, then overdraw.
    fn basic_flow() -> Self {
        Self {
            name: "basic-flow".to_string(),
            description: "Deposits in both decimal styles, a full withdrawal and an overdraw".to_string(),
            steps: vec![
                ScenarioStep::OpenAccount {
                    wallet: "alice".to_string(),
                },
                ScenarioStep::Deposit {
                    wallet: "alice".to_string(),
                    amount: "2.5".to_string(),
                },
                ScenarioStep::Deposit {
                    wallet: "alice".to_string(),
                    amount: "1,5".to_string(),
                },
                assert_balance("alice", "4.0"),
                ScenarioStep::Withdraw {
                    wallet: "alice".to_string(),
                    amount: "4.0".to_string(),
                },
                assert_outcome("OK"),
                assert_balance("alice", "0"),
                ScenarioStep::Withdraw {
                    wallet: "alice".to_string(),
                    amount: "0.1".to_string(),
                },
                assert_outcome("INSUFFICIENT_BALANCE"),
                ScenarioStep::Assert {
                    condition: AssertCondition::ChainCalls { count: 1 },
                },
            ],
        }
    }

    /// Two withdrawals that together exceed the balance.
    fn concurrent_withdrawals() -> Self {
        Self {
            name: "concurrent-withdrawals".to_string(),
            description: "Simultaneous withdrawals never overdraw an account".to_string(),
            steps: vec![
                ScenarioStep::Deposit {
                    wallet: "bob".to_string(),
                    amount: "1.0".to_string(),
                },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::ChainLatency { delay_ms: 200 },
                },
                ScenarioStep::ConcurrentWithdrawals {
                    wallet: "bob".to_string(),
                    amount: "0.6".to_string(),
                    count: 2,
                },
                ScenarioStep::ClearFaults,
                assert_balance("bob", "0.4"),
                ScenarioStep::Assert {
                    condition: AssertCondition::ChainCalls { count: 1 },
                },
            ],
        }
    }

    /// The chain refuses the payout.
    fn chain_failure() -> Self {
        Self {
            name: "chain-failure".to_string(),
            description: "A failed chain call leaves the balance untouched".to_string(),
            steps: vec![
                ScenarioStep::Deposit {
                    wallet: "carol".to_string(),
                    amount: "3".to_string(),
                },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::ChainInsufficientFunds,
                },
                ScenarioStep::Withdraw {
                    wallet: "carol".to_string(),
                    amount: "2".to_string(),
                },
                assert_outcome("CHAIN_CALL_FAILED"),
                assert_balance("carol", "3"),
                ScenarioStep::InjectFault {
                    fault_type: FaultType::ChainRevert,
                },
                ScenarioStep::Withdraw {
                    wallet: "carol".to_string(),
                    amount: "2".to_string(),
                },
                assert_outcome("CHAIN_CALL_FAILED"),
                ScenarioStep::Withdraw {
                    wallet: "carol".to_string(),
                    amount: "2".to_string(),
                },
                assert_outcome("OK"),
                assert_balance("carol", "1"),
            ],
        }
    }

    /// The chain answers after the coordinator stopped waiting.
    fn chain_timeout() -> Self {
        Self {
            name: "chain-timeout".to_string(),
            description: "A late chain confirmation is still applied to the ledger".to_string(),
            steps: vec![
                ScenarioStep::Deposit {
                    wallet: "dave".to_string(),
                    amount: "1".to_string(),
                },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::ChainSlowConfirm { delay_ms: 3_000 },
                },
                ScenarioStep::Withdraw {
                    wallet: "dave".to_string(),
                    amount: "0.25".to_string(),
                },
                assert_outcome("CHAIN_CALL_UNKNOWN"),
                assert_balance("dave", "1"),
                ScenarioStep::Wait { millis: 3_000 },
                assert_balance("dave", "0.75"),
            ],
        }
    }

    /// The chain pays out but the ledger cannot record it.
    fn persist_mismatch() -> Self {
        Self {
            name: "persist-mismatch".to_string(),
            description: "A confirmed payout the ledger cannot record is surfaced".to_string(),
            steps: vec![
                ScenarioStep::Deposit {
                    wallet: "erin".to_string(),
                    amount: "1".to_string(),
                },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::StoreOutage { failed_writes: 3 },
                },
                ScenarioStep::Withdraw {
                    wallet: "erin".to_string(),
                    amount: "0.5".to_string(),
                },
                assert_outcome("SETTLEMENT_PERSIST_MISMATCH"),
                assert_balance("erin", "1"),
            ],
        }
    }

    /// The chain never answers.
    fn chain_hang() -> Self {
        Self {
            name: "chain-hang".to_string(),
            description: "An unanswered chain call is reported as unknown".to_string(),
            steps: vec![
                ScenarioStep::Deposit {
                    wallet: "alice".to_string(),
                    amount: "1".to_string(),
                },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::ChainHang,
                },
                ScenarioStep::Withdraw {
                    wallet: "alice".to_string(),
                    amount: "0.5".to_string(),
                },
                assert_outcome("CHAIN_CALL_UNKNOWN"),
                assert_balance("alice", "1"),
            ],
        }
    }
}

fn assert_balance(wallet: &str, amount: &str) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::BalanceEquals {
            wallet: wallet.to_string(),
            amount: amount.to_string(),
        },
    }
}

fn assert_outcome(code: &str) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::LastOutcome {
            code: code.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_named_scenarios_load() {
        for name in Scenario::names() {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(&scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }
        assert!(Scenario::load("nope").is_err());
    }
}
