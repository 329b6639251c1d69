//! Simulation metrics.

use std::collections::VecDeque;

use ethsettle_common::SettleError;

/// Kind of operation driven by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Deposit,
    Withdrawal,
}

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total operations attempted.
    pub total_operations: u64,
    /// Deposits applied.
    pub deposits: u64,
    /// Withdrawals settled on chain and in the ledger.
    pub withdrawals_settled: u64,
    /// Withdrawals refused before the chain call.
    pub withdrawals_rejected: u64,
    /// Withdrawals the chain refused.
    pub withdrawals_chain_failed: u64,
    /// Withdrawals needing reconciliation.
    pub withdrawals_unreconciled: u64,
    /// Other failures.
    pub other_failures: u64,
    /// Latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            deposits: 0,
            withdrawals_settled: 0,
            withdrawals_rejected: 0,
            withdrawals_chain_failed: 0,
            withdrawals_unreconciled: 0,
            other_failures: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record the outcome of one operation.
    pub fn record<T>(
        &mut self,
        kind: OperationKind,
        result: &Result<T, SettleError>,
        latency_ms: u64,
    ) {
        self.total_operations += 1;

        match (kind, result) {
            (OperationKind::Deposit, Ok(_)) => self.deposits += 1,
            (OperationKind::Withdrawal, Ok(_)) => self.withdrawals_settled += 1,
            (
                OperationKind::Withdrawal,
                Err(SettleError::InsufficientBalance { .. } | SettleError::AccountNotFound(_)),
            ) => self.withdrawals_rejected += 1,
            (OperationKind::Withdrawal, Err(SettleError::ChainCallFailed { .. })) => {
                self.withdrawals_chain_failed += 1
            }
            (_, Err(e)) if e.requires_reconciliation() => self.withdrawals_unreconciled += 1,
            (_, Err(_)) => self.other_failures += 1,
        }

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 latency.
    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethsettle_common::ChainFailureKind;
    use rust_decimal::Decimal;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record(OperationKind::Deposit, &Ok::<(), _>(()), 100);
        metrics.record(OperationKind::Withdrawal, &Ok::<(), _>(()), 200);
        metrics.record(
            OperationKind::Withdrawal,
            &Err::<(), _>(SettleError::InsufficientBalance {
                required: Decimal::ONE,
                available: Decimal::ZERO,
            }),
            150,
        );
        metrics.record(
            OperationKind::Withdrawal,
            &Err::<(), _>(SettleError::ChainCallFailed {
                kind: ChainFailureKind::Reverted,
                message: "revert".to_string(),
            }),
            150,
        );

        assert_eq!(metrics.total_operations, 4);
        assert_eq!(metrics.deposits, 1);
        assert_eq!(metrics.withdrawals_settled, 1);
        assert_eq!(metrics.withdrawals_rejected, 1);
        assert_eq!(metrics.withdrawals_chain_failed, 1);
        assert_eq!(metrics.average_latency_ms(), 150);
        assert_eq!(metrics.p99_latency_ms(), 200);
    }
}
