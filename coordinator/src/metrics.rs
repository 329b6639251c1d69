//! Metrics collection for coordinator monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Coordinator metrics.
pub struct Metrics {
    /// Total deposits applied.
    pub deposits_total: AtomicU64,
    /// Deposits that failed.
    pub deposits_failed: AtomicU64,
    /// Total withdrawals requested.
    pub withdrawals_total: AtomicU64,
    /// Withdrawals settled on chain and in the ledger.
    pub withdrawals_success: AtomicU64,
    /// Withdrawals refused before the chain call.
    pub withdrawals_rejected: AtomicU64,
    /// Withdrawals the chain definitely did not execute.
    pub withdrawals_chain_failed: AtomicU64,
    /// Withdrawals whose chain outcome was unknown at the deadline.
    pub withdrawals_chain_unknown: AtomicU64,
    /// Withdrawals confirmed on chain but not recorded in the ledger.
    pub withdrawals_inconsistent: AtomicU64,
    /// Withdrawals holding an account's critical section.
    pub withdrawals_active: AtomicU64,
    /// Timed-out chain calls that later resolved.
    pub late_outcomes_resolved: AtomicU64,
    /// Timed-out chain calls that never resolved within the grace period.
    pub late_outcomes_unresolved: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            deposits_total: AtomicU64::new(0),
            deposits_failed: AtomicU64::new(0),
            withdrawals_total: AtomicU64::new(0),
            withdrawals_success: AtomicU64::new(0),
            withdrawals_rejected: AtomicU64::new(0),
            withdrawals_chain_failed: AtomicU64::new(0),
            withdrawals_chain_unknown: AtomicU64::new(0),
            withdrawals_inconsistent: AtomicU64::new(0),
            withdrawals_active: AtomicU64::new(0),
            late_outcomes_resolved: AtomicU64::new(0),
            late_outcomes_unresolved: AtomicU64::new(0),
        }
    }

    /// Record a deposit.
    pub fn deposit_applied(&self) {
        self.deposits_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed deposit.
    pub fn deposit_failed(&self) {
        self.deposits_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a withdrawal request.
    pub fn withdrawal_initiated(&self) {
        self.withdrawals_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a withdrawal entering its critical section.
    pub fn withdrawal_started(&self) {
        self.withdrawals_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a withdrawal leaving its critical section.
    pub fn withdrawal_finished(&self) {
        self.withdrawals_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record withdrawal success.
    pub fn withdrawal_success(&self) {
        self.withdrawals_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a withdrawal refused before the chain call.
    pub fn withdrawal_rejected(&self) {
        self.withdrawals_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chain failure.
    pub fn withdrawal_chain_failed(&self) {
        self.withdrawals_chain_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an unknown chain outcome.
    pub fn withdrawal_chain_unknown(&self) {
        self.withdrawals_chain_unknown.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chain success the ledger could not record.
    pub fn withdrawal_inconsistent(&self) {
        self.withdrawals_inconsistent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a late chain outcome.
    pub fn late_outcome_resolved(&self) {
        self.late_outcomes_resolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chain call abandoned after the grace period.
    pub fn late_outcome_unresolved(&self) {
        self.late_outcomes_unresolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            deposits_total: self.deposits_total.load(Ordering::Relaxed),
            deposits_failed: self.deposits_failed.load(Ordering::Relaxed),
            withdrawals_total: self.withdrawals_total.load(Ordering::Relaxed),
            withdrawals_success: self.withdrawals_success.load(Ordering::Relaxed),
            withdrawals_rejected: self.withdrawals_rejected.load(Ordering::Relaxed),
            withdrawals_chain_failed: self.withdrawals_chain_failed.load(Ordering::Relaxed),
            withdrawals_chain_unknown: self.withdrawals_chain_unknown.load(Ordering::Relaxed),
            withdrawals_inconsistent: self.withdrawals_inconsistent.load(Ordering::Relaxed),
            withdrawals_active: self.withdrawals_active.load(Ordering::Relaxed),
            late_outcomes_resolved: self.late_outcomes_resolved.load(Ordering::Relaxed),
            late_outcomes_unresolved: self.late_outcomes_unresolved.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP ethsettle_deposits_total Total deposits applied
# TYPE ethsettle_deposits_total counter
ethsettle_deposits_total {}

# HELP ethsettle_deposits_failed Total failed deposits
# TYPE ethsettle_deposits_failed counter
ethsettle_deposits_failed {}

# HELP ethsettle_withdrawals_total Total withdrawals requested
# TYPE ethsettle_withdrawals_total counter
ethsettle_withdrawals_total {}

# HELP ethsettle_withdrawals_success Total withdrawals settled
# TYPE ethsettle_withdrawals_success counter
ethsettle_withdrawals_success {}

# HELP ethsettle_withdrawals_rejected Total withdrawals refused before the chain call
# TYPE ethsettle_withdrawals_rejected counter
ethsettle_withdrawals_rejected {}

# HELP ethsettle_withdrawals_chain_failed Total withdrawals failed on chain
# TYPE ethsettle_withdrawals_chain_failed counter
ethsettle_withdrawals_chain_failed {}

# HELP ethsettle_withdrawals_chain_unknown Total withdrawals with unknown chain outcome
# TYPE ethsettle_withdrawals_chain_unknown counter
ethsettle_withdrawals_chain_unknown {}

# HELP ethsettle_withdrawals_inconsistent Total withdrawals settled on chain but not in the ledger
# TYPE ethsettle_withdrawals_inconsistent counter
ethsettle_withdrawals_inconsistent {}

# HELP ethsettle_withdrawals_active Current withdrawals in progress
# TYPE ethsettle_withdrawals_active gauge
ethsettle_withdrawals_active {}

# HELP ethsettle_late_outcomes_resolved Total timed-out chain calls that later resolved
# TYPE ethsettle_late_outcomes_resolved counter
ethsettle_late_outcomes_resolved {}

# HELP ethsettle_late_outcomes_unresolved Total timed-out chain calls abandoned
# TYPE ethsettle_late_outcomes_unresolved counter
ethsettle_late_outcomes_unresolved {}
"#,
            snapshot.deposits_total,
            snapshot.deposits_failed,
            snapshot.withdrawals_total,
            snapshot.withdrawals_success,
            snapshot.withdrawals_rejected,
            snapshot.withdrawals_chain_failed,
            snapshot.withdrawals_chain_unknown,
            snapshot.withdrawals_inconsistent,
            snapshot.withdrawals_active,
            snapshot.late_outcomes_resolved,
            snapshot.late_outcomes_unresolved,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub deposits_total: u64,
    pub deposits_failed: u64,
    pub withdrawals_total: u64,
    pub withdrawals_success: u64,
    pub withdrawals_rejected: u64,
    pub withdrawals_chain_failed: u64,
    pub withdrawals_chain_unknown: u64,
    pub withdrawals_inconsistent: u64,
    pub withdrawals_active: u64,
    pub late_outcomes_resolved: u64,
    pub late_outcomes_unresolved: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.withdrawal_initiated();
        metrics.withdrawal_initiated();
        metrics.withdrawal_started();
        metrics.withdrawal_success();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.withdrawals_total, 2);
        assert_eq!(snapshot.withdrawals_success, 1);
        assert_eq!(snapshot.withdrawals_active, 1);

        metrics.withdrawal_finished();
        assert_eq!(metrics.snapshot().withdrawals_active, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.deposit_applied();
        metrics.withdrawal_inconsistent();

        let output = metrics.to_prometheus();
        assert!(output.contains("ethsettle_deposits_total 1"));
        assert!(output.contains("ethsettle_withdrawals_inconsistent 1"));
    }
}
