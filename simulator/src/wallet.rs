//! Simulated wallets.

use rand::Rng;

use ethsettle_common::WalletAddress;

/// A simulated wallet holder.
#[derive(Debug, Clone)]
pub struct SimulatedWallet {
    /// Normalized address.
    pub address: WalletAddress,
    /// Name used by scenarios.
    pub label: String,
}

impl SimulatedWallet {
    /// Create a new simulated wallet.
    pub fn new(address: WalletAddress, label: impl Into<String>) -> Self {
        Self {
            address,
            label: label.into(),
        }
    }

    /// The address with upper-case hex digits, as some wallets render it.
    pub fn upper_case_address(&self) -> String {
        format!("0x{}", self.address.as_str()[2..].to_uppercase())
    }
}

/// Wallet factory for creating test wallets.
pub struct WalletFactory;

impl WalletFactory {
    /// Create N wallets with random addresses.
    pub fn create_wallets(
        count: usize,
        rng: &mut impl Rng,
    ) -> anyhow::Result<Vec<SimulatedWallet>> {
        let labels = ["alice", "bob", "carol", "dave", "erin", "frank", "grace", "heidi"];

        (0..count)
            .map(|i| -> anyhow::Result<SimulatedWallet> {
                let bytes: [u8; 20] = rng.gen();
                let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                let address = WalletAddress::parse(&format!("0x{hex}"))?;
                let label = match labels.get(i) {
                    Some(label) => label.to_string(),
                    None => format!("wallet-{}", i + 1),
                };
                Ok(SimulatedWallet::new(address, label))
            })
            .collect()
    }
}
