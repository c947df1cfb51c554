use libexo_core::types::GWEI;

/// Fixed-tip EIP-1559 fee strategy: `max_fee = base_fee + 2 * priority_fee`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub priority_fee: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::from_gwei(2)
    }
}

impl FeePolicy {
    pub fn from_gwei(priority_fee_gwei: u64) -> Self {
        Self {
            priority_fee: priority_fee_gwei as u128 * GWEI,
        }
    }

    pub fn fees(&self, base_fee: u128) -> Fees {
        Fees {
            max_fee_per_gas: base_fee
                .saturating_add(self.priority_fee.saturating_mul(2)),
            max_priority_fee_per_gas: self.priority_fee,
        }
    }
}
