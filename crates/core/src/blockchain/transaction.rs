use crate::types::{Address, BlockNumber, Bytes, ChainId, TxHash, U256};

/// An unsigned intent to call (or create) a contract.
/// Produced by contract proxies, consumed by the transaction builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRequest {
    /// `None` means contract creation, `data` then holds the init code.
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    /// Explicit gas limit. Estimated by the builder when not set.
    pub gas: Option<u64>,
}

impl CallRequest {
    pub fn call(to: Address, data: Bytes) -> Self {
        Self {
            to: Some(to),
            data,
            ..Default::default()
        }
    }

    pub fn create(init_code: Bytes) -> Self {
        Self {
            to: None,
            data: init_code,
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }
}

/// A fully resolved EIP-1559 transaction, not yet signed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PendingTransaction {
    pub chain_id: ChainId,
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
    pub value: U256,
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// A signed transaction envelope together with the request it signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hash: TxHash,
    pub raw: Bytes,
    pub tx: PendingTransaction,
}

impl SignedTransaction {
    pub fn nonce(&self) -> u64 {
        self.tx.nonce
    }

    pub fn sender(&self) -> Address {
        self.tx.from
    }
}

/// The chain's record of a transaction's inclusion and execution outcome.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub success: bool,
    pub contract_address: Option<Address>,
    pub block_number: Option<BlockNumber>,
    pub gas_used: u64,
}
