use std::fmt::Debug;

use ethers::{
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Eip1559TransactionRequest, H160,
    },
};
use libexo_core::{
    blockchain::transaction::{PendingTransaction, SignedTransaction},
    error::ExoError,
    types::{keccak256, Address, Bytes},
};

/// The operator identity. Loaded once from a secret key and never mutated;
/// the nonce lives on chain.
pub struct Account {
    wallet: LocalWallet,
    address: Address,
}

impl Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish()
    }
}

impl Account {
    /// Load from a hex-encoded secp256k1 secret, with or without `0x`.
    pub fn from_secret(secret: &str) -> Result<Self, ExoError> {
        let secret = secret.trim();
        let secret = secret.strip_prefix("0x").unwrap_or(secret);
        let bytes = hex::decode(secret).map_err(|e| {
            ExoError::Config(format!("malformed signing key: {}", e))
        })?;
        if bytes.len() != 32 {
            return Err(ExoError::Config(format!(
                "signing key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let wallet = LocalWallet::from_bytes(&bytes).map_err(|e| {
            ExoError::Config(format!("invalid signing key: {}", e))
        })?;
        let address = Address::from_slice(wallet.address().as_bytes());
        Ok(Self { wallet, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign `tx` as an EIP-1559 envelope.
    /// Deterministic: the same request always yields the same bytes.
    pub fn sign(
        &self,
        tx: &PendingTransaction,
    ) -> Result<SignedTransaction, ExoError> {
        if tx.from != self.address {
            return Err(ExoError::Signing(format!(
                "sender {} is not the loaded account {}",
                tx.from, self.address
            )));
        }
        let typed = eip1559_request(tx);
        let sig = self
            .wallet
            .sign_transaction_sync(&typed)
            .map_err(|e| ExoError::Signing(e.to_string()))?;
        let raw = Bytes::from(typed.rlp_signed(&sig).to_vec());
        Ok(SignedTransaction {
            hash: keccak256(&raw),
            raw,
            tx: tx.clone(),
        })
    }
}

fn eip1559_request(tx: &PendingTransaction) -> TypedTransaction {
    let value =
        ethers::types::U256::from_big_endian(&tx.value.to_be_bytes::<32>());
    let mut req = Eip1559TransactionRequest::new()
        .from(H160::from_slice(tx.from.as_slice()))
        .data(ethers::types::Bytes::from(tx.input.to_vec()))
        .value(value)
        .nonce(tx.nonce)
        .gas(tx.gas_limit)
        .max_fee_per_gas(tx.max_fee_per_gas)
        .max_priority_fee_per_gas(tx.max_priority_fee_per_gas)
        .chain_id(tx.chain_id);
    if let Some(to) = tx.to {
        req = req.to(H160::from_slice(to.as_slice()));
    }
    req.into()
}
