use std::time::Duration;

use auto_impl::auto_impl;
use mockall::automock;

use crate::error::ExoError;
use crate::types::{Address, Bytes, TxHash, U256};

use super::transaction::{CallRequest, Receipt};

/// Access to a single chain on behalf of one operator.
///
/// Every query reflects the chain state at call time; implementations keep no
/// transaction history and no nonce cache.
#[auto_impl(&, Box)]
#[automock]
pub trait ChainClient {
    // chain info
    fn chain_id(&self) -> Result<u64, ExoError>;
    fn base_fee(&self) -> Result<u128, ExoError>;

    // account info
    fn balance(&self, address: Address) -> Result<U256, ExoError>;

    /// Number of transactions confirmed for `address` at the latest block.
    fn nonce(&self, address: Address) -> Result<u64, ExoError>;

    /// Number of transactions for `address` counting the ones still pending.
    fn pending_nonce(&self, address: Address) -> Result<u64, ExoError>;

    // execution
    /// Estimate gas for `request` sent by `from`.
    /// Fails with [`ExoError::Estimation`] when the node cannot estimate.
    fn estimate_gas(
        &self,
        from: Address,
        request: &CallRequest,
    ) -> Result<u64, ExoError>;

    /// Read-only call against the latest state.
    /// Fails with [`ExoError::Call`] when the call reverts.
    fn call(
        &self,
        from: Option<Address>,
        to: Address,
        data: Bytes,
    ) -> Result<Bytes, ExoError>;

    // transactions
    /// Submit a signed transaction envelope and return its hash.
    fn submit(&self, raw: Bytes) -> Result<TxHash, ExoError>;

    /// Receipt of a transaction, if it has been included.
    fn receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ExoError>;

    /// Whether the node knows the transaction at all, pending or included.
    fn is_known(&self, hash: TxHash) -> Result<bool, ExoError>;

    /// Block until the receipt appears or `timeout` elapses.
    /// A [`ExoError::Timeout`] means the outcome is unknown, not failed.
    fn wait_for_receipt(
        &self,
        hash: TxHash,
        timeout: Duration,
    ) -> Result<Receipt, ExoError>;
}
