use libexo_core::{
    blockchain::{
        client::ChainClient,
        transaction::{CallRequest, PendingTransaction, SignedTransaction},
    },
    error::ExoError,
    types::{ChainId, TxHash},
};
use libexo_utils::log::{debug, warn};

use crate::{account::Account, fee::FeePolicy};

/// Turns [`CallRequest`]s into signed EIP-1559 transactions for one account
/// on one chain.
///
/// The nonce is read from the chain on every build, right before signing.
/// Nothing is cached between builds, and nothing is built while an earlier
/// transaction of the account is still pending.
pub struct TransactionBuilder<C: ChainClient> {
    client: C,
    account: Account,
    chain_id: ChainId,
    fee_policy: FeePolicy,
}

impl<C: ChainClient> TransactionBuilder<C> {
    /// Query the chain id from `client`.
    pub fn new(
        client: C,
        account: Account,
        fee_policy: FeePolicy,
    ) -> Result<Self, ExoError> {
        let chain_id = client.chain_id()?;
        Ok(Self::with_chain_id(client, account, chain_id, fee_policy))
    }

    pub fn with_chain_id(
        client: C,
        account: Account,
        chain_id: ChainId,
        fee_policy: FeePolicy,
    ) -> Self {
        Self {
            client,
            account,
            chain_id,
            fee_policy,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }
}

impl<C: ChainClient> TransactionBuilder<C> {
    pub fn build(
        &self,
        request: &CallRequest,
    ) -> Result<SignedTransaction, ExoError> {
        let from = self.account.address();
        let gas_limit = match request.gas {
            Some(gas) => gas,
            None => self.client.estimate_gas(from, request)?,
        };
        let fees = self.fee_policy.fees(self.client.base_fee()?);
        let nonce = self.client.nonce(from)?;
        let pending = self.client.pending_nonce(from)?;
        if pending > nonce {
            // signing `nonce` again would replace the pending transaction
            return Err(ExoError::Custom(format!(
                "nonce {} is held by {} pending transaction(s) of {}",
                nonce,
                pending - nonce,
                from
            )));
        }
        let tx = PendingTransaction {
            chain_id: self.chain_id,
            from,
            to: request.to,
            input: request.data.clone(),
            value: request.value,
            nonce,
            gas_limit,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        };
        debug!(
            nonce,
            gas_limit,
            max_fee = fees.max_fee_per_gas,
            to = ?request.to,
            "transaction built"
        );
        self.account.sign(&tx)
    }

    pub fn submit(
        &self,
        signed: &SignedTransaction,
    ) -> Result<TxHash, ExoError> {
        let hash = self.client.submit(signed.raw.clone())?;
        if hash != signed.hash {
            warn!(local = %signed.hash, node = %hash, "node reported a different transaction hash");
        }
        Ok(hash)
    }

    /// Build and submit. Returns the signed transaction, whose hash is the
    /// one the node acknowledged.
    pub fn send(
        &self,
        request: &CallRequest,
    ) -> Result<SignedTransaction, ExoError> {
        let mut signed = self.build(request)?;
        signed.hash = self.submit(&signed)?;
        Ok(signed)
    }
}
