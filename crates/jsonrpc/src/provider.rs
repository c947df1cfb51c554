use std::time::Duration;

use alloy_sol_types::{Revert, SolError};
use ethers::{
    providers::{Http, Middleware, Provider, ProviderError, RpcError},
    types::{
        transaction::eip2718::TypedTransaction, BlockNumber,
        Eip1559TransactionRequest,
    },
};
use libexo_core::{
    blockchain::{
        client::ChainClient,
        transaction::{CallRequest, Receipt},
    },
    error::ExoError,
    types::{Address, Bytes, TxHash, U256},
};
use libexo_utils::{log::warn, sync::runtime::AsyncRuntime};

use crate::conversion::JsonRpcConvertTo;

/// [`ChainClient`] over an HTTP JSON-RPC endpoint.
/// Calls block on a private runtime, so the client is usable from plain
/// synchronous code.
pub struct JsonRpcClient {
    pub(crate) p: Provider<Http>,
    rt: AsyncRuntime,
    poll_interval: Duration,
}

impl JsonRpcClient {
    pub fn new(url: &str, poll_interval: Duration) -> Result<Self, ExoError> {
        let p = Provider::<Http>::try_from(url).map_err(|e| {
            ExoError::Config(format!("invalid endpoint {}: {}", url, e))
        })?;
        Ok(Self {
            p,
            rt: AsyncRuntime::new(),
            poll_interval,
        })
    }

    fn typed_tx(from: Option<Address>, request: &CallRequest) -> TypedTransaction {
        let data: ethers::types::Bytes = request.data.cvt2();
        let value: ethers::types::U256 = request.value.cvt2();
        let mut tx = Eip1559TransactionRequest::new().data(data).value(value);
        if let Some(from) = from {
            let from: ethers::types::H160 = from.cvt2();
            tx = tx.from(from);
        }
        if let Some(to) = request.to {
            let to: ethers::types::H160 = to.cvt2();
            tx = tx.to(to);
        }
        if let Some(gas) = request.gas {
            tx = tx.gas(gas);
        }
        tx.into()
    }

    fn transaction_count(
        &self,
        address: Address,
        block: BlockNumber,
    ) -> Result<u64, ExoError> {
        let addr: ethers::types::H160 = address.cvt2();
        let task = self.p.get_transaction_count(addr, Some(block.into()));
        let nonce = self.rt.block_on(task).map_err(|e| {
            ExoError::Rpc(format!(
                "failed to get {:?} transaction count of {}: {}",
                block, address, e
            ))
        })?;
        Ok(nonce.as_u64())
    }
}

/// The node's message, or the decoded `Error(string)` reason when the error
/// carries revert data.
fn describe(e: &ProviderError) -> String {
    let reason = e
        .as_error_response()
        .and_then(|r| r.as_revert_data())
        .and_then(|data| Revert::abi_decode(&data, true).ok());
    match reason {
        Some(r) => format!("execution reverted: {}", r.reason),
        None => e.to_string(),
    }
}

impl ChainClient for JsonRpcClient {
    fn chain_id(&self) -> Result<u64, ExoError> {
        let task = self.p.get_chainid();
        let id = self.rt.block_on(task).map_err(|e| {
            ExoError::Rpc(format!("failed to get chain id: {}", e))
        })?;
        Ok(id.as_u64())
    }

    fn base_fee(&self) -> Result<u128, ExoError> {
        let task = self.p.get_block(BlockNumber::Latest);
        let blk = self
            .rt
            .block_on(task)
            .map_err(|e| {
                ExoError::Rpc(format!("failed to get latest block: {}", e))
            })?
            .ok_or(ExoError::NotFound("latest block".to_string()))?;
        blk.base_fee_per_gas
            .map(|f| f.as_u128())
            .ok_or(ExoError::NotFound(
                "base fee of latest block (pre-London chain?)".to_string(),
            ))
    }

    fn balance(&self, address: Address) -> Result<U256, ExoError> {
        let addr: ethers::types::H160 = address.cvt2();
        let task = self.p.get_balance(addr, None);
        let balance = self.rt.block_on(task).map_err(|e| {
            ExoError::Rpc(format!("failed to get balance of {}: {}", address, e))
        })?;
        Ok(balance.cvt2())
    }

    fn nonce(&self, address: Address) -> Result<u64, ExoError> {
        self.transaction_count(address, BlockNumber::Latest)
    }

    fn pending_nonce(&self, address: Address) -> Result<u64, ExoError> {
        self.transaction_count(address, BlockNumber::Pending)
    }

    fn estimate_gas(
        &self,
        from: Address,
        request: &CallRequest,
    ) -> Result<u64, ExoError> {
        let tx = Self::typed_tx(Some(from), request);
        let task = self.p.estimate_gas(&tx, None);
        let gas = self
            .rt
            .block_on(task)
            .map_err(|e| ExoError::Estimation(describe(&e)))?;
        Ok(gas.as_u64())
    }

    fn call(
        &self,
        from: Option<Address>,
        to: Address,
        data: Bytes,
    ) -> Result<Bytes, ExoError> {
        let tx = Self::typed_tx(from, &CallRequest::call(to, data));
        let task = self.p.call(&tx, None);
        let ret = self
            .rt
            .block_on(task)
            .map_err(|e| {
                ExoError::Call(format!("call to {}: {}", to, describe(&e)))
            })?;
        Ok(ret.cvt2())
    }

    fn submit(&self, raw: Bytes) -> Result<TxHash, ExoError> {
        let task = async {
            let raw: ethers::types::Bytes = raw.cvt2();
            let pending = self.p.send_raw_transaction(raw).await?;
            Ok::<_, ethers::providers::ProviderError>(pending.tx_hash())
        };
        let hash = self.rt.block_on(task).map_err(|e| {
            ExoError::Rpc(format!("transaction rejected: {}", e))
        })?;
        Ok(hash.cvt2())
    }

    fn receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ExoError> {
        let h: ethers::types::H256 = hash.cvt2();
        let task = self.p.get_transaction_receipt(h);
        let receipt = self.rt.block_on(task).map_err(|e| {
            ExoError::Rpc(format!("failed to get receipt of {}: {}", hash, e))
        })?;
        Ok(receipt.map(|r| r.cvt2()))
    }

    fn is_known(&self, hash: TxHash) -> Result<bool, ExoError> {
        let h: ethers::types::H256 = hash.cvt2();
        let task = self.p.get_transaction(h);
        let tx = self.rt.block_on(task).map_err(|e| {
            ExoError::Rpc(format!("failed to get transaction {}: {}", hash, e))
        })?;
        Ok(tx.is_some())
    }

    fn wait_for_receipt(
        &self,
        hash: TxHash,
        timeout: Duration,
    ) -> Result<Receipt, ExoError> {
        let h: ethers::types::H256 = hash.cvt2();
        let poll = async {
            loop {
                match self.p.get_transaction_receipt(h).await {
                    Ok(Some(r)) => return r,
                    Ok(None) => {}
                    // transient failures do not end the wait, the bound does
                    Err(e) => {
                        warn!(tx = %hash, error = %e, "receipt lookup failed")
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        self.rt
            .block_on_timeout(poll, timeout)
            .map(|r| r.cvt2())
            .ok_or(ExoError::Timeout {
                hash,
                waited: timeout,
            })
    }
}
