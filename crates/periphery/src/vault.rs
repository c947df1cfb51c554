use libexo_core::{
    blockchain::{client::ChainClient, transaction::CallRequest},
    error::ExoError,
    types::{Address, U256},
};

use crate::{
    abi::VaultABI,
    conversion::{ret_bool, ret_uint, PeripheryConvertTo},
    proxy::ContractProxy,
};

/// `getContractInfo()` of the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VaultInfo {
    pub total_balance: U256,
    pub initial_balance: U256,
    /// Maximum deposit per depositor.
    pub cap: U256,
}

#[derive(Debug, Clone)]
pub struct VaultProxy {
    inner: ContractProxy,
}

impl VaultProxy {
    pub fn new(address: Address) -> Self {
        Self {
            inner: ContractProxy::new(address, &VaultABI),
        }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub fn get_contract_info<C: ChainClient>(
        &self,
        client: &C,
    ) -> Result<VaultInfo, ExoError> {
        let f = "getContractInfo";
        let rets = self.inner.read(client, None, f, &[])?;
        Ok(VaultInfo {
            total_balance: ret_uint(&rets, 0, f)?,
            initial_balance: ret_uint(&rets, 1, f)?,
            cap: ret_uint(&rets, 2, f)?,
        })
    }

    pub fn deposits<C: ChainClient>(
        &self,
        client: &C,
        user: Address,
    ) -> Result<U256, ExoError> {
        let f = "deposits";
        let rets = self.inner.read(client, None, f, &[user.cvt2()])?;
        ret_uint(&rets, 0, f)
    }

    pub fn check_if_exploited<C: ChainClient>(
        &self,
        client: &C,
        contract: Address,
    ) -> Result<bool, ExoError> {
        let f = "checkIfExploited";
        let rets = self.inner.read(client, None, f, &[contract.cvt2()])?;
        ret_bool(&rets, 0, f)
    }

    pub fn deposit(&self, value: U256) -> Result<CallRequest, ExoError> {
        Ok(self.inner.write("deposit", &[])?.with_value(value))
    }

    pub fn withdraw(&self, amount: U256) -> Result<CallRequest, ExoError> {
        self.inner.write("withdraw", &[amount.cvt2()])
    }
}
