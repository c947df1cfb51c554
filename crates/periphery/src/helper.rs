use libexo_core::{
    blockchain::{client::ChainClient, transaction::CallRequest},
    error::ExoError,
    types::{Address, Bytes, U256},
};
use libexo_utils::solidity::compiler::compile_named_contract;

use crate::{
    abi::{HelperABI, HELPER_CONTRACT_NAME, HELPER_SOURCE},
    conversion::{ret_address, ret_bool, PeripheryConvertTo},
    proxy::{deploy_request, ContractProxy},
};

/// Deployment bytecode of the reentrant helper, compiled from the bundled
/// source.
pub fn compile_helper(solc_version: &str) -> Result<Bytes, ExoError> {
    compile_named_contract(solc_version, HELPER_SOURCE, HELPER_CONTRACT_NAME)
}

/// The operator-owned contract that borrows from the vault and performs the
/// privileged action inside the loan callback.
#[derive(Debug, Clone)]
pub struct HelperProxy {
    inner: ContractProxy,
}

impl HelperProxy {
    pub fn at(address: Address) -> Self {
        Self {
            inner: ContractProxy::new(address, &HelperABI),
        }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Creation request funding the helper with `value`.
    pub fn deploy(
        bytecode: &Bytes,
        vault: Address,
        value: U256,
    ) -> Result<CallRequest, ExoError> {
        Ok(deploy_request(&HelperABI, bytecode, &[vault.cvt2()])?
            .with_value(value))
    }

    pub fn trigger(&self) -> Result<CallRequest, ExoError> {
        self.inner.write("trigger", &[])
    }

    pub fn cleanup(&self) -> Result<CallRequest, ExoError> {
        self.inner.write("cleanup", &[])
    }

    pub fn emergency_withdraw(&self) -> Result<CallRequest, ExoError> {
        self.inner.write("emergencyWithdraw", &[])
    }

    pub fn exploit_complete<C: ChainClient>(
        &self,
        client: &C,
    ) -> Result<bool, ExoError> {
        let f = "exploitComplete";
        let rets = self.inner.read(client, None, f, &[])?;
        ret_bool(&rets, 0, f)
    }

    pub fn owner<C: ChainClient>(&self, client: &C) -> Result<Address, ExoError> {
        let f = "owner";
        let rets = self.inner.read(client, None, f, &[])?;
        ret_address(&rets, 0, f)
    }

    pub fn vault<C: ChainClient>(&self, client: &C) -> Result<Address, ExoError> {
        let f = "vault";
        let rets = self.inner.read(client, None, f, &[])?;
        ret_address(&rets, 0, f)
    }
}

#[cfg(test)]
mod tests {
    use libexo_core::types::{Address, Bytes, U256};

    use super::{compile_helper, HelperProxy};

    #[test]
    fn test_deploy_request_is_funded_create() {
        let code = Bytes::from(vec![0xfe]);
        let req =
            HelperProxy::deploy(&code, Address::repeat_byte(3), U256::from(11))
                .unwrap();
        assert!(req.is_create());
        assert_eq!(req.value, U256::from(11));
        assert_eq!(req.data.len(), 1 + 32);
    }

    #[test]
    fn test_owner_only_writes_target_helper() {
        let helper = HelperProxy::at(Address::repeat_byte(4));
        for req in [
            helper.trigger().unwrap(),
            helper.cleanup().unwrap(),
            helper.emergency_withdraw().unwrap(),
        ] {
            assert_eq!(req.to, Some(helper.address()));
            assert_eq!(req.data.len(), 4);
        }
    }

    #[test]
    #[ignore = "Requires downloading solc through svm."]
    fn test_compile_bundled_helper() {
        let code = compile_helper("0.8.19").unwrap();
        assert!(!code.is_empty());
    }
}
