use libexo_core::{
    blockchain::{client::ChainClient, transaction::CallRequest},
    error::ExoError,
    types::{Address, Bytes, B256, U256},
};

use crate::{
    abi::GatewayABI,
    conversion::{ret_b256, ret_bool, ret_uint, PeripheryConvertTo},
    proxy::ContractProxy,
};

/// Authorization record returned by `getUserAuthInfo(address)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthInfo {
    pub is_authorized: bool,
    pub level: U256,
    pub cooldown_ends: U256,
    pub has_exploited: bool,
}

#[derive(Debug, Clone)]
pub struct GatewayProxy {
    inner: ContractProxy,
}

impl GatewayProxy {
    pub fn new(address: Address) -> Self {
        Self {
            inner: ContractProxy::new(address, &GatewayABI),
        }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub fn request_authorization(&self) -> Result<CallRequest, ExoError> {
        self.inner.write("requestAuthorization", &[])
    }

    /// Raw `emergencyOverride(user, level)` calldata, meant to be nested
    /// inside [`Self::batch_process`].
    pub fn emergency_override_calldata(
        &self,
        user: Address,
        level: U256,
    ) -> Result<Bytes, ExoError> {
        self.inner
            .encode("emergencyOverride", &[user.cvt2(), level.cvt2()])
    }

    pub fn batch_process(
        &self,
        targets: Vec<Address>,
        data: Vec<Bytes>,
    ) -> Result<CallRequest, ExoError> {
        if targets.len() != data.len() {
            return Err(ExoError::Abi(format!(
                "batchProcess: {} targets but {} payloads",
                targets.len(),
                data.len()
            )));
        }
        self.inner
            .write("batchProcess", &[targets.cvt2(), data.cvt2()])
    }

    pub fn get_user_auth_info<C: ChainClient>(
        &self,
        client: &C,
        user: Address,
    ) -> Result<AuthInfo, ExoError> {
        let f = "getUserAuthInfo";
        let rets = self.inner.read(client, None, f, &[user.cvt2()])?;
        Ok(AuthInfo {
            is_authorized: ret_bool(&rets, 0, f)?,
            level: ret_uint(&rets, 1, f)?,
            cooldown_ends: ret_uint(&rets, 2, f)?,
            has_exploited: ret_bool(&rets, 3, f)?,
        })
    }

    pub fn has_exploited_vulnerability<C: ChainClient>(
        &self,
        client: &C,
        user: Address,
    ) -> Result<bool, ExoError> {
        let f = "hasExploitedVulnerability";
        let rets = self.inner.read(client, None, f, &[user.cvt2()])?;
        ret_bool(&rets, 0, f)
    }

    /// Only answers for callers at the maximum tier, hence the explicit
    /// `from`.
    pub fn get_verification_code<C: ChainClient>(
        &self,
        client: &C,
        from: Address,
    ) -> Result<B256, ExoError> {
        let f = "getVerificationCode";
        let rets = self.inner.read(client, Some(from), f, &[])?;
        ret_b256(&rets, 0, f)
    }
}

#[cfg(test)]
mod tests {
    use alloy_dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
    use libexo_core::{
        blockchain::client::MockChainClient,
        types::{Address, Bytes, U256},
    };

    use super::GatewayProxy;
    use crate::abi::{decode_call, GatewayABI};

    #[test]
    fn test_nested_override_payload() {
        let gw = GatewayProxy::new(Address::repeat_byte(0x99));
        let me = Address::repeat_byte(0x01);
        let inner = gw.emergency_override_calldata(me, U256::from(5)).unwrap();
        let req = gw
            .batch_process(vec![gw.address()], vec![inner.clone()])
            .unwrap();
        assert_eq!(req.to, Some(gw.address()));

        let (f, args) = decode_call(&GatewayABI, &req.data).unwrap();
        assert_eq!(f.name, "batchProcess");
        let DynSolValue::Array(payloads) = &args[1] else {
            panic!("payloads not an array")
        };
        assert_eq!(payloads[0].as_bytes(), Some(&inner[..]));
    }

    #[test]
    fn test_batch_length_mismatch() {
        let gw = GatewayProxy::new(Address::repeat_byte(0x99));
        assert!(gw.batch_process(vec![gw.address()], vec![]).is_err());
    }

    #[test]
    fn test_auth_info_decoding() {
        let gw = GatewayProxy::new(Address::repeat_byte(0x99));
        let func = &GatewayABI.function("getUserAuthInfo").unwrap()[0];
        let ret = func
            .abi_encode_output(&[
                DynSolValue::Bool(true),
                DynSolValue::Uint(U256::from(1), 256),
                DynSolValue::Uint(U256::from(1_700_000_000u64), 256),
                DynSolValue::Bool(false),
            ])
            .unwrap();
        let user = Address::repeat_byte(0x05);
        let expected = func.abi_encode_input(&[DynSolValue::Address(user)]).unwrap();

        let mut client = MockChainClient::new();
        client
            .expect_call()
            .withf(move |_, _, data| data[..] == expected[..])
            .returning(move |_, _, _| Ok(Bytes::from(ret.clone())));
        let info = gw.get_user_auth_info(&client, user).unwrap();
        assert!(info.is_authorized);
        assert_eq!(info.level, U256::from(1));
        assert!(!info.has_exploited);
    }
}
