#![allow(non_upper_case_globals)]

use alloy_dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy_json_abi::{Function, JsonAbi};
use lazy_static::lazy_static;
use libexo_core::{error::ExoError, types::Bytes};

pub const HELPER_SOURCE: &str = include_str!("../contracts/ReentryAgent.sol");
pub const HELPER_CONTRACT_NAME: &str = "ReentryAgent";

lazy_static! {
    pub static ref GatewayABI: JsonAbi =
        serde_json::from_str(include_str!("../abi/Gateway.json"))
            .expect("bug: invalid gateway abi");
    pub static ref VaultABI: JsonAbi =
        serde_json::from_str(include_str!("../abi/Vault.json"))
            .expect("bug: invalid vault abi");
    pub static ref HelperABI: JsonAbi =
        serde_json::from_str(include_str!("../abi/ReentryAgent.json"))
            .expect("bug: invalid helper abi");
}

/// Find the function whose selector prefixes `calldata` and decode its
/// arguments.
pub fn decode_call<'a>(
    abi: &'a JsonAbi,
    calldata: &[u8],
) -> Result<(&'a Function, Vec<DynSolValue>), ExoError> {
    if calldata.len() < 4 {
        return Err(ExoError::Abi(format!(
            "calldata too short: {} bytes",
            calldata.len()
        )));
    }
    let func = abi
        .functions()
        .find(|f| f.selector().as_slice() == &calldata[..4])
        .ok_or(ExoError::Abi(format!(
            "unknown selector 0x{}",
            hex::encode(&calldata[..4])
        )))?;
    let args = func
        .abi_decode_input(&calldata[4..], true)
        .map_err(|e| {
            ExoError::Abi(format!("failed to decode {} input: {}", func.name, e))
        })?;
    Ok((func, args))
}

pub fn encode_return(
    func: &Function,
    values: &[DynSolValue],
) -> Result<Bytes, ExoError> {
    func.abi_encode_output(values).map(Bytes::from).map_err(|e| {
        ExoError::Abi(format!("failed to encode {} output: {}", func.name, e))
    })
}
