use alloy_dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy_json_abi::{Function, JsonAbi, StateMutability};
use libexo_core::{
    blockchain::{client::ChainClient, transaction::CallRequest},
    error::ExoError,
    types::{Address, Bytes},
};
use libexo_utils::log::trace;

/// A remote contract seen through its interface description.
///
/// Reads go through `eth_call` and reflect the chain state at call time.
/// Writes only produce a [`CallRequest`]; signing and submission are the
/// transaction builder's business.
#[derive(Debug, Clone)]
pub struct ContractProxy {
    pub address: Address,
    abi: &'static JsonAbi,
}

impl ContractProxy {
    pub fn new(address: Address, abi: &'static JsonAbi) -> Self {
        Self { address, abi }
    }

    pub fn abi(&self) -> &'static JsonAbi {
        self.abi
    }

    pub fn function(&self, name: &str) -> Result<&'static Function, ExoError> {
        self.abi
            .function(name)
            .and_then(|fs| fs.first())
            .ok_or(ExoError::Abi(format!("no function named {}", name)))
    }

    /// Calldata of `name(args)`, selector included.
    pub fn encode(
        &self,
        name: &str,
        args: &[DynSolValue],
    ) -> Result<Bytes, ExoError> {
        let func = self.function(name)?;
        func.abi_encode_input(args).map(Bytes::from).map_err(|e| {
            ExoError::Abi(format!("failed to encode {} input: {}", name, e))
        })
    }

    /// Invoke a view function and decode its return values.
    pub fn read<C: ChainClient>(
        &self,
        client: &C,
        from: Option<Address>,
        name: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, ExoError> {
        let func = self.function(name)?;
        let data = self.encode(name, args)?;
        let ret = client.call(from, self.address, data)?;
        trace!(contract = %self.address, function = name, ret = ?ret, "read");
        func.abi_decode_output(&ret, true).map_err(|e| {
            ExoError::Abi(format!("failed to decode {} output: {}", name, e))
        })
    }

    /// Unsigned request invoking a state-changing function.
    pub fn write(
        &self,
        name: &str,
        args: &[DynSolValue],
    ) -> Result<CallRequest, ExoError> {
        let func = self.function(name)?;
        if matches!(
            func.state_mutability,
            StateMutability::View | StateMutability::Pure
        ) {
            return Err(ExoError::Abi(format!("{} is read-only", name)));
        }
        let data = self.encode(name, args)?;
        Ok(CallRequest::call(self.address, data))
    }
}

/// Contract creation request: `bytecode ++ abi.encode(constructor args)`.
pub fn deploy_request(
    abi: &JsonAbi,
    bytecode: &Bytes,
    args: &[DynSolValue],
) -> Result<CallRequest, ExoError> {
    let mut init_code = bytecode.to_vec();
    match abi.constructor() {
        Some(ctor) => {
            let encoded = ctor.abi_encode_input(args).map_err(|e| {
                ExoError::Abi(format!("failed to encode constructor: {}", e))
            })?;
            init_code.extend(encoded);
        }
        None if !args.is_empty() => {
            return Err(ExoError::Abi(
                "constructor arguments given but abi has no constructor"
                    .to_string(),
            ))
        }
        None => {}
    }
    Ok(CallRequest::create(Bytes::from(init_code)))
}
