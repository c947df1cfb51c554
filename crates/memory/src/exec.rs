use std::collections::HashMap;

use alloy_dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy_json_abi::{Function, JsonAbi, StateMutability};
use libexo_core::types::{Address, Bytes, U256};
use libexo_periphery::abi::{decode_call, encode_return};

use crate::{
    gateway, helper, vault,
    world::{Contract, ContractKind, World},
};

pub const CALL_DEPTH_LIMIT: usize = 64;

/// A reverted frame, carrying the `Error(string)` reason.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
#[display(fmt = "{}", _0)]
pub struct Revert(pub String);

impl Revert {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

pub type ExecResult<T> = Result<T, Revert>;

pub(crate) fn require(cond: bool, reason: &str) -> ExecResult<()> {
    if cond {
        Ok(())
    } else {
        Err(Revert::new(reason))
    }
}

/// One message call.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The externally owned account that signed the transaction.
    pub origin: Address,
    pub caller: Address,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
}

/// Executes one transaction (or one `eth_call`) against a [`World`].
pub struct Exec<'w> {
    world: &'w mut World,
    origin: Address,
    /// Balance of each contract when it was first entered in this
    /// transaction.
    entry_balances: HashMap<Address, U256>,
    depth: usize,
    frames: u64,
}

impl<'w> Exec<'w> {
    pub fn new(world: &'w mut World, origin: Address) -> Self {
        Self {
            world,
            origin,
            entry_balances: HashMap::new(),
            depth: 0,
            frames: 0,
        }
    }

    pub fn world(&self) -> &World {
        &*self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut *self.world
    }

    /// Number of message calls and creations executed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn entry_balance(&self, at: Address) -> U256 {
        self.entry_balances
            .get(&at)
            .copied()
            .unwrap_or_else(|| self.world.balance(at))
    }

    /// Message call with value. State changes of a reverted call, value
    /// transfer included, are rolled back.
    pub fn call(
        &mut self,
        caller: Address,
        to: Address,
        value: U256,
        input: Bytes,
    ) -> ExecResult<Bytes> {
        if self.depth >= CALL_DEPTH_LIMIT {
            return Err(Revert::new("call depth exceeded"));
        }
        self.frames += 1;
        let entry = self.world.balance(to);
        self.entry_balances.entry(to).or_insert(entry);

        let snapshot = self.world.clone();
        let frame = Frame {
            origin: self.origin,
            caller,
            to,
            value,
            input,
        };
        self.depth += 1;
        let res = self
            .transfer(caller, to, value)
            .and_then(|_| self.dispatch(&frame));
        self.depth -= 1;
        if res.is_err() {
            *self.world = snapshot;
        }
        res
    }

    /// Contract creation at `creator.create(nonce)`.
    pub fn create(
        &mut self,
        creator: Address,
        nonce: u64,
        value: U256,
        init_code: &[u8],
    ) -> ExecResult<Address> {
        self.frames += 1;
        let address = creator.create(nonce);
        require(
            !self.world.contracts.contains_key(&address),
            "contract address collision",
        )?;
        let state = helper::construct(creator, init_code)?;
        self.transfer(creator, address, value)?;
        self.world
            .contracts
            .insert(address, Contract::Helper(state));
        Ok(address)
    }

    /// Call `name` on `to` through `abi`, decoding the return values.
    pub fn call_fn(
        &mut self,
        caller: Address,
        to: Address,
        abi: &JsonAbi,
        name: &str,
        args: &[DynSolValue],
        value: U256,
    ) -> ExecResult<Vec<DynSolValue>> {
        let func = abi
            .function(name)
            .and_then(|fs| fs.first())
            .ok_or_else(|| Revert::new(format!("no function {}", name)))?;
        let input = func
            .abi_encode_input(args)
            .map_err(|e| Revert::new(e.to_string()))?;
        let ret = self.call(caller, to, value, Bytes::from(input))?;
        func.abi_decode_output(&ret, true).map_err(|e| {
            Revert::new(format!("bad return data from {}: {}", name, e))
        })
    }

    fn transfer(
        &mut self,
        from: Address,
        to: Address,
        value: U256,
    ) -> ExecResult<()> {
        if value.is_zero() {
            return Ok(());
        }
        require(self.world.debit(from, value), "insufficient balance")?;
        self.world.credit(to, value);
        Ok(())
    }

    fn dispatch(&mut self, frame: &Frame) -> ExecResult<Bytes> {
        let kind = self.world.contracts.get(&frame.to).map(|c| c.kind());
        match kind {
            // plain account
            None => Ok(Bytes::new()),
            Some(ContractKind::Gateway) => gateway::execute(self, frame),
            Some(ContractKind::Vault) => vault::execute(self, frame),
            Some(ContractKind::Helper) => helper::execute(self, frame),
        }
    }
}

/// Resolve the called function of a model and enforce `payable`.
pub(crate) fn decode_entry<'a>(
    abi: &'a JsonAbi,
    frame: &Frame,
) -> ExecResult<(&'a Function, Vec<DynSolValue>)> {
    let (func, args) = decode_call(abi, &frame.input)
        .map_err(|e| Revert::new(e.to_string()))?;
    if !frame.value.is_zero()
        && func.state_mutability != StateMutability::Payable
    {
        return Err(Revert::new(format!("{} is not payable", func.name)));
    }
    Ok((func, args))
}

pub(crate) fn encode_output(
    func: &Function,
    values: &[DynSolValue],
) -> ExecResult<Bytes> {
    encode_return(func, values).map_err(|e| Revert::new(e.to_string()))
}

pub(crate) fn arg_address(
    args: &[DynSolValue],
    idx: usize,
) -> ExecResult<Address> {
    args.get(idx)
        .and_then(|v| v.as_address())
        .ok_or_else(|| Revert::new(format!("argument {} is not an address", idx)))
}

pub(crate) fn arg_uint(args: &[DynSolValue], idx: usize) -> ExecResult<U256> {
    args.get(idx)
        .and_then(|v| v.as_uint())
        .map(|(v, _)| v)
        .ok_or_else(|| Revert::new(format!("argument {} is not a uint", idx)))
}

pub(crate) fn arg_str(args: &[DynSolValue], idx: usize) -> ExecResult<String> {
    args.get(idx)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Revert::new(format!("argument {} is not a string", idx)))
}

pub(crate) fn arg_array(
    args: &[DynSolValue],
    idx: usize,
) -> ExecResult<&[DynSolValue]> {
    args.get(idx)
        .and_then(|v| v.as_array())
        .ok_or_else(|| Revert::new(format!("argument {} is not an array", idx)))
}

#[cfg(test)]
mod tests {
    use libexo_core::types::{Address, Bytes, U256};

    use super::Exec;
    use crate::world::World;

    #[test]
    fn test_value_transfer_to_account() {
        let mut world = World::default();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        world.credit(a, U256::from(100));
        let mut exec = Exec::new(&mut world, a);
        exec.call(a, b, U256::from(40), Bytes::new()).unwrap();
        assert_eq!(exec.frames(), 1);
        assert_eq!(world.balance(b), U256::from(40));
    }

    #[test]
    fn test_failed_transfer_changes_nothing() {
        let mut world = World::default();
        let a = Address::repeat_byte(1);
        world.credit(a, U256::from(10));
        let mut exec = Exec::new(&mut world, a);
        let err = exec
            .call(a, Address::repeat_byte(2), U256::from(11), Bytes::new())
            .unwrap_err();
        assert_eq!(err.0, "insufficient balance");
        assert_eq!(world.balance(a), U256::from(10));
    }

    #[test]
    fn test_unknown_init_code() {
        let mut world = World::default();
        let a = Address::repeat_byte(1);
        let mut exec = Exec::new(&mut world, a);
        assert!(exec.create(a, 0, U256::ZERO, &[0xfe]).is_err());
    }
}
