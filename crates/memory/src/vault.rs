//! VIP vault model.
//!
//! Depositors holding at least half of the vault's balance may run the
//! emergency VIP action. The vault also lends up to its whole balance as a
//! flash loan, calling `executeOperation(amount)` on the borrower and
//! requiring the balance to be restored afterwards.
//!
//! In [`GuardMode::Vulnerable`] eligibility is measured against the live
//! balance, which a flash loan temporarily drains. [`GuardMode::Hardened`]
//! measures against the balance the vault held when first entered in the
//! transaction.

use std::collections::{HashMap, HashSet};

use alloy_dyn_abi::DynSolValue;
use libexo_core::types::{Address, Bytes, U256};
use libexo_periphery::abi::{HelperABI, VaultABI};

use crate::{
    exec::{
        arg_address, arg_str, arg_uint, decode_entry, encode_output, require,
        Exec, ExecResult, Frame, Revert,
    },
    world::GuardMode,
};

/// Individual cap is `initial_balance / CAP_DIVISOR`.
pub const CAP_DIVISOR: u64 = 10;
pub const VIP_THRESHOLD_PERCENT: u64 = 50;

#[derive(Debug, Clone)]
pub struct VaultState {
    pub initial_balance: U256,
    pub cap: U256,
    pub mode: GuardMode,
    pub deposits: HashMap<Address, U256>,
    pub exploited: HashSet<Address>,
    pub vip_actions: Vec<(Address, String)>,
    pub loan_active: bool,
    pub withdrawals_frozen: bool,
    pub deposits_view_broken: bool,
}

impl VaultState {
    pub fn new(initial_balance: U256, mode: GuardMode) -> Self {
        Self {
            initial_balance,
            cap: initial_balance / U256::from(CAP_DIVISOR),
            mode,
            deposits: HashMap::new(),
            exploited: HashSet::new(),
            vip_actions: Vec::new(),
            loan_active: false,
            withdrawals_frozen: false,
            deposits_view_broken: false,
        }
    }

    pub fn deposit_of(&self, user: Address) -> U256 {
        self.deposits.get(&user).copied().unwrap_or_default()
    }
}

fn state<'a>(exec: &'a mut Exec, at: Address) -> ExecResult<&'a mut VaultState> {
    exec.world_mut()
        .vault_mut(at)
        .ok_or_else(|| Revert::new("not a vault"))
}

pub(crate) fn execute(exec: &mut Exec, frame: &Frame) -> ExecResult<Bytes> {
    let (func, args) = decode_entry(&VaultABI, frame)?;
    let this = frame.to;
    let ret = match func.name.as_str() {
        "deposit" => {
            require(!frame.value.is_zero(), "Deposit must be positive")?;
            let me = state(exec, this)?;
            let total = me.deposit_of(frame.caller).saturating_add(frame.value);
            require(total <= me.cap, "Exceeds individual cap")?;
            me.deposits.insert(frame.caller, total);
            vec![]
        }
        "deposits" => {
            let user = arg_address(&args, 0)?;
            let me = state(exec, this)?;
            require(!me.deposits_view_broken, "deposits view unavailable")?;
            vec![DynSolValue::Uint(me.deposit_of(user), 256)]
        }
        "withdraw" => {
            let amount = arg_uint(&args, 0)?;
            let me = state(exec, this)?;
            require(!me.withdrawals_frozen, "Withdrawals paused")?;
            let held = me.deposit_of(frame.caller);
            require(held >= amount, "Insufficient deposit")?;
            me.deposits.insert(frame.caller, held - amount);
            exec.call(this, frame.caller, amount, Bytes::new())
                .map_err(|r| Revert::new(format!("Transfer failed: {}", r)))?;
            vec![]
        }
        "requestFlashLoan" => {
            let amount = arg_uint(&args, 0)?;
            let before = exec.world().balance(this);
            let me = state(exec, this)?;
            require(!me.loan_active, "Loan already active")?;
            require(
                !amount.is_zero() && amount <= before,
                "Insufficient liquidity",
            )?;
            me.loan_active = true;
            exec.call(this, frame.caller, amount, Bytes::new())?;
            exec.call_fn(
                this,
                frame.caller,
                &HelperABI,
                "executeOperation",
                &[DynSolValue::Uint(amount, 256)],
                U256::ZERO,
            )?;
            require(
                exec.world().balance(this) >= before,
                "Flash loan not repaid",
            )?;
            state(exec, this)?.loan_active = false;
            vec![]
        }
        "repay" => vec![],
        "emergencyVIPAction" => {
            let action = arg_str(&args, 0)?;
            let mode = state(exec, this)?.mode;
            let basis = match mode {
                GuardMode::Vulnerable => exec.world().balance(this),
                GuardMode::Hardened => exec.entry_balance(this),
            };
            let me = state(exec, this)?;
            let held = me.deposit_of(frame.caller);
            let eligible = !basis.is_zero()
                && held.saturating_mul(U256::from(100))
                    >= basis.saturating_mul(U256::from(VIP_THRESHOLD_PERCENT));
            require(eligible, "Not eligible for VIP")?;
            me.vip_actions.push((frame.caller, action));
            if me.loan_active {
                me.exploited.insert(frame.caller);
            }
            vec![]
        }
        "checkIfExploited" => {
            let contract = arg_address(&args, 0)?;
            let exploited = state(exec, this)?.exploited.contains(&contract);
            vec![DynSolValue::Bool(exploited)]
        }
        "getContractInfo" => {
            let balance = exec.world().balance(this);
            let me = state(exec, this)?;
            vec![
                DynSolValue::Uint(balance, 256),
                DynSolValue::Uint(me.initial_balance, 256),
                DynSolValue::Uint(me.cap, 256),
            ]
        }
        other => return Err(Revert::new(format!("unsupported: {}", other))),
    };
    encode_output(func, &ret)
}
