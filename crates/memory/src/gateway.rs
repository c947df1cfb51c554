//! Authorization gateway model.
//!
//! `batchProcess` forwards each payload as a call from the gateway itself.
//! In [`GuardMode::Vulnerable`] `emergencyOverride` accepts the owner or the
//! gateway as immediate caller, so a batched override from anyone passes.
//! [`GuardMode::Hardened`] checks the transaction originator instead.

use std::collections::HashMap;

use alloy_dyn_abi::DynSolValue;
use libexo_core::types::{keccak256, Address, Bytes, B256, U256};
use libexo_periphery::abi::GatewayABI;

use crate::{
    exec::{
        arg_address, arg_array, arg_uint, decode_entry, encode_output,
        require, Exec, ExecResult, Frame, Revert,
    },
    world::GuardMode,
};

pub const MAX_LEVEL: u64 = 5;
pub const COOLDOWN_SECS: u64 = 3_600;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserAuth {
    pub authorized: bool,
    pub level: U256,
    pub cooldown_ends: U256,
    pub exploited: bool,
}

#[derive(Debug, Clone)]
pub struct GatewayState {
    pub owner: Address,
    pub mode: GuardMode,
    pub users: HashMap<Address, UserAuth>,
    /// Accept authorized overrides without applying them.
    pub overrides_ignored: bool,
    seed: B256,
}

impl GatewayState {
    pub fn new(owner: Address, mode: GuardMode, seed: B256) -> Self {
        Self {
            owner,
            mode,
            users: HashMap::new(),
            overrides_ignored: false,
            seed,
        }
    }

    pub fn user(&self, user: Address) -> UserAuth {
        self.users.get(&user).copied().unwrap_or_default()
    }

    pub fn verification_code(&self, user: Address) -> B256 {
        let mut preimage = self.seed.to_vec();
        preimage.extend_from_slice(user.as_slice());
        keccak256(preimage)
    }
}

fn state<'a>(exec: &'a mut Exec, at: Address) -> ExecResult<&'a mut GatewayState> {
    exec.world_mut()
        .gateway_mut(at)
        .ok_or_else(|| Revert::new("not a gateway"))
}

pub(crate) fn execute(exec: &mut Exec, frame: &Frame) -> ExecResult<Bytes> {
    let (func, args) = decode_entry(&GatewayABI, frame)?;
    let ret = match func.name.as_str() {
        "requestAuthorization" => {
            let now = exec.world().timestamp;
            let user = state(exec, frame.to)?
                .users
                .entry(frame.caller)
                .or_default();
            require(user.level.is_zero(), "Already authorized")?;
            user.authorized = true;
            user.level = U256::from(1);
            user.cooldown_ends = U256::from(now + COOLDOWN_SECS);
            vec![]
        }
        "batchProcess" => {
            let targets = arg_array(&args, 0)?
                .iter()
                .map(|v| v.as_address().ok_or_else(|| Revert::new("bad target")))
                .collect::<ExecResult<Vec<_>>>()?;
            let payloads = arg_array(&args, 1)?
                .iter()
                .map(|v| {
                    v.as_bytes()
                        .map(|b| Bytes::from(b.to_vec()))
                        .ok_or_else(|| Revert::new("bad payload"))
                })
                .collect::<ExecResult<Vec<_>>>()?;
            require(targets.len() == payloads.len(), "Length mismatch")?;
            for (target, payload) in targets.into_iter().zip(payloads) {
                exec.call(frame.to, target, U256::ZERO, payload)
                    .map_err(|r| Revert::new(format!("Batch call failed: {}", r)))?;
            }
            vec![]
        }
        "emergencyOverride" => {
            let user = arg_address(&args, 0)?;
            let level = arg_uint(&args, 1)?;
            let me = state(exec, frame.to)?;
            let owner = me.owner;
            let allowed = match me.mode {
                GuardMode::Vulnerable => {
                    frame.caller == owner || frame.caller == frame.to
                }
                GuardMode::Hardened => frame.origin == owner,
            };
            require(allowed, "Not authorized")?;
            require(level <= U256::from(MAX_LEVEL), "Invalid level")?;
            if !me.overrides_ignored {
                let auth = me.users.entry(user).or_default();
                auth.level = level;
                auth.authorized = !level.is_zero();
                if level >= U256::from(MAX_LEVEL) && frame.origin != owner {
                    auth.exploited = true;
                }
            }
            vec![]
        }
        "getUserAuthInfo" => {
            let user = arg_address(&args, 0)?;
            let auth = state(exec, frame.to)?.user(user);
            vec![
                DynSolValue::Bool(auth.authorized),
                DynSolValue::Uint(auth.level, 256),
                DynSolValue::Uint(auth.cooldown_ends, 256),
                DynSolValue::Bool(auth.exploited),
            ]
        }
        "hasExploitedVulnerability" => {
            let user = arg_address(&args, 0)?;
            vec![DynSolValue::Bool(state(exec, frame.to)?.user(user).exploited)]
        }
        "getVerificationCode" => {
            let me = state(exec, frame.to)?;
            require(
                me.user(frame.caller).level >= U256::from(MAX_LEVEL),
                "Insufficient authorization level",
            )?;
            vec![DynSolValue::FixedBytes(me.verification_code(frame.caller), 32)]
        }
        other => return Err(Revert::new(format!("unsupported: {}", other))),
    };
    encode_output(func, &ret)
}

#[cfg(test)]
mod tests {
    use alloy_dyn_abi::DynSolValue;
    use libexo_core::types::{Address, Bytes, B256, U256};
    use libexo_periphery::{abi::GatewayABI, gateway::GatewayProxy};

    use super::{GatewayState, MAX_LEVEL};
    use crate::{
        exec::Exec,
        world::{Contract, GuardMode, World},
    };

    const GW: Address = Address::new([0x77; 20]);
    const OWNER: Address = Address::new([0x0f; 20]);
    const USER: Address = Address::new([0x01; 20]);

    fn world(mode: GuardMode) -> World {
        let mut w = World::default();
        w.contracts.insert(
            GW,
            Contract::Gateway(GatewayState::new(OWNER, mode, B256::ZERO)),
        );
        w
    }

    fn batched_override(level: u64) -> Bytes {
        let gw = GatewayProxy::new(GW);
        let inner = gw
            .emergency_override_calldata(USER, U256::from(level))
            .unwrap();
        gw.batch_process(vec![GW], vec![inner]).unwrap().data
    }

    #[test]
    fn test_direct_override_is_denied() {
        let mut w = world(GuardMode::Vulnerable);
        let data = GatewayProxy::new(GW)
            .emergency_override_calldata(USER, U256::from(5))
            .unwrap();
        let err = Exec::new(&mut w, USER)
            .call(USER, GW, U256::ZERO, data)
            .unwrap_err();
        assert_eq!(err.0, "Not authorized");
    }

    #[test]
    fn test_batched_override_escalates() {
        let mut w = world(GuardMode::Vulnerable);
        Exec::new(&mut w, USER)
            .call(USER, GW, U256::ZERO, batched_override(MAX_LEVEL))
            .unwrap();
        let auth = w.gateway(GW).unwrap().user(USER);
        assert_eq!(auth.level, U256::from(MAX_LEVEL));
        assert!(auth.exploited);
    }

    #[test]
    fn test_hardened_checks_originator() {
        let mut w = world(GuardMode::Hardened);
        let err = Exec::new(&mut w, USER)
            .call(USER, GW, U256::ZERO, batched_override(MAX_LEVEL))
            .unwrap_err();
        assert!(err.0.contains("Not authorized"));
        assert_eq!(w.gateway(GW).unwrap().user(USER).level, U256::ZERO);
    }

    #[test]
    fn test_level_above_max_rejected() {
        let mut w = world(GuardMode::Vulnerable);
        let err = Exec::new(&mut w, USER)
            .call(USER, GW, U256::ZERO, batched_override(MAX_LEVEL + 1))
            .unwrap_err();
        assert!(err.0.contains("Invalid level"));
    }

    #[test]
    fn test_verification_code_requires_max_level() {
        let mut w = world(GuardMode::Vulnerable);
        let func = &GatewayABI.function("getVerificationCode").unwrap()[0];
        let data = Bytes::from(func.selector().to_vec());
        assert!(Exec::new(&mut w, USER)
            .call(USER, GW, U256::ZERO, data.clone())
            .is_err());
        Exec::new(&mut w, USER)
            .call(USER, GW, U256::ZERO, batched_override(MAX_LEVEL))
            .unwrap();
        let mut exec = Exec::new(&mut w, USER);
        let ret = exec
            .call_fn(USER, GW, &GatewayABI, "getVerificationCode", &[], U256::ZERO)
            .unwrap();
        let expected = w.gateway(GW).unwrap().verification_code(USER);
        assert_eq!(ret[0], DynSolValue::FixedBytes(expected, 32));
    }
}
