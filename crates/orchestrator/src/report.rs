use libexo_core::{
    conversion::ConvertTo,
    types::{balance_delta, Address, ChainId, TxHash, B256, U256},
};
use serde::Serialize;

use crate::{phase::PhaseState, recovery::RecoveryState};

/// Outcome of one exploit chain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    pub name: &'static str,
    pub success: bool,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_level: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exploited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helper: Option<Address>,
    pub tx_hashes: Vec<TxHash>,
    pub phases: Vec<PhaseState>,
}

impl ChainReport {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            success: false,
            state: String::new(),
            observed_level: None,
            exploited: None,
            verification_code: None,
            helper: None,
            tx_hashes: Vec::new(),
            phases: Vec::new(),
        }
    }

    /// Append a concluded phase. Returns whether it succeeded.
    pub fn push(&mut self, phase: PhaseState) -> bool {
        let ok = phase.succeeded();
        self.tx_hashes.extend(phase.tx_hashes());
        self.phases.push(phase);
        ok
    }

    pub fn finish(mut self, state: impl ToString, success: bool) -> Self {
        self.state = state.to_string();
        self.success = success;
        self
    }

    pub fn phase(&self, id: crate::phase::PhaseId) -> Option<&PhaseState> {
        self.phases.iter().find(|p| p.id == id)
    }
}

/// Everything a run did, printed by `exo` on completion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub operator: Address,
    pub chain_id: ChainId,
    pub authorization: ChainReport,
    pub flash_loan: ChainReport,
    pub recovery: RecoveryState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_balance_start: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_balance_end: Option<U256>,
    /// Signed decimal wei, `end - start`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_balance_delta: Option<String>,
}

impl RunReport {
    pub fn set_operator_balances(&mut self, start: Option<U256>, end: Option<U256>) {
        self.operator_balance_start = start;
        self.operator_balance_end = end;
        self.operator_balance_delta = match (start, end) {
            (Some(s), Some(e)) => Some(balance_delta(s, e).cvt()),
            _ => None,
        };
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
