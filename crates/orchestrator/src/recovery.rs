use libexo_core::{
    blockchain::client::ChainClient,
    conversion::ConvertTo,
    error::ExoError,
    types::{balance_delta, Address, TxHash, U256},
};
use libexo_periphery::{helper::HelperProxy, vault::VaultProxy};
use libexo_utils::log::{error, info, warn};
use serde::Serialize;

use crate::step::{StepOutcome, StepRunner};

/// Ways to get the helper's funds back, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, Serialize)]
pub enum RecoveryStrategy {
    /// `cleanup()`: withdraw the recorded deposit, then sweep.
    #[display(fmt = "primary")]
    Primary,
    /// `emergencyWithdraw()`: tolerate a failing deposit read, sweep anyway.
    #[display(fmt = "emergency")]
    Emergency,
}

impl RecoveryStrategy {
    pub const ORDER: [RecoveryStrategy; 2] =
        [RecoveryStrategy::Primary, RecoveryStrategy::Emergency];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAttempt {
    pub strategy: RecoveryStrategy,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_observed: Option<U256>,
    pub tx_hashes: Vec<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result")]
pub enum CustodyResult {
    Recovered {
        strategy: RecoveryStrategy,
        #[serde(rename = "sweepTx")]
        sweep_tx: TxHash,
    },
    ManualInterventionRequired {
        helper: Address,
        reason: String,
    },
    NothingToRecover,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryState {
    pub attempted_primary: bool,
    pub attempted_fallback: bool,
    pub attempts: Vec<RecoveryAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_balance_before: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_balance_after: Option<U256>,
    /// Signed decimal wei, `after - before`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helper_residual: Option<U256>,
    pub custody: CustodyResult,
}

impl RecoveryState {
    pub fn nothing_to_recover() -> Self {
        Self {
            attempted_primary: false,
            attempted_fallback: false,
            attempts: Vec::new(),
            operator_balance_before: None,
            operator_balance_after: None,
            balance_delta: None,
            helper_residual: None,
            custody: CustodyResult::NothingToRecover,
        }
    }

    pub fn recovered(&self) -> bool {
        matches!(self.custody, CustodyResult::Recovered { .. })
    }
}

/// Pulls the operator's capital back out of a deployed helper.
pub struct RecoveryController<'r, 'a, C: ChainClient> {
    runner: &'r StepRunner<'a, C>,
    vault: VaultProxy,
}

impl<'r, 'a, C: ChainClient> RecoveryController<'r, 'a, C> {
    pub fn new(runner: &'r StepRunner<'a, C>, vault: Address) -> Self {
        Self {
            runner,
            vault: VaultProxy::new(vault),
        }
    }

    pub fn recover(&self, helper: Option<Address>) -> RecoveryState {
        let Some(helper) = helper else {
            info!("no helper deployed, nothing to recover");
            return RecoveryState::nothing_to_recover();
        };
        let client = self.runner.client();
        let operator = self.runner.builder().account().address();
        info!(%helper, "recovering helper funds");

        let mut state = RecoveryState::nothing_to_recover();
        state.operator_balance_before = client.balance(operator).ok();

        let mut last_reason = String::new();
        for strategy in RecoveryStrategy::ORDER {
            match strategy {
                RecoveryStrategy::Primary => state.attempted_primary = true,
                RecoveryStrategy::Emergency => state.attempted_fallback = true,
            }
            let attempt = self.attempt(strategy, helper);
            let sweep_tx = attempt.tx_hashes.last().copied();
            if let Some(reason) = &attempt.diagnostic {
                last_reason = format!("{}: {}", strategy, reason);
            }
            let succeeded = attempt.succeeded;
            state.attempts.push(attempt);
            if let (true, Some(sweep_tx)) = (succeeded, sweep_tx) {
                info!(%strategy, tx = %sweep_tx, "helper funds recovered");
                state.custody = CustodyResult::Recovered { strategy, sweep_tx };
                break;
            }
        }
        if !state.recovered() {
            error!(%helper, reason = %last_reason, "recovery failed, manual intervention required");
            state.custody = CustodyResult::ManualInterventionRequired {
                helper,
                reason: last_reason,
            };
        }

        state.operator_balance_after = client.balance(operator).ok();
        if let (Some(before), Some(after)) =
            (state.operator_balance_before, state.operator_balance_after)
        {
            state.balance_delta = Some(balance_delta(before, after).cvt());
        }
        state.helper_residual = client.balance(helper).ok();
        if let (true, Some(residual)) = (state.recovered(), state.helper_residual) {
            if !residual.is_zero() {
                error!(%helper, %residual, "helper still holds funds after the sweep");
            }
        }
        state
    }

    fn attempt(&self, strategy: RecoveryStrategy, helper: Address) -> RecoveryAttempt {
        let mut attempt = RecoveryAttempt {
            strategy,
            succeeded: false,
            deposit_observed: None,
            tx_hashes: Vec::new(),
            diagnostic: None,
        };
        if let Err(e) = self.try_attempt(&mut attempt, helper) {
            warn!(%strategy, error = %e, "recovery attempt failed");
            attempt.diagnostic = Some(format!("{}: {}", e.kind(), e));
        }
        attempt
    }

    fn try_attempt(
        &self,
        attempt: &mut RecoveryAttempt,
        helper: Address,
    ) -> Result<(), ExoError> {
        let client = self.runner.client();
        let proxy = HelperProxy::at(helper);
        let (step, request) = match attempt.strategy {
            RecoveryStrategy::Primary => {
                // a failing read ends this path before anything is sent
                attempt.deposit_observed = Some(self.vault.deposits(client, helper)?);
                ("cleanup", proxy.cleanup()?)
            }
            RecoveryStrategy::Emergency => {
                attempt.deposit_observed = self.vault.deposits(client, helper).ok();
                ("emergency-withdraw", proxy.emergency_withdraw()?)
            }
        };
        let report = self.runner.execute(step, &request)?;
        attempt.tx_hashes = report.submitted.clone();
        attempt.succeeded = match &report.outcome {
            StepOutcome::Confirmed(_) => true,
            StepOutcome::LandedWithoutReceipt(_) => client.balance(helper)?.is_zero(),
            _ => false,
        };
        if !attempt.succeeded {
            attempt.diagnostic = Some(
                report
                    .outcome
                    .failure()
                    .unwrap_or_else(|| "helper balance not swept".to_string()),
            );
        }
        Ok(())
    }
}
