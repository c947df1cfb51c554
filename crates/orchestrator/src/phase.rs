use libexo_core::{blockchain::transaction::Receipt, error::ExoError, types::TxHash};
use libexo_utils::log::{error, info, info_span, warn};
use serde::Serialize;

use crate::step::StepReport;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseId {
    #[display(fmt = "request-authorization")]
    RequestAuthorization,
    #[display(fmt = "bypass-access-control")]
    BypassAccessControl,
    #[display(fmt = "verify-escalation")]
    VerifyEscalation,
    #[display(fmt = "deploy-helper")]
    DeployHelper,
    #[display(fmt = "trigger-flash-loan")]
    TriggerFlashLoan,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, derive_more::Display, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PhaseOutcome {
    #[default]
    #[display(fmt = "pending")]
    Pending,
    #[display(fmt = "succeeded")]
    Succeeded,
    #[display(fmt = "failed")]
    Failed,
    #[display(fmt = "aborted")]
    Aborted,
}

impl PhaseOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PhaseOutcome::Pending)
    }
}

/// Record of one phase. Terminal once the outcome leaves `Pending`; every
/// mutation after that is rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseState {
    pub id: PhaseId,
    pub outcome: PhaseOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precondition: Option<serde_json::Value>,
    pub receipts: Vec<Receipt>,
    /// Submitted transactions whose receipt was never seen.
    pub unconfirmed: Vec<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_state: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl PhaseState {
    pub fn begin(id: PhaseId) -> Self {
        info!(phase = %id, "phase started");
        Self {
            id,
            outcome: PhaseOutcome::Pending,
            precondition: None,
            receipts: Vec::new(),
            unconfirmed: Vec::new(),
            post_state: None,
            diagnostic: None,
        }
    }

    /// Run `body` as phase `id`. An error escaping `body` concludes the phase:
    /// estimation failures abort it, anything else fails it.
    pub fn run(
        id: PhaseId,
        body: impl FnOnce(&mut PhaseState) -> Result<(), ExoError>,
    ) -> PhaseState {
        let _span = info_span!("phase", id = %id).entered();
        let mut phase = Self::begin(id);
        let res = body(&mut phase);
        match res {
            Ok(()) if phase.outcome.is_terminal() => {}
            Ok(()) => phase.conclude(
                PhaseOutcome::Failed,
                "phase ended without a verdict".to_string(),
            ),
            Err(e) if phase.outcome.is_terminal() => {
                warn!(phase = %id, error = %e, "error after the phase concluded")
            }
            Err(e) => {
                let outcome = match &e {
                    ExoError::Estimation(_) => PhaseOutcome::Aborted,
                    _ => PhaseOutcome::Failed,
                };
                phase.conclude(outcome, format!("{}: {}", e.kind(), e));
            }
        }
        phase
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == PhaseOutcome::Succeeded
    }

    /// Every hash submitted during the phase.
    pub fn tx_hashes(&self) -> Vec<TxHash> {
        self.receipts
            .iter()
            .map(|r| r.tx_hash)
            .chain(self.unconfirmed.iter().copied())
            .collect()
    }

    fn ensure_open(&self) -> Result<(), ExoError> {
        if self.is_terminal() {
            return Err(ExoError::Custom(format!(
                "phase {} already concluded as {}",
                self.id, self.outcome
            )));
        }
        Ok(())
    }

    fn encode(value: &impl Serialize) -> Result<serde_json::Value, ExoError> {
        serde_json::to_value(value)
            .map_err(|e| ExoError::Custom(format!("failed to encode phase state: {}", e)))
    }

    pub fn snapshot(&mut self, pre: &impl Serialize) -> Result<(), ExoError> {
        self.ensure_open()?;
        self.precondition = Some(Self::encode(pre)?);
        Ok(())
    }

    pub fn observe(&mut self, post: &impl Serialize) -> Result<(), ExoError> {
        self.ensure_open()?;
        self.post_state = Some(Self::encode(post)?);
        Ok(())
    }

    pub fn record(&mut self, step: &StepReport) -> Result<(), ExoError> {
        self.ensure_open()?;
        let seen = step.outcome.receipt();
        if let Some(r) = seen {
            self.receipts.push(r.clone());
        }
        self.unconfirmed.extend(
            step.submitted
                .iter()
                .filter(|h| seen.map_or(true, |r| r.tx_hash != **h)),
        );
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<(), ExoError> {
        self.ensure_open()?;
        self.conclude(PhaseOutcome::Succeeded, String::new());
        Ok(())
    }

    pub fn fail(&mut self, diagnostic: impl Into<String>) -> Result<(), ExoError> {
        self.ensure_open()?;
        self.conclude(PhaseOutcome::Failed, diagnostic.into());
        Ok(())
    }

    pub fn abort(&mut self, diagnostic: impl Into<String>) -> Result<(), ExoError> {
        self.ensure_open()?;
        self.conclude(PhaseOutcome::Aborted, diagnostic.into());
        Ok(())
    }

    fn conclude(&mut self, outcome: PhaseOutcome, diagnostic: String) {
        self.outcome = outcome;
        match outcome {
            PhaseOutcome::Succeeded => info!(phase = %self.id, "phase succeeded"),
            _ => {
                error!(phase = %self.id, %outcome, diagnostic = %diagnostic, "phase did not succeed")
            }
        }
        if !diagnostic.is_empty() {
            self.diagnostic = Some(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use libexo_core::{
        blockchain::transaction::Receipt,
        error::ExoError,
        types::TxHash,
    };

    use super::{PhaseId, PhaseOutcome, PhaseState};
    use crate::step::{StepOutcome, StepReport};

    #[test]
    fn test_mutation_after_conclusion_is_rejected() {
        let mut phase = PhaseState::begin(PhaseId::DeployHelper);
        phase.snapshot(&1u64).unwrap();
        phase.succeed().unwrap();
        assert!(phase.fail("late").is_err());
        assert!(phase.observe(&2u64).is_err());
        assert!(phase.succeed().is_err());
        assert_eq!(phase.outcome, PhaseOutcome::Succeeded);
        assert!(phase.diagnostic.is_none());
    }

    #[test]
    fn test_error_kind_decides_outcome() {
        let aborted = PhaseState::run(PhaseId::TriggerFlashLoan, |_| {
            Err(ExoError::Estimation("execution reverted: Not eligible".into()))
        });
        assert_eq!(aborted.outcome, PhaseOutcome::Aborted);
        assert!(aborted.diagnostic.unwrap().contains("Not eligible"));

        let failed = PhaseState::run(PhaseId::TriggerFlashLoan, |_| {
            Err(ExoError::Rpc("nonce too low".into()))
        });
        assert_eq!(failed.outcome, PhaseOutcome::Failed);

        let silent = PhaseState::run(PhaseId::TriggerFlashLoan, |_| Ok(()));
        assert_eq!(silent.outcome, PhaseOutcome::Failed);
    }

    #[test]
    fn test_error_after_verdict_keeps_verdict() {
        let phase = PhaseState::run(PhaseId::VerifyEscalation, |p| {
            p.succeed()?;
            p.fail("second verdict")
        });
        assert_eq!(phase.outcome, PhaseOutcome::Succeeded);
    }

    #[test]
    fn test_record_splits_confirmed_and_unconfirmed() {
        let first = TxHash::repeat_byte(1);
        let second = TxHash::repeat_byte(2);
        let mut phase = PhaseState::begin(PhaseId::RequestAuthorization);
        phase
            .record(&StepReport {
                step: "request",
                outcome: StepOutcome::Confirmed(Receipt {
                    tx_hash: second,
                    success: true,
                    contract_address: None,
                    block_number: Some(3),
                    gas_used: 40_000,
                }),
                submitted: vec![first, second],
            })
            .unwrap();
        assert_eq!(phase.receipts.len(), 1);
        assert_eq!(phase.unconfirmed, vec![first]);
        assert_eq!(phase.tx_hashes(), vec![second, first]);
    }

    #[test]
    fn test_serialized_shape() {
        let mut phase = PhaseState::begin(PhaseId::BypassAccessControl);
        phase.abort("cap is zero").unwrap();
        let v = serde_json::to_value(&phase).unwrap();
        assert_eq!(v["id"], "bypass-access-control");
        assert_eq!(v["outcome"], "aborted");
        assert_eq!(v["diagnostic"], "cap is zero");
        assert!(v.get("postState").is_none());
    }
}
