use std::time::Duration;

use libexo_core::{
    blockchain::{
        client::ChainClient,
        transaction::{CallRequest, Receipt, SignedTransaction},
    },
    error::ExoError,
    types::TxHash,
};
use libexo_utils::log::{debug, info, warn};
use libexo_wallet::builder::TransactionBuilder;

/// How a submitted write step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Included and executed successfully.
    Confirmed(Receipt),
    /// Included, execution reverted.
    Reverted(Receipt),
    /// The sender's nonce moved past the transaction but no receipt is
    /// visible. Post-condition reads decide what happened.
    LandedWithoutReceipt(TxHash),
    /// Still pending after every re-check.
    Unresolved(TxHash),
    /// Evicted by the node, the resubmission included.
    Dropped(TxHash),
    /// Submitted, then the chain could not be queried about it. The
    /// transaction may still land.
    Unknown(TxHash, String),
}

impl StepOutcome {
    /// Whether the transaction made it on chain, successfully or as far as
    /// can be told.
    pub fn landed(&self) -> bool {
        matches!(
            self,
            StepOutcome::Confirmed(_) | StepOutcome::LandedWithoutReceipt(_)
        )
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            StepOutcome::Confirmed(r) | StepOutcome::Reverted(r) => Some(r),
            _ => None,
        }
    }

    /// Diagnostic for outcomes that end a phase.
    pub fn failure(&self) -> Option<String> {
        match self {
            StepOutcome::Confirmed(_) | StepOutcome::LandedWithoutReceipt(_) => None,
            StepOutcome::Reverted(r) => {
                Some(format!("transaction {} reverted", r.tx_hash))
            }
            StepOutcome::Unresolved(h) => {
                Some(format!("unknown outcome: transaction {} still pending", h))
            }
            StepOutcome::Dropped(h) => {
                Some(format!("transaction {} dropped by the node", h))
            }
            StepOutcome::Unknown(h, reason) => {
                Some(format!("unknown outcome: transaction {} unverified, {}", h, reason))
            }
        }
    }
}

/// A write step, with every hash that was submitted for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: &'static str,
    pub outcome: StepOutcome,
    pub submitted: Vec<TxHash>,
}

enum Wait {
    Settled(StepOutcome),
    Dropped,
}

/// Submits one write step and waits for it, reconciling receipt timeouts
/// against the chain before deciding anything.
pub struct StepRunner<'a, C: ChainClient> {
    builder: &'a TransactionBuilder<C>,
    receipt_timeout: Duration,
    max_pending_rechecks: u32,
}

impl<'a, C: ChainClient> StepRunner<'a, C> {
    pub fn new(
        builder: &'a TransactionBuilder<C>,
        receipt_timeout: Duration,
        max_pending_rechecks: u32,
    ) -> Self {
        Self {
            builder,
            receipt_timeout,
            max_pending_rechecks,
        }
    }

    pub fn builder(&self) -> &TransactionBuilder<C> {
        self.builder
    }

    pub fn client(&self) -> &C {
        self.builder.client()
    }

    /// Build, submit and await `request`.
    ///
    /// Errors are the ones raised before anything is submitted: estimation,
    /// nonce, signing and submission failures. Once a hash exists, failures
    /// end up in the report together with it. A dropped transaction is
    /// rebuilt and resubmitted once.
    pub fn execute(
        &self,
        step: &'static str,
        request: &CallRequest,
    ) -> Result<StepReport, ExoError> {
        let mut signed = self.builder.send(request)?;
        info!(step, tx = %signed.hash, nonce = signed.nonce(), "transaction submitted");
        let mut submitted = vec![signed.hash];
        let mut resubmitted = false;
        loop {
            let wait = match self.await_outcome(step, &signed) {
                Ok(wait) => wait,
                Err(e) => {
                    warn!(step, tx = %signed.hash, error = %e, "lost track of submitted transaction");
                    return Ok(StepReport {
                        step,
                        outcome: StepOutcome::Unknown(
                            signed.hash,
                            format!("{}: {}", e.kind(), e),
                        ),
                        submitted,
                    });
                }
            };
            match wait {
                Wait::Settled(outcome) => {
                    return Ok(StepReport {
                        step,
                        outcome,
                        submitted,
                    })
                }
                Wait::Dropped if !resubmitted => {
                    warn!(step, tx = %signed.hash, "transaction dropped, resubmitting");
                    resubmitted = true;
                    signed = match self.builder.send(request) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(step, error = %e, "resubmission failed");
                            return Ok(StepReport {
                                step,
                                outcome: StepOutcome::Dropped(signed.hash),
                                submitted,
                            });
                        }
                    };
                    info!(step, tx = %signed.hash, nonce = signed.nonce(), "transaction resubmitted");
                    submitted.push(signed.hash);
                }
                Wait::Dropped => {
                    warn!(step, tx = %signed.hash, "resubmitted transaction dropped again");
                    return Ok(StepReport {
                        step,
                        outcome: StepOutcome::Dropped(signed.hash),
                        submitted,
                    });
                }
            }
        }
    }

    fn await_outcome(
        &self,
        step: &'static str,
        signed: &SignedTransaction,
    ) -> Result<Wait, ExoError> {
        let client = self.builder.client();
        let mut rechecks = 0;
        loop {
            match client.wait_for_receipt(signed.hash, self.receipt_timeout) {
                Ok(receipt) => return Ok(Wait::Settled(classify(step, receipt))),
                Err(e) if e.is_timeout() => {
                    warn!(step, tx = %signed.hash, "no receipt within {:?}", self.receipt_timeout)
                }
                Err(e) => return Err(e),
            }

            let nonce = client.nonce(signed.sender())?;
            if nonce > signed.nonce() {
                debug!(step, nonce, "sender nonce advanced, transaction landed");
                let outcome = match client.receipt(signed.hash)? {
                    Some(receipt) => classify(step, receipt),
                    None => StepOutcome::LandedWithoutReceipt(signed.hash),
                };
                return Ok(Wait::Settled(outcome));
            }
            if !client.is_known(signed.hash)? {
                return Ok(Wait::Dropped);
            }
            if rechecks >= self.max_pending_rechecks {
                warn!(step, tx = %signed.hash, rechecks, "transaction still pending, giving up");
                return Ok(Wait::Settled(StepOutcome::Unresolved(signed.hash)));
            }
            rechecks += 1;
            debug!(step, tx = %signed.hash, rechecks, "transaction still pending");
        }
    }
}

fn classify(step: &'static str, receipt: Receipt) -> StepOutcome {
    if receipt.success {
        debug!(step, tx = %receipt.tx_hash, gas_used = receipt.gas_used, "transaction confirmed");
        StepOutcome::Confirmed(receipt)
    } else {
        warn!(step, tx = %receipt.tx_hash, "transaction reverted");
        StepOutcome::Reverted(receipt)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use libexo_core::{
        blockchain::{
            client::MockChainClient,
            transaction::{CallRequest, Receipt},
        },
        error::ExoError,
        types::{keccak256, Address, Bytes, TxHash, GWEI},
    };
    use libexo_wallet::{account::Account, builder::TransactionBuilder, fee::FeePolicy};
    use mockall::predicate::eq;

    use super::{StepOutcome, StepRunner};
    use crate::phase::{PhaseId, PhaseState};

    const KEY: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const WAIT: Duration = Duration::from_secs(5);

    fn timeout(hash: TxHash) -> ExoError {
        ExoError::Timeout { hash, waited: WAIT }
    }

    fn receipt(hash: TxHash, success: bool) -> Receipt {
        Receipt {
            tx_hash: hash,
            success,
            contract_address: None,
            block_number: Some(1),
            gas_used: 21_000,
        }
    }

    /// A client that accepts any transaction and echoes its hash.
    fn accepting_client() -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_estimate_gas().returning(|_, _| Ok(50_000));
        client.expect_base_fee().returning(|| Ok(GWEI));
        client.expect_submit().returning(|raw| Ok(keccak256(&raw)));
        client.expect_pending_nonce().returning(|_| Ok(0));
        client
    }

    fn builder(client: MockChainClient) -> TransactionBuilder<MockChainClient> {
        TransactionBuilder::with_chain_id(
            client,
            Account::from_secret(KEY).unwrap(),
            31337,
            FeePolicy::default(),
        )
    }

    fn request() -> CallRequest {
        CallRequest::call(Address::repeat_byte(0x11), Bytes::from(vec![0xaa]))
    }

    #[test]
    fn test_reverted_receipt() {
        let mut client = accepting_client();
        client.expect_nonce().returning(|_| Ok(0));
        client
            .expect_wait_for_receipt()
            .times(1)
            .returning(|h, _| Ok(receipt(h, false)));
        let builder = builder(client);
        let report = StepRunner::new(&builder, WAIT, 2)
            .execute("transfer", &request())
            .unwrap();
        assert!(matches!(report.outcome, StepOutcome::Reverted(_)));
        assert!(!report.outcome.landed());
        assert!(report.outcome.failure().unwrap().contains("reverted"));
        assert_eq!(report.submitted.len(), 1);
    }

    #[test]
    fn test_timeout_with_advanced_nonce_uses_late_receipt() {
        let mut client = accepting_client();
        let mut nonces = vec![1u64, 0u64];
        client.expect_nonce().returning(move |_| Ok(nonces.pop().unwrap()));
        client
            .expect_wait_for_receipt()
            .times(1)
            .returning(|h, _| Err(timeout(h)));
        client
            .expect_receipt()
            .times(1)
            .returning(|h| Ok(Some(receipt(h, true))));
        client.expect_is_known().never();
        let builder = builder(client);
        let report = StepRunner::new(&builder, WAIT, 2)
            .execute("transfer", &request())
            .unwrap();
        assert!(matches!(report.outcome, StepOutcome::Confirmed(_)));
    }

    #[test]
    fn test_timeout_with_advanced_nonce_and_no_receipt() {
        let mut client = accepting_client();
        let mut nonces = vec![1u64, 0u64];
        client.expect_nonce().returning(move |_| Ok(nonces.pop().unwrap()));
        client
            .expect_wait_for_receipt()
            .returning(|h, _| Err(timeout(h)));
        client.expect_receipt().returning(|_| Ok(None));
        let builder = builder(client);
        let report = StepRunner::new(&builder, WAIT, 2)
            .execute("transfer", &request())
            .unwrap();
        assert!(matches!(report.outcome, StepOutcome::LandedWithoutReceipt(_)));
        assert!(report.outcome.landed());
    }

    #[test]
    fn test_pending_is_rechecked_then_unresolved_without_resubmission() {
        let mut client = MockChainClient::new();
        client.expect_estimate_gas().returning(|_, _| Ok(50_000));
        client.expect_base_fee().returning(|| Ok(GWEI));
        client
            .expect_submit()
            .times(1)
            .returning(|raw| Ok(keccak256(&raw)));
        client.expect_nonce().returning(|_| Ok(0));
        client.expect_pending_nonce().returning(|_| Ok(0));
        // first wait plus two re-checks
        client
            .expect_wait_for_receipt()
            .times(3)
            .returning(|h, _| Err(timeout(h)));
        client.expect_is_known().times(3).returning(|_| Ok(true));
        let builder = builder(client);
        let report = StepRunner::new(&builder, WAIT, 2)
            .execute("transfer", &request())
            .unwrap();
        let StepOutcome::Unresolved(hash) = &report.outcome else {
            panic!("expected unresolved, got {:?}", report.outcome)
        };
        assert_eq!(report.submitted, vec![*hash]);
        assert!(report.outcome.failure().unwrap().contains("unknown outcome"));
    }

    #[test]
    fn test_dropped_is_resubmitted_once() {
        let mut client = MockChainClient::new();
        client.expect_estimate_gas().returning(|_, _| Ok(50_000));
        client.expect_base_fee().returning(|| Ok(GWEI));
        client
            .expect_submit()
            .times(2)
            .returning(|raw| Ok(keccak256(&raw)));
        client.expect_nonce().returning(|_| Ok(0));
        client.expect_pending_nonce().returning(|_| Ok(0));
        client
            .expect_wait_for_receipt()
            .returning(|h, _| Err(timeout(h)));
        client.expect_is_known().returning(|_| Ok(false));
        let builder = builder(client);
        let report = StepRunner::new(&builder, WAIT, 2)
            .execute("transfer", &request())
            .unwrap();
        assert!(matches!(report.outcome, StepOutcome::Dropped(_)));
        assert_eq!(report.submitted.len(), 2);
    }

    #[test]
    fn test_estimation_failure_sends_nothing() {
        let mut client = MockChainClient::new();
        client
            .expect_estimate_gas()
            .returning(|_, _| Err(ExoError::Estimation("execution reverted".into())));
        client.expect_submit().never();
        let builder = builder(client);
        let err = StepRunner::new(&builder, WAIT, 2)
            .execute("transfer", &request())
            .unwrap_err();
        assert!(matches!(err, ExoError::Estimation(_)));
    }

    #[test]
    fn test_receipt_lookup_failure_keeps_hash() {
        let mut client = accepting_client();
        let sender = Account::from_secret(KEY).unwrap().address();
        client.expect_nonce().with(eq(sender)).returning(|_| Ok(0));
        client
            .expect_wait_for_receipt()
            .times(1)
            .returning(|_, _| Err(ExoError::Rpc("connection refused".into())));
        let builder = builder(client);
        let report = StepRunner::new(&builder, WAIT, 2)
            .execute("transfer", &request())
            .unwrap();
        let StepOutcome::Unknown(hash, reason) = &report.outcome else {
            panic!("expected unknown outcome, got {:?}", report.outcome)
        };
        assert_eq!(report.submitted, vec![*hash]);
        assert!(reason.contains("connection refused"));
        assert!(!report.outcome.landed());
        assert!(report.outcome.failure().unwrap().contains("unknown outcome"));
    }

    #[test]
    fn test_nonce_lookup_failure_after_timeout_keeps_hash() {
        let mut client = accepting_client();
        let mut calls = 0;
        client.expect_nonce().returning(move |_| {
            calls += 1;
            match calls {
                1 => Ok(0),
                _ => Err(ExoError::Rpc("connection reset".into())),
            }
        });
        client
            .expect_wait_for_receipt()
            .times(1)
            .returning(|h, _| Err(timeout(h)));
        client.expect_is_known().never();
        let builder = builder(client);
        let report = StepRunner::new(&builder, WAIT, 2)
            .execute("transfer", &request())
            .unwrap();
        assert!(matches!(report.outcome, StepOutcome::Unknown(_, _)));
        assert_eq!(report.submitted.len(), 1);

        let mut phase = PhaseState::begin(PhaseId::RequestAuthorization);
        phase.record(&report).unwrap();
        assert_eq!(phase.tx_hashes(), report.submitted);
        assert_eq!(phase.unconfirmed, report.submitted);
    }

    #[test]
    fn test_failed_resubmission_reports_the_dropped_hash() {
        let mut client = MockChainClient::new();
        client.expect_estimate_gas().returning(|_, _| Ok(50_000));
        client.expect_base_fee().returning(|| Ok(GWEI));
        let mut submits = 0;
        client.expect_submit().times(2).returning(move |raw| {
            submits += 1;
            match submits {
                1 => Ok(keccak256(&raw)),
                _ => Err(ExoError::Rpc("node unavailable".into())),
            }
        });
        client.expect_nonce().returning(|_| Ok(0));
        client.expect_pending_nonce().returning(|_| Ok(0));
        client
            .expect_wait_for_receipt()
            .returning(|h, _| Err(timeout(h)));
        client.expect_is_known().returning(|_| Ok(false));
        let builder = builder(client);
        let report = StepRunner::new(&builder, WAIT, 2)
            .execute("transfer", &request())
            .unwrap();
        let StepOutcome::Dropped(hash) = &report.outcome else {
            panic!("expected dropped, got {:?}", report.outcome)
        };
        assert_eq!(report.submitted, vec![*hash]);
    }
}
