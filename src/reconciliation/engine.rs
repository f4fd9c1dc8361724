use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::{ChargeData, PaymentMetadata, ProviderEvent, TransferData};
use crate::error::AppResult;
use crate::ledger::models::{
    ExceptionReason, LedgerTransaction, LoanStatus, ReconciliationException, RepaymentStatus,
    TransactionStatus, TransactionType,
};
use crate::ledger::{LedgerStore, LedgerTx};
use crate::payments::{PaymentGateway, ProviderStatus};

/// Ledger change made by one applied event
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    DepositCredited {
        user_id: Uuid,
        amount: Decimal,
    },
    RepaymentCompleted {
        loan_id: Uuid,
        repayment_id: Uuid,
        total_repaid: Decimal,
        loan_repaid: bool,
    },
    /// Transaction confirmed but the loan rollup is parked for manual review
    ExceptionQueued(ExceptionReason),
    TransactionSettled(TransactionStatus),
    AttemptFailed,
}

/// Result of handling one event. Every variant is acknowledged to the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Applied(Effect),
    AlreadyApplied,
    UnknownReference,
    TransitionRejected {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    Acknowledged,
    StillPending,
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied(_) => "applied",
            ReconcileOutcome::AlreadyApplied => "already_applied",
            ReconcileOutcome::UnknownReference => "unknown_reference",
            ReconcileOutcome::TransitionRejected { .. } => "transition_rejected",
            ReconcileOutcome::Acknowledged => "acknowledged",
            ReconcileOutcome::StillPending => "still_pending",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub examined: usize,
    pub applied: usize,
    pub still_pending: usize,
    pub errors: usize,
}

/// Applies provider confirmations to the ledger.
///
/// Each event runs inside exactly one unit of work. The transaction row is read
/// under lock and its status is claimed with a compare-and-set, so a duplicate
/// delivery of the same reference can never apply twice.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LedgerStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn handle_event(&self, event: &ProviderEvent, raw: &Value) -> AppResult<ReconcileOutcome> {
        match event {
            ProviderEvent::ChargeSuccess(charge) => self.apply_charge_success(charge, raw).await,
            ProviderEvent::TransferSuccess(transfer) => {
                self.apply_transfer_outcome(transfer, TransactionStatus::Success, raw)
                    .await
            }
            ProviderEvent::TransferFailed(transfer) => {
                self.apply_transfer_outcome(transfer, TransactionStatus::Failed, raw)
                    .await
            }
            ProviderEvent::DedicatedAccountAssigned => {
                info!("Dedicated account assignment acknowledged");
                Ok(ReconcileOutcome::Acknowledged)
            }
            ProviderEvent::Unhandled(name) => {
                debug!(event = %name, "Unhandled webhook event");
                Ok(ReconcileOutcome::Acknowledged)
            }
        }
    }

    pub async fn apply_charge_success(&self, charge: &ChargeData, raw: &Value) -> AppResult<ReconcileOutcome> {
        let mut tx = self.store.begin().await?;

        let Some(transaction) = tx.find_transaction_by_reference(&charge.reference).await? else {
            warn!(reference = %charge.reference, "Charge confirmed for unknown reference");
            return Ok(ReconcileOutcome::UnknownReference);
        };

        if transaction.status == TransactionStatus::Success {
            info!(reference = %charge.reference, "Charge already applied");
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        let claimed = tx
            .update_transaction_status(
                transaction.id,
                transaction.status,
                TransactionStatus::Success,
                Some(raw),
            )
            .await?;
        if !claimed {
            info!(reference = %charge.reference, "Charge claimed by a concurrent delivery");
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        if let Some(payer) = charge.metadata.user_id() {
            if payer != transaction.user_id {
                warn!(
                    reference = %charge.reference,
                    metadata_user = %payer,
                    owner = %transaction.user_id,
                    "Checkout metadata names a different user; ledger owner wins"
                );
            }
        }

        let effect = match transaction.kind {
            TransactionType::Repayment => {
                self.roll_up_repayment(&mut tx, &transaction, &charge.metadata, raw)
                    .await?
            }
            TransactionType::Deposit => {
                if charge.metadata.loan_id().is_some() {
                    warn!(reference = %charge.reference, "Deposit confirmation carries a loan link; ignoring it");
                }
                let amount = charge.amount.unwrap_or(transaction.amount);
                tx.credit_wallet(transaction.user_id, amount).await?;
                Effect::DepositCredited {
                    user_id: transaction.user_id,
                    amount,
                }
            }
        };

        tx.commit().await?;

        info!(
            reference = %charge.reference,
            channel = charge.channel.as_deref().unwrap_or("unknown"),
            effect = ?effect,
            "Charge success applied"
        );
        Ok(ReconcileOutcome::Applied(effect))
    }

    async fn roll_up_repayment(
        &self,
        tx: &mut Box<dyn LedgerTx>,
        transaction: &LedgerTransaction,
        metadata: &PaymentMetadata,
        raw: &Value,
    ) -> AppResult<Effect> {
        let Some(loan_id) = metadata.loan_id() else {
            return queue_exception(tx, transaction, None, ExceptionReason::MissingLoanReference, raw)
                .await;
        };

        let Some(repayment) = tx
            .find_repayment_by_reference_and_loan(&transaction.reference, loan_id)
            .await?
        else {
            return queue_exception(
                tx,
                transaction,
                Some(loan_id),
                ExceptionReason::RepaymentNotFound,
                raw,
            )
            .await;
        };

        if repayment.status != RepaymentStatus::Completed {
            tx.update_repayment_status(repayment.id, repayment.status, RepaymentStatus::Completed)
                .await?;
        }

        let Some(loan) = tx.lock_loan(loan_id).await? else {
            return queue_exception(
                tx,
                transaction,
                Some(loan_id),
                ExceptionReason::LoanNotFound,
                raw,
            )
            .await;
        };

        let total_repaid = tx.sum_completed_repayments(loan_id).await?;
        let mut loan_repaid = false;

        if loan.is_fully_repaid_by(total_repaid) {
            match loan.status {
                LoanStatus::Approved => {
                    loan_repaid = tx
                        .update_loan_status(loan_id, LoanStatus::Approved, LoanStatus::Repaid)
                        .await?;
                    if loan_repaid {
                        info!(loan_id = %loan_id, total_repaid = %total_repaid, "Loan fully repaid");
                    }
                }
                LoanStatus::Repaid => {
                    debug!(loan_id = %loan_id, "Loan already repaid; repayment recorded");
                }
                other => {
                    warn!(
                        loan_id = %loan_id,
                        status = %other,
                        "Repayments cover a loan that is not approved; status left unchanged"
                    );
                }
            }
        }

        Ok(Effect::RepaymentCompleted {
            loan_id,
            repayment_id: repayment.id,
            total_repaid,
            loan_repaid,
        })
    }

    pub async fn apply_transfer_outcome(
        &self,
        transfer: &TransferData,
        target: TransactionStatus,
        raw: &Value,
    ) -> AppResult<ReconcileOutcome> {
        let mut tx = self.store.begin().await?;

        let Some(transaction) = tx.find_transaction_by_reference(&transfer.reference).await? else {
            warn!(reference = %transfer.reference, "Transfer outcome for unknown reference");
            return Ok(ReconcileOutcome::UnknownReference);
        };

        if transaction.status == target {
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        if !transaction.status.can_transition_to(target) {
            warn!(
                reference = %transfer.reference,
                from = %transaction.status,
                to = %target,
                "Transfer outcome would move transaction backwards; ignored"
            );
            return Ok(ReconcileOutcome::TransitionRejected {
                from: transaction.status,
                to: target,
            });
        }

        let claimed = tx
            .update_transaction_status(transaction.id, transaction.status, target, Some(raw))
            .await?;
        if !claimed {
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        tx.commit().await?;
        info!(reference = %transfer.reference, status = %target, "Transfer outcome applied");
        Ok(ReconcileOutcome::Applied(Effect::TransactionSettled(target)))
    }

    /// Moves a still-pending attempt and its repayment to FAILED
    pub async fn mark_attempt_failed(&self, reference: &str, raw: Option<&Value>) -> AppResult<ReconcileOutcome> {
        let mut tx = self.store.begin().await?;

        let Some(transaction) = tx.find_transaction_by_reference(reference).await? else {
            return Ok(ReconcileOutcome::UnknownReference);
        };

        if transaction.status != TransactionStatus::Pending {
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        let claimed = tx
            .update_transaction_status(
                transaction.id,
                TransactionStatus::Pending,
                TransactionStatus::Failed,
                raw,
            )
            .await?;
        if !claimed {
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        if transaction.kind == TransactionType::Repayment {
            if let Some(repayment) = tx.find_repayment_by_reference(reference).await? {
                if repayment.status == RepaymentStatus::Pending {
                    tx.update_repayment_status(
                        repayment.id,
                        RepaymentStatus::Pending,
                        RepaymentStatus::Failed,
                    )
                    .await?;
                }
            }
        }

        tx.commit().await?;
        info!(reference = %reference, "Payment attempt marked failed");
        Ok(ReconcileOutcome::Applied(Effect::AttemptFailed))
    }

    /// Asks the provider for the current state of `reference` and applies it
    pub async fn reconcile_by_reference(&self, reference: &str) -> AppResult<ReconcileOutcome> {
        let verified = self.gateway.verify_transaction(reference).await?;

        match verified.status {
            ProviderStatus::Success => {
                let metadata = PaymentMetadata::from_value(&verified.metadata).unwrap_or_else(|e| {
                    warn!(reference = %reference, "Verified metadata unusable: {}", e);
                    PaymentMetadata::Unspecified
                });
                let charge = ChargeData {
                    reference: reference.to_string(),
                    amount: Some(verified.amount),
                    channel: verified.channel.clone(),
                    metadata,
                };
                self.apply_charge_success(&charge, &verified.raw).await
            }
            ProviderStatus::Failed => self.mark_attempt_failed(reference, Some(&verified.raw)).await,
            ProviderStatus::Other(status) => {
                debug!(reference = %reference, provider_status = %status, "Payment still pending at provider");
                Ok(ReconcileOutcome::StillPending)
            }
        }
    }

    /// Re-verifies pending transactions older than `stale_after`
    pub async fn sweep_stale(&self, stale_after: Duration, limit: i64) -> AppResult<SweepReport> {
        let stale = {
            let mut tx = self.store.begin().await?;
            tx.list_stale_pending_transactions(Utc::now() - stale_after, limit)
                .await?
        };

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };

        for transaction in stale {
            match self.reconcile_by_reference(&transaction.reference).await {
                Ok(ReconcileOutcome::Applied(_)) => {
                    report.applied += 1;
                    continue;
                }
                Ok(ReconcileOutcome::StillPending) => report.still_pending += 1,
                Ok(_) => {}
                Err(e) => {
                    report.errors += 1;
                    error!(reference = %transaction.reference, "Sweep failed to reconcile: {}", e);
                }
            }
            // rows left pending go to the back of the next window
            if let Err(e) = self.mark_checked(&transaction).await {
                error!(reference = %transaction.reference, "Sweep failed to record check: {}", e);
            }
        }

        Ok(report)
    }

    async fn mark_checked(&self, transaction: &LedgerTransaction) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        tx.mark_transaction_checked(transaction.id, Utc::now()).await?;
        tx.commit().await
    }
}

async fn queue_exception(
    tx: &mut Box<dyn LedgerTx>,
    transaction: &LedgerTransaction,
    loan_id: Option<Uuid>,
    reason: ExceptionReason,
    raw: &Value,
) -> AppResult<Effect> {
    let exception = ReconciliationException::new(transaction, loan_id, reason, raw.clone());
    tx.record_exception(&exception).await?;

    warn!(
        reconciliation_exception = reason.as_str(),
        reference = %transaction.reference,
        loan_id = ?loan_id,
        "Repayment confirmed but not rolled up; queued for manual reconciliation"
    );
    Ok(Effect::ExceptionQueued(reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::{Loan, Repayment, Wallet};
    use crate::ledger::MemoryLedgerStore;
    use crate::test_support::{approved_loan, seed_user, StubGateway};
    use rust_decimal_macros::dec;
    use serde_json::json;

    struct Harness {
        store: Arc<MemoryLedgerStore>,
        gateway: Arc<StubGateway>,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryLedgerStore::new());
        let gateway = Arc::new(StubGateway::default());
        let reconciler = Reconciler::new(store.clone(), gateway.clone());
        Harness {
            store,
            gateway,
            reconciler,
        }
    }

    async fn pending_repayment(store: &MemoryLedgerStore, loan: &Loan, amount: Decimal, reference: &str) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_repayment(&Repayment::new(loan.id, amount, reference))
            .await
            .unwrap();
        tx.insert_transaction(&LedgerTransaction::new(
            loan.user_id,
            TransactionType::Repayment,
            amount,
            reference,
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    async fn pending_deposit(store: &MemoryLedgerStore, user_id: Uuid, amount: Decimal, reference: &str) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_transaction(&LedgerTransaction::new(
            user_id,
            TransactionType::Deposit,
            amount,
            reference,
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    fn repayment_charge(reference: &str, loan_id: Uuid, amount_minor: i64) -> (ProviderEvent, Value) {
        let raw = json!({
            "event": "charge.success",
            "data": {
                "reference": reference,
                "amount": amount_minor,
                "channel": "card",
                "metadata": { "loanId": loan_id.to_string(), "type": "repayment" }
            }
        });
        let (event, raw) = ProviderEvent::from_body(raw.to_string().as_bytes()).unwrap();
        (event, raw)
    }

    fn deposit_charge(reference: &str, amount_minor: i64) -> (ProviderEvent, Value) {
        let raw = json!({
            "event": "charge.success",
            "data": { "reference": reference, "amount": amount_minor, "channel": "dedicated_nuban", "metadata": null }
        });
        ProviderEvent::from_body(raw.to_string().as_bytes()).unwrap()
    }

    async fn loan_status(store: &MemoryLedgerStore, loan_id: Uuid) -> LoanStatus {
        let mut tx = store.begin().await.unwrap();
        tx.get_loan(loan_id).await.unwrap().unwrap().status
    }

    async fn wallet(store: &MemoryLedgerStore, user_id: Uuid) -> Wallet {
        let mut tx = store.begin().await.unwrap();
        tx.get_wallet_by_user(user_id).await.unwrap().unwrap()
    }

    async fn transaction(store: &MemoryLedgerStore, reference: &str) -> LedgerTransaction {
        let mut tx = store.begin().await.unwrap();
        tx.find_transaction_by_reference(reference).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_rollup_flips_loan_only_when_fully_repaid() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        let loan = approved_loan(&h.store, user.id, dec!(100000)).await;
        assert_eq!(loan.total_repayment, dec!(105000));

        pending_repayment(&h.store, &loan, dec!(50000), "repay_a").await;
        pending_repayment(&h.store, &loan, dec!(55000), "repay_b").await;

        let (first, raw) = repayment_charge("repay_a", loan.id, 5_000_000);
        let outcome = h.reconciler.handle_event(&first, &raw).await.unwrap();
        assert!(matches!(
            outcome,
            ReconcileOutcome::Applied(Effect::RepaymentCompleted {
                total_repaid,
                loan_repaid: false,
                ..
            }) if total_repaid == dec!(50000)
        ));
        assert_eq!(loan_status(&h.store, loan.id).await, LoanStatus::Approved);

        let (second, raw) = repayment_charge("repay_b", loan.id, 5_500_000);
        let outcome = h.reconciler.handle_event(&second, &raw).await.unwrap();
        assert!(matches!(
            outcome,
            ReconcileOutcome::Applied(Effect::RepaymentCompleted {
                total_repaid,
                loan_repaid: true,
                ..
            }) if total_repaid == dec!(105000)
        ));
        assert_eq!(loan_status(&h.store, loan.id).await, LoanStatus::Repaid);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_applies_once() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        pending_deposit(&h.store, user.id, dec!(1500), "dep_1").await;

        let (event, raw) = deposit_charge("dep_1", 150000);
        let first = h.reconciler.handle_event(&event, &raw).await.unwrap();
        let second = h.reconciler.handle_event(&event, &raw).await.unwrap();

        assert!(matches!(first, ReconcileOutcome::Applied(Effect::DepositCredited { .. })));
        assert_eq!(second, ReconcileOutcome::AlreadyApplied);
        assert_eq!(wallet(&h.store, user.id).await.balance, dec!(1500));
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_credit_once() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        pending_deposit(&h.store, user.id, dec!(1500), "dep_race").await;

        let (event, raw) = deposit_charge("dep_race", 150000);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let reconciler = h.reconciler.clone();
            let event = event.clone();
            let raw = raw.clone();
            handles.push(tokio::spawn(async move {
                reconciler.handle_event(&event, &raw).await.unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ReconcileOutcome::Applied(_)) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(wallet(&h.store, user.id).await.balance, dec!(1500));
    }

    #[tokio::test]
    async fn test_overpayment_still_repays() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        let loan = approved_loan(&h.store, user.id, dec!(100000)).await;

        pending_repayment(&h.store, &loan, dec!(50000), "repay_a").await;
        pending_repayment(&h.store, &loan, dec!(60000), "repay_b").await;

        for (reference, minor) in [("repay_a", 5_000_000), ("repay_b", 6_000_000)] {
            let (event, raw) = repayment_charge(reference, loan.id, minor);
            h.reconciler.handle_event(&event, &raw).await.unwrap();
        }

        assert_eq!(loan_status(&h.store, loan.id).await, LoanStatus::Repaid);
        let mut tx = h.store.begin().await.unwrap();
        assert_eq!(tx.sum_completed_repayments(loan.id).await.unwrap(), dec!(110000));
    }

    #[tokio::test]
    async fn test_unknown_reference_is_benign() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;

        let (event, raw) = deposit_charge("nobody_knows", 150000);
        let outcome = h.reconciler.handle_event(&event, &raw).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::UnknownReference);
        assert_eq!(wallet(&h.store, user.id).await.balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_deposit_never_touches_loans() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        let loan = approved_loan(&h.store, user.id, dec!(100000)).await;
        pending_repayment(&h.store, &loan, dec!(105000), "repay_full").await;
        pending_deposit(&h.store, user.id, dec!(105000), "dep_mislabelled").await;

        // deposit transaction whose checkout metadata points at the loan
        let (event, raw) = repayment_charge("dep_mislabelled", loan.id, 10_500_000);
        h.reconciler.handle_event(&event, &raw).await.unwrap();

        assert_eq!(loan_status(&h.store, loan.id).await, LoanStatus::Approved);
        let mut tx = h.store.begin().await.unwrap();
        let repayment = tx.find_repayment_by_reference("repay_full").await.unwrap().unwrap();
        assert_eq!(repayment.status, RepaymentStatus::Pending);
        drop(tx);
        assert_eq!(wallet(&h.store, user.id).await.balance, dec!(105000));
    }

    #[tokio::test]
    async fn test_repayment_never_touches_wallet() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        let loan = approved_loan(&h.store, user.id, dec!(100000)).await;
        pending_repayment(&h.store, &loan, dec!(50000), "repay_a").await;

        let (event, raw) = repayment_charge("repay_a", loan.id, 5_000_000);
        h.reconciler.handle_event(&event, &raw).await.unwrap();

        assert_eq!(wallet(&h.store, user.id).await.balance, Decimal::ZERO);
        assert_eq!(transaction(&h.store, "repay_a").await.status, TransactionStatus::Success);
    }

    #[tokio::test]
    async fn test_missing_repayment_queues_exception() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        let loan = approved_loan(&h.store, user.id, dec!(100000)).await;

        // transaction exists but the repayment row was never written
        let mut tx = h.store.begin().await.unwrap();
        tx.insert_transaction(&LedgerTransaction::new(
            user.id,
            TransactionType::Repayment,
            dec!(50000),
            "repay_orphan",
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let (event, raw) = repayment_charge("repay_orphan", loan.id, 5_000_000);
        let outcome = h.reconciler.handle_event(&event, &raw).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Applied(Effect::ExceptionQueued(ExceptionReason::RepaymentNotFound))
        );
        let txn = transaction(&h.store, "repay_orphan").await;
        assert_eq!(txn.status, TransactionStatus::Success);
        assert_eq!(txn.provider_payload, Some(raw));

        let mut tx = h.store.begin().await.unwrap();
        let exceptions = tx.list_exceptions().await.unwrap();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].reference, "repay_orphan");
        assert_eq!(exceptions[0].loan_id, Some(loan.id));
    }

    #[tokio::test]
    async fn test_missing_loan_link_queues_exception() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        let loan = approved_loan(&h.store, user.id, dec!(100000)).await;
        pending_repayment(&h.store, &loan, dec!(50000), "repay_a").await;

        let raw = json!({
            "event": "charge.success",
            "data": { "reference": "repay_a", "amount": 5_000_000, "metadata": { "type": "repayment" } }
        });
        let (event, raw) = ProviderEvent::from_body(raw.to_string().as_bytes()).unwrap();
        let outcome = h.reconciler.handle_event(&event, &raw).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Applied(Effect::ExceptionQueued(ExceptionReason::MissingLoanReference))
        );
        assert_eq!(loan_status(&h.store, loan.id).await, LoanStatus::Approved);
    }

    #[tokio::test]
    async fn test_failed_attempt_can_still_complete() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        let loan = approved_loan(&h.store, user.id, dec!(100000)).await;
        pending_repayment(&h.store, &loan, dec!(105000), "repay_late").await;

        let failed = h.reconciler.mark_attempt_failed("repay_late", None).await.unwrap();
        assert_eq!(failed, ReconcileOutcome::Applied(Effect::AttemptFailed));
        assert_eq!(transaction(&h.store, "repay_late").await.status, TransactionStatus::Failed);

        let (event, raw) = repayment_charge("repay_late", loan.id, 10_500_000);
        h.reconciler.handle_event(&event, &raw).await.unwrap();

        assert_eq!(transaction(&h.store, "repay_late").await.status, TransactionStatus::Success);
        assert_eq!(loan_status(&h.store, loan.id).await, LoanStatus::Repaid);
    }

    #[tokio::test]
    async fn test_transfer_outcomes() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        pending_deposit(&h.store, user.id, dec!(2000), "trf_1").await;

        let failed = json!({"event": "transfer.failed", "data": {"reference": "trf_1"}});
        let (event, raw) = ProviderEvent::from_body(failed.to_string().as_bytes()).unwrap();
        assert_eq!(
            h.reconciler.handle_event(&event, &raw).await.unwrap(),
            ReconcileOutcome::Applied(Effect::TransactionSettled(TransactionStatus::Failed))
        );

        let success = json!({"event": "transfer.success", "data": {"reference": "trf_1"}});
        let (event, raw) = ProviderEvent::from_body(success.to_string().as_bytes()).unwrap();
        h.reconciler.handle_event(&event, &raw).await.unwrap();
        assert_eq!(transaction(&h.store, "trf_1").await.status, TransactionStatus::Success);

        // success is terminal
        let (event, raw) = ProviderEvent::from_body(failed.to_string().as_bytes()).unwrap();
        assert_eq!(
            h.reconciler.handle_event(&event, &raw).await.unwrap(),
            ReconcileOutcome::TransitionRejected {
                from: TransactionStatus::Success,
                to: TransactionStatus::Failed,
            }
        );
        // transfers carry no wallet side effect
        assert_eq!(wallet(&h.store, user.id).await.balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_informational_events_acknowledged() {
        let h = harness();
        let raw = json!({"event": "dedicatedaccount.assign.success", "data": {}});
        let (event, raw) = ProviderEvent::from_body(raw.to_string().as_bytes()).unwrap();
        assert_eq!(
            h.reconciler.handle_event(&event, &raw).await.unwrap(),
            ReconcileOutcome::Acknowledged
        );
    }

    #[tokio::test]
    async fn test_reconcile_by_polling() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        pending_deposit(&h.store, user.id, dec!(1500), "dep_poll").await;
        pending_deposit(&h.store, user.id, dec!(700), "dep_dead").await;
        pending_deposit(&h.store, user.id, dec!(300), "dep_wait").await;

        h.gateway.set_verification("dep_poll", "success", 150000, json!(null));
        h.gateway.set_verification("dep_dead", "failed", 70000, json!(null));
        h.gateway.set_verification("dep_wait", "abandoned", 30000, json!(null));

        assert!(matches!(
            h.reconciler.reconcile_by_reference("dep_poll").await.unwrap(),
            ReconcileOutcome::Applied(Effect::DepositCredited { .. })
        ));
        assert_eq!(
            h.reconciler.reconcile_by_reference("dep_dead").await.unwrap(),
            ReconcileOutcome::Applied(Effect::AttemptFailed)
        );
        assert_eq!(
            h.reconciler.reconcile_by_reference("dep_wait").await.unwrap(),
            ReconcileOutcome::StillPending
        );

        assert_eq!(wallet(&h.store, user.id).await.balance, dec!(1500));
        assert_eq!(transaction(&h.store, "dep_dead").await.status, TransactionStatus::Failed);
        assert_eq!(transaction(&h.store, "dep_wait").await.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_sweep_reverifies_stale_pending() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        pending_deposit(&h.store, user.id, dec!(1500), "dep_old").await;
        h.gateway.set_verification("dep_old", "success", 150000, json!(null));

        // nothing is older than an hour yet
        let report = h.reconciler.sweep_stale(Duration::hours(1), 50).await.unwrap();
        assert_eq!(report.examined, 0);

        let report = h.reconciler.sweep_stale(Duration::zero(), 50).await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(wallet(&h.store, user.id).await.balance, dec!(1500));
    }

    #[tokio::test]
    async fn test_sweep_rotates_past_abandoned_checkouts() {
        let h = harness();
        let user = seed_user(&h.store, "ada@example.com").await;
        let now = Utc::now();

        let mut tx = h.store.begin().await.unwrap();
        for (reference, minutes) in [("old_1", 90), ("old_2", 80), ("paid_3", 70)] {
            let mut txn = LedgerTransaction::new(user.id, TransactionType::Deposit, dec!(500), reference);
            txn.created_at = now - Duration::minutes(minutes);
            tx.insert_transaction(&txn).await.unwrap();
        }
        tx.commit().await.unwrap();

        h.gateway.set_verification("old_1", "abandoned", 50000, json!(null));
        h.gateway.set_verification("old_2", "abandoned", 50000, json!(null));
        h.gateway.set_verification("paid_3", "success", 50000, json!(null));

        // the two oldest fill the first window
        let first = h.reconciler.sweep_stale(Duration::minutes(30), 2).await.unwrap();
        assert_eq!(first.examined, 2);
        assert_eq!(first.still_pending, 2);
        assert_eq!(transaction(&h.store, "paid_3").await.status, TransactionStatus::Pending);

        let second = h.reconciler.sweep_stale(Duration::minutes(30), 2).await.unwrap();
        assert_eq!(second.applied, 1);
        assert_eq!(transaction(&h.store, "paid_3").await.status, TransactionStatus::Success);
        assert_eq!(wallet(&h.store, user.id).await.balance, dec!(500));

        let old = transaction(&h.store, "old_1").await;
        assert_eq!(old.status, TransactionStatus::Pending);
        assert!(old.last_checked_at.is_some());
    }
}
