use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::models::*;
use crate::error::AppResult;

/// Entry point to the ledger. Every read and write happens inside a unit of work.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>>;
}

/// One atomic unit of work against the ledger.
///
/// Dropping a `LedgerTx` without calling `commit` rolls every write back.
/// Status writes are compare-and-set: they only apply while the row is still in
/// the expected `from` state and report whether they did.
#[async_trait]
pub trait LedgerTx: Send {
    // ========== USERS & WALLETS ==========

    async fn insert_user(&mut self, user: &User) -> AppResult<()>;

    async fn get_user(&mut self, user_id: Uuid) -> AppResult<Option<User>>;

    async fn find_user_by_email(&mut self, email: &str) -> AppResult<Option<User>>;

    async fn update_user_profile(&mut self, user_id: Uuid, profile: &ProfileUpdate) -> AppResult<bool>;

    async fn set_application_step(&mut self, user_id: Uuid, step: i16) -> AppResult<bool>;

    async fn mark_application_complete(&mut self, user_id: Uuid) -> AppResult<bool>;

    async fn insert_wallet(&mut self, wallet: &Wallet) -> AppResult<()>;

    async fn get_wallet_by_user(&mut self, user_id: Uuid) -> AppResult<Option<Wallet>>;

    /// Assigns the descriptor only if the wallet has none yet
    async fn assign_virtual_account(
        &mut self,
        user_id: Uuid,
        account: &VirtualAccount,
    ) -> AppResult<bool>;

    /// Additive credit applied at the storage layer, never read-modify-write
    async fn credit_wallet(&mut self, user_id: Uuid, amount: Decimal) -> AppResult<()>;

    // ========== LOANS ==========

    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()>;

    async fn get_loan(&mut self, loan_id: Uuid) -> AppResult<Option<Loan>>;

    /// Reads the loan and holds its row lock until the unit of work ends.
    /// Repayment rollups take this before summing so concurrent confirmations
    /// for one loan see each other's completed repayments.
    async fn lock_loan(&mut self, loan_id: Uuid) -> AppResult<Option<Loan>>;

    async fn latest_loan_for_user(&mut self, user_id: Uuid) -> AppResult<Option<Loan>>;

    async fn list_loans_for_user(&mut self, user_id: Uuid) -> AppResult<Vec<Loan>>;

    /// Newest first, optionally filtered by status
    async fn list_loans(&mut self, status: Option<LoanStatus>) -> AppResult<Vec<Loan>>;

    async fn loan_stats(&mut self) -> AppResult<LoanStats>;

    /// Rewrites principal, rate and total of a loan that is still pending
    async fn update_loan_terms(
        &mut self,
        loan_id: Uuid,
        amount: Decimal,
        interest_rate: Decimal,
        total_repayment: Decimal,
    ) -> AppResult<bool>;

    async fn update_loan_status(
        &mut self,
        loan_id: Uuid,
        from: LoanStatus,
        to: LoanStatus,
    ) -> AppResult<bool>;

    /// Pending → Approved, stamping approval and due dates
    async fn approve_loan(
        &mut self,
        loan_id: Uuid,
        approved_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> AppResult<bool>;

    // ========== APPLICATION INTAKE ==========

    /// One row per loan; a second save replaces the captured fields
    async fn upsert_identity_verification(&mut self, identity: &IdentityVerification) -> AppResult<()>;

    async fn get_identity_verification(&mut self, loan_id: Uuid) -> AppResult<Option<IdentityVerification>>;

    async fn upsert_guarantor(&mut self, guarantor: &Guarantor) -> AppResult<()>;

    async fn get_guarantor(&mut self, loan_id: Uuid) -> AppResult<Option<Guarantor>>;

    async fn upsert_bank_details(&mut self, details: &BankDetails) -> AppResult<()>;

    async fn get_bank_details(&mut self, loan_id: Uuid) -> AppResult<Option<BankDetails>>;

    // ========== REPAYMENTS ==========

    async fn insert_repayment(&mut self, repayment: &Repayment) -> AppResult<()>;

    async fn find_repayment_by_reference(&mut self, reference: &str) -> AppResult<Option<Repayment>>;

    async fn find_repayment_by_reference_and_loan(
        &mut self,
        reference: &str,
        loan_id: Uuid,
    ) -> AppResult<Option<Repayment>>;

    async fn list_repayments(&mut self, loan_id: Uuid) -> AppResult<Vec<Repayment>>;

    async fn update_repayment_status(
        &mut self,
        repayment_id: Uuid,
        from: RepaymentStatus,
        to: RepaymentStatus,
    ) -> AppResult<bool>;

    async fn sum_completed_repayments(&mut self, loan_id: Uuid) -> AppResult<Decimal>;

    // ========== TRANSACTIONS ==========

    /// Fails with `LedgerError::DuplicateReference` when the reference is taken
    async fn insert_transaction(&mut self, transaction: &LedgerTransaction) -> AppResult<()>;

    /// Locks the row for the rest of the unit of work where the backend supports it
    async fn find_transaction_by_reference(
        &mut self,
        reference: &str,
    ) -> AppResult<Option<LedgerTransaction>>;

    async fn update_transaction_status(
        &mut self,
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        provider_payload: Option<&serde_json::Value>,
    ) -> AppResult<bool>;

    /// Pending attempts created before the cutoff, least recently checked first
    async fn list_stale_pending_transactions(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<LedgerTransaction>>;

    async fn mark_transaction_checked(
        &mut self,
        transaction_id: Uuid,
        checked_at: DateTime<Utc>,
    ) -> AppResult<()>;

    // ========== RECONCILIATION EXCEPTIONS ==========

    async fn record_exception(&mut self, exception: &ReconciliationException) -> AppResult<()>;

    async fn list_exceptions(&mut self) -> AppResult<Vec<ReconciliationException>>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
