use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::models::*;
use super::store::{LedgerStore, LedgerTx};
use crate::error::{AppError, AppResult, LedgerError};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    users: HashMap<Uuid, User>,
    wallets: HashMap<Uuid, Wallet>,
    loans: HashMap<Uuid, Loan>,
    repayments: HashMap<Uuid, Repayment>,
    transactions: HashMap<Uuid, LedgerTransaction>,
    references: HashMap<String, Uuid>,
    exceptions: Vec<ReconciliationException>,
    // intake rows keyed by loan id
    identities: HashMap<Uuid, IdentityVerification>,
    guarantors: HashMap<Uuid, Guarantor>,
    bank_details: HashMap<Uuid, BankDetails>,
}

/// In-process ledger used by tests and `LEDGER_BACKEND=memory`.
///
/// A unit of work holds the ledger lock for its whole lifetime and edits a
/// private copy; `commit` swaps the copy in, dropping discards it.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryLedgerTx { guard, working }))
    }
}

pub struct MemoryLedgerTx {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

impl MemoryLedgerTx {
    fn newest_first(mut loans: Vec<Loan>) -> Vec<Loan> {
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        loans
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn insert_user(&mut self, user: &User) -> AppResult<()> {
        if self.working.users.values().any(|u| u.email == user.email) {
            return Err(AppError::Conflict(format!(
                "Email already registered: {}",
                user.email
            )));
        }
        self.working.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&mut self, user_id: Uuid) -> AppResult<Option<User>> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&mut self, email: &str) -> AppResult<Option<User>> {
        Ok(self.working.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user_profile(&mut self, user_id: Uuid, profile: &ProfileUpdate) -> AppResult<bool> {
        let Some(user) = self.working.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.full_name = Some(profile.full_name.clone());
        user.phone = Some(profile.phone.clone());
        user.date_of_birth = Some(profile.date_of_birth);
        user.address = Some(profile.address.clone());
        Ok(true)
    }

    async fn set_application_step(&mut self, user_id: Uuid, step: i16) -> AppResult<bool> {
        let Some(user) = self.working.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.current_step = step;
        Ok(true)
    }

    async fn mark_application_complete(&mut self, user_id: Uuid) -> AppResult<bool> {
        let Some(user) = self.working.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.application_complete = true;
        user.current_step = REVIEW_APPLICATION_STEP;
        Ok(true)
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> AppResult<()> {
        self.working.wallets.insert(wallet.user_id, wallet.clone());
        Ok(())
    }

    async fn get_wallet_by_user(&mut self, user_id: Uuid) -> AppResult<Option<Wallet>> {
        Ok(self.working.wallets.get(&user_id).cloned())
    }

    async fn assign_virtual_account(
        &mut self,
        user_id: Uuid,
        account: &VirtualAccount,
    ) -> AppResult<bool> {
        match self.working.wallets.get_mut(&user_id) {
            Some(wallet) if !wallet.has_virtual_account() => {
                wallet.assign(account);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn credit_wallet(&mut self, user_id: Uuid, amount: Decimal) -> AppResult<()> {
        let wallet = self
            .working
            .wallets
            .get_mut(&user_id)
            .ok_or_else(|| LedgerError::WalletMissing(user_id.to_string()))?;
        wallet.balance += amount;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()> {
        self.working.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn get_loan(&mut self, loan_id: Uuid) -> AppResult<Option<Loan>> {
        Ok(self.working.loans.get(&loan_id).cloned())
    }

    async fn lock_loan(&mut self, loan_id: Uuid) -> AppResult<Option<Loan>> {
        // the unit of work already holds the whole ledger exclusively
        Ok(self.working.loans.get(&loan_id).cloned())
    }

    async fn latest_loan_for_user(&mut self, user_id: Uuid) -> AppResult<Option<Loan>> {
        Ok(self
            .working
            .loans
            .values()
            .filter(|l| l.user_id == user_id)
            .max_by_key(|l| l.created_at)
            .cloned())
    }

    async fn list_loans_for_user(&mut self, user_id: Uuid) -> AppResult<Vec<Loan>> {
        let loans = self
            .working
            .loans
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(loans))
    }

    async fn list_loans(&mut self, status: Option<LoanStatus>) -> AppResult<Vec<Loan>> {
        let loans = self
            .working
            .loans
            .values()
            .filter(|l| status.map_or(true, |s| l.status == s))
            .cloned()
            .collect();
        Ok(Self::newest_first(loans))
    }

    async fn loan_stats(&mut self) -> AppResult<LoanStats> {
        let mut stats = LoanStats::default();
        for loan in self.working.loans.values() {
            stats.total += 1;
            match loan.status {
                LoanStatus::Pending => stats.pending += 1,
                LoanStatus::Approved => stats.approved += 1,
                LoanStatus::Rejected => stats.rejected += 1,
                LoanStatus::Repaid => stats.repaid += 1,
            }
            if matches!(loan.status, LoanStatus::Approved | LoanStatus::Repaid) {
                stats.total_disbursed += loan.amount;
            }
        }
        Ok(stats)
    }

    async fn update_loan_terms(
        &mut self,
        loan_id: Uuid,
        amount: Decimal,
        interest_rate: Decimal,
        total_repayment: Decimal,
    ) -> AppResult<bool> {
        match self.working.loans.get_mut(&loan_id) {
            Some(loan) if loan.status == LoanStatus::Pending => {
                loan.amount = amount;
                loan.interest_rate = interest_rate;
                loan.total_repayment = total_repayment;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_loan_status(
        &mut self,
        loan_id: Uuid,
        from: LoanStatus,
        to: LoanStatus,
    ) -> AppResult<bool> {
        from.ensure_transition(to)?;
        match self.working.loans.get_mut(&loan_id) {
            Some(loan) if loan.status == from => {
                loan.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn approve_loan(
        &mut self,
        loan_id: Uuid,
        approved_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        match self.working.loans.get_mut(&loan_id) {
            Some(loan) if loan.status == LoanStatus::Pending => {
                loan.status = LoanStatus::Approved;
                loan.approval_date = Some(approved_at);
                loan.due_date = Some(due_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_identity_verification(&mut self, identity: &IdentityVerification) -> AppResult<()> {
        let row = match self.working.identities.get(&identity.loan_id) {
            Some(existing) => IdentityVerification {
                id: existing.id,
                created_at: existing.created_at,
                updated_at: Utc::now(),
                ..identity.clone()
            },
            None => identity.clone(),
        };
        self.working.identities.insert(row.loan_id, row);
        Ok(())
    }

    async fn get_identity_verification(&mut self, loan_id: Uuid) -> AppResult<Option<IdentityVerification>> {
        Ok(self.working.identities.get(&loan_id).cloned())
    }

    async fn upsert_guarantor(&mut self, guarantor: &Guarantor) -> AppResult<()> {
        let row = match self.working.guarantors.get(&guarantor.loan_id) {
            Some(existing) => Guarantor {
                id: existing.id,
                created_at: existing.created_at,
                updated_at: Utc::now(),
                ..guarantor.clone()
            },
            None => guarantor.clone(),
        };
        self.working.guarantors.insert(row.loan_id, row);
        Ok(())
    }

    async fn get_guarantor(&mut self, loan_id: Uuid) -> AppResult<Option<Guarantor>> {
        Ok(self.working.guarantors.get(&loan_id).cloned())
    }

    async fn upsert_bank_details(&mut self, details: &BankDetails) -> AppResult<()> {
        let row = match self.working.bank_details.get(&details.loan_id) {
            Some(existing) => BankDetails {
                id: existing.id,
                created_at: existing.created_at,
                updated_at: Utc::now(),
                ..details.clone()
            },
            None => details.clone(),
        };
        self.working.bank_details.insert(row.loan_id, row);
        Ok(())
    }

    async fn get_bank_details(&mut self, loan_id: Uuid) -> AppResult<Option<BankDetails>> {
        Ok(self.working.bank_details.get(&loan_id).cloned())
    }

    async fn insert_repayment(&mut self, repayment: &Repayment) -> AppResult<()> {
        if self
            .working
            .repayments
            .values()
            .any(|r| r.transaction_ref == repayment.transaction_ref)
        {
            return Err(LedgerError::DuplicateReference(repayment.transaction_ref.clone()).into());
        }
        self.working.repayments.insert(repayment.id, repayment.clone());
        Ok(())
    }

    async fn find_repayment_by_reference(&mut self, reference: &str) -> AppResult<Option<Repayment>> {
        Ok(self
            .working
            .repayments
            .values()
            .find(|r| r.transaction_ref == reference)
            .cloned())
    }

    async fn find_repayment_by_reference_and_loan(
        &mut self,
        reference: &str,
        loan_id: Uuid,
    ) -> AppResult<Option<Repayment>> {
        Ok(self
            .working
            .repayments
            .values()
            .find(|r| r.transaction_ref == reference && r.loan_id == loan_id)
            .cloned())
    }

    async fn list_repayments(&mut self, loan_id: Uuid) -> AppResult<Vec<Repayment>> {
        let mut repayments: Vec<Repayment> = self
            .working
            .repayments
            .values()
            .filter(|r| r.loan_id == loan_id)
            .cloned()
            .collect();
        repayments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(repayments)
    }

    async fn update_repayment_status(
        &mut self,
        repayment_id: Uuid,
        from: RepaymentStatus,
        to: RepaymentStatus,
    ) -> AppResult<bool> {
        from.ensure_transition(to)?;
        match self.working.repayments.get_mut(&repayment_id) {
            Some(repayment) if repayment.status == from => {
                repayment.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sum_completed_repayments(&mut self, loan_id: Uuid) -> AppResult<Decimal> {
        Ok(self
            .working
            .repayments
            .values()
            .filter(|r| r.loan_id == loan_id && r.status == RepaymentStatus::Completed)
            .map(|r| r.amount)
            .sum())
    }

    async fn insert_transaction(&mut self, transaction: &LedgerTransaction) -> AppResult<()> {
        if self.working.references.contains_key(&transaction.reference) {
            return Err(LedgerError::DuplicateReference(transaction.reference.clone()).into());
        }
        self.working
            .references
            .insert(transaction.reference.clone(), transaction.id);
        self.working
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn find_transaction_by_reference(
        &mut self,
        reference: &str,
    ) -> AppResult<Option<LedgerTransaction>> {
        Ok(self
            .working
            .references
            .get(reference)
            .and_then(|id| self.working.transactions.get(id))
            .cloned())
    }

    async fn update_transaction_status(
        &mut self,
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        provider_payload: Option<&serde_json::Value>,
    ) -> AppResult<bool> {
        from.ensure_transition(to)?;
        match self.working.transactions.get_mut(&transaction_id) {
            Some(transaction) if transaction.status == from => {
                transaction.status = to;
                if let Some(payload) = provider_payload {
                    transaction.provider_payload = Some(payload.clone());
                }
                transaction.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_stale_pending_transactions(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<LedgerTransaction>> {
        let mut stale: Vec<LedgerTransaction> = self
            .working
            .transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Pending && t.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.sweep_key());
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn mark_transaction_checked(
        &mut self,
        transaction_id: Uuid,
        checked_at: DateTime<Utc>,
    ) -> AppResult<()> {
        if let Some(transaction) = self.working.transactions.get_mut(&transaction_id) {
            transaction.last_checked_at = Some(checked_at);
        }
        Ok(())
    }

    async fn record_exception(&mut self, exception: &ReconciliationException) -> AppResult<()> {
        self.working.exceptions.push(exception.clone());
        Ok(())
    }

    async fn list_exceptions(&mut self) -> AppResult<Vec<ReconciliationException>> {
        let mut exceptions = self.working.exceptions.clone();
        exceptions.reverse();
        Ok(exceptions)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryLedgerTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
