use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::models::*;
use super::store::{LedgerStore, LedgerTx};
use crate::error::{AppError, AppResult, LedgerError};

const LOAN_COLUMNS: &str = r#"
    id, user_id, amount, interest_rate, total_repayment, status,
    application_date, approval_date, due_date, created_at
"#;

const TRANSACTION_COLUMNS: &str = r#"
    id, user_id, type, amount, reference, status, provider_payload, created_at, updated_at,
    last_checked_at
"#;

const USER_COLUMNS: &str = r#"
    id, email, full_name, phone, role, date_of_birth, address, current_step,
    application_complete, created_at
"#;

const WALLET_COLUMNS: &str = r#"
    id, user_id, balance, account_number, account_name, bank_name,
    provider_account_id, created_at, updated_at
"#;

/// Postgres-backed ledger; every unit of work is one database transaction
pub struct PgLedgerStore {
    pub pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }
}

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    // ========== USER OPERATIONS ==========

    async fn insert_user(&mut self, user: &User) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (
                id, email, full_name, phone, role, date_of_birth, address, current_step,
                application_complete, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.phone)
        .bind(user.role)
        .bind(user.date_of_birth)
        .bind(&user.address)
        .bind(user.current_step)
        .bind(user.application_complete)
        .bind(user.created_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Email already registered: {}",
                user.email
            )));
        }

        Ok(())
    }

    async fn get_user(&mut self, user_id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(user)
    }

    async fn find_user_by_email(&mut self, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(user)
    }

    async fn update_user_profile(&mut self, user_id: Uuid, profile: &ProfileUpdate) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET full_name = $2, phone = $3, date_of_birth = $4, address = $5
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(&profile.full_name)
        .bind(&profile.phone)
        .bind(profile.date_of_birth)
        .bind(&profile.address)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_application_step(&mut self, user_id: Uuid, step: i16) -> AppResult<bool> {
        let result = sqlx::query("UPDATE users SET current_step = $2 WHERE id = $1")
            .bind(user_id)
            .bind(step)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_application_complete(&mut self, user_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET application_complete = TRUE, current_step = $2
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(REVIEW_APPLICATION_STEP)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ========== WALLET OPERATIONS ==========

    async fn insert_wallet(&mut self, wallet: &Wallet) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.user_id)
        .bind(wallet.balance)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn get_wallet_by_user(&mut self, user_id: Uuid) -> AppResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE user_id = $1",
            WALLET_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(wallet)
    }

    async fn assign_virtual_account(
        &mut self,
        user_id: Uuid,
        account: &VirtualAccount,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET account_number = $2, account_name = $3, bank_name = $4,
                provider_account_id = $5, updated_at = NOW()
            WHERE user_id = $1 AND account_number IS NULL
            "#,
        )
        .bind(user_id)
        .bind(&account.account_number)
        .bind(&account.account_name)
        .bind(&account.bank_name)
        .bind(&account.provider_account_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn credit_wallet(&mut self, user_id: Uuid, amount: Decimal) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance + $2, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::WalletMissing(user_id.to_string()).into());
        }

        Ok(())
    }

    // ========== LOAN OPERATIONS ==========

    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loans (
                id, user_id, amount, interest_rate, total_repayment, status,
                application_date, approval_date, due_date, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(loan.id)
        .bind(loan.user_id)
        .bind(loan.amount)
        .bind(loan.interest_rate)
        .bind(loan.total_repayment)
        .bind(loan.status)
        .bind(loan.application_date)
        .bind(loan.approval_date)
        .bind(loan.due_date)
        .bind(loan.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn get_loan(&mut self, loan_id: Uuid) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(&format!(
            "SELECT {} FROM loans WHERE id = $1",
            LOAN_COLUMNS
        ))
        .bind(loan_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(loan)
    }

    async fn lock_loan(&mut self, loan_id: Uuid) -> AppResult<Option<Loan>> {
        // Concurrent rollups for one loan queue here, so each sums the other's repayment
        let loan = sqlx::query_as::<_, Loan>(&format!(
            "SELECT {} FROM loans WHERE id = $1 FOR UPDATE",
            LOAN_COLUMNS
        ))
        .bind(loan_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(loan)
    }

    async fn latest_loan_for_user(&mut self, user_id: Uuid) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(&format!(
            "SELECT {} FROM loans WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
            LOAN_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(loan)
    }

    async fn list_loans_for_user(&mut self, user_id: Uuid) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(&format!(
            "SELECT {} FROM loans WHERE user_id = $1 ORDER BY created_at DESC",
            LOAN_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(loans)
    }

    async fn list_loans(&mut self, status: Option<LoanStatus>) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(&format!(
            "SELECT {} FROM loans WHERE ($1::loan_status IS NULL OR status = $1) ORDER BY created_at DESC",
            LOAN_COLUMNS
        ))
        .bind(status)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(loans)
    }

    async fn loan_stats(&mut self) -> AppResult<LoanStats> {
        let (total, pending, approved, rejected, repaid, total_disbursed) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64, Option<Decimal>)>(
                r#"
                SELECT
                    COUNT(*),
                    COUNT(*) FILTER (WHERE status = 'pending'),
                    COUNT(*) FILTER (WHERE status = 'approved'),
                    COUNT(*) FILTER (WHERE status = 'rejected'),
                    COUNT(*) FILTER (WHERE status = 'repaid'),
                    SUM(amount) FILTER (WHERE status IN ('approved', 'repaid'))
                FROM loans
                "#,
            )
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(LoanStats {
            total,
            pending,
            approved,
            rejected,
            repaid,
            total_disbursed: total_disbursed.unwrap_or(Decimal::ZERO),
        })
    }

    async fn update_loan_terms(
        &mut self,
        loan_id: Uuid,
        amount: Decimal,
        interest_rate: Decimal,
        total_repayment: Decimal,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET amount = $2, interest_rate = $3, total_repayment = $4
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(loan_id)
        .bind(amount)
        .bind(interest_rate)
        .bind(total_repayment)
        .bind(LoanStatus::Pending)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_loan_status(
        &mut self,
        loan_id: Uuid,
        from: LoanStatus,
        to: LoanStatus,
    ) -> AppResult<bool> {
        // SECURITY: Validate state machine transitions
        from.ensure_transition(to)?;

        let result = sqlx::query(
            r#"
            UPDATE loans
            SET status = $3
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(loan_id)
        .bind(from)
        .bind(to)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn approve_loan(
        &mut self,
        loan_id: Uuid,
        approved_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET status = $2, approval_date = $3, due_date = $4
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(loan_id)
        .bind(LoanStatus::Approved)
        .bind(approved_at)
        .bind(due_at)
        .bind(LoanStatus::Pending)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ========== APPLICATION INTAKE ==========

    async fn upsert_identity_verification(&mut self, identity: &IdentityVerification) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO identity_verifications (
                id, loan_id, bvn, nin, face_photo_url, passport_url, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (loan_id) DO UPDATE
            SET bvn = EXCLUDED.bvn,
                nin = EXCLUDED.nin,
                face_photo_url = EXCLUDED.face_photo_url,
                passport_url = EXCLUDED.passport_url,
                updated_at = NOW()
            "#,
        )
        .bind(identity.id)
        .bind(identity.loan_id)
        .bind(&identity.bvn)
        .bind(&identity.nin)
        .bind(&identity.face_photo_url)
        .bind(&identity.passport_url)
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn get_identity_verification(&mut self, loan_id: Uuid) -> AppResult<Option<IdentityVerification>> {
        let identity = sqlx::query_as::<_, IdentityVerification>(
            r#"
            SELECT id, loan_id, bvn, nin, face_photo_url, passport_url, created_at, updated_at
            FROM identity_verifications
            WHERE loan_id = $1
            "#,
        )
        .bind(loan_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(identity)
    }

    async fn upsert_guarantor(&mut self, guarantor: &Guarantor) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO guarantors (
                id, loan_id, full_name, phone, address, relationship, photo_url, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (loan_id) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                phone = EXCLUDED.phone,
                address = EXCLUDED.address,
                relationship = EXCLUDED.relationship,
                photo_url = EXCLUDED.photo_url,
                updated_at = NOW()
            "#,
        )
        .bind(guarantor.id)
        .bind(guarantor.loan_id)
        .bind(&guarantor.full_name)
        .bind(&guarantor.phone)
        .bind(&guarantor.address)
        .bind(&guarantor.relationship)
        .bind(&guarantor.photo_url)
        .bind(guarantor.created_at)
        .bind(guarantor.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn get_guarantor(&mut self, loan_id: Uuid) -> AppResult<Option<Guarantor>> {
        let guarantor = sqlx::query_as::<_, Guarantor>(
            r#"
            SELECT id, loan_id, full_name, phone, address, relationship, photo_url, created_at, updated_at
            FROM guarantors
            WHERE loan_id = $1
            "#,
        )
        .bind(loan_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(guarantor)
    }

    async fn upsert_bank_details(&mut self, details: &BankDetails) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bank_details (
                id, loan_id, bank_name, account_number, account_name, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (loan_id) DO UPDATE
            SET bank_name = EXCLUDED.bank_name,
                account_number = EXCLUDED.account_number,
                account_name = EXCLUDED.account_name,
                updated_at = NOW()
            "#,
        )
        .bind(details.id)
        .bind(details.loan_id)
        .bind(&details.bank_name)
        .bind(&details.account_number)
        .bind(&details.account_name)
        .bind(details.created_at)
        .bind(details.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn get_bank_details(&mut self, loan_id: Uuid) -> AppResult<Option<BankDetails>> {
        let details = sqlx::query_as::<_, BankDetails>(
            r#"
            SELECT id, loan_id, bank_name, account_number, account_name, created_at, updated_at
            FROM bank_details
            WHERE loan_id = $1
            "#,
        )
        .bind(loan_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(details)
    }

    // ========== REPAYMENT OPERATIONS ==========

    async fn insert_repayment(&mut self, repayment: &Repayment) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO repayments (id, loan_id, amount, transaction_ref, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (transaction_ref) DO NOTHING
            "#,
        )
        .bind(repayment.id)
        .bind(repayment.loan_id)
        .bind(repayment.amount)
        .bind(&repayment.transaction_ref)
        .bind(repayment.status)
        .bind(repayment.created_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::DuplicateReference(repayment.transaction_ref.clone()).into());
        }

        Ok(())
    }

    async fn find_repayment_by_reference(&mut self, reference: &str) -> AppResult<Option<Repayment>> {
        let repayment = sqlx::query_as::<_, Repayment>(
            r#"
            SELECT id, loan_id, amount, transaction_ref, status, created_at
            FROM repayments
            WHERE transaction_ref = $1
            LIMIT 1
            "#,
        )
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(repayment)
    }

    async fn find_repayment_by_reference_and_loan(
        &mut self,
        reference: &str,
        loan_id: Uuid,
    ) -> AppResult<Option<Repayment>> {
        let repayment = sqlx::query_as::<_, Repayment>(
            r#"
            SELECT id, loan_id, amount, transaction_ref, status, created_at
            FROM repayments
            WHERE transaction_ref = $1 AND loan_id = $2
            LIMIT 1
            "#,
        )
        .bind(reference)
        .bind(loan_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(repayment)
    }

    async fn list_repayments(&mut self, loan_id: Uuid) -> AppResult<Vec<Repayment>> {
        let repayments = sqlx::query_as::<_, Repayment>(
            r#"
            SELECT id, loan_id, amount, transaction_ref, status, created_at
            FROM repayments
            WHERE loan_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(loan_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(repayments)
    }

    async fn update_repayment_status(
        &mut self,
        repayment_id: Uuid,
        from: RepaymentStatus,
        to: RepaymentStatus,
    ) -> AppResult<bool> {
        from.ensure_transition(to)?;

        let result = sqlx::query(
            r#"
            UPDATE repayments
            SET status = $3
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(repayment_id)
        .bind(from)
        .bind(to)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn sum_completed_repayments(&mut self, loan_id: Uuid) -> AppResult<Decimal> {
        let total: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT SUM(amount)
            FROM repayments
            WHERE loan_id = $1 AND status = $2
            "#,
        )
        .bind(loan_id)
        .bind(RepaymentStatus::Completed)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(total.unwrap_or(Decimal::ZERO))
    }

    // ========== TRANSACTION OPERATIONS ==========

    async fn insert_transaction(&mut self, transaction: &LedgerTransaction) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                id, user_id, type, amount, reference, status, provider_payload, created_at, updated_at,
                last_checked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (reference) DO NOTHING
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.user_id)
        .bind(transaction.kind)
        .bind(transaction.amount)
        .bind(&transaction.reference)
        .bind(transaction.status)
        .bind(transaction.provider_payload.clone())
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .bind(transaction.last_checked_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::DuplicateReference(transaction.reference.clone()).into());
        }

        Ok(())
    }

    async fn find_transaction_by_reference(
        &mut self,
        reference: &str,
    ) -> AppResult<Option<LedgerTransaction>> {
        // FOR UPDATE serialises concurrent deliveries of the same reference
        let transaction = sqlx::query_as::<_, LedgerTransaction>(&format!(
            "SELECT {} FROM transactions WHERE reference = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(transaction)
    }

    async fn update_transaction_status(
        &mut self,
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        provider_payload: Option<&serde_json::Value>,
    ) -> AppResult<bool> {
        from.ensure_transition(to)?;

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $3,
                provider_payload = COALESCE($4, provider_payload),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(transaction_id)
        .bind(from)
        .bind(to)
        .bind(provider_payload.cloned())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_stale_pending_transactions(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<LedgerTransaction>> {
        let transactions = sqlx::query_as::<_, LedgerTransaction>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE status = $1 AND created_at < $2
            ORDER BY COALESCE(last_checked_at, created_at) ASC
            LIMIT $3
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(TransactionStatus::Pending)
        .bind(created_before)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(transactions)
    }

    async fn mark_transaction_checked(
        &mut self,
        transaction_id: Uuid,
        checked_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE transactions SET last_checked_at = $2 WHERE id = $1")
            .bind(transaction_id)
            .bind(checked_at)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    // ========== RECONCILIATION EXCEPTIONS ==========

    async fn record_exception(&mut self, exception: &ReconciliationException) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_exceptions (
                id, transaction_id, reference, loan_id, reason, payload, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(exception.id)
        .bind(exception.transaction_id)
        .bind(&exception.reference)
        .bind(exception.loan_id)
        .bind(exception.reason)
        .bind(&exception.payload)
        .bind(exception.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn list_exceptions(&mut self) -> AppResult<Vec<ReconciliationException>> {
        let exceptions = sqlx::query_as::<_, ReconciliationException>(
            r#"
            SELECT id, transaction_id, reference, loan_id, reason, payload, created_at
            FROM reconciliation_exceptions
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(exceptions)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let this = *self;
        this.tx.commit().await.map_err(AppError::from)
    }
}
