use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

use crate::error::{AppResult, LedgerError};

/// Flat interest applied to every new application, in percent
pub const DEFAULT_INTEREST_RATE: Decimal = dec!(5);

/// Days between approval and the repayment due date
pub const REPAYMENT_PERIOD_DAYS: i64 = 30;

/// Application wizard steps: personal info, identity, guarantor, bank details, review
pub const FIRST_APPLICATION_STEP: i16 = 1;
pub const REVIEW_APPLICATION_STEP: i16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

///User entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
    pub role: Role,
    /// Furthest application step reached, 1..=5
    pub current_step: i16,
    pub application_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, full_name: Option<String>, phone: Option<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            full_name,
            phone,
            date_of_birth: None,
            address: None,
            role,
            current_step: FIRST_APPLICATION_STEP,
            application_complete: false,
            created_at: Utc::now(),
        }
    }

    /// Split the stored full name into (first, last) the way the provider expects.
    /// A single-token name is used for both parts.
    pub fn name_parts(&self) -> (String, String) {
        let full_name = self
            .full_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("User Name");

        let mut parts = full_name.split_whitespace();
        let first = parts.next().unwrap_or("User").to_string();
        let rest = parts.collect::<Vec<_>>().join(" ");
        let last = if rest.is_empty() { first.clone() } else { rest };
        (first, last)
    }
}

/// Personal details captured by the first application step
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdate {
    pub full_name: String,
    pub phone: String,
    pub date_of_birth: NaiveDate,
    pub address: String,
}

/// Provider-issued bank account dedicated to one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualAccount {
    pub account_number: String,
    pub account_name: String,
    pub bank_name: String,
    pub provider_account_id: String,
}

///Wallet entity, one per user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    pub account_number: Option<String>,
    pub account_name: Option<String>,
    pub bank_name: Option<String>,
    pub provider_account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance: Decimal::ZERO,
            account_number: None,
            account_name: None,
            bank_name: None,
            provider_account_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_virtual_account(&self) -> bool {
        self.account_number.is_some()
    }

    pub fn virtual_account(&self) -> Option<VirtualAccount> {
        Some(VirtualAccount {
            account_number: self.account_number.clone()?,
            account_name: self.account_name.clone().unwrap_or_default(),
            bank_name: self.bank_name.clone().unwrap_or_default(),
            provider_account_id: self.provider_account_id.clone().unwrap_or_default(),
        })
    }

    pub fn assign(&mut self, account: &VirtualAccount) {
        self.account_number = Some(account.account_number.clone());
        self.account_name = Some(account.account_name.clone());
        self.bank_name = Some(account.bank_name.clone());
        self.provider_account_id = Some(account.provider_account_id.clone());
        self.updated_at = Utc::now();
    }
}

/// Loan status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Repaid,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "PENDING",
            LoanStatus::Approved => "APPROVED",
            LoanStatus::Rejected => "REJECTED",
            LoanStatus::Repaid => "REPAID",
        }
    }

    pub fn all() -> [LoanStatus; 4] {
        [
            LoanStatus::Pending,
            LoanStatus::Approved,
            LoanStatus::Rejected,
            LoanStatus::Repaid,
        ]
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
    }

    /// Valid transitions:
    /// - Pending → Approved, Rejected
    /// - Approved → Repaid
    /// - Rejected, Repaid are terminal
    pub fn can_transition_to(self, to: LoanStatus) -> bool {
        matches!(
            (self, to),
            (LoanStatus::Pending, LoanStatus::Approved)
                | (LoanStatus::Pending, LoanStatus::Rejected)
                | (LoanStatus::Approved, LoanStatus::Repaid)
        )
    }

    pub fn ensure_transition(self, to: LoanStatus) -> AppResult<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(invalid_transition("loan", self, to))
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Loan entity
///
/// INVARIANT: total_repayment == amount + amount * interest_rate / 100 whenever terms are set
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub interest_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_repayment: Decimal,
    pub status: LoanStatus,
    pub application_date: DateTime<Utc>,
    pub approval_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Loan {
    pub fn new(user_id: Uuid, amount: Decimal, interest_rate: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            interest_rate,
            total_repayment: Self::total_repayment_for(amount, interest_rate),
            status: LoanStatus::Pending,
            application_date: now,
            approval_date: None,
            due_date: None,
            created_at: now,
        }
    }

    /// Principal plus flat, non-compounding interest
    pub fn total_repayment_for(amount: Decimal, interest_rate: Decimal) -> Decimal {
        amount + amount * interest_rate / Decimal::ONE_HUNDRED
    }

    pub fn is_fully_repaid_by(&self, total_repaid: Decimal) -> bool {
        total_repaid >= self.total_repayment
    }

    pub fn due_date_from(approved_at: DateTime<Utc>) -> DateTime<Utc> {
        approved_at + Duration::days(REPAYMENT_PERIOD_DAYS)
    }
}

/// Aggregate counters for the admin dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanStats {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub repaid: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_disbursed: Decimal,
}

///Repayment status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "repayment_status", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum RepaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl RepaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepaymentStatus::Pending => "PENDING",
            RepaymentStatus::Completed => "COMPLETED",
            RepaymentStatus::Failed => "FAILED",
        }
    }

    /// Completed never reverts; a late confirmation may complete a failed attempt
    pub fn can_transition_to(self, to: RepaymentStatus) -> bool {
        matches!(
            (self, to),
            (RepaymentStatus::Pending, RepaymentStatus::Completed)
                | (RepaymentStatus::Pending, RepaymentStatus::Failed)
                | (RepaymentStatus::Failed, RepaymentStatus::Completed)
        )
    }

    pub fn ensure_transition(self, to: RepaymentStatus) -> AppResult<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(invalid_transition("repayment", self, to))
        }
    }
}

impl fmt::Display for RepaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Repayment {
    pub id: Uuid,
    pub loan_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub transaction_ref: String,
    pub status: RepaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Repayment {
    pub fn new(loan_id: Uuid, amount: Decimal, transaction_ref: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            amount,
            transaction_ref: transaction_ref.into(),
            status: RepaymentStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_type", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Deposit,
    Repayment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
        }
    }

    /// Success is terminal; the provider may still confirm an attempt reported as failed
    pub fn can_transition_to(self, to: TransactionStatus) -> bool {
        matches!(
            (self, to),
            (TransactionStatus::Pending, TransactionStatus::Success)
                | (TransactionStatus::Pending, TransactionStatus::Failed)
                | (TransactionStatus::Failed, TransactionStatus::Success)
        )
    }

    pub fn ensure_transition(self, to: TransactionStatus) -> AppResult<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(invalid_transition("transaction", self, to))
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One payment attempt at the provider. `reference` is the provider's idempotency key
/// and is shared with the matching Repayment row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: TransactionType,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub reference: String,
    pub status: TransactionStatus,
    pub provider_payload: Option<serde_json::Value>,
    /// Last time the stale sweep asked the provider about this attempt
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerTransaction {
    pub fn new(user_id: Uuid, kind: TransactionType, amount: Decimal, reference: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            reference: reference.into(),
            status: TransactionStatus::Pending,
            provider_payload: None,
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sweep ordering key: never-checked attempts by age, the rest by last check
    pub fn sweep_key(&self) -> DateTime<Utc> {
        self.last_checked_at.unwrap_or(self.created_at)
    }
}

// ========== APPLICATION INTAKE ==========

/// BVN/NIN capture for one loan. Photo fields hold references to already-uploaded files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct IdentityVerification {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub bvn: String,
    pub nin: String,
    pub face_photo_url: String,
    pub passport_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdentityVerification {
    pub fn new(
        loan_id: Uuid,
        bvn: String,
        nin: String,
        face_photo_url: String,
        passport_url: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            loan_id,
            bvn,
            nin,
            face_photo_url,
            passport_url,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Guarantor {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub relationship: String,
    pub photo_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Guarantor {
    pub fn new(
        loan_id: Uuid,
        full_name: String,
        phone: String,
        address: String,
        relationship: String,
        photo_url: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            loan_id,
            full_name,
            phone,
            address,
            relationship,
            photo_url,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Borrower's own bank account, where the loan is disbursed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BankDetails {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BankDetails {
    pub fn new(loan_id: Uuid, bank_name: String, account_number: String, account_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            loan_id,
            bank_name,
            account_number,
            account_name,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "exception_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExceptionReason {
    MissingLoanReference,
    RepaymentNotFound,
    LoanNotFound,
}

impl ExceptionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionReason::MissingLoanReference => "missing_loan_reference",
            ExceptionReason::RepaymentNotFound => "repayment_not_found",
            ExceptionReason::LoanNotFound => "loan_not_found",
        }
    }
}

/// Confirmed payment whose ledger rollup could not be applied; queued for manual review
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReconciliationException {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub reference: String,
    pub loan_id: Option<Uuid>,
    pub reason: ExceptionReason,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationException {
    pub fn new(
        transaction: &LedgerTransaction,
        loan_id: Option<Uuid>,
        reason: ExceptionReason,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: transaction.id,
            reference: transaction.reference.clone(),
            loan_id,
            reason,
            payload,
            created_at: Utc::now(),
        }
    }
}

fn invalid_transition(entity: &'static str, from: impl fmt::Display, to: impl fmt::Display) -> crate::error::AppError {
    LedgerError::InvalidTransition {
        entity,
        from: from.to_string(),
        to: to.to_string(),
    }
    .into()
}
