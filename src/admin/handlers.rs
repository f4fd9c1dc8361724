use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::cache::{CacheKey, DETAIL_TTL, LISTING_TTL, STATS_TTL};
use crate::api::handler::AppState;
use crate::error::{AppError, AppResult, LedgerError};
use crate::ledger::models::{
    BankDetails, Guarantor, IdentityVerification, Loan, LoanStatus, ReconciliationException,
    Repayment, User,
};
use crate::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct AdminLoanQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderListQuery {
    pub per_page: Option<u32>,
    pub page: Option<u32>,
}

const DEFAULT_PROVIDER_PAGE_SIZE: u32 = 50;
const MAX_PROVIDER_PAGE_SIZE: u32 = 100;

#[derive(Debug, Serialize)]
pub struct AdminLoanView {
    #[serde(flatten)]
    pub loan: Loan,
    pub borrower_email: Option<String>,
    pub borrower_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdminLoanDetail {
    pub loan: Loan,
    pub borrower: Option<User>,
    pub repayments: Vec<Repayment>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_repaid: Decimal,
    pub identity: Option<IdentityVerification>,
    pub guarantor: Option<Guarantor>,
    pub bank_details: Option<BankDetails>,
}

fn parse_status_filter(status: Option<&str>) -> AppResult<Option<LoanStatus>> {
    match status.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("all") => Ok(None),
        Some(s) => LoanStatus::parse(s)
            .map(Some)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown loan status: {}", s))),
    }
}

/// Loans newest first plus dashboard counters, served from the listing cache when fresh
/// GET /api/v1/admin/loans?status=
pub async fn list_loans(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<AdminLoanQuery>,
) -> AppResult<Json<Value>> {
    auth.require_admin()?;
    let status = parse_status_filter(query.status.as_deref())?;
    let cache = &state.listing_cache;
    let generation = cache.generation();

    let stats = match cache.get(CacheKey::Stats) {
        Some(stats) => stats,
        None => {
            let mut tx = state.ledger.begin().await?;
            let stats = serde_json::to_value(tx.loan_stats().await?)?;
            cache.insert(CacheKey::Stats, stats.clone(), STATS_TTL, generation);
            stats
        }
    };

    let loans = match cache.get(CacheKey::Listing(status)) {
        Some(loans) => loans,
        None => {
            let mut tx = state.ledger.begin().await?;
            let mut views = Vec::new();
            for loan in tx.list_loans(status).await? {
                let borrower = tx.get_user(loan.user_id).await?;
                views.push(AdminLoanView {
                    borrower_email: borrower.as_ref().map(|u| u.email.clone()),
                    borrower_name: borrower.and_then(|u| u.full_name),
                    loan,
                });
            }
            let loans = serde_json::to_value(views)?;
            cache.insert(CacheKey::Listing(status), loans.clone(), LISTING_TTL, generation);
            loans
        }
    };

    Ok(Json(json!({
        "stats": stats,
        "loans": loans,
    })))
}

/// GET /api/v1/admin/loans/:id
pub async fn loan_detail(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    auth.require_admin()?;

    if let Some(detail) = state.listing_cache.get(CacheKey::Detail(loan_id)) {
        return Ok(Json(detail));
    }
    let generation = state.listing_cache.generation();

    let mut tx = state.ledger.begin().await?;
    let loan = tx
        .get_loan(loan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Loan {}", loan_id)))?;
    let borrower = tx.get_user(loan.user_id).await?;
    let repayments = tx.list_repayments(loan_id).await?;
    let total_repaid = tx.sum_completed_repayments(loan_id).await?;
    let identity = tx.get_identity_verification(loan_id).await?;
    let guarantor = tx.get_guarantor(loan_id).await?;
    let bank_details = tx.get_bank_details(loan_id).await?;

    let detail = serde_json::to_value(AdminLoanDetail {
        loan,
        borrower,
        repayments,
        total_repaid,
        identity,
        guarantor,
        bank_details,
    })?;
    state.listing_cache.insert(
        CacheKey::Detail(loan_id),
        detail.clone(),
        DETAIL_TTL,
        generation,
    );

    Ok(Json(detail))
}

/// PENDING → APPROVED, due in 30 days
/// POST /api/v1/admin/loans/:id/approve
pub async fn approve_loan(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<Loan>> {
    auth.require_admin()?;

    let mut tx = state.ledger.begin().await?;
    let loan = tx
        .get_loan(loan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Loan {}", loan_id)))?;
    loan.status.ensure_transition(LoanStatus::Approved)?;

    let now = Utc::now();
    if !tx.approve_loan(loan_id, now, Loan::due_date_from(now)).await? {
        return Err(stale(loan_id));
    }

    let loan = tx
        .get_loan(loan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Loan {}", loan_id)))?;
    tx.commit().await?;
    state.listing_cache.clear();

    info!(loan_id = %loan_id, admin = %auth.email, due_date = ?loan.due_date, "Loan approved");
    Ok(Json(loan))
}

/// PENDING → REJECTED
/// POST /api/v1/admin/loans/:id/reject
pub async fn reject_loan(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<Loan>> {
    auth.require_admin()?;

    let mut tx = state.ledger.begin().await?;
    let loan = tx
        .get_loan(loan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Loan {}", loan_id)))?;

    if !tx
        .update_loan_status(loan_id, loan.status, LoanStatus::Rejected)
        .await?
    {
        return Err(stale(loan_id));
    }

    let loan = tx
        .get_loan(loan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Loan {}", loan_id)))?;
    tx.commit().await?;
    state.listing_cache.clear();

    info!(loan_id = %loan_id, admin = %auth.email, "Loan rejected");
    Ok(Json(loan))
}

/// Confirmed payments whose rollup was parked for manual review
/// GET /api/v1/admin/reconciliation/exceptions
pub async fn list_exceptions(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ReconciliationException>>> {
    auth.require_admin()?;
    let mut tx = state.ledger.begin().await?;
    Ok(Json(tx.list_exceptions().await?))
}

/// Provider-side transaction history, for cross-checking the ledger
/// GET /api/v1/admin/provider/transactions?perPage=&page=
pub async fn provider_transactions(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ProviderListQuery>,
) -> AppResult<Json<Value>> {
    auth.require_admin()?;
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PROVIDER_PAGE_SIZE)
        .clamp(1, MAX_PROVIDER_PAGE_SIZE);
    let page = query.page.unwrap_or(1).max(1);

    let transactions = state.gateway.list_transactions(per_page, page).await?;
    Ok(Json(transactions))
}

/// GET /api/v1/admin/provider/transactions/:id
pub async fn provider_transaction(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> AppResult<Json<Value>> {
    auth.require_admin()?;
    let transaction_id = transaction_id.trim();
    if transaction_id.is_empty() || !transaction_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::BadRequest("Provider transaction id must be numeric".into()));
    }

    let transaction = state.gateway.fetch_transaction(transaction_id).await?;
    Ok(Json(transaction))
}

fn stale(loan_id: Uuid) -> AppError {
    LedgerError::StaleState {
        entity: "loan",
        id: loan_id.to_string(),
        expected: LoanStatus::Pending.to_string(),
    }
    .into()
}
