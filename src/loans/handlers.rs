use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use super::application::save_pending_terms;
use super::models::*;
use crate::{
    api::handler::AppState,
    error::{AppError, AppResult},
    ledger::models::{LedgerTransaction, LoanStatus, Repayment, TransactionType},
    middleware::{AuthUser, ValidatedJson},
    payments::to_minor_units,
};

/// Creates a loan application, or rewrites the terms of the caller's pending one
/// POST /api/v1/loans
pub async fn apply_for_loan(
    auth: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<LoanApplicationRequest>,
) -> AppResult<(StatusCode, Json<LoanApplicationResponse>)> {
    let mut tx = state.ledger.begin().await?;

    tx.get_user(auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let (created, loan) = save_pending_terms(&mut tx, auth.user_id, request.amount).await?;
    tx.commit().await?;

    state.listing_cache.clear();

    info!(
        user_id = %auth.user_id,
        loan_id = %loan.id,
        amount = %loan.amount,
        created,
        "Loan application saved"
    );

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(LoanApplicationResponse { created, loan })))
}

/// GET /api/v1/loans/mine
pub async fn my_loans(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<LoanWithRepayments>>> {
    let mut tx = state.ledger.begin().await?;
    let loans = tx.list_loans_for_user(auth.user_id).await?;

    let mut views = Vec::with_capacity(loans.len());
    for loan in loans {
        let repayments = tx.list_repayments(loan.id).await?;
        let total_repaid = tx.sum_completed_repayments(loan.id).await?;
        views.push(LoanWithRepayments::new(loan, repayments, total_repaid));
    }

    Ok(Json(views))
}

/// Records a pending repayment attempt and opens a hosted checkout for it
/// POST /api/v1/loans/repay
pub async fn initiate_repayment(
    auth: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RepaymentRequest>,
) -> AppResult<Json<RepaymentInitResponse>> {
    let amount_minor = to_minor_units(request.amount)?;

    let (reference, email) = {
        let mut tx = state.ledger.begin().await?;

        let loan = tx
            .get_loan(request.loan_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Loan not found".to_string()))?;

        if loan.user_id != auth.user_id {
            return Err(AppError::Forbidden(
                "Unauthorized to repay this loan".to_string(),
            ));
        }

        if loan.status != LoanStatus::Approved {
            return Err(AppError::BadRequest(
                "Loan is not approved for repayment".to_string(),
            ));
        }

        let user = tx
            .get_user(auth.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let reference = format!("repay_{}_{}", loan.id, Utc::now().timestamp_millis());

        tx.insert_repayment(&Repayment::new(loan.id, request.amount, &reference))
            .await?;
        tx.insert_transaction(&LedgerTransaction::new(
            auth.user_id,
            TransactionType::Repayment,
            request.amount,
            &reference,
        ))
        .await?;
        tx.commit().await?;

        (reference, user.email)
    };

    let metadata = json!({
        "loanId": request.loan_id,
        "userId": auth.user_id,
        "type": "repayment",
    });

    match state
        .gateway
        .initialize_transaction(&email, amount_minor, &reference, Some(metadata))
        .await
    {
        Ok(payment) => {
            info!(
                reference = %reference,
                loan_id = %request.loan_id,
                amount = %request.amount,
                "Repayment checkout initialized"
            );
            Ok(Json(RepaymentInitResponse {
                authorization_url: payment.authorization_url,
                reference: payment.reference,
            }))
        }
        Err(e) => {
            error!(reference = %reference, "Repayment checkout failed: {}", e);
            if let Err(mark) = state.reconciler.mark_attempt_failed(&reference, None).await {
                error!(reference = %reference, "Could not mark attempt failed: {}", mark);
            }
            Err(e.into())
        }
    }
}
