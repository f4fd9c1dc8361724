use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use super::models::*;
use crate::{
    api::handler::AppState,
    error::{AppError, AppResult, LedgerError},
    ledger::{
        models::{
            BankDetails, Guarantor, IdentityVerification, Loan, LoanStatus, ProfileUpdate,
            DEFAULT_INTEREST_RATE,
        },
        LedgerTx,
    },
    middleware::{AuthUser, ValidatedJson},
};

const IDENTITY_STEP: i16 = 2;
const GUARANTOR_STEP: i16 = 3;
const BANK_DETAILS_STEP: i16 = 4;
const REVIEW_STEP: i16 = 5;

/// Rewrites the terms of the caller's latest loan while it is pending, otherwise opens a new one.
/// Returns whether a loan was created.
pub(crate) async fn save_pending_terms(
    tx: &mut Box<dyn LedgerTx>,
    user_id: Uuid,
    amount: Decimal,
) -> AppResult<(bool, Loan)> {
    let total_repayment = Loan::total_repayment_for(amount, DEFAULT_INTEREST_RATE);

    let (created, loan_id) = match tx.latest_loan_for_user(user_id).await? {
        Some(existing) if existing.status == LoanStatus::Pending => {
            let updated = tx
                .update_loan_terms(existing.id, amount, DEFAULT_INTEREST_RATE, total_repayment)
                .await?;
            if !updated {
                return Err(LedgerError::StaleState {
                    entity: "loan",
                    id: existing.id.to_string(),
                    expected: LoanStatus::Pending.to_string(),
                }
                .into());
            }
            (false, existing.id)
        }
        _ => {
            let loan = Loan::new(user_id, amount, DEFAULT_INTEREST_RATE);
            tx.insert_loan(&loan).await?;
            (true, loan.id)
        }
    };

    let loan = tx
        .get_loan(loan_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Loan {} vanished mid-request", loan_id)))?;
    Ok((created, loan))
}

/// The loan an intake step applies to: the named one, or the caller's latest
async fn target_loan(
    tx: &mut Box<dyn LedgerTx>,
    user_id: Uuid,
    loan_id: Option<Uuid>,
) -> AppResult<Loan> {
    match loan_id {
        Some(loan_id) => {
            let loan = tx
                .get_loan(loan_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Loan not found".to_string()))?;
            if loan.user_id != user_id {
                return Err(AppError::Forbidden(
                    "Loan belongs to another user".to_string(),
                ));
            }
            Ok(loan)
        }
        None => tx
            .latest_loan_for_user(user_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound("Loan not found. Please complete step 1 first.".to_string())
            }),
    }
}

async fn editable_loan(
    tx: &mut Box<dyn LedgerTx>,
    user_id: Uuid,
    loan_id: Option<Uuid>,
) -> AppResult<Loan> {
    let loan = target_loan(tx, user_id, loan_id).await?;
    if loan.status != LoanStatus::Pending {
        return Err(AppError::BadRequest(format!(
            "Application is {} and can no longer be edited",
            loan.status
        )));
    }
    Ok(loan)
}

async fn advance_to(tx: &mut Box<dyn LedgerTx>, user_id: Uuid, step: i16) -> AppResult<()> {
    if !tx.set_application_step(user_id, step).await? {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    Ok(())
}

/// Refuses until identity, guarantor and bank details exist for the loan
async fn gather_review(
    tx: &mut Box<dyn LedgerTx>,
    user_id: Uuid,
    loan_id: Option<Uuid>,
) -> AppResult<ApplicationReview> {
    let user = tx
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    let loan = target_loan(tx, user_id, loan_id).await?;

    let identity = tx.get_identity_verification(loan.id).await?.ok_or_else(|| {
        AppError::BadRequest("Identity verification not completed. Please complete step 2.".to_string())
    })?;
    let guarantor = tx.get_guarantor(loan.id).await?.ok_or_else(|| {
        AppError::BadRequest("Guarantor information not provided. Please complete step 3.".to_string())
    })?;
    let bank_details = tx.get_bank_details(loan.id).await?.ok_or_else(|| {
        AppError::BadRequest("Bank details not provided. Please complete step 4.".to_string())
    })?;

    Ok(ApplicationReview {
        user,
        loan,
        identity,
        guarantor,
        bank_details,
    })
}

/// POST /api/v1/loans/application/personal-info
pub async fn save_personal_info(
    auth: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<PersonalInfoRequest>,
) -> AppResult<(StatusCode, Json<StepSavedResponse>)> {
    let mut tx = state.ledger.begin().await?;

    let profile = ProfileUpdate {
        full_name: request.full_name.trim().to_string(),
        phone: request.phone.trim().to_string(),
        date_of_birth: request.date_of_birth,
        address: request.address.trim().to_string(),
    };
    if !tx.update_user_profile(auth.user_id, &profile).await? {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    let (created, loan) = save_pending_terms(&mut tx, auth.user_id, request.loan_amount).await?;
    advance_to(&mut tx, auth.user_id, IDENTITY_STEP).await?;
    tx.commit().await?;
    state.listing_cache.clear();

    info!(user_id = %auth.user_id, loan_id = %loan.id, amount = %loan.amount, created, "Personal information saved");

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(StepSavedResponse {
            loan_id: loan.id,
            current_step: IDENTITY_STEP,
            message: "Personal information saved successfully".to_string(),
        }),
    ))
}

/// POST /api/v1/loans/application/identity
pub async fn save_identity(
    auth: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<IdentityRequest>,
) -> AppResult<Json<StepSavedResponse>> {
    let mut tx = state.ledger.begin().await?;
    let loan = editable_loan(&mut tx, auth.user_id, request.loan_id).await?;

    let passport_url = request
        .passport_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());
    tx.upsert_identity_verification(&IdentityVerification::new(
        loan.id,
        request.bvn,
        request.nin,
        request.face_photo_url,
        passport_url,
    ))
    .await?;
    advance_to(&mut tx, auth.user_id, GUARANTOR_STEP).await?;
    tx.commit().await?;
    state.listing_cache.clear();

    info!(user_id = %auth.user_id, loan_id = %loan.id, "Identity verification saved");
    Ok(Json(StepSavedResponse {
        loan_id: loan.id,
        current_step: GUARANTOR_STEP,
        message: "Identity verification saved successfully".to_string(),
    }))
}

/// POST /api/v1/loans/application/guarantor
pub async fn save_guarantor(
    auth: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<GuarantorRequest>,
) -> AppResult<Json<StepSavedResponse>> {
    let mut tx = state.ledger.begin().await?;
    let loan = editable_loan(&mut tx, auth.user_id, request.loan_id).await?;

    tx.upsert_guarantor(&Guarantor::new(
        loan.id,
        request.full_name.trim().to_string(),
        request.phone.trim().to_string(),
        request.address.trim().to_string(),
        request.relationship.trim().to_string(),
        request.photo_url,
    ))
    .await?;
    advance_to(&mut tx, auth.user_id, BANK_DETAILS_STEP).await?;
    tx.commit().await?;
    state.listing_cache.clear();

    info!(user_id = %auth.user_id, loan_id = %loan.id, "Guarantor saved");
    Ok(Json(StepSavedResponse {
        loan_id: loan.id,
        current_step: BANK_DETAILS_STEP,
        message: "Guarantor information saved successfully".to_string(),
    }))
}

/// POST /api/v1/loans/application/bank-details
pub async fn save_bank_details(
    auth: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<BankDetailsRequest>,
) -> AppResult<Json<StepSavedResponse>> {
    let mut tx = state.ledger.begin().await?;
    let loan = editable_loan(&mut tx, auth.user_id, request.loan_id).await?;

    tx.upsert_bank_details(&BankDetails::new(
        loan.id,
        request.bank_name.trim().to_string(),
        request.account_number,
        request.account_name.trim().to_string(),
    ))
    .await?;
    advance_to(&mut tx, auth.user_id, REVIEW_STEP).await?;
    tx.commit().await?;
    state.listing_cache.clear();

    info!(user_id = %auth.user_id, loan_id = %loan.id, "Bank details saved");
    Ok(Json(StepSavedResponse {
        loan_id: loan.id,
        current_step: REVIEW_STEP,
        message: "Bank details saved successfully".to_string(),
    }))
}

/// GET /api/v1/loans/application/review?loanId=
pub async fn review_application(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ApplicationQuery>,
) -> AppResult<Json<ApplicationReview>> {
    let mut tx = state.ledger.begin().await?;
    let review = gather_review(&mut tx, auth.user_id, query.loan_id).await?;
    Ok(Json(review))
}

/// Marks the application complete once every step is on file
/// POST /api/v1/loans/application/submit?loanId=
pub async fn submit_application(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ApplicationQuery>,
) -> AppResult<Json<SubmitResponse>> {
    let mut tx = state.ledger.begin().await?;
    let review = gather_review(&mut tx, auth.user_id, query.loan_id).await?;
    if review.loan.status != LoanStatus::Pending {
        return Err(AppError::BadRequest(format!(
            "Application is {} and cannot be resubmitted",
            review.loan.status
        )));
    }

    if !tx.mark_application_complete(auth.user_id).await? {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    tx.commit().await?;
    state.listing_cache.clear();

    info!(user_id = %auth.user_id, loan_id = %review.loan.id, "Loan application submitted");
    Ok(Json(SubmitResponse {
        loan_id: review.loan.id,
        application_complete: true,
        message: "Application submitted successfully".to_string(),
    }))
}
