use axum::{extract::State, http::StatusCode, Json};
use tracing::info;

use super::models::*;
use crate::{
    api::handler::AppState,
    error::{AppError, AppResult},
    ledger::models::{Role, User, Wallet},
    middleware::{AuthUser, ValidatedJson},
};

/// Provisions a borrower and their wallet in one unit of work.
/// Credentials and session tokens are issued by the identity service, not here.
/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let email = request.normalized_email();
    let mut tx = state.ledger.begin().await?;

    if tx.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict(format!("Email already registered: {}", email)));
    }

    let user = User::new(
        email,
        Some(request.full_name.trim().to_string()),
        Some(request.phone.trim().to_string()),
        Role::User,
    );
    let wallet = Wallet::new(user.id);
    tx.insert_user(&user).await?;
    tx.insert_wallet(&wallet).await?;
    tx.commit().await?;

    info!(user_id = %user.id, email = %user.email, "Borrower registered");
    Ok((StatusCode::CREATED, Json(RegisterResponse { user, wallet })))
}

/// Moves the caller's application wizard to `step`
/// POST /api/v1/users/step
pub async fn update_step(
    auth: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<UpdateStepRequest>,
) -> AppResult<Json<StepResponse>> {
    let mut tx = state.ledger.begin().await?;
    if !tx.set_application_step(auth.user_id, request.step).await? {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    let user = tx
        .get_user(auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    tx.commit().await?;

    Ok(Json(StepResponse {
        current_step: user.current_step,
        application_complete: user.application_complete,
    }))
}
