use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::{info, warn};

use crate::api::handler::AppState;
use crate::error::{AppError, AppResult};
use crate::ledger::models::{VirtualAccount, Wallet};
use crate::middleware::AuthUser;
use crate::payments::VirtualAccountRequest;

#[derive(Debug, Serialize)]
pub struct VirtualAccountResponse {
    pub created: bool,
    pub message: String,
    /// Transfer details to show the borrower
    pub account: Option<VirtualAccount>,
    pub wallet: Wallet,
}

impl VirtualAccountResponse {
    fn existing(wallet: Wallet) -> Self {
        Self {
            created: false,
            message: "Virtual account already exists".to_string(),
            account: wallet.virtual_account(),
            wallet,
        }
    }
}

/// GET /api/v1/wallet
pub async fn get_wallet(auth: AuthUser, State(state): State<AppState>) -> AppResult<Json<Wallet>> {
    let mut tx = state.ledger.begin().await?;
    let wallet = tx
        .get_wallet_by_user(auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Wallet not found".to_string()))?;
    Ok(Json(wallet))
}

/// Requests a dedicated virtual account for the caller's wallet, at most once
/// POST /api/v1/wallet/virtual-account
pub async fn create_virtual_account(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<(StatusCode, Json<VirtualAccountResponse>)> {
    let (user, wallet) = {
        let mut tx = state.ledger.begin().await?;
        let user = tx
            .get_user(auth.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        let wallet = tx
            .get_wallet_by_user(auth.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Wallet not found".to_string()))?;
        (user, wallet)
    };

    if wallet.has_virtual_account() {
        return Ok((StatusCode::OK, Json(VirtualAccountResponse::existing(wallet))));
    }

    let (first_name, last_name) = user.name_parts();
    let account = state
        .gateway
        .create_virtual_account(&VirtualAccountRequest {
            email: user.email.clone(),
            first_name,
            last_name,
            phone: user.phone.clone(),
        })
        .await?;

    let mut tx = state.ledger.begin().await?;
    let assigned = tx.assign_virtual_account(user.id, &account).await?;
    let wallet = tx
        .get_wallet_by_user(user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Wallet not found".to_string()))?;
    tx.commit().await?;

    if !assigned {
        warn!(
            user_id = %user.id,
            discarded = %account.account_number,
            "Wallet received an account concurrently; keeping the first one"
        );
        return Ok((StatusCode::OK, Json(VirtualAccountResponse::existing(wallet))));
    }

    info!(
        user_id = %user.id,
        account_number = %account.account_number,
        bank = %account.bank_name,
        "Virtual account assigned"
    );

    Ok((
        StatusCode::CREATED,
        Json(VirtualAccountResponse {
            created: true,
            message: "Virtual account created successfully".to_string(),
            account: wallet.virtual_account(),
            wallet,
        }),
    ))
}
