use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::models::*;
use crate::{
    admin::ListingCache,
    error::{AppError, AppResult},
    ledger::LedgerStore,
    middleware::AuthUser,
    payments::{verify_webhook_signature, PaymentGateway, SIGNATURE_HEADER},
    reconciliation::{ProviderEvent, Reconciler},
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn LedgerStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub reconciler: Reconciler,
    pub listing_cache: Arc<ListingCache>,
    pub webhook_secret: Arc<str>,
    pub jwt_secret: Arc<str>,
}

/// Provider webhook. The signature is checked over the raw bytes before anything is parsed.
/// POST /api/v1/webhook/paystack
pub async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .ok_or(AppError::MissingSignature)?
        .to_str()
        .map_err(|_| AppError::InvalidSignature)?;

    if !verify_webhook_signature(&state.webhook_secret, &body, signature) {
        warn!("Rejected webhook with invalid signature");
        return Err(AppError::InvalidSignature);
    }

    let (event, raw) = ProviderEvent::from_body(&body).map_err(|e| {
        error!("Signed webhook body could not be parsed: {}", e);
        e
    })?;

    info!(
        event = event.name(),
        reference = event.reference().unwrap_or("-"),
        "Paystack webhook received"
    );

    match state.reconciler.handle_event(&event, &raw).await {
        Ok(outcome) => {
            debug!(outcome = outcome.label(), "Webhook reconciled");
            Ok(Json(WebhookAck { success: true }))
        }
        Err(e) => {
            // surfaced as 500 so the provider redelivers
            error!(
                event = event.name(),
                reference = event.reference().unwrap_or("-"),
                "Webhook reconciliation failed: {}",
                e
            );
            Err(AppError::Internal(e.to_string()))
        }
    }
}

/// Re-checks one of the caller's payments with the provider
/// POST /api/v1/payments/verify/:reference
pub async fn verify_payment(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> AppResult<Json<VerifyPaymentResponse>> {
    {
        let mut tx = state.ledger.begin().await?;
        let transaction = tx
            .find_transaction_by_reference(&reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {}", reference)))?;

        if transaction.user_id != auth.user_id && auth.require_admin().is_err() {
            return Err(AppError::Forbidden(
                "Transaction belongs to another user".to_string(),
            ));
        }
    }

    let outcome = state.reconciler.reconcile_by_reference(&reference).await?;

    let mut tx = state.ledger.begin().await?;
    let status = tx
        .find_transaction_by_reference(&reference)
        .await?
        .map(|t| t.status)
        .ok_or_else(|| AppError::NotFound(format!("Transaction {}", reference)))?;

    info!(reference = %reference, outcome = outcome.label(), status = %status, "Payment verified by polling");

    Ok(Json(VerifyPaymentResponse {
        reference,
        outcome: outcome.label().to_string(),
        status,
    }))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    // opening a unit of work proves the store is reachable
    drop(state.ledger.begin().await?);

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    }))
}
