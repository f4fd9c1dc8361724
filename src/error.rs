use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Missing signature")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Ledger state errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Illegal {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("{entity} {id} is no longer in state {expected}")]
    StaleState {
        entity: &'static str,
        id: String,
        expected: String,
    },

    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    #[error("Wallet not found for user {0}")]
    WalletMissing(String),
}

/// Payment provider errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Provider rejected request: {0}")]
    Rejected(String),

    #[error("Provider request timed out")]
    Timeout,

    #[error("Provider unreachable: {0}")]
    Transport(String),

    #[error("Unexpected provider response: {0}")]
    MalformedResponse(String),

    #[error("Amount cannot be represented in minor units: {0}")]
    AmountOutOfRange(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::MissingSignature => (
                StatusCode::BAD_REQUEST,
                "MISSING_SIGNATURE",
                "Missing signature".to_string(),
                None,
            ),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "INVALID_SIGNATURE",
                "Invalid signature".to_string(),
                None,
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized".to_string(),
                None,
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            AppError::InvalidInput(msg) | AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None)
            }
            AppError::InvalidPayload(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", msg, None)
            }
            AppError::Ledger(LedgerError::InvalidTransition { entity, from, to }) => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                format!("Illegal {} transition: {} -> {}", entity, from, to),
                Some(serde_json::json!({
                    "entity": entity,
                    "from": from,
                    "to": to,
                })),
            ),
            AppError::Ledger(LedgerError::StaleState { entity, id, expected }) => (
                StatusCode::CONFLICT,
                "STALE_STATE",
                format!("{} changed concurrently", entity),
                Some(serde_json::json!({
                    "id": id,
                    "expected": expected,
                })),
            ),
            AppError::Ledger(LedgerError::DuplicateReference(reference)) => (
                StatusCode::CONFLICT,
                "DUPLICATE_REFERENCE",
                format!("Reference already exists: {}", reference),
                None,
            ),
            AppError::Gateway(GatewayError::Timeout) => (
                StatusCode::GATEWAY_TIMEOUT,
                "PROVIDER_TIMEOUT",
                "Payment provider timed out, please retry".to_string(),
                None,
            ),
            AppError::Gateway(GatewayError::AmountOutOfRange(amount)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_AMOUNT",
                format!("Amount out of range: {}", amount),
                None,
            ),
            AppError::Gateway(e) => (
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
                e.to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::InvalidPayload(format!("JSON error: {}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Gateway(GatewayError::from(error))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            GatewayError::Timeout
        } else if error.is_decode() {
            GatewayError::MalformedResponse(error.to_string())
        } else {
            GatewayError::Transport(error.to_string())
        }
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<::config::ConfigError> for AppError {
    fn from(error: ::config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
