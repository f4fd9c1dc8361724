use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::models::TransactionStatus;

/// Body returned to the provider for every accepted delivery
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub reference: String,
    pub outcome: String,
    pub status: TransactionStatus,
}
