use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use super::amount::from_minor_units;
use crate::config::PaystackConfig;
use crate::error::{AppError, AppResult, GatewayError};
use crate::ledger::models::VirtualAccount;

/// Customer details sent when requesting a dedicated virtual account
#[derive(Debug, Clone)]
pub struct VirtualAccountRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

/// Hosted checkout created for one payment attempt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializedPayment {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Success,
    Failed,
    /// Abandoned, ongoing, queued and anything else the provider reports
    Other(String),
}

impl ProviderStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "success" => ProviderStatus::Success,
            "failed" | "reversed" => ProviderStatus::Failed,
            other => ProviderStatus::Other(other.to_string()),
        }
    }
}

/// Result of verifying a transaction by reference, amount already in major units
#[derive(Debug, Clone)]
pub struct VerifiedTransaction {
    pub reference: String,
    pub status: ProviderStatus,
    pub amount: Decimal,
    pub paid_at: Option<String>,
    pub channel: Option<String>,
    pub metadata: Value,
    pub raw: Value,
}

/// Outbound operations against the payment provider.
///
/// Every call reports failure as a `GatewayError` value so callers can branch on it.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_virtual_account(
        &self,
        request: &VirtualAccountRequest,
    ) -> Result<VirtualAccount, GatewayError>;

    /// `amount_minor` is in kobo
    async fn initialize_transaction(
        &self,
        email: &str,
        amount_minor: i64,
        reference: &str,
        metadata: Option<Value>,
    ) -> Result<InitializedPayment, GatewayError>;

    async fn verify_transaction(&self, reference: &str) -> Result<VerifiedTransaction, GatewayError>;

    async fn list_transactions(&self, per_page: u32, page: u32) -> Result<Value, GatewayError>;

    async fn fetch_transaction(&self, transaction_id: &str) -> Result<Value, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DedicatedAccountData {
    id: Value,
    account_number: String,
    account_name: String,
    bank: BankData,
}

#[derive(Debug, Deserialize)]
struct BankData {
    name: String,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    #[serde(default)]
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    reference: String,
    paid_at: Option<String>,
    channel: Option<String>,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Serialize)]
struct DedicatedAccountBody<'a> {
    email: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    preferred_bank: &'a str,
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    amount: i64,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    callback_url: &'a str,
}

/// Paystack REST client, bearer-authenticated with the secret key
pub struct PaystackClient {
    client: Client,
    base_url: String,
    secret_key: String,
    preferred_bank: String,
    callback_url: String,
}

impl PaystackClient {
    pub fn new(config: &PaystackConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            preferred_bank: config.preferred_bank.clone(),
            callback_url: format!(
                "{}/api/paystack/callback",
                config.public_base_url.trim_end_matches('/')
            ),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends the request and unwraps the `{status, message, data}` envelope
    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Value, GatewayError> {
        let response = request.bearer_auth(&self.secret_key).send().await?;
        let http_status = response.status();
        let body = response.text().await?;

        let envelope: Envelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) if http_status.is_success() => {
                error!(operation, "Paystack returned unreadable body: {}", e);
                return Err(GatewayError::MalformedResponse(e.to_string()));
            }
            Err(_) => {
                error!(operation, status = %http_status, "Paystack request failed");
                return Err(GatewayError::Rejected(format!("HTTP {}", http_status)));
            }
        };

        if !http_status.is_success() || !envelope.status {
            error!(operation, status = %http_status, message = %envelope.message, "Paystack rejected request");
            return Err(GatewayError::Rejected(envelope.message));
        }

        debug!(operation, "Paystack request succeeded");
        envelope
            .data
            .ok_or_else(|| GatewayError::MalformedResponse(format!("{}: missing data", operation)))
    }

    fn decode<T: DeserializeOwned>(operation: &str, data: Value) -> Result<T, GatewayError> {
        serde_json::from_value(data)
            .map_err(|e| GatewayError::MalformedResponse(format!("{}: {}", operation, e)))
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    async fn create_virtual_account(
        &self,
        request: &VirtualAccountRequest,
    ) -> Result<VirtualAccount, GatewayError> {
        let body = DedicatedAccountBody {
            email: &request.email,
            first_name: &request.first_name,
            last_name: &request.last_name,
            phone: request.phone.as_deref(),
            preferred_bank: &self.preferred_bank,
        };

        let data = self
            .send(
                "create_virtual_account",
                self.client.post(self.url("/dedicated_account")).json(&body),
            )
            .await?;
        let account: DedicatedAccountData = Self::decode("create_virtual_account", data)?;

        info!(email = %request.email, bank = %account.bank.name, "Dedicated virtual account created");

        Ok(VirtualAccount {
            account_number: account.account_number,
            account_name: account.account_name,
            bank_name: account.bank.name,
            provider_account_id: provider_id(&account.id),
        })
    }

    async fn initialize_transaction(
        &self,
        email: &str,
        amount_minor: i64,
        reference: &str,
        metadata: Option<Value>,
    ) -> Result<InitializedPayment, GatewayError> {
        let body = InitializeBody {
            email,
            amount: amount_minor,
            reference,
            metadata,
            callback_url: &self.callback_url,
        };

        let data = self
            .send(
                "initialize_transaction",
                self.client.post(self.url("/transaction/initialize")).json(&body),
            )
            .await?;
        let init: InitializeData = Self::decode("initialize_transaction", data)?;

        Ok(InitializedPayment {
            authorization_url: init.authorization_url,
            access_code: init.access_code,
            reference: init.reference,
        })
    }

    async fn verify_transaction(&self, reference: &str) -> Result<VerifiedTransaction, GatewayError> {
        let raw = self
            .send(
                "verify_transaction",
                self.client
                    .get(self.url(&format!("/transaction/verify/{}", reference))),
            )
            .await?;
        let verified: VerifyData = Self::decode("verify_transaction", raw.clone())?;

        Ok(VerifiedTransaction {
            reference: verified.reference,
            status: ProviderStatus::parse(&verified.status),
            amount: from_minor_units(verified.amount),
            paid_at: verified.paid_at,
            channel: verified.channel,
            metadata: verified.metadata,
            raw,
        })
    }

    async fn list_transactions(&self, per_page: u32, page: u32) -> Result<Value, GatewayError> {
        self.send(
            "list_transactions",
            self.client
                .get(self.url("/transaction"))
                .query(&[("perPage", per_page), ("page", page)]),
        )
        .await
    }

    async fn fetch_transaction(&self, transaction_id: &str) -> Result<Value, GatewayError> {
        self.send(
            "fetch_transaction",
            self.client
                .get(self.url(&format!("/transaction/{}", transaction_id))),
        )
        .await
    }
}

/// Provider ids arrive as numbers; store them as plain strings
fn provider_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
