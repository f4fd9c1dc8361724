//! Shared fixtures for unit and router tests

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::admin::ListingCache;
use crate::api::handler::AppState;
use crate::error::GatewayError;
use crate::ledger::models::{Loan, LoanStatus, Role, User, VirtualAccount, Wallet, DEFAULT_INTEREST_RATE};
use crate::ledger::{LedgerStore, MemoryLedgerStore};
use crate::middleware::auth::Claims;
use crate::payments::{
    from_minor_units, InitializedPayment, PaymentGateway, ProviderStatus, VerifiedTransaction,
    VirtualAccountRequest,
};
use crate::reconciliation::Reconciler;

pub const WEBHOOK_SECRET: &str = "sk_test_webhook";
pub const JWT_SECRET: &str = "jwt_test_secret";

#[derive(Debug, Clone, Copy)]
pub enum StubFailure {
    Timeout,
    Rejected,
}

impl StubFailure {
    fn error(self) -> GatewayError {
        match self {
            StubFailure::Timeout => GatewayError::Timeout,
            StubFailure::Rejected => GatewayError::Rejected("Declined by stub".into()),
        }
    }
}

#[derive(Default)]
struct StubState {
    verifications: HashMap<String, VerifiedTransaction>,
    initialize_failure: Option<StubFailure>,
    account_failure: Option<StubFailure>,
    initialized: Vec<(String, i64, Option<Value>)>,
    accounts_created: usize,
}

/// In-process `PaymentGateway` with scripted answers
#[derive(Default)]
pub struct StubGateway {
    state: Mutex<StubState>,
}

impl StubGateway {
    pub fn set_verification(&self, reference: &str, status: &str, amount_minor: i64, metadata: Value) {
        let raw = serde_json::json!({
            "reference": reference,
            "status": status,
            "amount": amount_minor,
            "metadata": metadata,
        });
        self.state.lock().verifications.insert(
            reference.to_string(),
            VerifiedTransaction {
                reference: reference.to_string(),
                status: ProviderStatus::parse(status),
                amount: from_minor_units(amount_minor),
                paid_at: None,
                channel: Some("card".into()),
                metadata,
                raw,
            },
        );
    }

    pub fn fail_initialize(&self, failure: StubFailure) {
        self.state.lock().initialize_failure = Some(failure);
    }

    pub fn fail_account_creation(&self, failure: StubFailure) {
        self.state.lock().account_failure = Some(failure);
    }

    /// (reference, amount in kobo, metadata) for every initialize call
    pub fn initialized(&self) -> Vec<(String, i64, Option<Value>)> {
        self.state.lock().initialized.clone()
    }

    pub fn accounts_created(&self) -> usize {
        self.state.lock().accounts_created
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_virtual_account(
        &self,
        request: &VirtualAccountRequest,
    ) -> Result<VirtualAccount, GatewayError> {
        let mut state = self.state.lock();
        if let Some(failure) = state.account_failure {
            return Err(failure.error());
        }
        state.accounts_created += 1;
        Ok(VirtualAccount {
            account_number: format!("99300{:05}", state.accounts_created),
            account_name: format!("{} {}", request.first_name, request.last_name),
            bank_name: "Wema Bank".into(),
            provider_account_id: state.accounts_created.to_string(),
        })
    }

    async fn initialize_transaction(
        &self,
        _email: &str,
        amount_minor: i64,
        reference: &str,
        metadata: Option<Value>,
    ) -> Result<InitializedPayment, GatewayError> {
        let mut state = self.state.lock();
        if let Some(failure) = state.initialize_failure {
            return Err(failure.error());
        }
        state
            .initialized
            .push((reference.to_string(), amount_minor, metadata));
        Ok(InitializedPayment {
            authorization_url: format!("https://checkout.paystack.com/{}", reference),
            access_code: "access_stub".into(),
            reference: reference.to_string(),
        })
    }

    async fn verify_transaction(&self, reference: &str) -> Result<VerifiedTransaction, GatewayError> {
        self.state
            .lock()
            .verifications
            .get(reference)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected("Transaction reference not found".into()))
    }

    async fn list_transactions(&self, _per_page: u32, _page: u32) -> Result<Value, GatewayError> {
        Ok(Value::Array(Vec::new()))
    }

    async fn fetch_transaction(&self, transaction_id: &str) -> Result<Value, GatewayError> {
        Ok(serde_json::json!({ "id": transaction_id }))
    }
}

/// User with an empty wallet
pub async fn seed_user(store: &MemoryLedgerStore, email: &str) -> User {
    seed_user_with_role(store, email, Role::User).await
}

pub async fn seed_user_with_role(store: &MemoryLedgerStore, email: &str, role: Role) -> User {
    let user = User::new(email, Some("Ada Obi".into()), Some("08030000000".into()), role);
    let mut tx = store.begin().await.unwrap();
    tx.insert_user(&user).await.unwrap();
    tx.insert_wallet(&Wallet::new(user.id)).await.unwrap();
    tx.commit().await.unwrap();
    user
}

/// Approved loan at the default flat rate
pub async fn approved_loan(store: &MemoryLedgerStore, user_id: Uuid, amount: Decimal) -> Loan {
    let mut loan = Loan::new(user_id, amount, DEFAULT_INTEREST_RATE);
    let now = Utc::now();
    loan.status = LoanStatus::Approved;
    loan.approval_date = Some(now);
    loan.due_date = Some(Loan::due_date_from(now));

    let mut tx = store.begin().await.unwrap();
    tx.insert_loan(&loan).await.unwrap();
    tx.commit().await.unwrap();
    loan
}

pub async fn pending_loan(store: &MemoryLedgerStore, user_id: Uuid, amount: Decimal) -> Loan {
    let loan = Loan::new(user_id, amount, DEFAULT_INTEREST_RATE);
    let mut tx = store.begin().await.unwrap();
    tx.insert_loan(&loan).await.unwrap();
    tx.commit().await.unwrap();
    loan
}

pub fn token_for(user: &User) -> String {
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        role: user.role,
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn test_state(store: Arc<MemoryLedgerStore>, gateway: Arc<StubGateway>) -> AppState {
    let reconciler = Reconciler::new(store.clone(), gateway.clone());
    AppState {
        ledger: store,
        gateway,
        reconciler,
        listing_cache: Arc::new(ListingCache::default()),
        webhook_secret: Arc::from(WEBHOOK_SECRET),
        jwt_secret: Arc::from(JWT_SECRET),
    }
}
