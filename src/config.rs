use ::config::{Config as ConfigSource, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Postgres,
    Memory,
}

/// Provider credentials and endpoints
#[derive(Debug, Clone)]
pub struct PaystackConfig {
    /// Also the HMAC key for webhook signatures
    pub secret_key: String,
    pub base_url: String,
    pub public_base_url: String,
    pub preferred_bank: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub ledger_backend: String,
    pub paystack_secret_key: String,
    pub paystack_base_url: String,
    pub public_base_url: String,
    pub paystack_preferred_bank: String,
    pub jwt_secret: String,
    pub provider_timeout_secs: u64,
    pub cors_origins: String,
    pub sweep_interval_secs: u64,
    pub stale_transaction_minutes: i64,
    pub admin_email: String,
}

impl Config {
    /// Environment variables (after `.env`) over built-in defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: Config = ConfigSource::builder()
            .set_default("database_url", "postgresql://localhost/lending")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("ledger_backend", "postgres")?
            .set_default("paystack_secret_key", "")?
            .set_default("paystack_base_url", "https://api.paystack.co")?
            .set_default("public_base_url", "http://localhost:3000")?
            .set_default("paystack_preferred_bank", "wema-bank")?
            .set_default("jwt_secret", "")?
            .set_default("provider_timeout_secs", 10)?
            .set_default("cors_origins", "http://localhost:3000")?
            .set_default("sweep_interval_secs", 300)?
            .set_default("stale_transaction_minutes", 30)?
            .set_default("admin_email", "admin@loanplatform.com")?
            .add_source(Environment::default())
            .build()?
            .try_deserialize()?;

        config.ledger_backend()?;
        Ok(config)
    }

    pub fn ledger_backend(&self) -> Result<LedgerBackend, ConfigError> {
        match self.ledger_backend.to_ascii_lowercase().as_str() {
            "postgres" => Ok(LedgerBackend::Postgres),
            "memory" => Ok(LedgerBackend::Memory),
            other => Err(ConfigError::Message(format!(
                "LEDGER_BACKEND must be postgres or memory, got {}",
                other
            ))),
        }
    }

    pub fn paystack(&self) -> PaystackConfig {
        PaystackConfig {
            secret_key: self.paystack_secret_key.clone(),
            base_url: self.paystack_base_url.clone(),
            public_base_url: self.public_base_url.clone(),
            preferred_bank: self.paystack_preferred_bank.clone(),
            timeout_secs: self.provider_timeout_secs,
        }
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect()
    }
}
