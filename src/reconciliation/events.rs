use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::payments::from_minor_units;

pub const CHARGE_SUCCESS: &str = "charge.success";
pub const TRANSFER_SUCCESS: &str = "transfer.success";
pub const TRANSFER_FAILED: &str = "transfer.failed";
pub const DEDICATED_ACCOUNT_ASSIGNED: &str = "dedicatedaccount.assign.success";

/// Raw `{event, data}` body as the provider posts it
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Webhook events the engine distinguishes
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    ChargeSuccess(ChargeData),
    TransferSuccess(TransferData),
    TransferFailed(TransferData),
    DedicatedAccountAssigned,
    Unhandled(String),
}

impl ProviderEvent {
    /// Parses a verified webhook body. Returns the event and the body as JSON for auditing.
    pub fn from_body(body: &[u8]) -> AppResult<(Self, Value)> {
        let raw: Value = serde_json::from_slice(body)?;
        let envelope: WebhookEnvelope = serde_json::from_value(raw.clone())?;
        let event = Self::from_envelope(envelope)?;
        Ok((event, raw))
    }

    pub fn from_envelope(envelope: WebhookEnvelope) -> AppResult<Self> {
        let event = match envelope.event.as_str() {
            CHARGE_SUCCESS => ProviderEvent::ChargeSuccess(ChargeData::from_value(&envelope.data)?),
            TRANSFER_SUCCESS => ProviderEvent::TransferSuccess(TransferData::from_value(&envelope.data)?),
            TRANSFER_FAILED => ProviderEvent::TransferFailed(TransferData::from_value(&envelope.data)?),
            DEDICATED_ACCOUNT_ASSIGNED => ProviderEvent::DedicatedAccountAssigned,
            _ => ProviderEvent::Unhandled(envelope.event),
        };
        Ok(event)
    }

    pub fn name(&self) -> &str {
        match self {
            ProviderEvent::ChargeSuccess(_) => CHARGE_SUCCESS,
            ProviderEvent::TransferSuccess(_) => TRANSFER_SUCCESS,
            ProviderEvent::TransferFailed(_) => TRANSFER_FAILED,
            ProviderEvent::DedicatedAccountAssigned => DEDICATED_ACCOUNT_ASSIGNED,
            ProviderEvent::Unhandled(name) => name,
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            ProviderEvent::ChargeSuccess(charge) => Some(&charge.reference),
            ProviderEvent::TransferSuccess(transfer) | ProviderEvent::TransferFailed(transfer) => {
                Some(&transfer.reference)
            }
            _ => None,
        }
    }
}

/// A confirmed charge. `amount` is already in major units.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeData {
    pub reference: String,
    pub amount: Option<Decimal>,
    pub channel: Option<String>,
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Deserialize)]
struct RawCharge {
    #[serde(default)]
    reference: String,
    amount: Option<i64>,
    channel: Option<String>,
    #[serde(default)]
    metadata: Value,
}

impl ChargeData {
    pub fn from_value(data: &Value) -> AppResult<Self> {
        let raw = RawCharge::deserialize(data)?;
        if let Some(amount) = raw.amount {
            if amount <= 0 {
                return Err(AppError::InvalidPayload(format!(
                    "charge amount must be positive, got {}",
                    amount
                )));
            }
        }
        Ok(Self {
            reference: required_reference(raw.reference)?,
            amount: raw.amount.map(from_minor_units),
            channel: raw.channel,
            metadata: PaymentMetadata::from_value(&raw.metadata)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferData {
    pub reference: String,
}

#[derive(Debug, Deserialize)]
struct RawTransfer {
    #[serde(default)]
    reference: String,
}

impl TransferData {
    pub fn from_value(data: &Value) -> AppResult<Self> {
        let raw = RawTransfer::deserialize(data)?;
        Ok(Self {
            reference: required_reference(raw.reference)?,
        })
    }
}

fn required_reference(reference: String) -> AppResult<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(AppError::InvalidPayload("event data has no reference".to_string()));
    }
    Ok(reference.to_string())
}

/// What the payer attached to the checkout, validated at the boundary.
///
/// The stored transaction's kind decides how a confirmation is applied; this only
/// carries the loan link a repayment rollup needs.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentMetadata {
    Repayment { loan_id: Uuid, user_id: Option<Uuid> },
    Deposit { user_id: Option<Uuid> },
    /// Absent, empty, or a provider-generated bag with no type and no loan link
    Unspecified,
}

impl PaymentMetadata {
    pub fn from_value(value: &Value) -> AppResult<Self> {
        match value {
            Value::Null => Ok(PaymentMetadata::Unspecified),
            Value::String(s) if s.trim().is_empty() => Ok(PaymentMetadata::Unspecified),
            // the provider echoes metadata back as a JSON string on some channels
            Value::String(s) => {
                let nested: Value = serde_json::from_str(s).map_err(|_| {
                    AppError::InvalidPayload("metadata string is not JSON".to_string())
                })?;
                match nested {
                    Value::Object(map) => Self::from_object(&map),
                    _ => Err(AppError::InvalidPayload("metadata must be an object".to_string())),
                }
            }
            Value::Object(map) => Self::from_object(map),
            _ => Err(AppError::InvalidPayload("metadata must be an object".to_string())),
        }
    }

    fn from_object(map: &Map<String, Value>) -> AppResult<Self> {
        let kind = optional_str(map, "type")?;
        let loan_id = optional_uuid(map, "loanId")?;
        let user_id = optional_uuid(map, "userId")?;

        match (kind.map(str::to_ascii_lowercase).as_deref(), loan_id) {
            (Some("repayment"), Some(loan_id)) | (None, Some(loan_id)) => {
                Ok(PaymentMetadata::Repayment { loan_id, user_id })
            }
            (Some("repayment"), None) | (None, None) => Ok(PaymentMetadata::Unspecified),
            (Some("deposit"), _) => Ok(PaymentMetadata::Deposit { user_id }),
            (Some(other), _) => Err(AppError::InvalidPayload(format!(
                "unrecognized metadata type: {}",
                other
            ))),
        }
    }

    pub fn loan_id(&self) -> Option<Uuid> {
        match self {
            PaymentMetadata::Repayment { loan_id, .. } => Some(*loan_id),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            PaymentMetadata::Repayment { user_id, .. } | PaymentMetadata::Deposit { user_id } => *user_id,
            PaymentMetadata::Unspecified => None,
        }
    }
}

fn optional_str<'a>(map: &'a Map<String, Value>, key: &str) -> AppResult<Option<&'a str>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim())),
        Some(_) => Err(AppError::InvalidPayload(format!("metadata {} must be a string", key))),
    }
}

fn optional_uuid(map: &Map<String, Value>, key: &str) -> AppResult<Option<Uuid>> {
    optional_str(map, key)?
        .map(|s| {
            Uuid::parse_str(s)
                .map_err(|_| AppError::InvalidPayload(format!("metadata {} is not a valid id", key)))
        })
        .transpose()
}
