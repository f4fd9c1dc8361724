use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::ledger::models::{User, Wallet, FIRST_APPLICATION_STEP, REVIEW_APPLICATION_STEP};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 2, message = "Full name is required"))]
    pub full_name: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
}

impl RegisterRequest {
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_ascii_lowercase()
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: User,
    pub wallet: Wallet,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStepRequest {
    #[validate(custom = "validate_step")]
    pub step: i16,
}

#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub current_step: i16,
    pub application_complete: bool,
}

/// At least ten digits, optionally led by `+`
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let digits = phone.trim().strip_prefix('+').unwrap_or(phone.trim());
    if digits.len() < 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
        let mut error = ValidationError::new("phone");
        error.message = Some("Phone number must have at least 10 digits".into());
        return Err(error);
    }
    Ok(())
}

fn validate_step(step: i16) -> Result<(), ValidationError> {
    if !(FIRST_APPLICATION_STEP..=REVIEW_APPLICATION_STEP).contains(&step) {
        let mut error = ValidationError::new("range");
        error.message = Some("Step must be between 1 and 5".into());
        return Err(error);
    }
    Ok(())
}
