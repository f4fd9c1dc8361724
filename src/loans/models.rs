use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::ledger::models::{BankDetails, Guarantor, IdentityVerification, Loan, Repayment, User};
use crate::users::models::validate_phone;

pub const MIN_LOAN_AMOUNT: Decimal = dec!(10000);
pub const MAX_LOAN_AMOUNT: Decimal = dec!(5000000);

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoanApplicationRequest {
    #[validate(custom = "validate_loan_amount")]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentRequest {
    pub loan_id: Uuid,
    #[validate(custom = "validate_positive_amount")]
    pub amount: Decimal,
}

/// Step 1: personal details plus the requested amount
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PersonalInfoRequest {
    #[validate(length(min = 2, message = "Full name is required"))]
    pub full_name: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    pub date_of_birth: NaiveDate,
    #[validate(length(min = 10, message = "Please provide a complete address"))]
    pub address: String,
    #[validate(custom = "validate_loan_amount")]
    pub loan_amount: Decimal,
}

/// Step 2. Photos are references to already-uploaded files.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRequest {
    #[validate(custom = "validate_bvn")]
    pub bvn: String,
    #[validate(custom = "validate_nin")]
    pub nin: String,
    #[validate(length(min = 1, message = "Face photo is required"))]
    pub face_photo_url: String,
    pub passport_url: Option<String>,
    pub loan_id: Option<Uuid>,
}

/// Step 3
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GuarantorRequest {
    #[validate(length(min = 2, message = "Guarantor name is required"))]
    pub full_name: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(length(min = 10, message = "Please provide the guarantor's full address"))]
    pub address: String,
    #[validate(length(min = 2, message = "Relationship is required"))]
    pub relationship: String,
    #[validate(length(min = 1, message = "Guarantor photo is required"))]
    pub photo_url: String,
    pub loan_id: Option<Uuid>,
}

/// Step 4: the account disbursements go to
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BankDetailsRequest {
    #[validate(length(min = 2, message = "Bank name is required"))]
    pub bank_name: String,
    #[validate(custom = "validate_account_number")]
    pub account_number: String,
    #[validate(length(min = 2, message = "Account name is required"))]
    pub account_name: String,
    pub loan_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationQuery {
    pub loan_id: Option<Uuid>,
}

fn validate_loan_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < MIN_LOAN_AMOUNT || *amount > MAX_LOAN_AMOUNT {
        let mut error = ValidationError::new("range");
        error.message = Some("Loan amount must be between 10,000 and 5,000,000".into());
        return Err(error);
    }
    Ok(())
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        let mut error = ValidationError::new("range");
        error.message = Some("Amount must be positive".into());
        return Err(error);
    }
    Ok(())
}

fn digits_exactly(value: &str, len: usize, message: &'static str) -> Result<(), ValidationError> {
    if value.len() != len || !value.chars().all(|c| c.is_ascii_digit()) {
        let mut error = ValidationError::new("digits");
        error.message = Some(message.into());
        return Err(error);
    }
    Ok(())
}

fn validate_bvn(bvn: &str) -> Result<(), ValidationError> {
    digits_exactly(bvn, 11, "BVN must be exactly 11 digits")
}

fn validate_nin(nin: &str) -> Result<(), ValidationError> {
    digits_exactly(nin, 11, "NIN must be exactly 11 digits")
}

fn validate_account_number(account_number: &str) -> Result<(), ValidationError> {
    digits_exactly(account_number, 10, "Account number must be exactly 10 digits")
}

#[derive(Debug, Serialize)]
pub struct LoanApplicationResponse {
    pub created: bool,
    pub loan: Loan,
}

#[derive(Debug, Serialize)]
pub struct LoanWithRepayments {
    #[serde(flatten)]
    pub loan: Loan,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_repaid: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub outstanding: Decimal,
    pub repayments: Vec<Repayment>,
}

impl LoanWithRepayments {
    pub fn new(loan: Loan, repayments: Vec<Repayment>, total_repaid: Decimal) -> Self {
        let outstanding = (loan.total_repayment - total_repaid).max(Decimal::ZERO);
        Self {
            loan,
            total_repaid,
            outstanding,
            repayments,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepSavedResponse {
    pub loan_id: Uuid,
    pub current_step: i16,
    pub message: String,
}

/// Everything the borrower entered, shown back before submission
#[derive(Debug, Serialize)]
pub struct ApplicationReview {
    pub user: User,
    pub loan: Loan,
    pub identity: IdentityVerification,
    pub guarantor: Guarantor,
    pub bank_details: BankDetails,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub loan_id: Uuid,
    pub application_complete: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentInitResponse {
    pub authorization_url: String,
    pub reference: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loan_amount_bounds() {
        assert!(LoanApplicationRequest { amount: dec!(10000) }.validate().is_ok());
        assert!(LoanApplicationRequest { amount: dec!(5000000) }.validate().is_ok());
        assert!(LoanApplicationRequest { amount: dec!(9999.99) }.validate().is_err());
        assert!(LoanApplicationRequest { amount: dec!(5000000.01) }.validate().is_err());
    }

    #[test]
    fn test_repayment_amount_positive() {
        let loan_id = Uuid::new_v4();
        assert!(RepaymentRequest { loan_id, amount: dec!(1) }.validate().is_ok());
        assert!(RepaymentRequest { loan_id, amount: Decimal::ZERO }.validate().is_err());
        assert!(RepaymentRequest { loan_id, amount: dec!(-50) }.validate().is_err());
    }

    #[test]
    fn test_identity_numbers_are_eleven_digits() {
        let request = |bvn: &str, nin: &str| IdentityRequest {
            bvn: bvn.into(),
            nin: nin.into(),
            face_photo_url: "uploads/face.jpg".into(),
            passport_url: None,
            loan_id: None,
        };
        assert!(request("22123456789", "12345678901").validate().is_ok());
        assert!(request("2212345678", "12345678901").validate().is_err());
        assert!(request("22123456789", "1234567890a").validate().is_err());
    }

    #[test]
    fn test_bank_account_number_is_ten_digits() {
        let request = |account_number: &str| BankDetailsRequest {
            bank_name: "GTBank".into(),
            account_number: account_number.into(),
            account_name: "Ada Obi".into(),
            loan_id: None,
        };
        assert!(request("0123456789").validate().is_ok());
        assert!(request("012345678").validate().is_err());
        assert!(request("01234567890").validate().is_err());
    }

    #[test]
    fn test_outstanding_never_negative() {
        let loan = Loan::new(Uuid::new_v4(), dec!(100000), dec!(5));
        let view = LoanWithRepayments::new(loan, Vec::new(), dec!(110000));
        assert_eq!(view.outstanding, Decimal::ZERO);
    }
}
