use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::Environment;
use crate::errors::{field_errors, AppError, FieldErrors, Result};
use crate::models::reconciliation::ReconciliationResponse;
use crate::services::reconciliation::ReconciliationSummary;

const PHONE_MESSAGE: &str = "Enter a valid Kenyan phone number (e.g. 254712345678)";

/// Canonical `254XXXXXXXXX` form of a Kenyan mobile number. Accepts the local
/// `0XXXXXXXXX` form and `254`/`+254` prefixed forms; anything else is `None`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let rest = if let Some(rest) = trimmed.strip_prefix("+254") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("254") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix('0') {
        rest
    } else {
        return None;
    };

    if rest.len() == 9 && rest.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("254{}", rest))
    } else {
        None
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

fn validation_fields<T: Validate>(req: &T) -> FieldErrors {
    match req.validate() {
        Ok(()) => FieldErrors::new(),
        Err(errors) => field_errors(&errors),
    }
}

/// Normalizes the phone field, recording a field error when it cannot be.
/// A missing value is already reported by the `required` check.
pub(crate) fn check_phone(raw: Option<&str>, fields: &mut FieldErrors) -> Option<String> {
    let raw = raw?;
    let phone = normalize_phone(raw);
    if phone.is_none() {
        fields
            .entry("phoneNumber".to_string())
            .or_default()
            .push(PHONE_MESSAGE.to_string());
    }
    phone
}

fn finish<T>(fields: FieldErrors, build: impl FnOnce() -> Option<T>) -> Result<T> {
    if !fields.is_empty() {
        return Err(AppError::ValidationError(fields));
    }
    build().ok_or_else(|| AppError::invalid_field("body", "Request is incomplete"))
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRequest {
    #[validate(required(message = "Phone number is required"))]
    pub phone_number: Option<String>,

    #[validate(
        required(message = "Amount is required"),
        range(min = 1.0, max = 150000.0, message = "Amount must be between KES 1 and KES 150,000")
    )]
    pub amount: Option<f64>,

    #[validate(
        required(message = "Account reference is required"),
        length(min = 1, max = 50, message = "Account reference must be 1-50 characters")
    )]
    pub account_reference: Option<String>,

    #[validate(
        required(message = "Description is required"),
        length(min = 1, max = 100, message = "Description must be 1-100 characters")
    )]
    pub transaction_desc: Option<String>,

    #[serde(default)]
    pub environment: Environment,
}

/// A collection request that passed validation, phone already normalized.
#[derive(Debug, Clone)]
pub struct ValidCollection {
    pub phone_number: String,
    pub amount: f64,
    pub account_reference: String,
    pub transaction_desc: String,
    pub environment: Environment,
}

impl CollectionRequest {
    pub fn into_valid(self) -> Result<ValidCollection> {
        let req = CollectionRequest {
            phone_number: trimmed(self.phone_number),
            account_reference: trimmed(self.account_reference),
            transaction_desc: trimmed(self.transaction_desc),
            ..self
        };

        let mut fields = validation_fields(&req);
        let phone = check_phone(req.phone_number.as_deref(), &mut fields);

        finish(fields, || {
            Some(ValidCollection {
                phone_number: phone?,
                amount: req.amount?,
                account_reference: req.account_reference?,
                transaction_desc: req.transaction_desc?,
                environment: req.environment,
            })
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionResponse {
    pub success: bool,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub transaction_id: String,
    pub customer_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandId {
    BusinessPayment,
    SalaryPayment,
    PromotionPayment,
}

impl CommandId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandId::BusinessPayment => "BusinessPayment",
            CommandId::SalaryPayment => "SalaryPayment",
            CommandId::PromotionPayment => "PromotionPayment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "BusinessPayment" => Some(CommandId::BusinessPayment),
            "SalaryPayment" => Some(CommandId::SalaryPayment),
            "PromotionPayment" => Some(CommandId::PromotionPayment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DisbursementRequest {
    #[validate(required(message = "Phone number is required"))]
    pub phone_number: Option<String>,

    #[validate(
        required(message = "Amount is required"),
        range(min = 10.0, max = 150000.0, message = "Amount must be between KES 10 and KES 150,000")
    )]
    pub amount: Option<f64>,

    #[validate(
        required(message = "Occasion is required"),
        length(min = 1, max = 100, message = "Occasion must be 1-100 characters")
    )]
    pub occasion: Option<String>,

    #[validate(
        required(message = "Remarks are required"),
        length(min = 1, max = 100, message = "Remarks must be 1-100 characters")
    )]
    pub remarks: Option<String>,

    #[validate(required(message = "Command ID is required"))]
    pub command_id: Option<String>,

    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone)]
pub struct ValidDisbursement {
    pub phone_number: String,
    pub amount: f64,
    pub occasion: String,
    pub remarks: String,
    pub command_id: CommandId,
    pub environment: Environment,
}

impl DisbursementRequest {
    pub fn into_valid(self) -> Result<ValidDisbursement> {
        let req = DisbursementRequest {
            phone_number: trimmed(self.phone_number),
            occasion: trimmed(self.occasion),
            remarks: trimmed(self.remarks),
            command_id: trimmed(self.command_id),
            ..self
        };

        let mut fields = validation_fields(&req);
        let phone = check_phone(req.phone_number.as_deref(), &mut fields);

        let command_id = req.command_id.as_deref().and_then(|raw| {
            let parsed = CommandId::parse(raw);
            if parsed.is_none() {
                fields.entry("commandId".to_string()).or_default().push(
                    "Command ID must be one of BusinessPayment, SalaryPayment, PromotionPayment".to_string(),
                );
            }
            parsed
        });

        finish(fields, || {
            Some(ValidDisbursement {
                phone_number: phone?,
                amount: req.amount?,
                occasion: req.occasion?,
                remarks: req.remarks?,
                command_id: command_id?,
                environment: req.environment,
            })
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisbursementResponse {
    pub success: bool,
    pub conversation_id: String,
    pub originator_conversation_id: Option<String>,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatusQueryRequest {
    #[validate(
        required(message = "Transaction ID is required"),
        length(min = 1, max = 50, message = "Transaction ID must be 1-50 characters")
    )]
    pub transaction_id: Option<String>,

    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone)]
pub struct ValidStatusQuery {
    pub transaction_id: String,
    pub environment: Environment,
}

impl StatusQueryRequest {
    pub fn into_valid(self) -> Result<ValidStatusQuery> {
        let req = StatusQueryRequest {
            transaction_id: trimmed(self.transaction_id),
            ..self
        };
        let fields = validation_fields(&req);

        finish(fields, || {
            Some(ValidStatusQuery {
                transaction_id: req.transaction_id?,
                environment: req.environment,
            })
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusQueryResponse {
    pub success: bool,
    pub data: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconciliationRequest {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct ReconciliationResult {
    pub success: bool,
    pub reconciliation: ReconciliationResponse,
    pub summary: ReconciliationSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(phone: &str, amount: f64) -> CollectionRequest {
        CollectionRequest {
            phone_number: Some(phone.to_string()),
            amount: Some(amount),
            account_reference: Some("INV-1".to_string()),
            transaction_desc: Some("Invoice payment".to_string()),
            environment: Environment::Sandbox,
        }
    }

    #[test]
    fn local_and_international_forms_normalize_alike() {
        let expected = Some("254712345678".to_string());
        assert_eq!(normalize_phone("0712345678"), expected);
        assert_eq!(normalize_phone("+254712345678"), expected);
        assert_eq!(normalize_phone("254712345678"), expected);
        assert_eq!(normalize_phone(" 0712345678 "), expected);
    }

    #[test]
    fn malformed_phones_are_rejected() {
        assert_eq!(normalize_phone("712345678"), None);
        assert_eq!(normalize_phone("07123456789"), None);
        assert_eq!(normalize_phone("07123x5678"), None);
        assert_eq!(normalize_phone("+1712345678"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn collection_amount_bounds_are_inclusive() {
        assert!(collection("0712345678", 1.0).into_valid().is_ok());
        assert!(collection("0712345678", 150_000.0).into_valid().is_ok());

        for amount in [0.0, 0.5, 150_000.5, -3.0] {
            match collection("0712345678", amount).into_valid() {
                Err(AppError::ValidationError(fields)) => assert!(fields.contains_key("amount")),
                other => panic!("expected amount error for {}, got {:?}", amount, other),
            }
        }
    }

    #[test]
    fn collection_trims_text_before_length_checks() {
        let mut req = collection("+254712345678", 500.0);
        req.account_reference = Some("   ".to_string());
        req.transaction_desc = Some(format!("  {}  ", "d".repeat(100)));

        match req.into_valid() {
            Err(AppError::ValidationError(fields)) => {
                assert!(fields.contains_key("accountReference"));
                assert!(!fields.contains_key("transactionDesc"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn collection_reports_every_bad_field() {
        let req = CollectionRequest {
            phone_number: Some("12345".to_string()),
            amount: None,
            account_reference: Some("x".repeat(51)),
            transaction_desc: None,
            environment: Environment::Production,
        };

        match req.into_valid() {
            Err(AppError::ValidationError(fields)) => {
                let keys: Vec<_> = fields.keys().map(String::as_str).collect();
                assert_eq!(keys, vec!["accountReference", "amount", "phoneNumber", "transactionDesc"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn valid_collection_carries_normalized_phone() {
        let valid = collection("0712345678", 500.0).into_valid().unwrap();
        assert_eq!(valid.phone_number, "254712345678");
        assert_eq!(valid.account_reference, "INV-1");
    }

    #[test]
    fn disbursement_minimum_is_ten() {
        let req = DisbursementRequest {
            phone_number: Some("0712345678".to_string()),
            amount: Some(9.0),
            occasion: Some("Bonus".to_string()),
            remarks: Some("Q3".to_string()),
            command_id: Some("BusinessPayment".to_string()),
            environment: Environment::Sandbox,
        };
        match req.clone().into_valid() {
            Err(AppError::ValidationError(fields)) => assert!(fields.contains_key("amount")),
            other => panic!("expected amount error, got {:?}", other),
        }

        let ok = DisbursementRequest { amount: Some(10.0), ..req }.into_valid().unwrap();
        assert_eq!(ok.command_id, CommandId::BusinessPayment);
    }

    #[test]
    fn disbursement_rejects_unknown_command() {
        let req = DisbursementRequest {
            phone_number: Some("254712345678".to_string()),
            amount: Some(100.0),
            occasion: Some("Bonus".to_string()),
            remarks: Some("Q3".to_string()),
            command_id: Some("AccountBalance".to_string()),
            environment: Environment::Sandbox,
        };
        match req.into_valid() {
            Err(AppError::ValidationError(fields)) => assert!(fields.contains_key("commandId")),
            other => panic!("expected command error, got {:?}", other),
        }
    }

    #[test]
    fn status_query_bounds_transaction_id() {
        let long = StatusQueryRequest {
            transaction_id: Some("T".repeat(51)),
            environment: Environment::Sandbox,
        };
        assert!(matches!(long.into_valid(), Err(AppError::ValidationError(_))));

        let ok = StatusQueryRequest {
            transaction_id: Some(" QKJ8HBZL5P ".to_string()),
            environment: Environment::Sandbox,
        };
        assert_eq!(ok.into_valid().unwrap().transaction_id, "QKJ8HBZL5P");
    }
}
