use chrono::NaiveDate;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::payment_dtos::check_phone;
use crate::config::Environment;
use crate::errors::{field_errors, AppError, FieldErrors, Result};
use crate::models::{
    customer::CustomerStatus,
    subscription::{Frequency, SubscriptionStatus},
};

pub const DEFAULT_LOG_LIMIT: i64 = 100;
const MAX_LOG_LIMIT: i64 = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    pub fn resolved(&self) -> i64 {
        self.limit
            .filter(|l| *l > 0)
            .map_or(DEFAULT_LOG_LIMIT, |l| l.min(MAX_LOG_LIMIT))
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerRequest {
    #[validate(
        required(message = "Name is required"),
        length(min = 1, max = 100, message = "Name must be 1-100 characters")
    )]
    pub name: Option<String>,

    #[validate(required(message = "Phone number is required"))]
    pub phone_number: Option<String>,

    #[validate(email(message = "Enter a valid email address"))]
    pub email: Option<String>,

    #[validate(
        required(message = "Account number is required"),
        length(min = 1, max = 50, message = "Account number must be 1-50 characters")
    )]
    pub account_number: Option<String>,

    #[serde(default)]
    pub status: CustomerStatus,
}

#[derive(Debug, Clone)]
pub struct ValidCustomer {
    pub name: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub account_number: String,
    pub status: CustomerStatus,
}

impl CreateCustomerRequest {
    pub fn into_valid(self) -> Result<ValidCustomer> {
        let req = CreateCustomerRequest {
            name: self.name.map(|v| v.trim().to_string()),
            phone_number: self.phone_number.map(|v| v.trim().to_string()),
            email: self.email.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
            account_number: self.account_number.map(|v| v.trim().to_string()),
            status: self.status,
        };

        let mut fields = match req.validate() {
            Ok(()) => FieldErrors::new(),
            Err(errors) => field_errors(&errors),
        };
        let phone = check_phone(req.phone_number.as_deref(), &mut fields);
        if !fields.is_empty() {
            return Err(AppError::ValidationError(fields));
        }

        match (req.name, phone, req.account_number) {
            (Some(name), Some(phone_number), Some(account_number)) => Ok(ValidCustomer {
                name,
                phone_number,
                email: req.email,
                account_number,
                status: req.status,
            }),
            _ => Err(AppError::invalid_field("body", "Request is incomplete")),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub customer_id: Option<String>,

    #[validate(
        required(message = "Customer name is required"),
        length(min = 1, max = 100, message = "Customer name must be 1-100 characters")
    )]
    pub customer_name: Option<String>,

    #[validate(required(message = "Phone number is required"))]
    pub phone_number: Option<String>,

    #[validate(
        required(message = "Amount is required"),
        range(min = 1.0, max = 150000.0, message = "Amount must be between KES 1 and KES 150,000")
    )]
    pub amount: Option<f64>,

    #[validate(required(message = "Frequency is required"))]
    pub frequency: Option<Frequency>,

    #[validate(required(message = "Start date is required"))]
    pub start_date: Option<NaiveDate>,

    #[validate(
        required(message = "Account reference is required"),
        length(min = 1, max = 50, message = "Account reference must be 1-50 characters")
    )]
    pub account_reference: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidSubscription {
    pub customer_id: Option<ObjectId>,
    pub customer_name: String,
    pub phone_number: String,
    pub amount: f64,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub account_reference: String,
}

impl CreateSubscriptionRequest {
    pub fn into_valid(self) -> Result<ValidSubscription> {
        let req = CreateSubscriptionRequest {
            customer_id: self.customer_id.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
            customer_name: self.customer_name.map(|v| v.trim().to_string()),
            phone_number: self.phone_number.map(|v| v.trim().to_string()),
            account_reference: self.account_reference.map(|v| v.trim().to_string()),
            ..self
        };

        let mut fields = match req.validate() {
            Ok(()) => FieldErrors::new(),
            Err(errors) => field_errors(&errors),
        };
        let phone = check_phone(req.phone_number.as_deref(), &mut fields);

        let customer_id = match req.customer_id.as_deref().map(ObjectId::parse_str) {
            Some(Ok(id)) => Some(id),
            Some(Err(_)) => {
                fields
                    .entry("customerId".to_string())
                    .or_default()
                    .push("Customer ID is not a valid id".to_string());
                None
            }
            None => None,
        };

        if !fields.is_empty() {
            return Err(AppError::ValidationError(fields));
        }

        match (req.customer_name, phone, req.amount, req.frequency, req.start_date, req.account_reference) {
            (
                Some(customer_name),
                Some(phone_number),
                Some(amount),
                Some(frequency),
                Some(start_date),
                Some(account_reference),
            ) => Ok(ValidSubscription {
                customer_id,
                customer_name,
                phone_number,
                amount,
                frequency,
                start_date,
                account_reference,
            }),
            _ => Err(AppError::invalid_field("body", "Request is incomplete")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionStatusRequest {
    pub status: SubscriptionStatus,
}

#[derive(Debug, Deserialize)]
pub struct RunSubscriptionsRequest {
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedDebit {
    pub subscription_id: String,
    pub transaction_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDebit {
    pub subscription_id: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRunReport {
    pub date: NaiveDate,
    pub due: usize,
    pub initiated: Vec<InitiatedDebit>,
    pub failed: Vec<FailedDebit>,
}
