use chrono::{DateTime, Utc};
use mongodb::bson::{self, oid::ObjectId};
use serde::{Deserialize, Serialize};

use super::optional_bson_datetime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    #[default]
    Active,
    Inactive,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "active",
            CustomerStatus::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub name: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub account_number: String,

    // Running totals, only ever incremented on completed settlements
    pub total_transactions: i64,
    pub total_amount: f64,
    #[serde(default, with = "optional_bson_datetime")]
    pub last_transaction_date: Option<DateTime<Utc>>,

    pub status: CustomerStatus,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(
        name: String,
        phone_number: String,
        email: Option<String>,
        account_number: String,
        status: CustomerStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Customer {
            id: None,
            name,
            phone_number,
            email,
            account_number,
            total_transactions: 0,
            total_amount: 0.0,
            last_transaction_date: None,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Profile created the first time a settlement references an unknown phone.
    pub fn from_settlement(phone_number: &str, now: DateTime<Utc>) -> Self {
        Customer::new(
            phone_number.to_string(),
            phone_number.to_string(),
            None,
            phone_number.to_string(),
            CustomerStatus::Active,
            now,
        )
    }

    pub fn record_completed(&mut self, amount: f64, at: DateTime<Utc>) {
        self.total_transactions += 1;
        self.total_amount += amount;
        self.last_transaction_date = Some(at);
        self.updated_at = at;
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerResponse {
    pub id: Option<String>,
    pub name: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub account_number: String,
    pub total_transactions: i64,
    pub total_amount: f64,
    pub last_transaction_date: Option<DateTime<Utc>>,
    pub status: CustomerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Customer> for CustomerResponse {
    fn from(customer: Customer) -> Self {
        CustomerResponse {
            id: customer.id.map(|id| id.to_hex()),
            name: customer.name,
            phone_number: customer.phone_number,
            email: customer.email,
            account_number: customer.account_number,
            total_transactions: customer.total_transactions,
            total_amount: customer.total_amount,
            last_transaction_date: customer.last_transaction_date,
            status: customer.status,
            created_at: customer.created_at,
            updated_at: customer.updated_at,
        }
    }
}
