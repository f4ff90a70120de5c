// models/transaction.rs
use chrono::{DateTime, Utc};
use mongodb::bson::{self, oid::ObjectId};
use serde::{Deserialize, Serialize};

use super::optional_bson_datetime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "C2B")]
    Collection,
    #[serde(rename = "B2C")]
    Disbursement,
    #[serde(rename = "B2B")]
    BusinessTransfer,
    #[serde(rename = "RATIBA")]
    RecurringDebit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Collection => "C2B",
            TransactionType::Disbursement => "B2C",
            TransactionType::BusinessTransfer => "B2B",
            TransactionType::RecurringDebit => "RATIBA",
        }
    }

    /// Prefix of locally generated external transaction ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            TransactionType::Collection => "STK",
            TransactionType::Disbursement => "B2C",
            TransactionType::BusinessTransfer => "B2B",
            TransactionType::RecurringDebit => "RAT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Reversed => "reversed",
        }
    }

    /// Provider result code 0 is the only success code.
    pub fn from_result_code(code: i64) -> Self {
        if code == 0 {
            TransactionStatus::Completed
        } else {
            TransactionStatus::Failed
        }
    }

    pub fn valid_transitions(&self) -> &'static [TransactionStatus] {
        match self {
            TransactionStatus::Pending => &[TransactionStatus::Completed, TransactionStatus::Failed],
            TransactionStatus::Completed => &[TransactionStatus::Reversed],
            TransactionStatus::Failed | TransactionStatus::Reversed => &[],
        }
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub transaction_id: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub currency: String,
    pub phone_number: String,
    pub account_reference: String,
    pub description: Option<String>,
    pub status: TransactionStatus,

    pub customer_id: Option<ObjectId>,
    pub customer_name: Option<String>,

    // Correlation with the asynchronous callback
    pub conversation_id: Option<String>,
    pub originator_conversation_id: Option<String>,

    // Settlement outcome
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    #[serde(default, with = "optional_bson_datetime")]
    pub transaction_date: Option<DateTime<Utc>>,
    pub raw_callback_data: Option<serde_json::Value>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to open a pending transaction after the provider accepted a request.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_id: String,
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub phone_number: String,
    pub account_reference: String,
    pub description: Option<String>,
    pub conversation_id: String,
    pub originator_conversation_id: Option<String>,
    pub customer_id: Option<ObjectId>,
    pub customer_name: Option<String>,
}

impl Transaction {
    pub fn pending(new: NewTransaction, now: DateTime<Utc>) -> Self {
        Transaction {
            id: None,
            transaction_id: new.transaction_id,
            transaction_type: new.transaction_type,
            amount: new.amount,
            currency: "KES".to_string(),
            phone_number: new.phone_number,
            account_reference: new.account_reference,
            description: new.description,
            status: TransactionStatus::Pending,
            customer_id: new.customer_id,
            customer_name: new.customer_name,
            conversation_id: Some(new.conversation_id),
            originator_conversation_id: new.originator_conversation_id,
            result_code: None,
            result_desc: None,
            mpesa_receipt_number: None,
            transaction_date: None,
            raw_callback_data: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a settlement in place. Callers guard on the current status first.
    pub fn apply_settlement(&mut self, settlement: &Settlement) {
        debug_assert!(self.status.can_transition_to(settlement.status));
        self.status = settlement.status;
        self.result_code = Some(settlement.result_code.clone());
        self.result_desc = Some(settlement.result_desc.clone());
        if settlement.receipt_number.is_some() {
            self.mpesa_receipt_number = settlement.receipt_number.clone();
        }
        if settlement.transaction_date.is_some() {
            self.transaction_date = settlement.transaction_date;
        }
        self.raw_callback_data = Some(settlement.raw_callback_data.clone());
        self.updated_at = settlement.settled_at;
    }
}

/// Outcome written onto a transaction by callback ingest.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub status: TransactionStatus,
    pub result_code: String,
    pub result_desc: String,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    /// Amount the provider reports as settled, when the callback carries one.
    pub settled_amount: Option<f64>,
    pub raw_callback_data: serde_json::Value,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFilter {
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    #[serde(skip)]
    pub created_from: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub created_to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl TransactionFilter {
    pub fn created_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        TransactionFilter {
            created_from: Some(from),
            created_to: Some(to),
            ..Default::default()
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        self.transaction_type.map_or(true, |t| tx.transaction_type == t)
            && self.status.map_or(true, |s| tx.status == s)
            && self.created_from.map_or(true, |from| tx.created_at >= from)
            && self.created_to.map_or(true, |to| tx.created_at <= to)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: Option<String>,
    pub transaction_id: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub currency: String,
    pub phone_number: String,
    pub account_reference: String,
    pub description: Option<String>,
    pub status: TransactionStatus,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub conversation_id: Option<String>,
    pub originator_conversation_id: Option<String>,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub raw_callback_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionResponse {
    fn from(tx: Transaction) -> Self {
        TransactionResponse {
            id: tx.id.map(|id| id.to_hex()),
            transaction_id: tx.transaction_id,
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            currency: tx.currency,
            phone_number: tx.phone_number,
            account_reference: tx.account_reference,
            description: tx.description,
            status: tx.status,
            customer_id: tx.customer_id.map(|id| id.to_hex()),
            customer_name: tx.customer_name,
            conversation_id: tx.conversation_id,
            originator_conversation_id: tx.originator_conversation_id,
            result_code: tx.result_code,
            result_desc: tx.result_desc,
            mpesa_receipt_number: tx.mpesa_receipt_number,
            transaction_date: tx.transaction_date,
            raw_callback_data: tx.raw_callback_data,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_settles_exactly_once() {
        let pending = TransactionStatus::Pending;
        assert!(pending.can_transition_to(TransactionStatus::Completed));
        assert!(pending.can_transition_to(TransactionStatus::Failed));
        assert!(!pending.can_transition_to(TransactionStatus::Reversed));

        assert!(!TransactionStatus::Completed.can_transition_to(TransactionStatus::Failed));
        assert!(TransactionStatus::Completed.can_transition_to(TransactionStatus::Reversed));
        assert!(TransactionStatus::Failed.valid_transitions().is_empty());
        assert!(TransactionStatus::Reversed.valid_transitions().is_empty());
    }

    #[test]
    fn result_code_zero_is_the_only_success() {
        assert_eq!(TransactionStatus::from_result_code(0), TransactionStatus::Completed);
        assert_eq!(TransactionStatus::from_result_code(1032), TransactionStatus::Failed);
        assert_eq!(TransactionStatus::from_result_code(-1), TransactionStatus::Failed);
    }

    #[test]
    fn type_serializes_to_stored_code() {
        let json = serde_json::to_value(TransactionType::RecurringDebit).unwrap();
        assert_eq!(json, serde_json::json!("RATIBA"));
        let parsed: TransactionType = serde_json::from_value(serde_json::json!("B2C")).unwrap();
        assert_eq!(parsed, TransactionType::Disbursement);
    }

    #[test]
    fn settlement_keeps_existing_receipt_when_callback_has_none() {
        let now = Utc::now();
        let mut tx = Transaction::pending(
            NewTransaction {
                transaction_id: "STK1".to_string(),
                transaction_type: TransactionType::Collection,
                amount: 500.0,
                phone_number: "254712345678".to_string(),
                account_reference: "INV-1".to_string(),
                description: None,
                conversation_id: "CR1".to_string(),
                originator_conversation_id: None,
                customer_id: None,
                customer_name: None,
            },
            now,
        );
        tx.mpesa_receipt_number = Some("QKJ8HBZL5P".to_string());

        tx.apply_settlement(&Settlement {
            status: TransactionStatus::Completed,
            result_code: "0".to_string(),
            result_desc: "ok".to_string(),
            receipt_number: None,
            transaction_date: None,
            settled_amount: None,
            raw_callback_data: serde_json::json!({}),
            settled_at: now,
        });

        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.mpesa_receipt_number.as_deref(), Some("QKJ8HBZL5P"));
        assert_eq!(tx.result_code.as_deref(), Some("0"));
    }
}
