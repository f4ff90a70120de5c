//! Provider callback ingest.
//!
//! Every payload is logged raw before anything else happens, and the provider
//! always gets a 200 acknowledgement. Settlement is a single conditional update
//! guarded on the current status, so a redelivered callback changes nothing.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::models::{
    audit::AuditLogEntry,
    callback_log::{CallbackKind, CallbackLogEntry, CallbackLogUpdate},
    transaction::{Settlement, Transaction, TransactionStatus},
};
use crate::store::Store;

const STK_DATE_FORMAT: &str = "%Y%m%d%H%M%S";
const B2C_DATE_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Which public endpoint the payload arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackRoute {
    /// STK callbacks and B2C results.
    Result,
    Reversal,
    Status,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: &'static str,
}

impl CallbackAck {
    pub fn success() -> Self {
        CallbackAck { result_code: 0, result_desc: "Success" }
    }

    /// Acknowledgement after an internal failure the provider cannot fix by retrying.
    pub fn accepted() -> Self {
        CallbackAck { result_code: 0, result_desc: "Accepted" }
    }
}

fn code_from_number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct StkEnvelope {
    #[serde(rename = "Body")]
    body: StkBody,
}

#[derive(Debug, Deserialize)]
struct StkBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode", deserialize_with = "code_from_number_or_string")]
    result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
struct MetadataItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    #[serde(rename = "Result")]
    result: ResultBody,
}

#[derive(Debug, Deserialize)]
struct ResultBody {
    #[serde(rename = "ResultCode", deserialize_with = "code_from_number_or_string")]
    result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
    #[serde(rename = "OriginatorConversationID", default)]
    originator_conversation_id: Option<String>,
    #[serde(rename = "ConversationID", default)]
    conversation_id: Option<String>,
    #[serde(rename = "TransactionID", default)]
    transaction_id: Option<String>,
    #[serde(rename = "OriginalTransactionID", default)]
    original_transaction_id: Option<String>,
    #[serde(rename = "ResultParameters", default)]
    result_parameters: Option<ResultParameters>,
}

#[derive(Debug, Deserialize)]
struct ResultParameters {
    #[serde(rename = "ResultParameter", default)]
    parameters: OneOrMany<ResultParameter>,
}

// A lone parameter sometimes arrives as an object instead of a one-item array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultParameter {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value", default)]
    value: Option<Value>,
}

/// Outcome of an STK push, flattened out of `Body.stkCallback`.
#[derive(Debug, Clone, PartialEq)]
pub struct StkOutcome {
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub result_code: i64,
    pub result_desc: String,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub phone_number: Option<String>,
    pub amount: Option<f64>,
}

/// Outcome carried by the `Result` wrapper (B2C, reversal and status results).
#[derive(Debug, Clone, PartialEq)]
pub struct ResultOutcome {
    pub result_code: i64,
    pub result_desc: String,
    pub conversation_id: Option<String>,
    pub originator_conversation_id: Option<String>,
    pub transaction_id: Option<String>,
    pub original_transaction_id: Option<String>,
    pub parameters: HashMap<String, Value>,
}

impl ResultOutcome {
    fn parameter_str(&self, key: &str) -> Option<String> {
        value_to_string(self.parameters.get(key)?)
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.parameter_str("TransactionReceipt")
            .or_else(|| self.transaction_id.clone())
            .filter(|r| !r.is_empty())
    }

    pub fn amount(&self) -> Option<f64> {
        self.parameters.get("TransactionAmount").and_then(value_to_f64)
    }

    /// Receipt of the transaction a reversal undoes.
    pub fn reversed_receipt(&self) -> Option<String> {
        self.parameter_str("OriginalTransactionID")
            .or_else(|| self.original_transaction_id.clone())
            .or_else(|| self.transaction_id.clone())
            .filter(|r| !r.is_empty())
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a provider timestamp written in the provider's local time.
pub fn parse_provider_time(raw: &str, format: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), format).ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn shape_error(kind: &str, err: serde_json::Error) -> AppError {
    AppError::UnrecognizedCallbackShape(format!("{}: {}", kind, err))
}

pub fn parse_stk_callback(payload: &Value, offset: &FixedOffset) -> Result<StkOutcome> {
    let envelope: StkEnvelope =
        serde_json::from_value(payload.clone()).map_err(|e| shape_error("STK callback", e))?;
    let callback = envelope.body.stk_callback;

    let items: HashMap<String, Value> = callback
        .callback_metadata
        .map(|m| m.items)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| item.value.map(|v| (item.name, v)))
        .collect();

    Ok(StkOutcome {
        checkout_request_id: callback.checkout_request_id,
        merchant_request_id: callback.merchant_request_id,
        result_code: callback.result_code,
        result_desc: callback.result_desc.unwrap_or_default(),
        receipt_number: items.get("MpesaReceiptNumber").and_then(value_to_string),
        transaction_date: items
            .get("TransactionDate")
            .and_then(value_to_string)
            .and_then(|raw| parse_provider_time(&raw, STK_DATE_FORMAT, offset)),
        phone_number: items.get("PhoneNumber").and_then(value_to_string),
        amount: items.get("Amount").and_then(value_to_f64),
    })
}

pub fn parse_result(payload: &Value) -> Result<ResultOutcome> {
    let envelope: ResultEnvelope =
        serde_json::from_value(payload.clone()).map_err(|e| shape_error("Result callback", e))?;
    let result = envelope.result;

    let parameters = result
        .result_parameters
        .map(|p| p.parameters.into_vec())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.value.map(|v| (p.key, v)))
        .collect();

    Ok(ResultOutcome {
        result_code: result.result_code,
        result_desc: result.result_desc.unwrap_or_default(),
        conversation_id: result.conversation_id,
        originator_conversation_id: result.originator_conversation_id,
        transaction_id: result.transaction_id,
        original_transaction_id: result.original_transaction_id,
        parameters,
    })
}

pub fn classify(route: CallbackRoute, payload: &Value) -> CallbackKind {
    match route {
        CallbackRoute::Reversal => CallbackKind::ReversalResult,
        CallbackRoute::Status => CallbackKind::StatusResult,
        CallbackRoute::Timeout => CallbackKind::QueueTimeout,
        CallbackRoute::Result => {
            if payload.pointer("/Body/stkCallback").is_some() {
                CallbackKind::StkCallback
            } else if payload.get("Result").is_some() {
                CallbackKind::B2cResult
            } else {
                CallbackKind::Unknown
            }
        }
    }
}

/// What processing did with a well-formed callback.
#[derive(Debug)]
enum Outcome {
    Applied,
    /// Nothing to change; the reason is kept on the log entry.
    Skipped(String),
    /// Settled, but a follow-up write failed; the error is kept on the log entry.
    Degraded(String),
}

struct Ingest<'a> {
    store: &'a dyn Store,
    config: &'a AppConfig,
    payload: &'a Value,
    ip: Option<String>,
}

impl Ingest<'_> {
    async fn audit(&self, entry: AuditLogEntry) {
        let action = entry.action.clone();
        if let Err(e) = self.store.append_audit(entry.ip_address(self.ip.clone())).await {
            error!("Failed to write audit entry '{}': {}", action, e);
        }
    }

    fn settlement(
        &self,
        status: TransactionStatus,
        result_code: i64,
        result_desc: &str,
        receipt_number: Option<String>,
        transaction_date: Option<DateTime<Utc>>,
        settled_amount: Option<f64>,
    ) -> Settlement {
        Settlement {
            status,
            result_code: result_code.to_string(),
            result_desc: result_desc.to_string(),
            receipt_number,
            transaction_date,
            settled_amount,
            raw_callback_data: self.payload.clone(),
            settled_at: Utc::now(),
        }
    }

    async fn skipped_settlement(&self, conversation_id: &str) -> Result<Outcome> {
        let reason = match self.store.find_by_conversation_id(conversation_id).await? {
            Some(tx) => format!(
                "Transaction {} already {} for {}",
                tx.transaction_id,
                tx.status.as_str(),
                conversation_id
            ),
            None => format!("No pending transaction for {}", conversation_id),
        };
        info!("{}", reason);
        Ok(Outcome::Skipped(reason))
    }

    /// Folds a completed settlement into the counterpart's customer profile.
    /// `amount` is what the provider actually settled.
    async fn credit_customer(&self, tx: &Transaction, amount: f64) -> Result<()> {
        let settled_at = tx.updated_at;
        let customer = self
            .store
            .record_settlement(
                &tx.phone_number,
                amount,
                settled_at,
                self.config.upsert_customers_on_settle,
            )
            .await?;

        match customer {
            Some(customer) => {
                if tx.customer_id.is_none() {
                    if let Some(customer_id) = customer.id {
                        self.store
                            .link_customer(&tx.transaction_id, customer_id, &customer.name)
                            .await?;
                    }
                }
            }
            None => info!("No customer profile for {}, totals not updated", tx.phone_number),
        }
        Ok(())
    }

    async fn settle(
        &self,
        conversation_id: &str,
        settlement: Settlement,
        audit_metadata: Value,
    ) -> Result<Outcome> {
        let Some(tx) = self.store.settle_pending(conversation_id, &settlement).await? else {
            return self.skipped_settlement(conversation_id).await;
        };

        info!(
            "✅ {} {} ({}: {})",
            tx.transaction_id,
            tx.status.as_str(),
            settlement.result_code,
            settlement.result_desc
        );

        // Already settled; a customer failure is logged and audited, not returned.
        let mut customer_error = None;
        if tx.status == TransactionStatus::Completed {
            let amount = settlement.settled_amount.unwrap_or(tx.amount);
            if let Err(e) = self.credit_customer(&tx, amount).await {
                error!("❌ Customer update failed for {}: {}", tx.transaction_id, e);
                customer_error = Some(format!("Customer update failed: {}", e));
            }
        }

        let action = match tx.status {
            TransactionStatus::Completed => "Payment Completed",
            _ => "Payment Failed",
        };
        let mut metadata = audit_metadata;
        metadata["transactionId"] = json!(tx.transaction_id);
        metadata["resultCode"] = json!(settlement.result_code);
        metadata["mpesaReceiptNumber"] = json!(tx.mpesa_receipt_number);
        if let Some(reason) = &customer_error {
            metadata["customerUpdateError"] = json!(reason);
        }

        self.audit(
            AuditLogEntry::transaction(action)
                .details(format!(
                    "{}. Receipt: {}",
                    settlement.result_desc,
                    tx.mpesa_receipt_number.as_deref().unwrap_or("N/A")
                ))
                .metadata(metadata),
        )
        .await;

        Ok(customer_error.map_or(Outcome::Applied, Outcome::Degraded))
    }

    async fn stk_callback(&self) -> Result<Outcome> {
        let outcome = parse_stk_callback(self.payload, &self.config.provider_offset()?)?;
        let status = TransactionStatus::from_result_code(outcome.result_code);
        let settlement = self.settlement(
            status,
            outcome.result_code,
            &outcome.result_desc,
            outcome.receipt_number.clone(),
            outcome.transaction_date,
            outcome.amount,
        );

        self.settle(
            &outcome.checkout_request_id,
            settlement,
            json!({ "checkoutRequestId": outcome.checkout_request_id }),
        )
        .await
    }

    async fn b2c_result(&self) -> Result<Outcome> {
        let outcome = parse_result(self.payload)?;
        let conversation_id = outcome.conversation_id.clone().ok_or_else(|| {
            AppError::UnrecognizedCallbackShape("Result callback without ConversationID".to_string())
        })?;

        let offset = self.config.provider_offset()?;
        let transaction_date = outcome
            .parameter_str("TransactionCompletedDateTime")
            .and_then(|raw| parse_provider_time(&raw, B2C_DATE_FORMAT, &offset));
        let status = TransactionStatus::from_result_code(outcome.result_code);
        let receipt = match status {
            TransactionStatus::Completed => outcome.receipt_number(),
            _ => None,
        };
        let settlement = self.settlement(
            status,
            outcome.result_code,
            &outcome.result_desc,
            receipt,
            transaction_date,
            outcome.amount(),
        );

        self.settle(
            &conversation_id,
            settlement,
            json!({
                "conversationId": conversation_id,
                "originatorConversationId": outcome.originator_conversation_id,
                "receiverPartyPublicName": outcome.parameter_str("ReceiverPartyPublicName"),
            }),
        )
        .await
    }

    async fn reversal_result(&self) -> Result<Outcome> {
        let outcome = parse_result(self.payload)?;
        let receipt = outcome.reversed_receipt().ok_or_else(|| {
            AppError::UnrecognizedCallbackShape("Reversal result without a transaction id".to_string())
        })?;

        if outcome.result_code != 0 {
            self.audit(
                AuditLogEntry::transaction("Reversal Failed")
                    .details(format!("Reversal of {} failed: {}", receipt, outcome.result_desc))
                    .metadata(json!({ "receipt": receipt, "resultCode": outcome.result_code })),
            )
            .await;
            return Ok(Outcome::Skipped(format!("Reversal of {} rejected: {}", receipt, outcome.result_desc)));
        }

        let settlement = self.settlement(
            TransactionStatus::Reversed,
            outcome.result_code,
            &outcome.result_desc,
            None,
            None,
            None,
        );
        let Some(tx) = self.store.reverse_completed(&receipt, &settlement).await? else {
            let reason = format!("No completed transaction with receipt {}", receipt);
            info!("{}", reason);
            return Ok(Outcome::Skipped(reason));
        };

        warn!("↩️ {} reversed (receipt {})", tx.transaction_id, receipt);
        self.audit(
            AuditLogEntry::transaction("Payment Reversed")
                .details(format!("Reversal of KES {} to {}. Receipt: {}", tx.amount, tx.phone_number, receipt))
                .metadata(json!({
                    "transactionId": tx.transaction_id,
                    "receipt": receipt,
                    "conversationId": outcome.conversation_id,
                })),
        )
        .await;
        Ok(Outcome::Applied)
    }

    async fn status_result(&self) -> Result<Outcome> {
        let outcome = parse_result(self.payload)?;
        let queried = outcome
            .parameter_str("ReceiptNo")
            .or_else(|| outcome.transaction_id.clone())
            .unwrap_or_else(|| "unknown".to_string());

        self.audit(
            AuditLogEntry::transaction("Transaction Status Result")
                .details(format!("Status result for {}: {}", queried, outcome.result_desc))
                .metadata(json!({
                    "resultCode": outcome.result_code,
                    "conversationId": outcome.conversation_id,
                    "parameters": outcome.parameters,
                })),
        )
        .await;
        Ok(Outcome::Applied)
    }

    async fn queue_timeout(&self) -> Result<Outcome> {
        // Timeouts come in several shapes; keep whatever identifies the request.
        let conversation_id = self
            .payload
            .pointer("/Result/ConversationID")
            .or_else(|| self.payload.get("ConversationID"))
            .and_then(value_to_string);
        let originator = self
            .payload
            .pointer("/Result/OriginatorConversationID")
            .or_else(|| self.payload.get("OriginatorConversationID"))
            .and_then(value_to_string);

        warn!("⏱️ Queue timeout for {:?}", conversation_id);
        self.audit(
            AuditLogEntry::transaction("Request Timed Out")
                .details(format!(
                    "Provider queue timeout for {}",
                    conversation_id.as_deref().unwrap_or("unknown request")
                ))
                .metadata(json!({
                    "conversationId": conversation_id,
                    "originatorConversationId": originator,
                })),
        )
        .await;
        Ok(Outcome::Applied)
    }

    async fn process(&self, kind: CallbackKind) -> Result<Outcome> {
        match kind {
            CallbackKind::StkCallback => self.stk_callback().await,
            CallbackKind::B2cResult => self.b2c_result().await,
            CallbackKind::ReversalResult => self.reversal_result().await,
            CallbackKind::StatusResult => self.status_result().await,
            CallbackKind::QueueTimeout => self.queue_timeout().await,
            CallbackKind::Unknown => Err(AppError::UnrecognizedCallbackShape(
                "Payload is neither an STK callback nor a Result wrapper".to_string(),
            )),
        }
    }
}

async fn update_log(store: &dyn Store, log_id: Option<ObjectId>, update: CallbackLogUpdate) {
    let Some(id) = log_id else { return };
    if let Err(e) = store.update_callback_log(id, update).await {
        error!("Failed to update callback log {}: {}", id, e);
    }
}

/// Handles one inbound callback end to end. Never fails; the returned
/// acknowledgement is what the provider receives.
pub async fn ingest(
    store: &dyn Store,
    config: &AppConfig,
    route: CallbackRoute,
    payload: Value,
    ip: Option<String>,
) -> CallbackAck {
    let kind = classify(route, &payload);
    info!("📥 {} callback from {}", kind.as_str(), ip.as_deref().unwrap_or("unknown"));

    let entry = CallbackLogEntry::received(kind, payload.clone(), ip.clone(), None);
    let log_id = match store.insert_callback_log(entry).await {
        Ok(id) => Some(id),
        Err(e) => {
            error!("Failed to log {} callback: {}", kind.as_str(), e);
            None
        }
    };

    if config.validate_callback_ip {
        let allowed = ip.as_deref().is_some_and(|ip| config.is_allowed_callback_ip(ip));
        if !allowed {
            warn!("🚫 Callback from unlisted address {:?}", ip);
            update_log(store, log_id, CallbackLogUpdate::invalid()).await;
        }
    }

    let ingest = Ingest { store, config, payload: &payload, ip };
    match ingest.process(kind).await {
        Ok(Outcome::Applied) => {
            update_log(store, log_id, CallbackLogUpdate::processed()).await;
            CallbackAck::success()
        }
        Ok(Outcome::Skipped(reason)) | Ok(Outcome::Degraded(reason)) => {
            let update = CallbackLogUpdate {
                processed: Some(true),
                error_message: Some(reason),
                ..Default::default()
            };
            update_log(store, log_id, update).await;
            CallbackAck::success()
        }
        Err(AppError::UnrecognizedCallbackShape(reason)) => {
            warn!("Unrecognized {} callback: {}", kind.as_str(), reason);
            update_log(store, log_id, CallbackLogUpdate::error(reason)).await;
            CallbackAck::success()
        }
        Err(e) => {
            error!("❌ Failed to process {} callback: {}", kind.as_str(), e);
            update_log(store, log_id, CallbackLogUpdate::error(e.to_string())).await;
            CallbackAck::accepted()
        }
    }
}
