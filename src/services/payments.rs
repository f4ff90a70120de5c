//! Collection, disbursement and status-query initiation.
//!
//! Input arrives already validated. A request the provider rejects leaves no
//! trace in the store; an accepted one leaves exactly one pending transaction
//! and one audit entry.

use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use super::mpesa_service::{B2CPayment, MpesaService, StkPush};
use crate::config::Environment;
use crate::dtos::payment_dtos::{
    CollectionResponse, DisbursementResponse, ValidCollection, ValidDisbursement, ValidStatusQuery,
};
use crate::errors::Result;
use crate::models::{
    audit::AuditLogEntry,
    transaction::{NewTransaction, Transaction, TransactionType},
};
use crate::store::Store;

/// `STK1760000000000AB12CD`: type prefix, epoch millis, random suffix.
pub fn generate_transaction_id(transaction_type: TransactionType) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(6).collect();
    format!(
        "{}{}{}",
        transaction_type.id_prefix(),
        Utc::now().timestamp_millis(),
        suffix.to_uppercase()
    )
}

/// A collection to push to the customer's handset. Subscriptions reuse this
/// with [`TransactionType::RecurringDebit`] and a known customer.
#[derive(Debug, Clone)]
pub struct CollectionOrder {
    pub transaction_type: TransactionType,
    pub phone_number: String,
    pub amount: f64,
    pub account_reference: String,
    pub description: String,
    pub customer_id: Option<ObjectId>,
    pub customer_name: Option<String>,
}

impl From<ValidCollection> for CollectionOrder {
    fn from(req: ValidCollection) -> Self {
        CollectionOrder {
            transaction_type: TransactionType::Collection,
            phone_number: req.phone_number,
            amount: req.amount,
            account_reference: req.account_reference,
            description: req.transaction_desc,
            customer_id: None,
            customer_name: None,
        }
    }
}

async fn persist_pending(store: &dyn Store, new: NewTransaction) -> Result<Transaction> {
    let transaction_id = new.transaction_id.clone();
    store
        .insert_transaction(Transaction::pending(new, Utc::now()))
        .await
        .map_err(|e| {
            // The provider already accepted; the callback will find nothing to settle.
            error!(
                "🚨 Provider accepted {} but the pending record could not be saved: {}",
                transaction_id, e
            );
            e
        })
}

async fn append_audit(store: &dyn Store, entry: AuditLogEntry) {
    let action = entry.action.clone();
    if let Err(e) = store.append_audit(entry).await {
        error!("Failed to write audit entry '{}': {}", action, e);
    }
}

pub async fn initiate_collection(
    store: &dyn Store,
    mpesa: &MpesaService,
    environment: Environment,
    order: CollectionOrder,
) -> Result<CollectionResponse> {
    let stk = mpesa
        .stk_push(
            environment,
            StkPush {
                phone_number: &order.phone_number,
                amount: order.amount,
                account_reference: &order.account_reference,
                transaction_desc: &order.description,
            },
        )
        .await?;

    let transaction_id = generate_transaction_id(order.transaction_type);
    persist_pending(
        store,
        NewTransaction {
            transaction_id: transaction_id.clone(),
            transaction_type: order.transaction_type,
            amount: order.amount,
            phone_number: order.phone_number.clone(),
            account_reference: order.account_reference.clone(),
            description: Some(order.description.clone()),
            conversation_id: stk.checkout_request_id.clone(),
            originator_conversation_id: Some(stk.merchant_request_id.clone()),
            customer_id: order.customer_id,
            customer_name: order.customer_name.clone(),
        },
    )
    .await?;

    let action = match order.transaction_type {
        TransactionType::RecurringDebit => "Recurring Debit Initiated",
        _ => "STK Push Initiated",
    };
    append_audit(
        store,
        AuditLogEntry::transaction(action)
            .details(format!("STK push of KES {} to {}", order.amount, order.phone_number))
            .metadata(json!({
                "transactionId": transaction_id,
                "checkoutRequestId": stk.checkout_request_id,
                "environment": environment,
            })),
    )
    .await;

    info!("📲 Collection {} pending on {}", transaction_id, stk.checkout_request_id);
    Ok(CollectionResponse {
        success: true,
        checkout_request_id: stk.checkout_request_id,
        merchant_request_id: stk.merchant_request_id,
        transaction_id,
        customer_message: stk.customer_message,
    })
}

pub async fn initiate_disbursement(
    store: &dyn Store,
    mpesa: &MpesaService,
    req: ValidDisbursement,
) -> Result<DisbursementResponse> {
    let b2c = mpesa
        .b2c_payment(
            req.environment,
            B2CPayment {
                phone_number: &req.phone_number,
                amount: req.amount,
                command_id: req.command_id,
                remarks: &req.remarks,
                occasion: &req.occasion,
            },
        )
        .await?;

    let transaction_id = generate_transaction_id(TransactionType::Disbursement);
    persist_pending(
        store,
        NewTransaction {
            transaction_id: transaction_id.clone(),
            transaction_type: TransactionType::Disbursement,
            amount: req.amount,
            phone_number: req.phone_number.clone(),
            account_reference: req.command_id.as_str().to_string(),
            description: Some(req.remarks.clone()),
            conversation_id: b2c.conversation_id.clone(),
            originator_conversation_id: b2c.originator_conversation_id.clone(),
            customer_id: None,
            customer_name: None,
        },
    )
    .await?;

    append_audit(
        store,
        AuditLogEntry::transaction("B2C Payment Initiated")
            .details(format!(
                "B2C {} of KES {} to {}",
                req.command_id.as_str(),
                req.amount,
                req.phone_number
            ))
            .metadata(json!({
                "transactionId": transaction_id,
                "conversationId": b2c.conversation_id,
                "environment": req.environment,
            })),
    )
    .await;

    info!("💸 Disbursement {} pending on {}", transaction_id, b2c.conversation_id);
    Ok(DisbursementResponse {
        success: true,
        conversation_id: b2c.conversation_id,
        originator_conversation_id: b2c.originator_conversation_id,
        transaction_id,
    })
}

/// Asks the provider about a transaction. The answer arrives later on
/// `/callback/status`; nothing is stored beyond the audit entry.
pub async fn query_status(store: &dyn Store, mpesa: &MpesaService, req: ValidStatusQuery) -> Result<Value> {
    let data = mpesa
        .transaction_status(req.environment, &req.transaction_id)
        .await?;

    append_audit(
        store,
        AuditLogEntry::transaction("Transaction Status Query")
            .details(format!("Queried status for transaction {}", req.transaction_id))
            .metadata(json!({
                "transactionId": req.transaction_id,
                "conversationId": data.get("ConversationID"),
                "environment": req.environment,
            })),
    )
    .await;

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_carry_type_prefix() {
        let id = generate_transaction_id(TransactionType::Collection);
        assert!(id.starts_with("STK"));
        assert_eq!(id.len(), 3 + 13 + 6);
        assert!(generate_transaction_id(TransactionType::RecurringDebit).starts_with("RAT"));
        assert_ne!(id, generate_transaction_id(TransactionType::Collection));
    }
}
