use chrono::{NaiveDate, Utc};
use mongodb::bson::oid::ObjectId;
use serde_json::json;
use tracing::{error, info, warn};

use super::mpesa_service::MpesaService;
use super::payments::{initiate_collection, CollectionOrder};
use super::reconciliation::today;
use crate::config::{AppConfig, Environment};
use crate::dtos::admin_dtos::{FailedDebit, InitiatedDebit, SubscriptionRunReport, ValidSubscription};
use crate::errors::{AppError, Result};
use crate::models::{
    audit::{AuditCategory, AuditLogEntry},
    subscription::{RatibaSubscription, SubscriptionStatus},
    transaction::TransactionType,
};
use crate::store::Store;

async fn append_audit(store: &dyn Store, entry: AuditLogEntry) {
    let action = entry.action.clone();
    if let Err(e) = store.append_audit(entry).await {
        error!("Failed to write audit entry '{}': {}", action, e);
    }
}

pub async fn create_subscription(store: &dyn Store, req: ValidSubscription) -> Result<RatibaSubscription> {
    let now = Utc::now();
    let subscription = store
        .insert_subscription(RatibaSubscription {
            id: None,
            customer_id: req.customer_id,
            customer_name: req.customer_name,
            phone_number: req.phone_number,
            amount: req.amount,
            frequency: req.frequency,
            start_date: req.start_date,
            next_payment_date: req.start_date,
            status: SubscriptionStatus::Active,
            account_reference: req.account_reference,
            created_at: now,
            updated_at: now,
        })
        .await?;

    append_audit(
        store,
        AuditLogEntry::transaction("Ratiba Subscription Created")
            .details(format!(
                "{} debit of KES {} from {} starting {}",
                subscription.frequency.as_str(),
                subscription.amount,
                subscription.phone_number,
                subscription.start_date
            ))
            .metadata(json!({ "subscriptionId": subscription.id.map(|id| id.to_hex()) })),
    )
    .await;

    Ok(subscription)
}

pub async fn update_subscription_status(
    store: &dyn Store,
    id: ObjectId,
    status: SubscriptionStatus,
) -> Result<RatibaSubscription> {
    let subscription = store
        .set_subscription_status(id, status)
        .await?
        .ok_or(AppError::DocumentNotFound)?;

    append_audit(
        store,
        AuditLogEntry::new(AuditCategory::Configuration, "Ratiba Subscription Updated")
            .details(format!("Subscription {} set to {}", id.to_hex(), status.as_str()))
            .metadata(json!({ "subscriptionId": id.to_hex(), "status": status })),
    )
    .await;

    Ok(subscription)
}

async fn debit(
    store: &dyn Store,
    mpesa: &MpesaService,
    environment: Environment,
    subscription: &RatibaSubscription,
) -> Result<String> {
    let order = CollectionOrder {
        transaction_type: TransactionType::RecurringDebit,
        phone_number: subscription.phone_number.clone(),
        amount: subscription.amount,
        account_reference: subscription.account_reference.clone(),
        description: format!("Ratiba {} debit", subscription.frequency.as_str()),
        customer_id: subscription.customer_id,
        customer_name: Some(subscription.customer_name.clone()),
    };
    let response = initiate_collection(store, mpesa, environment, order).await?;
    Ok(response.transaction_id)
}

/// Issues one recurring debit for every active subscription due on `date`.
///
/// Each subscription is claimed by moving its next payment date forward before
/// the debit is sent, so overlapping runs cannot debit the same period twice.
/// A failed debit moves the date back so the next run retries it.
pub async fn run_due_subscriptions(
    store: &dyn Store,
    mpesa: &MpesaService,
    config: &AppConfig,
    date: Option<NaiveDate>,
    environment: Environment,
) -> Result<SubscriptionRunReport> {
    let date = match date {
        Some(date) => date,
        None => today(config)?,
    };

    let due = store.find_due_subscriptions(date).await?;
    let mut report = SubscriptionRunReport {
        date,
        due: due.len(),
        initiated: Vec::new(),
        failed: Vec::new(),
    };

    for subscription in due {
        let Some(id) = subscription.id else { continue };
        let subscription_id = id.to_hex();
        let current = subscription.next_payment_date;

        let Some(next) = subscription.frequency.advance(current) else {
            report.failed.push(FailedDebit {
                subscription_id,
                error: format!("Cannot schedule a payment after {}", current),
            });
            continue;
        };

        if !store.move_next_payment(id, current, next).await? {
            info!("Subscription {} already claimed by another run", subscription_id);
            continue;
        }

        match debit(store, mpesa, environment, &subscription).await {
            Ok(transaction_id) => {
                info!("🔁 Subscription {} debited as {}", subscription_id, transaction_id);
                report.initiated.push(InitiatedDebit { subscription_id, transaction_id });
            }
            Err(e) => {
                warn!("Subscription {} debit failed: {}", subscription_id, e);
                if let Err(rollback) = store.move_next_payment(id, next, current).await {
                    error!("Failed to restore next payment date for {}: {}", subscription_id, rollback);
                }
                report.failed.push(FailedDebit { subscription_id, error: e.to_string() });
            }
        }
    }

    Ok(report)
}
