use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::TryStreamExt;
use mongodb::{
    bson::{self, doc, oid::ObjectId, Bson, Document},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::ReturnDocument,
    Collection, Database,
};
use tracing::warn;

use super::{AuditStore, CallbackLogStore, CustomerStore, ReconciliationStore, SubscriptionStore, TransactionStore};
use crate::errors::{AppError, Result};
use crate::models::{
    audit::AuditLogEntry,
    callback_log::{CallbackLogEntry, CallbackLogUpdate},
    customer::{Customer, CustomerStatus},
    reconciliation::ReconciliationRecord,
    subscription::{RatibaSubscription, SubscriptionStatus},
    transaction::{Settlement, Transaction, TransactionFilter, TransactionStatus},
};

pub const TRANSACTIONS: &str = "transactions";
pub const CUSTOMERS: &str = "customers";
pub const RECONCILIATIONS: &str = "reconciliations";
pub const AUDIT_LOGS: &str = "audit_logs";
pub const CALLBACK_LOGS: &str = "callback_logs";
pub const SUBSCRIPTIONS: &str = "ratiba_subscriptions";

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        MongoStore { db }
    }

    fn transactions(&self) -> Collection<Transaction> {
        self.db.collection(TRANSACTIONS)
    }

    fn customers(&self) -> Collection<Customer> {
        self.db.collection(CUSTOMERS)
    }

    fn reconciliations(&self) -> Collection<ReconciliationRecord> {
        self.db.collection(RECONCILIATIONS)
    }

    fn audit_logs(&self) -> Collection<AuditLogEntry> {
        self.db.collection(AUDIT_LOGS)
    }

    fn callback_logs(&self) -> Collection<CallbackLogEntry> {
        self.db.collection(CALLBACK_LOGS)
    }

    fn subscriptions(&self) -> Collection<RatibaSubscription> {
        self.db.collection(SUBSCRIPTIONS)
    }

    async fn customer_increment(
        &self,
        phone_number: &str,
        amount: f64,
        at: DateTime<Utc>,
        upsert: bool,
    ) -> std::result::Result<Option<Customer>, MongoError> {
        let at = bson::DateTime::from_chrono(at);
        let mut update = doc! {
            "$inc": { "total_transactions": 1_i64, "total_amount": amount },
            "$set": { "last_transaction_date": at, "updated_at": at },
        };
        if upsert {
            update.insert(
                "$setOnInsert",
                doc! {
                    "name": phone_number,
                    "email": Bson::Null,
                    "account_number": phone_number,
                    "status": CustomerStatus::Active.as_str(),
                    "created_at": at,
                },
            );
        }

        self.customers()
            .find_one_and_update(doc! { "phone_number": phone_number }, update)
            .upsert(upsert)
            .return_document(ReturnDocument::After)
            .await
    }
}

pub(crate) fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == DUPLICATE_KEY_CODE,
        ErrorKind::Command(command_error) => command_error.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

fn map_insert_error(err: MongoError) -> AppError {
    if is_duplicate_key(&err) {
        AppError::DuplicateKey
    } else {
        AppError::from(err)
    }
}

fn settlement_set(settlement: &Settlement) -> Result<Document> {
    let mut set = doc! {
        "status": settlement.status.as_str(),
        "result_code": &settlement.result_code,
        "result_desc": &settlement.result_desc,
        "raw_callback_data": bson::to_bson(&settlement.raw_callback_data)?,
        "updated_at": bson::DateTime::from_chrono(settlement.settled_at),
    };
    if let Some(receipt) = &settlement.receipt_number {
        set.insert("mpesa_receipt_number", receipt);
    }
    if let Some(date) = settlement.transaction_date {
        set.insert("transaction_date", bson::DateTime::from_chrono(date));
    }
    Ok(set)
}

fn transaction_query(filter: &TransactionFilter) -> Document {
    let mut query = doc! {};

    if let Some(transaction_type) = filter.transaction_type {
        query.insert("type", transaction_type.as_str());
    }

    if let Some(status) = filter.status {
        query.insert("status", status.as_str());
    }

    let mut created = doc! {};
    if let Some(from) = filter.created_from {
        created.insert("$gte", bson::DateTime::from_chrono(from));
    }
    if let Some(to) = filter.created_to {
        created.insert("$lte", bson::DateTime::from_chrono(to));
    }
    if !created.is_empty() {
        query.insert("created_at", created);
    }

    query
}

#[async_trait]
impl TransactionStore for MongoStore {
    async fn insert_transaction(&self, mut tx: Transaction) -> Result<Transaction> {
        tx.id.get_or_insert_with(ObjectId::new);
        self.transactions().insert_one(&tx).await.map_err(map_insert_error)?;
        Ok(tx)
    }

    async fn find_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        Ok(self.transactions().find_one(doc! { "transaction_id": transaction_id }).await?)
    }

    async fn find_by_conversation_id(&self, conversation_id: &str) -> Result<Option<Transaction>> {
        Ok(self
            .transactions()
            .find_one(doc! { "conversation_id": conversation_id })
            .sort(doc! { "created_at": -1 })
            .await?)
    }

    async fn settle_pending(&self, conversation_id: &str, settlement: &Settlement) -> Result<Option<Transaction>> {
        let filter = doc! {
            "conversation_id": conversation_id,
            "status": TransactionStatus::Pending.as_str(),
        };
        let update = doc! { "$set": settlement_set(settlement)? };

        Ok(self
            .transactions()
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn reverse_completed(&self, receipt_number: &str, settlement: &Settlement) -> Result<Option<Transaction>> {
        let filter = doc! {
            "mpesa_receipt_number": receipt_number,
            "status": TransactionStatus::Completed.as_str(),
        };
        let update = doc! {
            "$set": {
                "status": TransactionStatus::Reversed.as_str(),
                "result_code": &settlement.result_code,
                "result_desc": &settlement.result_desc,
                "raw_callback_data": bson::to_bson(&settlement.raw_callback_data)?,
                "updated_at": bson::DateTime::from_chrono(settlement.settled_at),
            }
        };

        Ok(self
            .transactions()
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn link_customer(&self, transaction_id: &str, customer_id: ObjectId, customer_name: &str) -> Result<()> {
        self.transactions()
            .update_one(
                doc! { "transaction_id": transaction_id },
                doc! { "$set": { "customer_id": customer_id, "customer_name": customer_name } },
            )
            .await?;
        Ok(())
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let transactions = self.transactions();
        let mut find = transactions
            .find(transaction_query(filter))
            .sort(doc! { "created_at": -1 });
        if let Some(limit) = filter.limit.filter(|l| *l > 0) {
            find = find.limit(limit);
        }
        let cursor = find.await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait]
impl CustomerStore for MongoStore {
    async fn insert_customer(&self, mut customer: Customer) -> Result<Customer> {
        customer.id.get_or_insert_with(ObjectId::new);
        self.customers().insert_one(&customer).await.map_err(map_insert_error)?;
        Ok(customer)
    }

    async fn find_customer_by_phone(&self, phone_number: &str) -> Result<Option<Customer>> {
        Ok(self.customers().find_one(doc! { "phone_number": phone_number }).await?)
    }

    async fn list_customers(&self) -> Result<Vec<Customer>> {
        let cursor = self.customers().find(doc! {}).sort(doc! { "created_at": -1 }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn record_settlement(
        &self,
        phone_number: &str,
        amount: f64,
        at: DateTime<Utc>,
        create_if_missing: bool,
    ) -> Result<Option<Customer>> {
        match self.customer_increment(phone_number, amount, at, create_if_missing).await {
            Ok(customer) => Ok(customer),
            // Two settlements raced to create the same profile; the loser now finds it.
            Err(err) if create_if_missing && is_duplicate_key(&err) => {
                warn!("Customer upsert raced for {}, retrying as update", phone_number);
                Ok(self.customer_increment(phone_number, amount, at, false).await?)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl ReconciliationStore for MongoStore {
    async fn upsert_reconciliation(&self, record: ReconciliationRecord) -> Result<ReconciliationRecord> {
        let filter = doc! { "reconciliation_date": record.reconciliation_date.to_string() };
        let update = doc! {
            "$set": {
                "total_transactions": record.total_transactions,
                "total_amount": record.total_amount,
                "matched_transactions": record.matched_transactions,
                "unmatched_transactions": record.unmatched_transactions,
                "discrepancy_amount": record.discrepancy_amount,
                "status": record.status.as_str(),
                "notes": record.notes.clone(),
                "updated_at": bson::DateTime::from_chrono(record.updated_at),
            },
            "$setOnInsert": {
                "created_at": bson::DateTime::from_chrono(record.created_at),
            },
        };

        self.reconciliations()
            .find_one_and_update(filter, update)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| AppError::persistence("Reconciliation upsert returned no document"))
    }

    async fn list_reconciliations(&self) -> Result<Vec<ReconciliationRecord>> {
        let cursor = self
            .reconciliations()
            .find(doc! {})
            .sort(doc! { "reconciliation_date": -1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait]
impl AuditStore for MongoStore {
    async fn append_audit(&self, entry: AuditLogEntry) -> Result<()> {
        self.audit_logs().insert_one(&entry).await?;
        Ok(())
    }

    async fn list_audit(&self, limit: i64) -> Result<Vec<AuditLogEntry>> {
        let cursor = self
            .audit_logs()
            .find(doc! {})
            .sort(doc! { "timestamp": -1 })
            .limit(limit)
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait]
impl CallbackLogStore for MongoStore {
    async fn insert_callback_log(&self, mut entry: CallbackLogEntry) -> Result<ObjectId> {
        let id = *entry.id.get_or_insert_with(ObjectId::new);
        self.callback_logs().insert_one(&entry).await?;
        Ok(id)
    }

    async fn update_callback_log(&self, id: ObjectId, update: CallbackLogUpdate) -> Result<()> {
        let mut set = doc! {};
        if let Some(is_valid) = update.is_valid {
            set.insert("is_valid", is_valid);
        }
        if let Some(processed) = update.processed {
            set.insert("processed", processed);
        }
        if let Some(message) = update.error_message {
            set.insert("error_message", message);
        }
        if set.is_empty() {
            return Ok(());
        }

        let result = self.callback_logs().update_one(doc! { "_id": id }, doc! { "$set": set }).await?;
        if result.matched_count == 0 {
            return Err(AppError::DocumentNotFound);
        }
        Ok(())
    }

    async fn list_callback_logs(&self, limit: i64) -> Result<Vec<CallbackLogEntry>> {
        let cursor = self
            .callback_logs()
            .find(doc! {})
            .sort(doc! { "received_at": -1 })
            .limit(limit)
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait]
impl SubscriptionStore for MongoStore {
    async fn insert_subscription(&self, mut subscription: RatibaSubscription) -> Result<RatibaSubscription> {
        subscription.id.get_or_insert_with(ObjectId::new);
        self.subscriptions().insert_one(&subscription).await?;
        Ok(subscription)
    }

    async fn list_subscriptions(&self) -> Result<Vec<RatibaSubscription>> {
        let cursor = self.subscriptions().find(doc! {}).sort(doc! { "created_at": -1 }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_due_subscriptions(&self, on: NaiveDate) -> Result<Vec<RatibaSubscription>> {
        // Dates are stored as ISO strings, which order the same as the dates.
        let filter = doc! {
            "status": SubscriptionStatus::Active.as_str(),
            "next_payment_date": { "$lte": on.to_string() },
        };
        let cursor = self
            .subscriptions()
            .find(filter)
            .sort(doc! { "next_payment_date": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn set_subscription_status(
        &self,
        id: ObjectId,
        status: SubscriptionStatus,
    ) -> Result<Option<RatibaSubscription>> {
        let update = doc! {
            "$set": {
                "status": status.as_str(),
                "updated_at": bson::DateTime::from_chrono(Utc::now()),
            }
        };
        Ok(self
            .subscriptions()
            .find_one_and_update(doc! { "_id": id }, update)
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn move_next_payment(&self, id: ObjectId, from: NaiveDate, to: NaiveDate) -> Result<bool> {
        let result = self
            .subscriptions()
            .update_one(
                doc! { "_id": id, "next_payment_date": from.to_string() },
                doc! {
                    "$set": {
                        "next_payment_date": to.to_string(),
                        "updated_at": bson::DateTime::from_chrono(Utc::now()),
                    }
                },
            )
            .await?;
        Ok(result.modified_count == 1)
    }
}
