//! Persistence ports. Handlers and services only ever see these traits; MongoDB
//! backs them in production and [`InMemoryStore`] backs them in tests.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::oid::ObjectId;

use crate::errors::Result;
use crate::models::{
    audit::AuditLogEntry,
    callback_log::{CallbackLogEntry, CallbackLogUpdate},
    customer::Customer,
    reconciliation::ReconciliationRecord,
    subscription::{RatibaSubscription, SubscriptionStatus},
    transaction::{Settlement, Transaction, TransactionFilter},
};

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert_transaction(&self, tx: Transaction) -> Result<Transaction>;

    async fn find_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>>;

    async fn find_by_conversation_id(&self, conversation_id: &str) -> Result<Option<Transaction>>;

    /// Moves the pending transaction holding `conversation_id` to the settlement
    /// status. Returns `None` when no transaction is pending under that id, which
    /// makes duplicate callback delivery a no-op.
    async fn settle_pending(&self, conversation_id: &str, settlement: &Settlement) -> Result<Option<Transaction>>;

    /// `completed -> reversed` for the transaction carrying `receipt_number`.
    async fn reverse_completed(&self, receipt_number: &str, settlement: &Settlement) -> Result<Option<Transaction>>;

    async fn link_customer(&self, transaction_id: &str, customer_id: ObjectId, customer_name: &str) -> Result<()>;

    /// Newest first.
    async fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Fails with `DuplicateKey` when the phone number is already registered.
    async fn insert_customer(&self, customer: Customer) -> Result<Customer>;

    async fn find_customer_by_phone(&self, phone_number: &str) -> Result<Option<Customer>>;

    async fn list_customers(&self) -> Result<Vec<Customer>>;

    /// Atomically adds one completed settlement to the phone's running totals.
    /// With `create_if_missing` an unknown phone gets a fresh profile; without it
    /// the call returns `None` and writes nothing.
    async fn record_settlement(
        &self,
        phone_number: &str,
        amount: f64,
        at: DateTime<Utc>,
        create_if_missing: bool,
    ) -> Result<Option<Customer>>;
}

#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Replaces any record for the same date, keeping its id and `created_at`.
    async fn upsert_reconciliation(&self, record: ReconciliationRecord) -> Result<ReconciliationRecord>;

    /// Newest date first.
    async fn list_reconciliations(&self) -> Result<Vec<ReconciliationRecord>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: AuditLogEntry) -> Result<()>;

    /// Newest first.
    async fn list_audit(&self, limit: i64) -> Result<Vec<AuditLogEntry>>;
}

#[async_trait]
pub trait CallbackLogStore: Send + Sync {
    async fn insert_callback_log(&self, entry: CallbackLogEntry) -> Result<ObjectId>;

    async fn update_callback_log(&self, id: ObjectId, update: CallbackLogUpdate) -> Result<()>;

    /// Newest first.
    async fn list_callback_logs(&self, limit: i64) -> Result<Vec<CallbackLogEntry>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert_subscription(&self, subscription: RatibaSubscription) -> Result<RatibaSubscription>;

    async fn list_subscriptions(&self) -> Result<Vec<RatibaSubscription>>;

    /// Active subscriptions whose next payment date is on or before `on`.
    async fn find_due_subscriptions(&self, on: NaiveDate) -> Result<Vec<RatibaSubscription>>;

    async fn set_subscription_status(
        &self,
        id: ObjectId,
        status: SubscriptionStatus,
    ) -> Result<Option<RatibaSubscription>>;

    /// Compare-and-set on `next_payment_date`; `false` when another run moved it first.
    async fn move_next_payment(&self, id: ObjectId, from: NaiveDate, to: NaiveDate) -> Result<bool>;
}

/// Everything the service persists.
pub trait Store:
    TransactionStore + CustomerStore + ReconciliationStore + AuditStore + CallbackLogStore + SubscriptionStore
{
}

impl<T> Store for T where
    T: TransactionStore + CustomerStore + ReconciliationStore + AuditStore + CallbackLogStore + SubscriptionStore
{
}
