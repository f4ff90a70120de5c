use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::oid::ObjectId;
use tokio::sync::RwLock;

use super::{AuditStore, CallbackLogStore, CustomerStore, ReconciliationStore, SubscriptionStore, TransactionStore};
use crate::errors::{AppError, Result};
use crate::models::{
    audit::AuditLogEntry,
    callback_log::{CallbackLogEntry, CallbackLogUpdate},
    customer::Customer,
    reconciliation::ReconciliationRecord,
    subscription::{RatibaSubscription, SubscriptionStatus},
    transaction::{Settlement, Transaction, TransactionFilter, TransactionStatus},
};

#[derive(Default)]
struct Collections {
    transactions: Vec<Transaction>,
    customers: Vec<Customer>,
    reconciliations: Vec<ReconciliationRecord>,
    audit_logs: Vec<AuditLogEntry>,
    callback_logs: Vec<CallbackLogEntry>,
    subscriptions: Vec<RatibaSubscription>,
}

#[derive(Default)]
struct WriteCounters {
    transactions: AtomicUsize,
    customers: AtomicUsize,
    reconciliations: AtomicUsize,
    audit_logs: AtomicUsize,
    callback_logs: AtomicUsize,
    subscriptions: AtomicUsize,
}

/// A thread-safe in-memory store.
///
/// All collections sit behind one `RwLock`, so every conditional update is
/// atomic with respect to concurrent callers. Each collection counts the writes
/// that actually changed it, which lets tests assert that an operation had no
/// side effects.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    data: Arc<RwLock<Collections>>,
    writes: Arc<WriteCounters>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_writes(&self) -> usize {
        self.writes.transactions.load(Ordering::SeqCst)
    }

    pub fn customer_writes(&self) -> usize {
        self.writes.customers.load(Ordering::SeqCst)
    }

    pub fn reconciliation_writes(&self) -> usize {
        self.writes.reconciliations.load(Ordering::SeqCst)
    }

    pub fn audit_writes(&self) -> usize {
        self.writes.audit_logs.load(Ordering::SeqCst)
    }

    pub fn callback_log_writes(&self) -> usize {
        self.writes.callback_logs.load(Ordering::SeqCst)
    }

    pub fn subscription_writes(&self) -> usize {
        self.writes.subscriptions.load(Ordering::SeqCst)
    }

    pub fn total_writes(&self) -> usize {
        self.transaction_writes()
            + self.customer_writes()
            + self.reconciliation_writes()
            + self.audit_writes()
            + self.callback_log_writes()
            + self.subscription_writes()
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

fn newest_first<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K, limit: Option<i64>) -> Vec<T> {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
    if let Some(limit) = limit.filter(|l| *l > 0) {
        items.truncate(limit as usize);
    }
    items
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert_transaction(&self, mut tx: Transaction) -> Result<Transaction> {
        let mut data = self.data.write().await;
        if data.transactions.iter().any(|t| t.transaction_id == tx.transaction_id) {
            return Err(AppError::DuplicateKey);
        }
        if tx.status == TransactionStatus::Pending
            && data.transactions.iter().any(|t| {
                t.status == TransactionStatus::Pending && t.conversation_id.is_some() && t.conversation_id == tx.conversation_id
            })
        {
            return Err(AppError::DuplicateKey);
        }
        tx.id.get_or_insert_with(ObjectId::new);
        data.transactions.push(tx.clone());
        Self::bump(&self.writes.transactions);
        Ok(tx)
    }

    async fn find_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        let data = self.data.read().await;
        Ok(data.transactions.iter().find(|t| t.transaction_id == transaction_id).cloned())
    }

    async fn find_by_conversation_id(&self, conversation_id: &str) -> Result<Option<Transaction>> {
        let data = self.data.read().await;
        Ok(data
            .transactions
            .iter()
            .find(|t| t.conversation_id.as_deref() == Some(conversation_id))
            .cloned())
    }

    async fn settle_pending(&self, conversation_id: &str, settlement: &Settlement) -> Result<Option<Transaction>> {
        let mut data = self.data.write().await;
        let target = data.transactions.iter_mut().find(|t| {
            t.conversation_id.as_deref() == Some(conversation_id) && t.status == TransactionStatus::Pending
        });

        match target {
            Some(tx) => {
                tx.apply_settlement(settlement);
                Self::bump(&self.writes.transactions);
                Ok(Some(tx.clone()))
            }
            None => Ok(None),
        }
    }

    async fn reverse_completed(&self, receipt_number: &str, settlement: &Settlement) -> Result<Option<Transaction>> {
        let mut data = self.data.write().await;
        let target = data.transactions.iter_mut().find(|t| {
            t.mpesa_receipt_number.as_deref() == Some(receipt_number) && t.status == TransactionStatus::Completed
        });

        match target {
            Some(tx) => {
                debug_assert!(tx.status.can_transition_to(TransactionStatus::Reversed));
                tx.status = TransactionStatus::Reversed;
                tx.result_code = Some(settlement.result_code.clone());
                tx.result_desc = Some(settlement.result_desc.clone());
                tx.raw_callback_data = Some(settlement.raw_callback_data.clone());
                tx.updated_at = settlement.settled_at;
                Self::bump(&self.writes.transactions);
                Ok(Some(tx.clone()))
            }
            None => Ok(None),
        }
    }

    async fn link_customer(&self, transaction_id: &str, customer_id: ObjectId, customer_name: &str) -> Result<()> {
        let mut data = self.data.write().await;
        if let Some(tx) = data.transactions.iter_mut().find(|t| t.transaction_id == transaction_id) {
            tx.customer_id = Some(customer_id);
            tx.customer_name = Some(customer_name.to_string());
            Self::bump(&self.writes.transactions);
        }
        Ok(())
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let data = self.data.read().await;
        let matching: Vec<Transaction> = data.transactions.iter().filter(|t| filter.matches(t)).cloned().collect();
        Ok(newest_first(matching, |t| t.created_at, filter.limit))
    }
}

#[async_trait]
impl CustomerStore for InMemoryStore {
    async fn insert_customer(&self, mut customer: Customer) -> Result<Customer> {
        let mut data = self.data.write().await;
        if data.customers.iter().any(|c| c.phone_number == customer.phone_number) {
            return Err(AppError::DuplicateKey);
        }
        customer.id.get_or_insert_with(ObjectId::new);
        data.customers.push(customer.clone());
        Self::bump(&self.writes.customers);
        Ok(customer)
    }

    async fn find_customer_by_phone(&self, phone_number: &str) -> Result<Option<Customer>> {
        let data = self.data.read().await;
        Ok(data.customers.iter().find(|c| c.phone_number == phone_number).cloned())
    }

    async fn list_customers(&self) -> Result<Vec<Customer>> {
        let data = self.data.read().await;
        Ok(newest_first(data.customers.clone(), |c| c.created_at, None))
    }

    async fn record_settlement(
        &self,
        phone_number: &str,
        amount: f64,
        at: DateTime<Utc>,
        create_if_missing: bool,
    ) -> Result<Option<Customer>> {
        let mut data = self.data.write().await;

        if let Some(customer) = data.customers.iter_mut().find(|c| c.phone_number == phone_number) {
            customer.record_completed(amount, at);
            Self::bump(&self.writes.customers);
            return Ok(Some(customer.clone()));
        }

        if !create_if_missing {
            return Ok(None);
        }

        let mut customer = Customer::from_settlement(phone_number, at);
        customer.id = Some(ObjectId::new());
        customer.record_completed(amount, at);
        data.customers.push(customer.clone());
        Self::bump(&self.writes.customers);
        Ok(Some(customer))
    }
}

#[async_trait]
impl ReconciliationStore for InMemoryStore {
    async fn upsert_reconciliation(&self, mut record: ReconciliationRecord) -> Result<ReconciliationRecord> {
        let mut data = self.data.write().await;
        let existing = data
            .reconciliations
            .iter_mut()
            .find(|r| r.reconciliation_date == record.reconciliation_date);

        let stored = match existing {
            Some(current) => {
                record.id = current.id;
                record.created_at = current.created_at;
                *current = record.clone();
                record
            }
            None => {
                record.id.get_or_insert_with(ObjectId::new);
                data.reconciliations.push(record.clone());
                record
            }
        };
        Self::bump(&self.writes.reconciliations);
        Ok(stored)
    }

    async fn list_reconciliations(&self) -> Result<Vec<ReconciliationRecord>> {
        let data = self.data.read().await;
        Ok(newest_first(data.reconciliations.clone(), |r| r.reconciliation_date, None))
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append_audit(&self, mut entry: AuditLogEntry) -> Result<()> {
        let mut data = self.data.write().await;
        entry.id.get_or_insert_with(ObjectId::new);
        data.audit_logs.push(entry);
        Self::bump(&self.writes.audit_logs);
        Ok(())
    }

    async fn list_audit(&self, limit: i64) -> Result<Vec<AuditLogEntry>> {
        let data = self.data.read().await;
        Ok(newest_first(data.audit_logs.clone(), |a| a.timestamp, Some(limit)))
    }
}

#[async_trait]
impl CallbackLogStore for InMemoryStore {
    async fn insert_callback_log(&self, mut entry: CallbackLogEntry) -> Result<ObjectId> {
        let mut data = self.data.write().await;
        let id = *entry.id.get_or_insert_with(ObjectId::new);
        data.callback_logs.push(entry);
        Self::bump(&self.writes.callback_logs);
        Ok(id)
    }

    async fn update_callback_log(&self, id: ObjectId, update: CallbackLogUpdate) -> Result<()> {
        let mut data = self.data.write().await;
        let entry = data
            .callback_logs
            .iter_mut()
            .find(|c| c.id == Some(id))
            .ok_or(AppError::DocumentNotFound)?;
        update.apply(entry);
        Self::bump(&self.writes.callback_logs);
        Ok(())
    }

    async fn list_callback_logs(&self, limit: i64) -> Result<Vec<CallbackLogEntry>> {
        let data = self.data.read().await;
        Ok(newest_first(data.callback_logs.clone(), |c| c.received_at, Some(limit)))
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn insert_subscription(&self, mut subscription: RatibaSubscription) -> Result<RatibaSubscription> {
        let mut data = self.data.write().await;
        subscription.id.get_or_insert_with(ObjectId::new);
        data.subscriptions.push(subscription.clone());
        Self::bump(&self.writes.subscriptions);
        Ok(subscription)
    }

    async fn list_subscriptions(&self) -> Result<Vec<RatibaSubscription>> {
        let data = self.data.read().await;
        Ok(newest_first(data.subscriptions.clone(), |s| s.created_at, None))
    }

    async fn find_due_subscriptions(&self, on: NaiveDate) -> Result<Vec<RatibaSubscription>> {
        let data = self.data.read().await;
        let mut due: Vec<RatibaSubscription> = data.subscriptions.iter().filter(|s| s.is_due(on)).cloned().collect();
        due.sort_by_key(|s| s.next_payment_date);
        Ok(due)
    }

    async fn set_subscription_status(
        &self,
        id: ObjectId,
        status: SubscriptionStatus,
    ) -> Result<Option<RatibaSubscription>> {
        let mut data = self.data.write().await;
        match data.subscriptions.iter_mut().find(|s| s.id == Some(id)) {
            Some(sub) => {
                sub.status = status;
                sub.updated_at = Utc::now();
                Self::bump(&self.writes.subscriptions);
                Ok(Some(sub.clone()))
            }
            None => Ok(None),
        }
    }

    async fn move_next_payment(&self, id: ObjectId, from: NaiveDate, to: NaiveDate) -> Result<bool> {
        let mut data = self.data.write().await;
        match data
            .subscriptions
            .iter_mut()
            .find(|s| s.id == Some(id) && s.next_payment_date == from)
        {
            Some(sub) => {
                sub.next_payment_date = to;
                sub.updated_at = Utc::now();
                Self::bump(&self.writes.subscriptions);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::{NewTransaction, TransactionType};

    fn pending(conversation_id: &str, transaction_id: &str) -> Transaction {
        Transaction::pending(
            NewTransaction {
                transaction_id: transaction_id.to_string(),
                transaction_type: TransactionType::Collection,
                amount: 500.0,
                phone_number: "254712345678".to_string(),
                account_reference: "INV-1".to_string(),
                description: Some("Invoice".to_string()),
                conversation_id: conversation_id.to_string(),
                originator_conversation_id: None,
                customer_id: None,
                customer_name: None,
            },
            Utc::now(),
        )
    }

    fn completed(receipt: &str) -> Settlement {
        Settlement {
            status: TransactionStatus::Completed,
            result_code: "0".to_string(),
            result_desc: "The service request is processed successfully.".to_string(),
            receipt_number: Some(receipt.to_string()),
            transaction_date: None,
            settled_amount: None,
            raw_callback_data: serde_json::json!({}),
            settled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn settle_pending_only_succeeds_once() {
        let store = InMemoryStore::new();
        store.insert_transaction(pending("CR1", "STK1")).await.unwrap();

        let first = store.settle_pending("CR1", &completed("R1")).await.unwrap();
        assert_eq!(first.unwrap().status, TransactionStatus::Completed);

        let replay = store.settle_pending("CR1", &completed("R1")).await.unwrap();
        assert!(replay.is_none());
        assert_eq!(store.transaction_writes(), 2);
    }

    #[tokio::test]
    async fn a_second_pending_row_cannot_share_a_conversation_id() {
        let store = InMemoryStore::new();
        store.insert_transaction(pending("CR1", "STK1")).await.unwrap();
        let err = store.insert_transaction(pending("CR1", "STK2")).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateKey));
    }

    #[tokio::test]
    async fn reversal_requires_a_completed_transaction() {
        let store = InMemoryStore::new();
        store.insert_transaction(pending("CR1", "STK1")).await.unwrap();

        let mut reversal = completed("R1");
        reversal.status = TransactionStatus::Reversed;
        assert!(store.reverse_completed("R1", &reversal).await.unwrap().is_none());

        store.settle_pending("CR1", &completed("R1")).await.unwrap();
        let reversed = store.reverse_completed("R1", &reversal).await.unwrap().unwrap();
        assert_eq!(reversed.status, TransactionStatus::Reversed);
    }

    #[tokio::test]
    async fn record_settlement_respects_create_flag() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        assert!(store.record_settlement("254700000001", 100.0, now, false).await.unwrap().is_none());
        assert_eq!(store.customer_writes(), 0);

        let created = store.record_settlement("254700000001", 100.0, now, true).await.unwrap().unwrap();
        assert_eq!(created.total_transactions, 1);

        let updated = store.record_settlement("254700000001", 50.0, now, false).await.unwrap().unwrap();
        assert_eq!(updated.total_transactions, 2);
        assert_eq!(updated.total_amount, 150.0);
    }

    #[tokio::test]
    async fn move_next_payment_is_compare_and_set() {
        let store = InMemoryStore::new();
        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let next = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let sub = store
            .insert_subscription(RatibaSubscription {
                id: None,
                customer_id: None,
                customer_name: "Jane".to_string(),
                phone_number: "254712345678".to_string(),
                amount: 250.0,
                frequency: crate::models::subscription::Frequency::Monthly,
                start_date: start,
                next_payment_date: start,
                status: SubscriptionStatus::Active,
                account_reference: "GYM".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        let id = sub.id.unwrap();

        assert!(store.move_next_payment(id, start, next).await.unwrap());
        assert!(!store.move_next_payment(id, start, next).await.unwrap());
    }
}
