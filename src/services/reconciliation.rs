use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::models::{
    audit::{AuditCategory, AuditLogEntry},
    reconciliation::{ReconciliationRecord, ReconciliationStatus},
    transaction::{Transaction, TransactionFilter, TransactionStatus},
};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationSummary {
    pub date: NaiveDate,
    pub total_transactions: i64,
    pub total_amount: f64,
    pub matched_transactions: i64,
    pub unmatched_transactions: i64,
    pub discrepancy_amount: f64,
    pub completed: i64,
    pub pending: i64,
    pub failed: i64,
    pub reversed: i64,
    pub status: ReconciliationStatus,
}

impl ReconciliationSummary {
    pub fn notes(&self) -> String {
        let mut notes = format!(
            "Auto-reconciliation: {} completed, {} pending, {} failed",
            self.completed, self.pending, self.failed
        );
        if self.reversed > 0 {
            notes.push_str(&format!(", {} reversed", self.reversed));
        }
        notes
    }

    pub fn to_record(&self, now: DateTime<Utc>) -> ReconciliationRecord {
        ReconciliationRecord {
            id: None,
            reconciliation_date: self.date,
            total_transactions: self.total_transactions,
            total_amount: self.total_amount,
            matched_transactions: self.matched_transactions,
            unmatched_transactions: self.unmatched_transactions,
            discrepancy_amount: self.discrepancy_amount,
            status: self.status,
            notes: Some(self.notes()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Classifies one day's transactions. Reversed ones count toward the totals
/// but are neither matched nor unmatched.
pub fn summarize(date: NaiveDate, transactions: &[Transaction]) -> ReconciliationSummary {
    let count = |status: TransactionStatus| transactions.iter().filter(|t| t.status == status).count() as i64;

    let completed = count(TransactionStatus::Completed);
    let pending = count(TransactionStatus::Pending);
    let failed = count(TransactionStatus::Failed);
    let reversed = count(TransactionStatus::Reversed);

    let total_amount = transactions.iter().map(|t| t.amount).sum();
    let discrepancy_amount = transactions
        .iter()
        .filter(|t| t.status == TransactionStatus::Pending)
        .map(|t| t.amount)
        .sum();
    let unmatched = pending + failed;

    ReconciliationSummary {
        date,
        total_transactions: transactions.len() as i64,
        total_amount,
        matched_transactions: completed,
        unmatched_transactions: unmatched,
        discrepancy_amount,
        completed,
        pending,
        failed,
        reversed,
        status: ReconciliationStatus::derive(unmatched, discrepancy_amount),
    }
}

/// First and last millisecond of `date` in the given timezone, as UTC instants.
pub fn day_bounds(date: NaiveDate, offset: &FixedOffset) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .ok_or_else(|| AppError::invalid_field("date", format!("{} has no start of day", date)))?
        .with_timezone(&Utc);

    let end = midnight + Duration::days(1) - Duration::milliseconds(1);
    Ok((midnight, end))
}

pub fn today(config: &AppConfig) -> Result<NaiveDate> {
    Ok(Utc::now().with_timezone(&config.local_offset()?).date_naive())
}

/// Reconciles `date` (default: today locally) and upserts the day's record.
pub async fn run_reconciliation(
    store: &dyn Store,
    config: &AppConfig,
    date: Option<NaiveDate>,
) -> Result<(ReconciliationRecord, ReconciliationSummary)> {
    let date = match date {
        Some(date) => date,
        None => today(config)?,
    };
    let (from, to) = day_bounds(date, &config.local_offset()?)?;

    let transactions = store
        .list_transactions(&TransactionFilter::created_between(from, to))
        .await?;
    let summary = summarize(date, &transactions);

    let record = store.upsert_reconciliation(summary.to_record(Utc::now())).await?;

    info!(
        "📊 Reconciled {}: {} transactions, {}",
        date,
        summary.total_transactions,
        summary.status.as_str()
    );

    let audit = AuditLogEntry::new(AuditCategory::Reconciliation, "Reconciliation Completed")
        .details(format!(
            "Daily reconciliation for {}: {} transactions, {}",
            date,
            summary.total_transactions,
            summary.status.as_str()
        ))
        .metadata(json!({
            "date": date,
            "totalTransactions": summary.total_transactions,
            "matchedTransactions": summary.matched_transactions,
            "unmatchedTransactions": summary.unmatched_transactions,
            "discrepancyAmount": summary.discrepancy_amount,
        }));
    if let Err(e) = store.append_audit(audit).await {
        error!("Failed to audit reconciliation for {}: {}", date, e);
    }

    Ok((record, summary))
}
