use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::{self, oid::ObjectId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationStatus {
    Reconciled,
    Pending,
    Discrepancy,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Reconciled => "reconciled",
            ReconciliationStatus::Pending => "pending",
            ReconciliationStatus::Discrepancy => "discrepancy",
        }
    }

    pub fn derive(unmatched: i64, discrepancy_amount: f64) -> Self {
        if unmatched == 0 {
            ReconciliationStatus::Reconciled
        } else if discrepancy_amount > 0.0 {
            ReconciliationStatus::Discrepancy
        } else {
            ReconciliationStatus::Pending
        }
    }
}

/// One record per calendar day; `reconciliation_date` is the unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub reconciliation_date: NaiveDate,
    pub total_transactions: i64,
    pub total_amount: f64,
    pub matched_transactions: i64,
    pub unmatched_transactions: i64,
    pub discrepancy_amount: f64,
    pub status: ReconciliationStatus,
    pub notes: Option<String>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResponse {
    pub id: Option<String>,
    pub reconciliation_date: NaiveDate,
    pub total_transactions: i64,
    pub total_amount: f64,
    pub matched_transactions: i64,
    pub unmatched_transactions: i64,
    pub discrepancy_amount: f64,
    pub status: ReconciliationStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ReconciliationRecord> for ReconciliationResponse {
    fn from(record: ReconciliationRecord) -> Self {
        ReconciliationResponse {
            id: record.id.map(|id| id.to_hex()),
            reconciliation_date: record.reconciliation_date,
            total_transactions: record.total_transactions,
            total_amount: record.total_amount,
            matched_transactions: record.matched_transactions,
            unmatched_transactions: record.unmatched_transactions,
            discrepancy_amount: record.discrepancy_amount,
            status: record.status,
            notes: record.notes,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_derivation() {
        assert_eq!(ReconciliationStatus::derive(0, 0.0), ReconciliationStatus::Reconciled);
        assert_eq!(ReconciliationStatus::derive(3, 5000.0), ReconciliationStatus::Discrepancy);
        // only failures left: unmatched, but no money at risk
        assert_eq!(ReconciliationStatus::derive(1, 0.0), ReconciliationStatus::Pending);
    }
}
