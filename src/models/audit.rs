use chrono::{DateTime, Utc};
use mongodb::bson::{self, oid::ObjectId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    Transaction,
    Security,
    Configuration,
    Reconciliation,
}

/// Append-only; the service never updates or deletes these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub action: String,
    pub category: AuditCategory,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub ip_address: Option<String>,
    pub details: Option<String>,
    pub metadata: Option<serde_json::Value>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(category: AuditCategory, action: impl Into<String>) -> Self {
        AuditLogEntry {
            id: None,
            action: action.into(),
            category,
            user_id: None,
            user_name: None,
            ip_address: None,
            details: None,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn transaction(action: impl Into<String>) -> Self {
        Self::new(AuditCategory::Transaction, action)
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn ip_address(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogResponse {
    pub id: Option<String>,
    pub action: String,
    pub category: AuditCategory,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub ip_address: Option<String>,
    pub details: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl From<AuditLogEntry> for AuditLogResponse {
    fn from(entry: AuditLogEntry) -> Self {
        AuditLogResponse {
            id: entry.id.map(|id| id.to_hex()),
            action: entry.action,
            category: entry.category,
            user_id: entry.user_id,
            user_name: entry.user_name,
            ip_address: entry.ip_address,
            details: entry.details,
            metadata: entry.metadata,
            timestamp: entry.timestamp,
        }
    }
}
