use chrono::{DateTime, Utc};
use mongodb::bson::{self, oid::ObjectId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackKind {
    StkCallback,
    B2cResult,
    StatusResult,
    ReversalResult,
    QueueTimeout,
    Unknown,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::StkCallback => "STK_CALLBACK",
            CallbackKind::B2cResult => "B2C_RESULT",
            CallbackKind::StatusResult => "STATUS_RESULT",
            CallbackKind::ReversalResult => "REVERSAL_RESULT",
            CallbackKind::QueueTimeout => "QUEUE_TIMEOUT",
            CallbackKind::Unknown => "UNKNOWN",
        }
    }
}

/// Raw capture of an inbound callback, written before any parsing happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackLogEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub callback_type: CallbackKind,
    pub payload: serde_json::Value,
    pub ip_address: Option<String>,
    pub signature: Option<String>,
    pub is_valid: bool,
    pub processed: bool,
    pub error_message: Option<String>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub received_at: DateTime<Utc>,
}

impl CallbackLogEntry {
    pub fn received(
        callback_type: CallbackKind,
        payload: serde_json::Value,
        ip_address: Option<String>,
        signature: Option<String>,
    ) -> Self {
        CallbackLogEntry {
            id: None,
            callback_type,
            payload,
            ip_address,
            signature,
            is_valid: true,
            processed: false,
            error_message: None,
            received_at: Utc::now(),
        }
    }
}

/// Partial update of a log entry; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct CallbackLogUpdate {
    pub is_valid: Option<bool>,
    pub processed: Option<bool>,
    pub error_message: Option<String>,
}

impl CallbackLogUpdate {
    pub fn invalid() -> Self {
        CallbackLogUpdate { is_valid: Some(false), ..Default::default() }
    }

    pub fn processed() -> Self {
        CallbackLogUpdate { processed: Some(true), ..Default::default() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        CallbackLogUpdate { error_message: Some(message.into()), ..Default::default() }
    }

    pub fn apply(&self, entry: &mut CallbackLogEntry) {
        if let Some(is_valid) = self.is_valid {
            entry.is_valid = is_valid;
        }
        if let Some(processed) = self.processed {
            entry.processed = processed;
        }
        if let Some(message) = &self.error_message {
            entry.error_message = Some(message.clone());
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackLogResponse {
    pub id: Option<String>,
    pub callback_type: CallbackKind,
    pub payload: serde_json::Value,
    pub ip_address: Option<String>,
    pub signature: Option<String>,
    pub is_valid: bool,
    pub processed: bool,
    pub error_message: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl From<CallbackLogEntry> for CallbackLogResponse {
    fn from(entry: CallbackLogEntry) -> Self {
        CallbackLogResponse {
            id: entry.id.map(|id| id.to_hex()),
            callback_type: entry.callback_type,
            payload: entry.payload,
            ip_address: entry.ip_address,
            signature: entry.signature,
            is_valid: entry.is_valid,
            processed: entry.processed,
            error_message: entry.error_message,
            received_at: entry.received_at,
        }
    }
}
