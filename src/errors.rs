// src/errors.rs
use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Field name -> human readable messages, as returned to the caller on a 400.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {}", summarize_fields(.0))]
    ValidationError(FieldErrors),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("M-Pesa auth failed: {} - {body}", status_label(.status))]
    UpstreamAuth { status: Option<u16>, body: String },

    #[error("{0}")]
    UpstreamPayment(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Unrecognized callback shape: {0}")]
    UnrecognizedCallbackShape(String),

    #[error("Duplicate key error")]
    DuplicateKey,

    #[error("Document not found")]
    DocumentNotFound,

    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "no response".to_string(),
    }
}

fn summarize_fields(fields: &FieldErrors) -> String {
    fields.keys().cloned().collect::<Vec<_>>().join(", ")
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "Validation failed"),
            AppError::ConfigurationError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error"),
            AppError::UpstreamAuth { .. } => (StatusCode::BAD_GATEWAY, "M-Pesa authentication failed"),
            AppError::UpstreamPayment(_) => (StatusCode::BAD_GATEWAY, "M-Pesa request failed"),
            AppError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error"),
            AppError::UnrecognizedCallbackShape(_) => (StatusCode::BAD_REQUEST, "Unrecognized callback"),
            AppError::DuplicateKey => (StatusCode::CONFLICT, "Duplicate entry"),
            AppError::DocumentNotFound => (StatusCode::NOT_FOUND, "Document not found"),
            AppError::InvalidObjectId(_) => (StatusCode::BAD_REQUEST, "Invalid ID format"),
        };

        let mut body = json!({
            "success": false,
            "error": self.to_string(),
            "message": error_message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let AppError::ValidationError(fields) = &self {
            body["fields"] = json!(fields);
        }

        (status, Json(body)).into_response()
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::Persistence(err.to_string())
    }
}

impl From<mongodb::bson::oid::Error> for AppError {
    fn from(err: mongodb::bson::oid::Error) -> Self {
        AppError::InvalidObjectId(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for AppError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        AppError::Persistence(format!("BSON conversion failed: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamPayment(format!("HTTP request failed: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::ValidationError(field_errors(&errors))
    }
}

/// Flattens validator output into the field map returned to callers, keyed by
/// the camelCase names the request bodies use.
pub fn field_errors(errors: &validator::ValidationErrors) -> FieldErrors {
    let mut fields = FieldErrors::new();
    for (field, errs) in errors.field_errors() {
        let messages = fields.entry(camel_case(&field)).or_default();
        for err in errs.iter() {
            let message = err
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("{} is invalid", field));
            messages.push(message);
        }
    }
    fields
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

// Helper conversion functions
impl AppError {
    pub fn invalid_field(field: &str, msg: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![msg.into()]);
        AppError::ValidationError(fields)
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::ConfigurationError(msg.into())
    }

    pub fn upstream_payment(msg: impl Into<String>) -> Self {
        AppError::UpstreamPayment(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        AppError::Persistence(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_auth_message_includes_status_and_body() {
        let err = AppError::UpstreamAuth {
            status: Some(401),
            body: "invalid credentials".to_string(),
        };
        assert_eq!(err.to_string(), "M-Pesa auth failed: 401 - invalid credentials");

        let err = AppError::UpstreamAuth { status: None, body: "timed out".to_string() };
        assert_eq!(err.to_string(), "M-Pesa auth failed: no response - timed out");
    }

    #[test]
    fn field_keys_follow_request_casing() {
        assert_eq!(camel_case("phone_number"), "phoneNumber");
        assert_eq!(camel_case("amount"), "amount");
    }

    #[test]
    fn validation_error_lists_fields() {
        let err = AppError::invalid_field("amount", "too small");
        assert_eq!(err.to_string(), "Validation failed: amount");
    }
}
