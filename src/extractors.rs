//! Request body helpers. Every body problem comes back as a field-keyed
//! `ValidationError` instead of axum's plain-text rejection.

use std::error::Error as _;

use axum::{body::Bytes, extract::rejection::JsonRejection, Json};
use serde::de::DeserializeOwned;

use crate::errors::{AppError, FieldErrors, Result};

type PathError = serde_path_to_error::Error<serde_json::Error>;

const BODY_FIELD: &str = "body";

fn field_name(path: &serde_path_to_error::Path) -> String {
    let path = path.to_string();
    if path.is_empty() || path == "." {
        BODY_FIELD.to_string()
    } else {
        path
    }
}

fn single_field(field: String, message: String) -> AppError {
    let mut fields = FieldErrors::new();
    fields.insert(field, vec![message]);
    AppError::ValidationError(fields)
}

fn rejection_error(rejection: &JsonRejection) -> AppError {
    let mut source = rejection.source();
    while let Some(err) = source {
        if let Some(err) = err.downcast_ref::<PathError>() {
            return single_field(field_name(err.path()), err.inner().to_string());
        }
        source = err.source();
    }
    single_field(BODY_FIELD.to_string(), rejection.body_text())
}

/// Unwraps a JSON body extracted as `Result<Json<T>, JsonRejection>`.
pub fn extract_json<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(value)| value).map_err(|rejection| rejection_error(&rejection))
}

/// Parses a body that may be absent. Only an empty (or all-whitespace) body
/// means "no request"; anything else must deserialize.
pub fn optional_json<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let deserializer = &mut serde_json::Deserializer::from_slice(body);
    serde_path_to_error::deserialize(deserializer)
        .map(Some)
        .map_err(|err: PathError| single_field(field_name(err.path()), err.inner().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtos::payment_dtos::ReconciliationRequest;

    fn fields(err: AppError) -> FieldErrors {
        match err {
            AppError::ValidationError(fields) => fields,
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn empty_body_means_no_request() {
        let parsed: Option<ReconciliationRequest> = optional_json(&Bytes::from_static(b"  \n")).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn bad_date_is_keyed_by_field() {
        let err = optional_json::<ReconciliationRequest>(&Bytes::from_static(br#"{"date":"14/03/2026"}"#))
            .unwrap_err();
        assert!(fields(err).contains_key("date"));
    }

    #[test]
    fn broken_json_is_keyed_to_body() {
        let err = optional_json::<ReconciliationRequest>(&Bytes::from_static(b"{date")).unwrap_err();
        assert!(fields(err).contains_key("body"));
    }

    #[test]
    fn valid_body_parses() {
        let parsed: Option<ReconciliationRequest> =
            optional_json(&Bytes::from_static(br#"{"date":"2026-03-14"}"#)).unwrap();
        assert_eq!(parsed.unwrap().date, chrono::NaiveDate::from_ymd_opt(2026, 3, 14));
    }
}
