use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::Value;

use crate::services::callbacks::{ingest, CallbackAck, CallbackRoute};
use crate::state::AppState;

/// Caller address as reported by the proxy in front of the service.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
}

/// Bodies that are not JSON are kept verbatim as a JSON string.
fn read_payload(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

async fn handle(state: AppState, route: CallbackRoute, headers: HeaderMap, body: Bytes) -> Json<CallbackAck> {
    let ack = ingest(
        state.store.as_ref(),
        &state.config,
        route,
        read_payload(&body),
        client_ip(&headers),
    )
    .await;
    Json(ack)
}

pub async fn result_callback(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<CallbackAck> {
    handle(state, CallbackRoute::Result, headers, body).await
}

pub async fn reversal_callback(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<CallbackAck> {
    handle(state, CallbackRoute::Reversal, headers, body).await
}

pub async fn status_callback(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<CallbackAck> {
    handle(state, CallbackRoute::Status, headers, body).await
}

pub async fn timeout_callback(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<CallbackAck> {
    handle(state, CallbackRoute::Timeout, headers, body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_wins_over_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.9"));

        headers.insert("x-forwarded-for", HeaderValue::from_static("196.201.214.200, 10.0.0.1"));
        assert_eq!(client_ip(&headers).as_deref(), Some("196.201.214.200"));
    }

    #[test]
    fn garbage_body_is_kept_as_string() {
        assert_eq!(read_payload(&Bytes::from_static(b"<xml/>")), Value::String("<xml/>".to_string()));
        assert_eq!(read_payload(&Bytes::from_static(b"{\"a\":1}"))["a"], 1);
    }
}
