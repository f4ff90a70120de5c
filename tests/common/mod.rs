#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mpesa_bridge::{
    build_router,
    config::{AppConfig, MpesaCredentials},
    models::transaction::{NewTransaction, Transaction, TransactionStatus, TransactionType},
    state::AppState,
    store::{InMemoryStore, TransactionStore},
};

pub const STK_PATH: &str = "/mpesa/stkpush/v1/processrequest";
pub const B2C_PATH: &str = "/mpesa/b2c/v1/paymentrequest";
pub const STATUS_PATH: &str = "/mpesa/transactionstatus/v1/query";

pub fn sandbox_credentials() -> MpesaCredentials {
    MpesaCredentials {
        consumer_key: "test-key".to_string(),
        consumer_secret: "test-secret".to_string(),
        short_code: Some("174379".to_string()),
        passkey: Some("test-passkey".to_string()),
        initiator_name: Some("testapi".to_string()),
        security_credential: Some("test-credential".to_string()),
    }
}

/// Sandbox credentials pointed at `base_url`; production is left unconfigured.
pub fn test_config(base_url: &str) -> AppConfig {
    AppConfig {
        sandbox: Some(sandbox_credentials()),
        sandbox_base_url: base_url.to_string(),
        callback_base_url: "https://payments.example.test".to_string(),
        http_timeout_secs: 5,
        ..AppConfig::default()
    }
}

pub struct TestApp {
    pub server: MockServer,
    pub store: Arc<InMemoryStore>,
    pub state: AppState,
}

impl TestApp {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let config = test_config(&server.uri());
        Self::with_config(server, config)
    }

    pub fn with_config(server: MockServer, config: AppConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let state = AppState::new(store.clone(), Arc::new(config)).unwrap();
        TestApp { server, store, state }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        send(self.router(), Method::POST, uri, Body::from(body.to_string())).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        send(self.router(), Method::GET, uri, Body::empty()).await
    }
}

pub async fn send(router: Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

pub async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .and(query_param("grant_type", "client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": "3599"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

pub fn stk_accepted(checkout_request_id: &str) -> Value {
    json!({
        "MerchantRequestID": format!("MR-{}", checkout_request_id),
        "CheckoutRequestID": checkout_request_id,
        "ResponseCode": "0",
        "ResponseDescription": "Success. Request accepted for processing",
        "CustomerMessage": "Success. Request accepted for processing"
    })
}

pub fn stk_callback(checkout_request_id: &str, result_code: i64, receipt: Option<&str>, amount: f64) -> Value {
    let mut callback = json!({
        "MerchantRequestID": format!("MR-{}", checkout_request_id),
        "CheckoutRequestID": checkout_request_id,
        "ResultCode": result_code,
        "ResultDesc": if result_code == 0 {
            "The service request is processed successfully."
        } else {
            "Request cancelled by user"
        },
    });
    if let Some(receipt) = receipt {
        callback["CallbackMetadata"] = json!({
            "Item": [
                { "Name": "Amount", "Value": amount },
                { "Name": "MpesaReceiptNumber", "Value": receipt },
                { "Name": "TransactionDate", "Value": 20260115103000u64 },
                { "Name": "PhoneNumber", "Value": 254712345678u64 }
            ]
        });
    }
    json!({ "Body": { "stkCallback": callback } })
}

pub fn b2c_result(conversation_id: &str, result_code: i64, receipt: &str) -> Value {
    json!({
        "Result": {
            "ResultType": 0,
            "ResultCode": result_code,
            "ResultDesc": "The service request is processed successfully.",
            "OriginatorConversationID": format!("OC-{}", conversation_id),
            "ConversationID": conversation_id,
            "TransactionID": receipt,
            "ResultParameters": {
                "ResultParameter": [
                    { "Key": "TransactionAmount", "Value": 1500 },
                    { "Key": "TransactionReceipt", "Value": receipt },
                    { "Key": "ReceiverPartyPublicName", "Value": "254712345678 - Jane Wanjiku" },
                    { "Key": "TransactionCompletedDateTime", "Value": "15.01.2026 10:30:00" }
                ]
            }
        }
    })
}

/// Inserts a pending transaction as if an initiator had just opened it.
pub async fn seed_pending(
    store: &InMemoryStore,
    conversation_id: &str,
    amount: f64,
    created_at: DateTime<Utc>,
) -> Transaction {
    seed(store, conversation_id, amount, TransactionStatus::Pending, created_at).await
}

pub async fn seed(
    store: &InMemoryStore,
    conversation_id: &str,
    amount: f64,
    status: TransactionStatus,
    created_at: DateTime<Utc>,
) -> Transaction {
    let mut tx = Transaction::pending(
        NewTransaction {
            transaction_id: format!("STK-{}", conversation_id),
            transaction_type: TransactionType::Collection,
            amount,
            phone_number: "254712345678".to_string(),
            account_reference: "INV-1".to_string(),
            description: Some("Invoice payment".to_string()),
            conversation_id: conversation_id.to_string(),
            originator_conversation_id: None,
            customer_id: None,
            customer_name: None,
        },
        created_at,
    );
    tx.status = status;
    store.insert_transaction(tx).await.unwrap()
}

pub fn stk_mock(checkout_request_id: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path(STK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(stk_accepted(checkout_request_id)))
}
