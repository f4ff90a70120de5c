mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;

use common::{mount_token, send, TestApp};
use mpesa_bridge::store::CallbackLogStore;

#[tokio::test]
async fn health_reports_configuration() {
    let app = TestApp::start().await;

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["config"]["sandbox_configured"], true);
    assert_eq!(body["config"]["production_configured"], false);
}

#[tokio::test]
async fn garbage_callback_is_still_acknowledged() {
    let app = TestApp::start().await;

    let (status, body) = send(app.router(), Method::POST, "/callback", Body::from("<<not json>>")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ResultCode": 0, "ResultDesc": "Success" }));

    let logs = app.store.list_callback_logs(10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].payload, json!("<<not json>>"));
    assert!(logs[0].error_message.is_some());
}

#[tokio::test]
async fn forwarded_address_is_recorded_on_callback_log() {
    let app = TestApp::start().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/callback/timeout")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "196.201.214.200, 10.0.0.1")
        .body(Body::from(json!({ "ConversationID": "AG_1" }).to_string()))
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let logs = app.store.list_callback_logs(1).await.unwrap();
    assert_eq!(logs[0].ip_address.as_deref(), Some("196.201.214.200"));
}

#[tokio::test]
async fn invalid_phone_is_reported_per_field() {
    let app = TestApp::start().await;

    let (status, body) = app
        .post(
            "/collection",
            json!({
                "phoneNumber": "0812",
                "amount": 100,
                "accountReference": "",
                "transactionDesc": "Invoice payment"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["fields"]["phoneNumber"].is_array());
    assert!(body["fields"]["accountReference"].is_array());
    assert!(body["fields"].get("amount").is_none());
}

#[tokio::test]
async fn missing_fields_are_all_reported() {
    let app = TestApp::start().await;

    let (status, body) = app.post("/collection", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    for field in ["phoneNumber", "amount", "accountReference", "transactionDesc"] {
        assert!(body["fields"][field].is_array(), "{} should be reported", field);
    }
}

#[tokio::test]
async fn wrongly_typed_field_is_reported_by_name() {
    let app = TestApp::start().await;

    let (status, body) = app
        .post(
            "/collection",
            json!({
                "phoneNumber": "254712345678",
                "amount": "500",
                "accountReference": "INV-1",
                "transactionDesc": "Invoice payment"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Validation failed");
    assert!(body["fields"]["amount"].is_array());
}

#[tokio::test]
async fn unparseable_body_is_a_validation_error() {
    let app = TestApp::start().await;

    let (status, body) = send(app.router(), Method::POST, "/collection", Body::from("{phoneNumber")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["fields"]["body"].is_array());
}

#[tokio::test]
async fn cors_preflight_allows_any_origin() {
    let app = TestApp::start().await;

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/collection")
        .header("origin", "https://dashboard.example.test")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn auth_returns_token() {
    let app = TestApp::start().await;
    mount_token(&app.server, 1).await;

    let (status, body) = app.post("/auth", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["access_token"], "test-token");
    assert_eq!(body["expires_in"], 3599);
}

#[tokio::test]
async fn auth_for_unconfigured_environment_is_a_server_error() {
    let app = TestApp::start().await;
    mount_token(&app.server, 0).await;

    let (status, body) = app.post("/auth", json!({ "environment": "production" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Configuration error");
}

#[tokio::test]
async fn unknown_transaction_is_not_found() {
    let app = TestApp::start().await;

    let (status, body) = app.get("/transactions/STK0000000000000ABCDEF").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn duplicate_customer_phone_conflicts() {
    let app = TestApp::start().await;
    let customer = json!({
        "name": "Jane Wanjiku",
        "phoneNumber": "0712345678",
        "email": "jane@example.test",
        "accountNumber": "ACC-001"
    });

    let (status, body) = app.post("/customers", customer.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["phoneNumber"], "254712345678");
    assert_eq!(body["data"]["totalTransactions"], 0);

    let mut same_phone = customer;
    same_phone["phoneNumber"] = json!("+254712345678");
    let (status, _) = app.post("/customers", same_phone).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, listed) = app.get("/customers").await;
    assert_eq!(listed["count"], 1);
}

#[tokio::test]
async fn malformed_subscription_id_is_a_bad_request() {
    let app = TestApp::start().await;

    let (status, body) = send(
        app.router(),
        Method::PUT,
        "/subscriptions/not-an-object-id/status",
        Body::from(json!({ "status": "paused" }).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid ID format");
}

#[tokio::test]
async fn missing_subscription_is_not_found() {
    let app = TestApp::start().await;

    let (status, _) = send(
        app.router(),
        Method::PUT,
        "/subscriptions/65a1b2c3d4e5f60718293a4b/status",
        Body::from(json!({ "status": "cancelled" }).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn transactions_can_be_filtered_by_status() {
    let app = TestApp::start().await;
    let now = chrono::Utc::now();
    common::seed(&app.store, "ws_CO_F1", 10.0, mpesa_bridge::models::transaction::TransactionStatus::Completed, now).await;
    common::seed_pending(&app.store, "ws_CO_F2", 20.0, now).await;

    let (_, all) = app.get("/transactions").await;
    assert_eq!(all["count"], 2);

    let (_, completed) = app.get("/transactions?status=completed").await;
    assert_eq!(completed["count"], 1);
    assert_eq!(completed["data"][0]["amount"], 10.0);

    let (_, stats) = app.get("/stats").await;
    assert_eq!(stats["data"]["totalTransactions"], 2);
    assert_eq!(stats["data"]["pendingCount"], 1);
    assert_eq!(stats["data"]["successRate"], 50.0);
}

#[tokio::test]
async fn audit_log_limit_is_respected() {
    let app = TestApp::start().await;
    for i in 0..3 {
        let (status, _) = app
            .post(
                "/customers",
                json!({
                    "name": format!("Customer {}", i),
                    "phoneNumber": format!("07123456{:02}", i),
                    "accountNumber": format!("ACC-{}", i)
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, logs) = app.get("/audit-logs?limit=2").await;
    assert_eq!(logs["count"], 2);
    assert_eq!(logs["data"][0]["action"], "Customer Created");
}
