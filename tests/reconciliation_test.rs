mod common;

use axum::{body::Body, http::{Method, StatusCode}};
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;

use common::{seed, send, test_config, TestApp};
use mpesa_bridge::{
    config::AppConfig,
    models::{reconciliation::ReconciliationStatus, transaction::TransactionStatus},
    services::reconciliation::run_reconciliation,
    store::{AuditStore, InMemoryStore, ReconciliationStore},
};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
}

fn config() -> AppConfig {
    test_config("http://127.0.0.1:9")
}

/// Ten transactions on 2026-03-14 (UTC) plus one the following morning.
async fn seed_day(store: &InMemoryStore) {
    let noon = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
    let mut rows: Vec<(f64, TransactionStatus)> = vec![(10000.0, TransactionStatus::Completed); 7];
    rows.push((3000.0, TransactionStatus::Pending));
    rows.push((2000.0, TransactionStatus::Pending));
    rows.push((1000.0, TransactionStatus::Failed));

    for (i, (amount, status)) in rows.into_iter().enumerate() {
        seed(store, &format!("ws_CO_R{}", i), amount, status, noon).await;
    }

    let next_day = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 1).unwrap();
    seed(store, "ws_CO_NEXT", 999.0, TransactionStatus::Completed, next_day).await;
}

#[tokio::test]
async fn day_with_pending_money_is_a_discrepancy() {
    let store = InMemoryStore::new();
    seed_day(&store).await;

    let (record, summary) = run_reconciliation(&store, &config(), Some(day())).await.unwrap();

    assert_eq!(summary.total_transactions, 10);
    assert_eq!(summary.total_amount, 76000.0);
    assert_eq!(summary.matched_transactions, 7);
    assert_eq!(summary.unmatched_transactions, 3);
    assert_eq!(summary.discrepancy_amount, 5000.0);
    assert_eq!(summary.status, ReconciliationStatus::Discrepancy);

    assert_eq!(record.reconciliation_date, day());
    assert_eq!(
        record.notes.as_deref(),
        Some("Auto-reconciliation: 7 completed, 2 pending, 1 failed")
    );

    let audit = store.list_audit(10).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "Reconciliation Completed");
}

#[tokio::test]
async fn rerunning_a_day_replaces_its_record() {
    let store = InMemoryStore::new();
    seed_day(&store).await;

    let (first, _) = run_reconciliation(&store, &config(), Some(day())).await.unwrap();
    seed(
        &store,
        "ws_CO_LATE",
        1000.0,
        TransactionStatus::Completed,
        Utc.with_ymd_and_hms(2026, 3, 14, 23, 0, 0).unwrap(),
    )
    .await;
    let (second, summary) = run_reconciliation(&store, &config(), Some(day())).await.unwrap();

    assert_eq!(summary.total_transactions, 11);
    assert_eq!(first.id, second.id);
    assert_eq!(first.created_at, second.created_at);

    let records = store.list_reconciliations().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].total_transactions, 11);
}

#[tokio::test]
async fn local_offset_moves_the_day_boundary() {
    let store = InMemoryStore::new();
    seed_day(&store).await;
    let nairobi = AppConfig {
        utc_offset_minutes: 180,
        ..config()
    };

    // 00:00:01 UTC on the 15th is still the 15th in Nairobi; 12:00 UTC on the
    // 14th is 15:00 local, so the totals do not change.
    let (_, summary) = run_reconciliation(&store, &nairobi, Some(day())).await.unwrap();
    assert_eq!(summary.total_transactions, 10);

    let (_, next) = run_reconciliation(&store, &nairobi, NaiveDate::from_ymd_opt(2026, 3, 15)).await.unwrap();
    assert_eq!(next.total_transactions, 1);
    assert_eq!(next.status, ReconciliationStatus::Reconciled);
}

#[tokio::test]
async fn empty_day_reconciles_cleanly() {
    let store = InMemoryStore::new();

    let (record, summary) = run_reconciliation(&store, &config(), Some(day())).await.unwrap();
    assert_eq!(summary.total_transactions, 0);
    assert_eq!(record.status, ReconciliationStatus::Reconciled);
    assert_eq!(store.reconciliation_writes(), 1);
}

#[tokio::test]
async fn reconciliation_endpoint_reports_summary() {
    let app = TestApp::start().await;
    seed_day(&app.store).await;

    let (status, body) = app.post("/reconciliation", json!({ "date": "2026-03-14" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["summary"]["matchedTransactions"], 7);
    assert_eq!(body["summary"]["status"], "discrepancy");
    assert_eq!(body["reconciliation"]["reconciliationDate"], "2026-03-14");
    assert_eq!(body["reconciliation"]["totalAmount"], 76000.0);

    let (_, listed) = app.get("/reconciliations").await;
    assert_eq!(listed["count"], 1);
}

#[tokio::test]
async fn unparseable_date_is_rejected_without_reconciling() {
    let app = TestApp::start().await;
    seed_day(&app.store).await;

    let (status, body) = app.post("/reconciliation", json!({ "date": "14/03/2026" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Validation failed");
    assert!(body["fields"]["date"].is_array());
    assert_eq!(app.store.reconciliation_writes(), 0);
    assert!(app.store.list_reconciliations().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_body_reconciles_the_current_day() {
    let app = TestApp::start().await;

    let (status, body) = send(app.router(), Method::POST, "/reconciliation", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(app.store.reconciliation_writes(), 1);
}
