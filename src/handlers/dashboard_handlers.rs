use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::dtos::admin_dtos::LimitQuery;
use crate::errors::{AppError, Result};
use crate::models::{
    audit::AuditLogResponse,
    callback_log::CallbackLogResponse,
    transaction::{TransactionFilter, TransactionResponse},
};
use crate::services::dashboard::dashboard_stats;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "mpesa",
        "timestamp": Utc::now().to_rfc3339(),
        "config": state.config.get_config_info(),
    }))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Query(filter): Query<TransactionFilter>,
) -> Result<impl IntoResponse> {
    let transactions: Vec<TransactionResponse> = state
        .store
        .list_transactions(&filter)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": transactions.len(),
        "data": transactions,
    })))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse> {
    let transaction = state
        .store
        .find_transaction(&transaction_id)
        .await?
        .ok_or(AppError::DocumentNotFound)?;

    Ok(Json(json!({
        "success": true,
        "data": TransactionResponse::from(transaction),
    })))
}

pub async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let stats = dashboard_stats(state.store.as_ref(), &state.config).await?;
    Ok(Json(json!({ "success": true, "data": stats })))
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse> {
    let logs: Vec<AuditLogResponse> = state
        .store
        .list_audit(query.resolved())
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({ "success": true, "count": logs.len(), "data": logs })))
}

pub async fn list_callback_logs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse> {
    let logs: Vec<CallbackLogResponse> = state
        .store
        .list_callback_logs(query.resolved())
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({ "success": true, "count": logs.len(), "data": logs })))
}
