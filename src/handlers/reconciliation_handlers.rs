use axum::{body::Bytes, extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::dtos::payment_dtos::{ReconciliationRequest, ReconciliationResult};
use crate::errors::Result;
use crate::extractors::optional_json;
use crate::models::reconciliation::ReconciliationResponse;
use crate::services::reconciliation::run_reconciliation;
use crate::state::AppState;

/// An empty body (or one without a date) reconciles the current local day.
pub async fn reconcile(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse> {
    let date = optional_json::<ReconciliationRequest>(&body)?.and_then(|r| r.date);
    let (record, summary) = run_reconciliation(state.store.as_ref(), &state.config, date).await?;

    Ok(Json(ReconciliationResult {
        success: true,
        reconciliation: record.into(),
        summary,
    }))
}

pub async fn list_reconciliations(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let records: Vec<ReconciliationResponse> = state
        .store
        .list_reconciliations()
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": records.len(),
        "data": records,
    })))
}
