// handlers/mpesa_handlers.rs
use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use tracing::{error, info};

use crate::dtos::payment_dtos::{
    AuthRequest, AuthResponse, CollectionRequest, DisbursementRequest, StatusQueryRequest, StatusQueryResponse,
};
use crate::errors::Result;
use crate::extractors::extract_json;
use crate::services::payments;
use crate::state::AppState;

pub async fn get_access_token(
    State(state): State<AppState>,
    body: std::result::Result<Json<AuthRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = extract_json(body)?;
    let token = state.mpesa.get_access_token(request.environment).await?;

    Ok(Json(AuthResponse {
        success: true,
        access_token: token.access_token,
        expires_in: token.expires_in,
    }))
}

// C2B: Customer to Business
pub async fn initiate_collection(
    State(state): State<AppState>,
    body: std::result::Result<Json<CollectionRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = extract_json(body)?.into_valid()?;
    info!("Received STK push request for {} - KSh {}", request.phone_number, request.amount);

    let environment = request.environment;
    let response = payments::initiate_collection(state.store.as_ref(), &state.mpesa, environment, request.into())
        .await
        .map_err(|e| {
            error!("Failed to initiate STK push: {}", e);
            e
        })?;

    Ok(Json(response))
}

// B2C: Business to Customer
pub async fn initiate_disbursement(
    State(state): State<AppState>,
    body: std::result::Result<Json<DisbursementRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = extract_json(body)?.into_valid()?;
    info!("Received B2C request for {} - KSh {}", request.phone_number, request.amount);

    let response = payments::initiate_disbursement(state.store.as_ref(), &state.mpesa, request)
        .await
        .map_err(|e| {
            error!("Failed to initiate B2C payment: {}", e);
            e
        })?;

    Ok(Json(response))
}

pub async fn query_transaction_status(
    State(state): State<AppState>,
    body: std::result::Result<Json<StatusQueryRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = extract_json(body)?.into_valid()?;
    info!("Checking transaction status: {}", request.transaction_id);

    let data = payments::query_status(state.store.as_ref(), &state.mpesa, request).await?;

    Ok(Json(StatusQueryResponse { success: true, data }))
}
