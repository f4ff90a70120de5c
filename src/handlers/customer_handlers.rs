use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::dtos::admin_dtos::CreateCustomerRequest;
use crate::errors::Result;
use crate::extractors::extract_json;
use crate::models::customer::CustomerResponse;
use crate::services::customers::create_customer;
use crate::state::AppState;

pub async fn list_customers(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let customers: Vec<CustomerResponse> = state
        .store
        .list_customers()
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({ "success": true, "count": customers.len(), "data": customers })))
}

pub async fn add_customer(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateCustomerRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let customer = create_customer(state.store.as_ref(), extract_json(body)?.into_valid()?).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": CustomerResponse::from(customer) })),
    ))
}
