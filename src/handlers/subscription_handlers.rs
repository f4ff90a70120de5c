use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use mongodb::bson::oid::ObjectId;
use serde_json::json;

use crate::dtos::admin_dtos::{CreateSubscriptionRequest, RunSubscriptionsRequest, UpdateSubscriptionStatusRequest};
use crate::errors::Result;
use crate::extractors::extract_json;
use crate::models::subscription::SubscriptionResponse;
use crate::services::subscriptions;
use crate::state::AppState;

pub async fn list_subscriptions(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let subscriptions: Vec<SubscriptionResponse> = state
        .store
        .list_subscriptions()
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({ "success": true, "count": subscriptions.len(), "data": subscriptions })))
}

pub async fn create_subscription(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateSubscriptionRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = extract_json(body)?.into_valid()?;
    let subscription = subscriptions::create_subscription(state.store.as_ref(), request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": SubscriptionResponse::from(subscription) })),
    ))
}

pub async fn update_subscription_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<UpdateSubscriptionStatusRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let id = ObjectId::parse_str(&id)?;
    let request = extract_json(body)?;
    let subscription = subscriptions::update_subscription_status(state.store.as_ref(), id, request.status).await?;

    Ok(Json(json!({ "success": true, "data": SubscriptionResponse::from(subscription) })))
}

pub async fn run_subscriptions(
    State(state): State<AppState>,
    body: std::result::Result<Json<RunSubscriptionsRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = extract_json(body)?;
    let report = subscriptions::run_due_subscriptions(
        state.store.as_ref(),
        &state.mpesa,
        &state.config,
        request.date,
        request.environment,
    )
    .await?;

    Ok(Json(json!({ "success": true, "data": report })))
}
