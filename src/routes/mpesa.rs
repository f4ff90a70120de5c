use axum::{routing::post, Router};

use crate::handlers::{callback_handlers, mpesa_handlers, reconciliation_handlers};
use crate::state::AppState;

pub fn mpesa_routes() -> Router<AppState> {
    Router::new()
        .route("/auth", post(mpesa_handlers::get_access_token))
        // C2B and B2C initiation
        .route("/collection", post(mpesa_handlers::initiate_collection))
        .route("/disbursement", post(mpesa_handlers::initiate_disbursement))
        .route("/status", post(mpesa_handlers::query_transaction_status))
        // Provider callbacks
        .route("/callback", post(callback_handlers::result_callback))
        .route("/callback/reversal", post(callback_handlers::reversal_callback))
        .route("/callback/status", post(callback_handlers::status_callback))
        .route("/callback/timeout", post(callback_handlers::timeout_callback))
        .route("/reconciliation", post(reconciliation_handlers::reconcile))
}
