use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers::{customer_handlers, dashboard_handlers, reconciliation_handlers, subscription_handlers};
use crate::state::AppState;

pub fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(dashboard_handlers::health))
        .route("/stats", get(dashboard_handlers::get_stats))
        .route("/transactions", get(dashboard_handlers::list_transactions))
        .route("/transactions/:transaction_id", get(dashboard_handlers::get_transaction))
        .route(
            "/customers",
            get(customer_handlers::list_customers).post(customer_handlers::add_customer),
        )
        .route("/reconciliations", get(reconciliation_handlers::list_reconciliations))
        .route("/audit-logs", get(dashboard_handlers::list_audit_logs))
        .route("/callback-logs", get(dashboard_handlers::list_callback_logs))
        .route(
            "/subscriptions",
            get(subscription_handlers::list_subscriptions).post(subscription_handlers::create_subscription),
        )
        .route("/subscriptions/run", post(subscription_handlers::run_subscriptions))
        .route("/subscriptions/:id/status", put(subscription_handlers::update_subscription_status))
}
