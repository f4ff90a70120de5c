pub(crate) mod callback_handlers;
pub(crate) mod customer_handlers;
pub(crate) mod dashboard_handlers;
pub(crate) mod mpesa_handlers;
pub(crate) mod reconciliation_handlers;
pub(crate) mod subscription_handlers;
