use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use crate::dtos::admin_dtos::ValidCustomer;
use crate::errors::Result;
use crate::models::{
    audit::{AuditCategory, AuditLogEntry},
    customer::Customer,
};
use crate::store::Store;

/// Registers a customer by hand. A phone number already on file is a `DuplicateKey`.
pub async fn create_customer(store: &dyn Store, req: ValidCustomer) -> Result<Customer> {
    let customer = store
        .insert_customer(Customer::new(
            req.name,
            req.phone_number,
            req.email,
            req.account_number,
            req.status,
            Utc::now(),
        ))
        .await?;

    info!("👤 Customer {} registered", customer.phone_number);

    let audit = AuditLogEntry::new(AuditCategory::Configuration, "Customer Created")
        .details(format!("Customer {} ({}) created", customer.name, customer.phone_number))
        .metadata(json!({
            "customerId": customer.id.map(|id| id.to_hex()),
            "accountNumber": customer.account_number,
        }));
    if let Err(e) = store.append_audit(audit).await {
        error!("Failed to audit customer creation: {}", e);
    }

    Ok(customer)
}
