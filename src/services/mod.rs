pub mod callbacks;
pub mod customers;
pub mod dashboard;
pub mod mpesa_service;
pub mod payments;
pub mod reconciliation;
pub mod subscriptions;
