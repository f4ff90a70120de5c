pub mod dashboard;
pub mod mpesa;
