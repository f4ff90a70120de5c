pub mod admin_dtos;
pub mod payment_dtos;
