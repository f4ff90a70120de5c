use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::mpesa_service::MpesaService;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub mpesa: Arc<MpesaService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Arc<AppConfig>) -> crate::errors::Result<Self> {
        let mpesa = Arc::new(MpesaService::new(config.clone())?);
        Ok(AppState { store, mpesa, config })
    }
}
