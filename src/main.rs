use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use mpesa_bridge::{
    build_router,
    config::AppConfig,
    database::connection::get_db_client,
    state::AppState,
    store::MongoStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = Arc::new(AppConfig::from_env().context("Failed to load configuration")?);
    tracing::info!("✅ App config loaded");
    tracing::info!("🌐 Environments: {}", config.get_config_info());

    let db = get_db_client(&config).await.context("Failed to connect to MongoDB")?;
    let store = Arc::new(MongoStore::new(db));

    let app_state = AppState::new(store, config.clone()).context("Failed to initialize services")?;
    let app = build_router(app_state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("HOST/PORT do not form a socket address")?;
    tracing::info!("🚀 Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
