use std::time::Duration;

use mongodb::{
    bson::doc,
    options::{ClientOptions, IndexOptions},
    Client, Database, IndexModel,
};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::Result;
use crate::models::{customer::Customer, reconciliation::ReconciliationRecord, transaction::Transaction};
use crate::store::mongo::{CUSTOMERS, RECONCILIATIONS, TRANSACTIONS};

pub async fn get_db_client(config: &AppConfig) -> Result<Database> {
    let mut options = ClientOptions::parse(&config.database_url).await?;
    let timeout = Duration::from_secs(config.database_timeout_secs);
    options.connect_timeout = Some(timeout);
    options.server_selection_timeout = Some(timeout);
    options.app_name = Some("mpesa-bridge".to_string());

    let client = Client::with_options(options)?;
    let db = client.database(&config.database_name);

    match db.list_collection_names().await {
        Ok(collections) => {
            info!("✅ Connected to database: {}", config.database_name);
            info!("📂 Collections found: {:?}", collections);
        }
        Err(e) => {
            warn!("❌ Database '{}' may not exist or is inaccessible: {}", config.database_name, e);
            return Err(e.into());
        }
    }

    ensure_indexes(&db).await?;
    Ok(db)
}

/// Creates the uniqueness guarantees the stores rely on. Safe to run on every start.
pub async fn ensure_indexes(db: &Database) -> Result<()> {
    let transactions = db.collection::<Transaction>(TRANSACTIONS);
    transactions
        .create_index(
            IndexModel::builder()
                .keys(doc! { "transaction_id": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        )
        .await?;
    // At most one pending transaction per conversation id.
    transactions
        .create_index(
            IndexModel::builder()
                .keys(doc! { "conversation_id": 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .name("conversation_id_pending".to_string())
                        .partial_filter_expression(doc! { "status": "pending" })
                        .build(),
                )
                .build(),
        )
        .await?;
    transactions
        .create_index(IndexModel::builder().keys(doc! { "created_at": -1 }).build())
        .await?;
    transactions
        .create_index(IndexModel::builder().keys(doc! { "mpesa_receipt_number": 1 }).build())
        .await?;

    db.collection::<Customer>(CUSTOMERS)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "phone_number": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        )
        .await?;

    db.collection::<ReconciliationRecord>(RECONCILIATIONS)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "reconciliation_date": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        )
        .await?;

    info!("📇 Indexes ensured");
    Ok(())
}
