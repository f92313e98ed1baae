//! Connection pool and schema bootstrap

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::{EntitlementError, Result};
use crate::payments::PaymentService;
use crate::quota::QuotaLimitStore;
use crate::subscription::SubscriptionStore;
use crate::usage::SqliteUsageStore;

/// Open the pool described by `storage`.
///
/// Writers wait on the SQLite lock for up to the store timeout before failing.
pub async fn connect(storage: &StorageConfig) -> Result<SqlitePool> {
    if !storage.database_url.starts_with("sqlite:") {
        return Err(EntitlementError::Config(format!(
            "database_url must use the sqlite: scheme, got '{}'",
            storage.database_url
        )));
    }

    let options = SqliteConnectOptions::from_str(&storage.database_url)
        .map_err(|e| EntitlementError::Config(format!("invalid database_url: {}", e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(storage.store_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(storage.max_connections)
        .connect_with(options)
        .await?;

    info!(
        database_url = %storage.database_url,
        max_connections = storage.max_connections,
        "Connected to database"
    );

    Ok(pool)
}

/// Create every table and index the service uses
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    let subscriptions = SubscriptionStore::new(pool.clone());
    subscriptions.init_db().await?;
    QuotaLimitStore::new(pool.clone()).init_db().await?;
    SqliteUsageStore::new(pool.clone()).init_db().await?;
    PaymentService::new(
        pool.clone(),
        subscriptions,
        std::sync::Arc::new(crate::clock::SystemClock),
    )
    .init_db()
    .await?;

    Ok(())
}
