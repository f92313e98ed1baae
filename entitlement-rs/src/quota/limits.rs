//! Administrator-configured quota limits

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{info, warn};

use super::types::LimitType;
use crate::clock::to_db_timestamp;
use crate::error::{EntitlementError, Result, Store};

/// Source of configured limit overrides
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuotaLimitSource: Send + Sync {
    /// Configured rows only; missing types fall back to defaults upstream
    async fn quota_limits(&self) -> Result<HashMap<LimitType, u32>>;
}

/// SQLite `quota_limits` table
#[derive(Clone)]
pub struct QuotaLimitStore {
    db: SqlitePool,
}

impl QuotaLimitStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_limits (
                limit_type TEXT PRIMARY KEY,
                limit_value INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn set_limit(&self, limit_type: LimitType, limit_value: u32) -> Result<()> {
        info!(limit_type = %limit_type, limit_value, "Setting quota limit");

        sqlx::query(
            r#"
            INSERT INTO quota_limits (limit_type, limit_value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(limit_type) DO UPDATE SET
                limit_value = excluded.limit_value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(limit_type.as_str())
        .bind(i64::from(limit_value))
        .bind(to_db_timestamp(Utc::now()))
        .execute(&self.db)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    /// Drop an override so the default applies again
    pub async fn remove_limit(&self, limit_type: LimitType) -> Result<bool> {
        info!(limit_type = %limit_type, "Removing quota limit override");

        let result = sqlx::query("DELETE FROM quota_limits WHERE limit_type = ?")
            .bind(limit_type.as_str())
            .execute(&self.db)
            .await
            .map_err(unavailable)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl QuotaLimitSource for QuotaLimitStore {
    async fn quota_limits(&self) -> Result<HashMap<LimitType, u32>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT limit_type, limit_value FROM quota_limits",
        )
        .fetch_all(&self.db)
        .await
        .map_err(unavailable)?;

        let mut limits = HashMap::new();
        for (name, value) in rows {
            let Some(limit_type) = LimitType::from_db_string(&name) else {
                warn!(limit_type = %name, "Ignoring unknown quota limit row");
                continue;
            };
            match u32::try_from(value) {
                Ok(value) => {
                    limits.insert(limit_type, value);
                }
                Err(_) => warn!(limit_type = %name, value, "Ignoring out-of-range quota limit"),
            }
        }

        Ok(limits)
    }
}

fn unavailable(e: sqlx::Error) -> EntitlementError {
    EntitlementError::unavailable(Store::QuotaLimits, e)
}
