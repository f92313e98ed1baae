//! Subscription ledger backed by SQLite

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::types::{Subscription, SubscriptionStatus};
use crate::clock::{from_db_timestamp, to_db_timestamp};
use crate::error::{EntitlementError, Result, Store};

/// Read side of the subscription record, as seen by the access engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionLedger: Send + Sync {
    /// Most recent subscription that is active and unexpired at `now`
    async fn active_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>>;

    async fn is_premium(&self, user_id: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.active_subscription(user_id, now).await?.is_some())
    }
}

/// SQLite subscription table
#[derive(Clone)]
pub struct SubscriptionStore {
    db: SqlitePool,
}

impl SubscriptionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                status TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                amount REAL NOT NULL,
                payment_ref TEXT,
                order_ref TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_user_active ON subscriptions(user_id, status, end_date)",
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Append a subscription. There is no update or delete.
    pub async fn insert(&self, subscription: &Subscription) -> Result<()> {
        let mut conn = self.db.acquire().await.map_err(unavailable)?;
        Self::insert_with(&mut conn, subscription).await
    }

    /// Insert on a caller-owned connection, so it can join a transaction
    pub(crate) async fn insert_with(
        conn: &mut sqlx::SqliteConnection,
        subscription: &Subscription,
    ) -> Result<()> {
        info!(
            user_id = %subscription.user_id,
            plan_id = %subscription.plan_id,
            end_date = %subscription.end_date,
            "Recording subscription"
        );

        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, user_id, plan_id, status, start_date, end_date, amount,
                 payment_ref, order_ref, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.user_id)
        .bind(&subscription.plan_id)
        .bind(subscription.status.as_str())
        .bind(to_db_timestamp(subscription.start_date))
        .bind(to_db_timestamp(subscription.end_date))
        .bind(subscription.amount)
        .bind(&subscription.payment_ref)
        .bind(&subscription.order_ref)
        .bind(to_db_timestamp(subscription.created_at))
        .execute(&mut *conn)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    /// All subscriptions of a user, newest first
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(row_to_subscription).collect()
    }

    /// Subscription created by settling `order_ref`, if any
    pub async fn find_by_order(&self, order_ref: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE order_ref = ? LIMIT 1")
            .bind(order_ref)
            .fetch_optional(&self.db)
            .await
            .map_err(unavailable)?;

        row.map(row_to_subscription).transpose()
    }

}

#[async_trait]
impl SubscriptionLedger for SubscriptionStore {
    async fn active_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = ? AND status = 'active' AND end_date >= ?
            ORDER BY end_date DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(to_db_timestamp(now))
        .fetch_optional(&self.db)
        .await
        .map_err(unavailable)?;

        let subscription = row
            .map(row_to_subscription)
            .transpose()?
            .filter(|s| s.grants_premium_at(now));
        debug!(user_id, premium = subscription.is_some(), "Subscription lookup");
        Ok(subscription)
    }
}

fn unavailable(e: sqlx::Error) -> EntitlementError {
    EntitlementError::unavailable(Store::Subscriptions, e)
}

fn row_to_subscription(row: sqlx::sqlite::SqliteRow) -> Result<Subscription> {
    use sqlx::Row;

    let status_str: String = row.try_get("status").map_err(unavailable)?;
    let status = SubscriptionStatus::from_db_string(&status_str).ok_or_else(|| {
        EntitlementError::unavailable(
            Store::Subscriptions,
            format!("invalid subscription status: {}", status_str),
        )
    })?;

    let timestamp = |column: &str| -> Result<DateTime<Utc>> {
        let raw: String = row.try_get(column).map_err(unavailable)?;
        from_db_timestamp(&raw).ok_or_else(|| {
            EntitlementError::unavailable(
                Store::Subscriptions,
                format!("invalid {} timestamp: {}", column, raw),
            )
        })
    };

    Ok(Subscription {
        id: row.try_get("id").map_err(unavailable)?,
        user_id: row.try_get("user_id").map_err(unavailable)?,
        plan_id: row.try_get("plan_id").map_err(unavailable)?,
        status,
        start_date: timestamp("start_date")?,
        end_date: timestamp("end_date")?,
        amount: row.try_get("amount").map_err(unavailable)?,
        payment_ref: row.try_get("payment_ref").map_err(unavailable)?,
        order_ref: row.try_get("order_ref").map_err(unavailable)?,
        created_at: timestamp("created_at")?,
    })
}
