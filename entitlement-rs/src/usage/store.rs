//! Usage store backed by SQLite
//!
//! Consumption is recorded with single-statement conditional writes inside
//! a transaction whose first statement is the write itself, so SQLite
//! takes the write lock before any count is read. Concurrent consumers,
//! in this process or another, serialize on that lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{ConsumeOutcome, UsageEvent, UsageRecord};
use crate::clock::{from_db_timestamp, to_db_timestamp};
use crate::error::{EntitlementError, Result, Store};
use crate::quota::{ContentType, DedupKey, QuotaRule};

/// Window key stored for rules that never reset
const LIFETIME_WINDOW: &str = "";

/// Dedup-aware consumption log
///
/// Usage is only ever recorded through `try_record`, which checks the limit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Units consumed under `rule` in the window containing `now`
    async fn count_consumed(&self, user_id: &str, rule: &QuotaRule, now: DateTime<Utc>) -> Result<u32>;

    /// Atomically check the limit and, if there is room, record the access.
    ///
    /// Implementations bound their own work. A `Timeout` error means nothing
    /// was committed; once the commit starts it runs to completion.
    async fn try_record(
        &self,
        record: &UsageRecord,
        rule: &QuotaRule,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome>;
}

/// SQLite `usage_events` log plus `usage_counters` window counters
#[derive(Clone)]
pub struct SqliteUsageStore {
    db: SqlitePool,
    timeout: Option<Duration>,
}

impl SqliteUsageStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db, timeout: None }
    }

    /// Bound everything before the commit of `try_record` by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_events (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                content_type TEXT NOT NULL,
                content_identifier TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                dedup INTEGER NOT NULL DEFAULT 0,
                window_key TEXT NOT NULL DEFAULT '',
                accessed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        // One row per dedup key and window; every-event rows are exempt
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_usage_events_dedup_key
            ON usage_events(user_id, content_type, window_key, subject, content_identifier)
            WHERE dedup = 1
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_usage_events_window ON usage_events(user_id, content_type, window_key)",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_counters (
                user_id TEXT NOT NULL,
                content_type TEXT NOT NULL,
                window_key TEXT NOT NULL,
                count INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, content_type, window_key)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Most recent audit events for a user
    pub async fn events_for_user(&self, user_id: &str, limit: u32) -> Result<Vec<UsageEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, content_type, content_identifier, subject, window_key, accessed_at
            FROM usage_events
            WHERE user_id = ?
            ORDER BY accessed_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(row_to_event).collect()
    }

    /// Delete day counters for windows before `window_key`.
    ///
    /// Lifetime counters and audit events are kept. Returns the number of
    /// counters removed.
    pub async fn prune_counters_before(&self, window_key: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM usage_counters WHERE window_key <> ? AND window_key < ?")
            .bind(LIFETIME_WINDOW)
            .bind(window_key)
            .execute(&self.db)
            .await
            .map_err(unavailable)?;

        info!(before = window_key, removed = result.rows_affected(), "Pruned usage counters");
        Ok(result.rows_affected())
    }

    /// Run `work` under the configured bound, then commit outside it
    async fn commit_within<F>(&self, work: F) -> Result<ConsumeOutcome>
    where
        F: Future<Output = Result<(Transaction<'static, Sqlite>, ConsumeOutcome)>>,
    {
        let (tx, outcome) = match self.timeout {
            None => work.await?,
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result?,
                Err(_) => {
                    let after_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                    warn!(after_ms, "Usage write timed out before commit");
                    return Err(EntitlementError::Timeout {
                        store: Store::Usage,
                        after_ms,
                    });
                }
            },
        };

        tx.commit().await.map_err(unavailable)?;
        Ok(outcome)
    }

    async fn try_record_dedup(
        &self,
        record: &UsageRecord,
        rule: &QuotaRule,
        window_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(Transaction<'static, Sqlite>, ConsumeOutcome)> {
        let content_type = rule.content_type.as_str();
        let mut tx = self.db.begin().await.map_err(unavailable)?;

        // Insert only if the key is new and the distinct count leaves room
        let inserted = sqlx::query(
            r#"
            INSERT INTO usage_events
                (id, user_id, content_type, content_identifier, subject, dedup, window_key, accessed_at)
            SELECT ?, ?, ?, ?, ?, 1, ?, ?
            WHERE (
                SELECT COUNT(*) FROM usage_events
                WHERE user_id = ? AND content_type = ? AND window_key = ? AND dedup = 1
            ) < ?
            ON CONFLICT(user_id, content_type, window_key, subject, content_identifier) WHERE dedup = 1
            DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&record.user_id)
        .bind(content_type)
        .bind(&record.content_identifier)
        .bind(record.subject_key())
        .bind(window_key)
        .bind(to_db_timestamp(now))
        .bind(&record.user_id)
        .bind(content_type)
        .bind(window_key)
        .bind(i64::from(rule.limit))
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?
        .rows_affected()
            == 1;

        let count = Self::distinct_count(&mut tx, &record.user_id, content_type, window_key).await?;

        let outcome = if inserted {
            ConsumeOutcome::Recorded { count }
        } else {
            let owned: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT 1 FROM usage_events
                WHERE user_id = ? AND content_type = ? AND window_key = ? AND subject = ?
                  AND content_identifier = ? AND dedup = 1
                "#,
            )
            .bind(&record.user_id)
            .bind(content_type)
            .bind(window_key)
            .bind(record.subject_key())
            .bind(&record.content_identifier)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unavailable)?;

            if owned.is_some() {
                ConsumeOutcome::AlreadyOwned { count }
            } else {
                ConsumeOutcome::Rejected { count }
            }
        };

        debug!(
            user_id = %record.user_id,
            content_type,
            window_key,
            ?outcome,
            "Dedup usage recorded"
        );
        Ok((tx, outcome))
    }

    async fn try_record_every_event(
        &self,
        record: &UsageRecord,
        rule: &QuotaRule,
        window_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(Transaction<'static, Sqlite>, ConsumeOutcome)> {
        let content_type = rule.content_type.as_str();
        let limit = i64::from(rule.limit);
        let mut tx = self.db.begin().await.map_err(unavailable)?;

        // Increment-with-ceiling; no row comes back when the ceiling is hit
        let incremented: Option<i64> = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO usage_counters (user_id, content_type, window_key, count, updated_at)
            SELECT ?, ?, ?, 1, ?
            WHERE ? > 0
            ON CONFLICT(user_id, content_type, window_key) DO UPDATE SET
                count = usage_counters.count + 1,
                updated_at = excluded.updated_at
            WHERE usage_counters.count < ?
            RETURNING count
            "#,
        )
        .bind(&record.user_id)
        .bind(content_type)
        .bind(window_key)
        .bind(to_db_timestamp(now))
        .bind(limit)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(unavailable)?
        .into_iter()
        .next();

        let outcome = match incremented {
            Some(count) => {
                sqlx::query(
                    r#"
                    INSERT INTO usage_events
                        (id, user_id, content_type, content_identifier, subject, dedup, window_key, accessed_at)
                    VALUES (?, ?, ?, ?, ?, 0, ?, ?)
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&record.user_id)
                .bind(content_type)
                .bind(&record.content_identifier)
                .bind(record.subject_key())
                .bind(window_key)
                .bind(to_db_timestamp(now))
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;

                ConsumeOutcome::Recorded {
                    count: to_count(count),
                }
            }
            None => {
                let count = Self::counter_value(&mut tx, &record.user_id, content_type, window_key).await?;
                ConsumeOutcome::Rejected { count }
            }
        };

        debug!(
            user_id = %record.user_id,
            content_type,
            window_key,
            ?outcome,
            "Counted usage recorded"
        );
        Ok((tx, outcome))
    }

    async fn distinct_count(
        conn: &mut sqlx::SqliteConnection,
        user_id: &str,
        content_type: &str,
        window_key: &str,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM usage_events
            WHERE user_id = ? AND content_type = ? AND window_key = ? AND dedup = 1
            "#,
        )
        .bind(user_id)
        .bind(content_type)
        .bind(window_key)
        .fetch_one(&mut *conn)
        .await
        .map_err(unavailable)?;

        Ok(to_count(count))
    }

    async fn counter_value(
        conn: &mut sqlx::SqliteConnection,
        user_id: &str,
        content_type: &str,
        window_key: &str,
    ) -> Result<u32> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT count FROM usage_counters WHERE user_id = ? AND content_type = ? AND window_key = ?",
        )
        .bind(user_id)
        .bind(content_type)
        .bind(window_key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(unavailable)?;

        Ok(count.map(to_count).unwrap_or(0))
    }
}

#[async_trait]
impl UsageStore for SqliteUsageStore {
    async fn count_consumed(&self, user_id: &str, rule: &QuotaRule, now: DateTime<Utc>) -> Result<u32> {
        let content_type = rule.content_type.as_str();
        let window_key = window_of(rule, now);
        let mut conn = self.db.acquire().await.map_err(unavailable)?;

        match rule.dedup {
            DedupKey::SubjectAndIdentifier => {
                Self::distinct_count(&mut conn, user_id, content_type, &window_key).await
            }
            DedupKey::EveryEvent => {
                Self::counter_value(&mut conn, user_id, content_type, &window_key).await
            }
        }
    }

    async fn try_record(
        &self,
        record: &UsageRecord,
        rule: &QuotaRule,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let window_key = window_of(rule, now);

        match rule.dedup {
            DedupKey::SubjectAndIdentifier => {
                self.commit_within(self.try_record_dedup(record, rule, &window_key, now))
                    .await
            }
            DedupKey::EveryEvent => {
                self.commit_within(self.try_record_every_event(record, rule, &window_key, now))
                    .await
            }
        }
    }
}

/// Window the rule counts in at `now`
fn window_of(rule: &QuotaRule, now: DateTime<Utc>) -> String {
    rule.window_key(now)
        .unwrap_or_else(|| LIFETIME_WINDOW.to_string())
}

fn to_count(n: i64) -> u32 {
    u32::try_from(n.max(0)).unwrap_or(u32::MAX)
}

fn unavailable(e: sqlx::Error) -> EntitlementError {
    EntitlementError::unavailable(Store::Usage, e)
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> Result<UsageEvent> {
    use sqlx::Row;

    let content_type_str: String = row.try_get("content_type").map_err(unavailable)?;
    let content_type = ContentType::parse(&content_type_str).ok_or_else(|| {
        EntitlementError::unavailable(
            Store::Usage,
            format!("invalid content_type: {}", content_type_str),
        )
    })?;

    let accessed_at_str: String = row.try_get("accessed_at").map_err(unavailable)?;
    let accessed_at = from_db_timestamp(&accessed_at_str).ok_or_else(|| {
        EntitlementError::unavailable(
            Store::Usage,
            format!("invalid accessed_at timestamp: {}", accessed_at_str),
        )
    })?;

    let subject: String = row.try_get("subject").map_err(unavailable)?;
    let window_key: String = row.try_get("window_key").map_err(unavailable)?;

    Ok(UsageEvent {
        id: row.try_get("id").map_err(unavailable)?,
        user_id: row.try_get("user_id").map_err(unavailable)?,
        content_type,
        content_identifier: row.try_get("content_identifier").map_err(unavailable)?,
        subject: (!subject.is_empty()).then_some(subject),
        window_key: (window_key != LIFETIME_WINDOW).then_some(window_key),
        accessed_at,
    })
}
