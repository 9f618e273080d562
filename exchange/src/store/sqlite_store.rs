//! SQLite-backed stores for exchanges and ratings.
//!
//! Book id lists are kept as JSON text, timestamps as epoch milliseconds and
//! statuses as their upper-case names. Records are never deleted.
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use std::str::FromStr;

use super::{ExchangeStore, RatingStore};
use crate::model::{Exchange, ExchangeStatus, Rating};

const EXCHANGE_COLUMNS: &str = r#"
  id, requester_id, owner_id, status,
  owner_book_ids_json, requester_book_ids_json, chat_id,
  date_created_ms, date_updated_ms, version
"#;

/// Create the exchange and rating tables if they do not exist yet.
pub async fn ensure_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS exchanges (
  id TEXT PRIMARY KEY,
  requester_id TEXT NOT NULL,
  owner_id TEXT NOT NULL,
  status TEXT NOT NULL,
  owner_book_ids_json TEXT NOT NULL,
  requester_book_ids_json TEXT NOT NULL,
  chat_id TEXT,
  date_created_ms INTEGER NOT NULL,
  date_updated_ms INTEGER NOT NULL,
  version INTEGER NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS user_rates (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  exchange_id TEXT NOT NULL,
  rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
  comment TEXT,
  date_created_ms INTEGER NOT NULL,
  UNIQUE (user_id, exchange_id)
);
"#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_exchanges_requester ON exchanges(requester_id);",
        "CREATE INDEX IF NOT EXISTS idx_exchanges_owner ON exchanges(owner_id);",
        "CREATE INDEX IF NOT EXISTS idx_exchanges_chat ON exchanges(chat_id);",
        "CREATE INDEX IF NOT EXISTS idx_user_rates_exchange ON user_rates(exchange_id);",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}

/// SQLite persistence backend for exchange records.
pub struct SQLiteExchangeStore {
    pool: SqlitePool,
}

impl SQLiteExchangeStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `path` and ensure the schema exists.
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        let pool = SqlitePool::connect(path)
            .await
            .with_context(|| format!("failed to open exchange database at {path}"))?;
        ensure_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn fetch_list(&self, sql: &str, binds: &[&str]) -> anyhow::Result<Vec<Exchange>> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_exchange(&r) {
                Ok(e) => out.push(e),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the listing
                    tracing::warn!(error = %e, "skipping malformed exchange row");
                }
            }
        }

        Ok(out)
    }

    async fn count(&self, sql: &str, user_id: &str) -> anyhow::Result<u64> {
        let row = sqlx::query(sql)
            .bind(user_id)
            .bind(ExchangeStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await?;

        i64_to_u64(row.get::<i64, _>("n"))
    }
}

#[async_trait]
impl ExchangeStore for SQLiteExchangeStore {
    async fn insert(&self, exchange: &Exchange) -> anyhow::Result<()> {
        insert_row(&self.pool, exchange).await
    }

    async fn update(&self, exchange: &Exchange, expected_version: u64) -> anyhow::Result<bool> {
        update_row(&self.pool, exchange, expected_version).await
    }

    async fn close_and_insert(
        &self,
        closed: &Exchange,
        expected_version: u64,
        successor: &Exchange,
    ) -> anyhow::Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open exchange transaction")?;

        if !update_row(&mut *tx, closed, expected_version).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        if let Err(e) = insert_row(&mut *tx, successor).await {
            tx.rollback().await?;
            return Err(e);
        }

        tx.commit()
            .await
            .with_context(|| format!("failed to commit successor of exchange {}", closed.id))?;
        Ok(true)
    }

    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<Exchange>> {
        let sql = format!("SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE id = ?;");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_exchange(&r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_participant(
        &self,
        user_id: &str,
        status: Option<ExchangeStatus>,
    ) -> anyhow::Result<Vec<Exchange>> {
        match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {EXCHANGE_COLUMNS} FROM exchanges
                     WHERE (requester_id = ? OR owner_id = ?) AND status = ?
                     ORDER BY date_created_ms DESC, id DESC;"
                );
                self.fetch_list(&sql, &[user_id, user_id, status.as_str()])
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {EXCHANGE_COLUMNS} FROM exchanges
                     WHERE requester_id = ? OR owner_id = ?
                     ORDER BY date_created_ms DESC, id DESC;"
                );
                self.fetch_list(&sql, &[user_id, user_id]).await
            }
        }
    }

    async fn find_by_requester(&self, user_id: &str) -> anyhow::Result<Vec<Exchange>> {
        let sql = format!(
            "SELECT {EXCHANGE_COLUMNS} FROM exchanges
             WHERE requester_id = ?
             ORDER BY date_created_ms DESC, id DESC;"
        );
        self.fetch_list(&sql, &[user_id]).await
    }

    async fn find_by_owner(&self, user_id: &str) -> anyhow::Result<Vec<Exchange>> {
        let sql = format!(
            "SELECT {EXCHANGE_COLUMNS} FROM exchanges
             WHERE owner_id = ?
             ORDER BY date_created_ms DESC, id DESC;"
        );
        self.fetch_list(&sql, &[user_id]).await
    }

    async fn find_by_chat(&self, chat_id: &str) -> anyhow::Result<Vec<Exchange>> {
        let sql = format!(
            "SELECT {EXCHANGE_COLUMNS} FROM exchanges
             WHERE chat_id = ?
             ORDER BY date_created_ms ASC, version DESC, id ASC;"
        );
        self.fetch_list(&sql, &[chat_id]).await
    }

    async fn count_pending_by_requester(&self, user_id: &str) -> anyhow::Result<u64> {
        self.count(
            "SELECT COUNT(*) AS n FROM exchanges WHERE requester_id = ? AND status = ?;",
            user_id,
        )
        .await
    }

    async fn count_pending_by_owner(&self, user_id: &str) -> anyhow::Result<u64> {
        self.count(
            "SELECT COUNT(*) AS n FROM exchanges WHERE owner_id = ? AND status = ?;",
            user_id,
        )
        .await
    }
}

/// SQLite persistence backend for ratings.
pub struct SQLiteRatingStore {
    pool: SqlitePool,
}

impl SQLiteRatingStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_list(&self, sql: &str, value: &str) -> anyhow::Result<Vec<Rating>> {
        let rows = sqlx::query(sql).bind(value).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_rating).collect()
    }
}

#[async_trait]
impl RatingStore for SQLiteRatingStore {
    async fn insert(&self, rating: &Rating) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO user_rates (id, user_id, exchange_id, rating, comment, date_created_ms)
VALUES (?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(&rating.id)
        .bind(&rating.user_id)
        .bind(&rating.exchange_id)
        .bind(i64::from(rating.score))
        .bind(&rating.comment)
        .bind(rating.date_created.timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert rating {}", rating.id))?;

        Ok(())
    }

    async fn exists_for(&self, user_id: &str, exchange_id: &str) -> anyhow::Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM user_rates WHERE user_id = ? AND exchange_id = ?;",
        )
        .bind(user_id)
        .bind(exchange_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("n") > 0)
    }

    async fn find_by_exchange(&self, exchange_id: &str) -> anyhow::Result<Vec<Rating>> {
        self.fetch_list(
            "SELECT * FROM user_rates WHERE exchange_id = ? ORDER BY date_created_ms DESC, id DESC;",
            exchange_id,
        )
        .await
    }

    async fn find_by_author(&self, user_id: &str) -> anyhow::Result<Vec<Rating>> {
        self.fetch_list(
            "SELECT * FROM user_rates WHERE user_id = ? ORDER BY date_created_ms DESC, id DESC;",
            user_id,
        )
        .await
    }
}

/* =========================
Row writes
========================= */

async fn insert_row<'e, E>(executor: E, exchange: &Exchange) -> anyhow::Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
INSERT INTO exchanges (
  id, requester_id, owner_id, status,
  owner_book_ids_json, requester_book_ids_json, chat_id,
  date_created_ms, date_updated_ms, version
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
    )
    .bind(&exchange.id)
    .bind(&exchange.requester_id)
    .bind(&exchange.owner_id)
    .bind(exchange.status.as_str())
    .bind(serde_json::to_string(&exchange.owner_book_ids)?)
    .bind(serde_json::to_string(&exchange.requester_book_ids)?)
    .bind(&exchange.chat_id)
    .bind(exchange.date_created.timestamp_millis())
    .bind(exchange.date_updated.timestamp_millis())
    .bind(u64_to_i64(exchange.version)?)
    .execute(executor)
    .await
    .with_context(|| format!("failed to insert exchange {}", exchange.id))?;

    Ok(())
}

async fn update_row<'e, E>(
    executor: E,
    exchange: &Exchange,
    expected_version: u64,
) -> anyhow::Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
UPDATE exchanges
SET requester_id = ?, owner_id = ?, status = ?,
    owner_book_ids_json = ?, requester_book_ids_json = ?, chat_id = ?,
    date_updated_ms = ?, version = ?
WHERE id = ? AND version = ?;
"#,
    )
    .bind(&exchange.requester_id)
    .bind(&exchange.owner_id)
    .bind(exchange.status.as_str())
    .bind(serde_json::to_string(&exchange.owner_book_ids)?)
    .bind(serde_json::to_string(&exchange.requester_book_ids)?)
    .bind(&exchange.chat_id)
    .bind(exchange.date_updated.timestamp_millis())
    .bind(u64_to_i64(exchange.version)?)
    .bind(&exchange.id)
    .bind(u64_to_i64(expected_version)?)
    .execute(executor)
    .await
    .with_context(|| format!("failed to update exchange {}", exchange.id))?;

    Ok(result.rows_affected() == 1)
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_exchange(r: &SqliteRow) -> anyhow::Result<Exchange> {
    let id: String = r.get("id");

    let status_str: String = r.get("status");
    let status = ExchangeStatus::from_str(&status_str)
        .with_context(|| format!("invalid status on exchange {id}"))?;

    let owner_json: String = r.get("owner_book_ids_json");
    let requester_json: String = r.get("requester_book_ids_json");

    Ok(Exchange {
        requester_id: r.get("requester_id"),
        owner_id: r.get("owner_id"),
        owner_book_ids: serde_json::from_str(&owner_json)
            .with_context(|| format!("invalid owner book ids on exchange {id}"))?,
        requester_book_ids: serde_json::from_str(&requester_json)
            .with_context(|| format!("invalid requester book ids on exchange {id}"))?,
        chat_id: r.get("chat_id"),
        status,
        date_created: ms_to_datetime(r.get("date_created_ms"))?,
        date_updated: ms_to_datetime(r.get("date_updated_ms"))?,
        version: i64_to_u64(r.get("version"))?,
        id,
    })
}

fn row_to_rating(r: &SqliteRow) -> anyhow::Result<Rating> {
    let score: i64 = r.get("rating");

    Ok(Rating {
        id: r.get("id"),
        user_id: r.get("user_id"),
        exchange_id: r.get("exchange_id"),
        score: u8::try_from(score).map_err(|_| anyhow!("rating out of range: {score}"))?,
        comment: r.get("comment"),
        date_created: ms_to_datetime(r.get("date_created_ms"))?,
    })
}

fn ms_to_datetime(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}

fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        return Err(anyhow!("negative i64 where u64 expected: {v}"));
    }
    Ok(v as u64)
}

fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        return Err(anyhow!("u64 too large for i64: {v}"));
    }
    Ok(v as i64)
}
