use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use exchange::gateway::ChatGateway;

/// Direct-message threads between two users. One thread per pair,
/// regardless of who opened it, enforced by a unique index on the pair.
pub struct SqlxChatRepository {
    pool: SqlitePool,
}

impl SqlxChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_between(&self, a: &str, b: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query(
            r#"
SELECT id FROM chats
WHERE (user1_id = ? AND user2_id = ?) OR (user1_id = ? AND user2_id = ?)
ORDER BY date_created_ms ASC
LIMIT 1;
"#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("chat lookup failed for {a}/{b}"))?;

        Ok(row.map(|r| r.get::<String, _>("id")))
    }
}

#[async_trait]
impl ChatGateway for SqlxChatRepository {
    async fn create_or_get_thread(&self, a: &str, b: &str) -> anyhow::Result<Option<String>> {
        if let Some(id) = self.find_between(a, b).await? {
            debug!(chat_id = %id, "reusing chat thread");
            return Ok(Some(id));
        }

        let id = Uuid::new_v4().to_string();
        let now_ms = exchange::model::now().timestamp_millis();

        // A concurrent opener may win the pair index; then read its thread back.
        let inserted = sqlx::query(
            r#"
INSERT INTO chats (id, user1_id, user2_id, date_created_ms, date_updated_ms)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT DO NOTHING;
"#,
        )
        .bind(&id)
        .bind(a)
        .bind(b)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .context("failed to insert chat thread")?
        .rows_affected();

        if inserted == 0 {
            let existing = self.find_between(a, b).await?;
            debug!(chat_id = ?existing, "chat thread opened concurrently");
            return Ok(existing);
        }

        info!(chat_id = %id, user1_id = a, user2_id = b, "chat thread opened");
        Ok(Some(id))
    }
}
