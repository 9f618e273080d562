use sqlx::SqlitePool;

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Exchanges + ratings
    exchange::store::sqlite_store::ensure_schema(pool).await?;

    // Catalog
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS books (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  author TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    // Library items
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS user_books (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  book_id TEXT NOT NULL REFERENCES books(id),
  is_favorite INTEGER NOT NULL DEFAULT 0 CHECK (is_favorite IN (0,1)),
  wants_to_exchange INTEGER NOT NULL DEFAULT 0 CHECK (wants_to_exchange IN (0,1))
);
"#,
    )
    .execute(pool)
    .await?;

    // Chat threads
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS chats (
  id TEXT PRIMARY KEY,
  user1_id TEXT NOT NULL,
  user2_id TEXT NOT NULL,
  date_created_ms BIGINT NOT NULL,
  date_updated_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Gamification
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS gamification_profiles (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL UNIQUE,
  total_points BIGINT NOT NULL DEFAULT 0,
  exchanges_created BIGINT NOT NULL DEFAULT 0,
  exchanges_completed BIGINT NOT NULL DEFAULT 0,
  last_activity_ms BIGINT,
  date_created_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_user_books_user ON user_books(user_id);",
        // One thread per pair, whichever user opened it.
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_chats_pair ON chats(MIN(user1_id, user2_id), MAX(user1_id, user2_id));",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
