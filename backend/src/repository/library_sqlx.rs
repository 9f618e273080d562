use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use exchange::gateway::{BookOwnershipValidator, LibraryCatalog};
use exchange::model::UserBook;

/// Library items (`user_books`) joined with their catalog entry.
///
/// Items are addressed by their `user_books.id`, both for ownership checks
/// and for resolution.
pub struct SqlxLibraryRepository {
    pool: SqlitePool,
}

impl SqlxLibraryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookOwnershipValidator for SqlxLibraryRepository {
    async fn owns(&self, user_id: &str, book_id: &str) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM user_books WHERE id = ? AND user_id = ?;")
            .bind(book_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("ownership lookup failed for {user_id}/{book_id}"))?;

        Ok(row.get::<i64, _>("n") > 0)
    }
}

#[async_trait]
impl LibraryCatalog for SqlxLibraryRepository {
    async fn find_user_books(&self, user_id: &str, ids: &[String]) -> anyhow::Result<Vec<UserBook>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            r#"
SELECT
  ub.id, ub.user_id, ub.book_id, b.title, b.author,
  ub.is_favorite, ub.wants_to_exchange
FROM user_books ub
JOIN books b ON b.id = ub.book_id
WHERE ub.user_id = ? AND ub.id IN ({placeholders});
"#
        );

        let mut query = sqlx::query(&sql).bind(user_id);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to resolve library items of {user_id}"))?;

        let mut books = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_user_book(&r) {
                Ok(b) => books.push(b),
                Err(e) => tracing::warn!(error = %e, "skipping malformed library row"),
            }
        }

        // Keep the order the exchange lists them in.
        books.sort_by_key(|b| ids.iter().position(|id| *id == b.id));

        if books.len() < ids.len() {
            tracing::debug!(
                user_id,
                requested = ids.len(),
                resolved = books.len(),
                "some library items no longer resolve"
            );
        }

        Ok(books)
    }
}

fn row_to_user_book(r: &SqliteRow) -> anyhow::Result<UserBook> {
    Ok(UserBook {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        book_id: r.try_get("book_id")?,
        title: r.try_get("title")?,
        author: r.try_get("author")?,
        favorite: r.try_get::<i64, _>("is_favorite")? != 0,
        wants_to_exchange: r.try_get::<i64, _>("wants_to_exchange")? != 0,
    })
}
