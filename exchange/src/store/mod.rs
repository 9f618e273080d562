pub mod sqlite_store;

use async_trait::async_trait;

use crate::model::{Exchange, ExchangeStatus, Rating};

/// Persistence of exchange records, keyed by exchange id.
///
/// Listing methods return newest first unless stated otherwise.
#[async_trait]
pub trait ExchangeStore: Send + Sync {
    /// Persist a record that does not exist yet.
    async fn insert(&self, exchange: &Exchange) -> anyhow::Result<()>;

    /// Overwrite an existing record only if its stored version is still
    /// `expected_version`. Returns `false` on a version mismatch.
    async fn update(&self, exchange: &Exchange, expected_version: u64) -> anyhow::Result<bool>;

    /// Write `closed` (compare-and-swap on `expected_version`) and insert
    /// `successor` as one unit: either both land or neither does.
    /// Returns `false` on a version mismatch, with nothing written.
    async fn close_and_insert(
        &self,
        closed: &Exchange,
        expected_version: u64,
        successor: &Exchange,
    ) -> anyhow::Result<bool>;

    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<Exchange>>;

    /// Records where the user is requester or owner, optionally filtered by status.
    async fn find_by_participant(
        &self,
        user_id: &str,
        status: Option<ExchangeStatus>,
    ) -> anyhow::Result<Vec<Exchange>>;

    async fn find_by_requester(&self, user_id: &str) -> anyhow::Result<Vec<Exchange>>;

    async fn find_by_owner(&self, user_id: &str) -> anyhow::Result<Vec<Exchange>>;

    /// Every record sharing a chat thread, oldest first.
    async fn find_by_chat(&self, chat_id: &str) -> anyhow::Result<Vec<Exchange>>;

    async fn count_pending_by_requester(&self, user_id: &str) -> anyhow::Result<u64>;

    async fn count_pending_by_owner(&self, user_id: &str) -> anyhow::Result<u64>;
}

/// Persistence of post-exchange ratings.
#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn insert(&self, rating: &Rating) -> anyhow::Result<()>;

    async fn exists_for(&self, user_id: &str, exchange_id: &str) -> anyhow::Result<bool>;

    /// Newest first.
    async fn find_by_exchange(&self, exchange_id: &str) -> anyhow::Result<Vec<Rating>>;

    /// Ratings authored by `user_id`, newest first.
    async fn find_by_author(&self, user_id: &str) -> anyhow::Result<Vec<Rating>>;
}
