//! Collaborator capabilities consumed by the engine.
//!
//! Ownership and catalog lookups are primary reads: their failures abort the
//! operation. Chat, gamification and rating calls are best-effort and the
//! engine swallows (and logs) their failures at the call site.
use async_trait::async_trait;

use crate::model::{Rating, UserBook};

#[async_trait]
pub trait BookOwnershipValidator: Send + Sync {
    /// Does `user_id` hold library item `book_id`?
    async fn owns(&self, user_id: &str, book_id: &str) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait LibraryCatalog: Send + Sync {
    /// Resolve library items held by `user_id`; unknown ids are left out.
    async fn find_user_books(&self, user_id: &str, ids: &[String])
    -> anyhow::Result<Vec<UserBook>>;
}

#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Existing or new thread between the two users, `None` when chat is unavailable.
    async fn create_or_get_thread(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> anyhow::Result<Option<String>>;
}

#[async_trait]
pub trait GamificationGateway: Send + Sync {
    async fn notify_exchange_created(&self, user_id: &str) -> anyhow::Result<()>;
    async fn notify_exchange_completed(&self, user_id: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait RatingGateway: Send + Sync {
    async fn ratings_for_exchange(&self, exchange_id: &str) -> anyhow::Result<Vec<Rating>>;
}

/// Exchange milestones that earn gamification points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeActivity {
    Created,
    Completed,
}

impl ExchangeActivity {
    pub fn points(self) -> i64 {
        match self {
            ExchangeActivity::Created => 20,
            ExchangeActivity::Completed => 50,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeActivity::Created => "EXCHANGE_CREATED",
            ExchangeActivity::Completed => "EXCHANGE_COMPLETED",
        }
    }
}
