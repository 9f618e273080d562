//! Book exchange negotiation engine.
//!
//! Owns every state transition of an exchange: creation, the target-keyed
//! permission matrix, reject-and-respawn counter-offers and read-time
//! enrichment. Storage failures abort an operation; chat, gamification and
//! rating failures are logged and swallowed.
use std::sync::Arc;
use std::time::Duration;

use common::logger::warn_if_slow;
use tracing::{debug, info, instrument, warn};

use crate::error::ExchangeError;
use crate::gateway::{
    BookOwnershipValidator, ChatGateway, ExchangeActivity, GamificationGateway, LibraryCatalog,
    RatingGateway,
};
use crate::model::{Exchange, ExchangeStatus, ExchangeView, UserBook};
use crate::store::ExchangeStore;

const DEFAULT_SLOW_STORE_THRESHOLD: Duration = Duration::from_millis(100);

/// The services the engine calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub ownership: Arc<dyn BookOwnershipValidator>,
    pub catalog: Arc<dyn LibraryCatalog>,
    pub chat: Arc<dyn ChatGateway>,
    pub gamification: Arc<dyn GamificationGateway>,
    pub ratings: Arc<dyn RatingGateway>,
}

pub struct ExchangeEngine {
    store: Arc<dyn ExchangeStore>,
    collaborators: Collaborators,
    slow_store_threshold: Duration,
}

impl ExchangeEngine {
    pub fn new(store: Arc<dyn ExchangeStore>, collaborators: Collaborators) -> Self {
        Self {
            store,
            collaborators,
            slow_store_threshold: DEFAULT_SLOW_STORE_THRESHOLD,
        }
    }

    /// Store calls slower than `threshold` are reported on the `performance` target.
    pub fn with_slow_store_threshold(mut self, threshold: Duration) -> Self {
        self.slow_store_threshold = threshold;
        self
    }

    /* =========================
    Negotiation
    ========================= */

    /// Propose a trade from `requester_id` to `owner_id`.
    ///
    /// Returns `Ok(None)` for a self-trade or when either side offers an item
    /// it does not hold.
    #[instrument(
        skip(self, owner_book_ids, requester_book_ids),
        target = "engine",
        fields(requester_id = %requester_id, owner_id = %owner_id)
    )]
    pub async fn create_exchange(
        &self,
        requester_id: &str,
        owner_id: &str,
        owner_book_ids: Vec<String>,
        requester_book_ids: Vec<String>,
    ) -> Result<Option<Exchange>, ExchangeError> {
        if requester_id == owner_id {
            warn!("user cannot create an exchange with themselves");
            return Ok(None);
        }

        if !self.holds_all(owner_id, &owner_book_ids).await?
            || !self.holds_all(requester_id, &requester_book_ids).await?
        {
            warn!("invalid books provided for exchange");
            return Ok(None);
        }

        let chat_id = self.open_chat(requester_id, owner_id).await;

        let exchange = Exchange::propose(
            requester_id,
            owner_id,
            owner_book_ids,
            requester_book_ids,
            chat_id,
        );
        self.persist_new(&exchange).await?;

        self.award(ExchangeActivity::Created, requester_id).await;

        info!(exchange_id = %exchange.id, chat_id = ?exchange.chat_id, "exchange created");
        Ok(Some(exchange))
    }

    /// Move an exchange to `target_status` on behalf of `acting_user_id`.
    ///
    /// `NotFound` when the id is unknown, `Ok(None)` when the permission
    /// matrix refuses the transition.
    #[instrument(skip(self), target = "engine")]
    pub async fn update_status(
        &self,
        exchange_id: &str,
        acting_user_id: &str,
        target_status: ExchangeStatus,
    ) -> Result<Option<Exchange>, ExchangeError> {
        let mut exchange = self.load(exchange_id).await?;

        if !exchange.can_transition(acting_user_id, target_status) {
            warn!(current = %exchange.status, "status transition not permitted");
            return Ok(None);
        }

        let from = exchange.status;
        let expected_version = exchange.transition_to(target_status);
        self.persist_update(&exchange, expected_version).await?;

        info!(from = %from, to = %target_status, version = exchange.version, "exchange status updated");

        if target_status == ExchangeStatus::Completed {
            for user_id in [&exchange.requester_id, &exchange.owner_id] {
                self.award(ExchangeActivity::Completed, user_id).await;
            }
        }

        Ok(Some(exchange))
    }

    /// Answer a PENDING proposal with a new one from its owner.
    ///
    /// The original is closed as REJECTED and a new PENDING exchange is
    /// created with the roles swapped and the same chat thread, in one store
    /// write: if either half fails the original stays PENDING. Offering
    /// items the parties do not hold is a `BadRequest`.
    #[instrument(
        skip(self, owner_book_ids, requester_book_ids),
        target = "engine",
        fields(exchange_id = %exchange_id, acting_user_id = %acting_user_id)
    )]
    pub async fn create_counter_offer(
        &self,
        exchange_id: &str,
        acting_user_id: &str,
        owner_book_ids: Vec<String>,
        requester_book_ids: Vec<String>,
    ) -> Result<Option<Exchange>, ExchangeError> {
        let mut original = self.load(exchange_id).await?;

        if original.owner_id != acting_user_id {
            warn!(owner_id = %original.owner_id, "only the owner can make a counter offer");
            return Ok(None);
        }

        if original.status != ExchangeStatus::Pending {
            warn!(current = %original.status, "counter offers need a pending exchange");
            return Ok(None);
        }

        // Roles invert: the current owner becomes the new requester.
        if !self.holds_all(&original.owner_id, &requester_book_ids).await?
            || !self.holds_all(&original.requester_id, &owner_book_ids).await?
        {
            return Err(ExchangeError::BadRequest(
                "invalid books provided for counter offer".to_string(),
            ));
        }

        let counter = original.counter_proposal(owner_book_ids, requester_book_ids);

        let expected_version = original.transition_to(ExchangeStatus::Rejected);
        let written = warn_if_slow("db_counter_exchange", self.slow_store_threshold, async {
            self.store
                .close_and_insert(&original, expected_version, &counter)
                .await
        })
        .await?;
        if !written {
            return Err(Self::conflict(&original, expected_version));
        }

        info!(counter_id = %counter.id, chat_id = ?counter.chat_id, "counter offer created");
        Ok(Some(counter))
    }

    /* =========================
    Queries
    ========================= */

    /// Exchange with its books and, once completed, both participants' ratings.
    #[instrument(skip(self), target = "engine", fields(exchange_id = %exchange_id))]
    pub async fn get_exchange_by_id(
        &self,
        exchange_id: &str,
    ) -> Result<Option<ExchangeView>, ExchangeError> {
        let Some(exchange) = self.find(exchange_id).await? else {
            debug!("exchange lookup returned no results");
            return Ok(None);
        };

        let mut view = self.enrich(exchange).await?;

        if view.exchange.status == ExchangeStatus::Completed {
            match self
                .collaborators
                .ratings
                .ratings_for_exchange(exchange_id)
                .await
            {
                Ok(ratings) => view.attach_ratings(ratings),
                Err(e) => warn!(error = ?e, "rating lookup failed; returning exchange unrated"),
            }
        }

        Ok(Some(view))
    }

    pub async fn get_user_exchanges(
        &self,
        user_id: &str,
    ) -> Result<Vec<ExchangeView>, ExchangeError> {
        debug!(user_id, "listing exchanges for user");
        let exchanges = self.store.find_by_participant(user_id, None).await?;
        self.enrich_all(exchanges).await
    }

    pub async fn get_user_exchanges_by_status(
        &self,
        user_id: &str,
        status: ExchangeStatus,
    ) -> Result<Vec<ExchangeView>, ExchangeError> {
        debug!(user_id, status = %status, "listing exchanges for user by status");
        let exchanges = self.store.find_by_participant(user_id, Some(status)).await?;
        self.enrich_all(exchanges).await
    }

    pub async fn get_exchanges_as_requester(
        &self,
        user_id: &str,
    ) -> Result<Vec<ExchangeView>, ExchangeError> {
        let exchanges = self.store.find_by_requester(user_id).await?;
        self.enrich_all(exchanges).await
    }

    pub async fn get_exchanges_as_owner(
        &self,
        user_id: &str,
    ) -> Result<Vec<ExchangeView>, ExchangeError> {
        let exchanges = self.store.find_by_owner(user_id).await?;
        self.enrich_all(exchanges).await
    }

    pub async fn get_pending_exchanges_count(&self, user_id: &str) -> Result<u64, ExchangeError> {
        let as_requester = self.store.count_pending_by_requester(user_id).await?;
        let as_owner = self.store.count_pending_by_owner(user_id).await?;
        Ok(as_requester + as_owner)
    }

    /// Every exchange sharing `exchange_id`'s chat thread, oldest first.
    ///
    /// Counter-offers inherit the chat, so this covers every round. When the
    /// chat service keeps one thread per user pair (as the SQLite repository
    /// does), later independent proposals between the same two users land in
    /// the same list: it is the pair's trading history, not a single chain.
    pub async fn get_negotiation_thread(
        &self,
        exchange_id: &str,
    ) -> Result<Option<Vec<Exchange>>, ExchangeError> {
        let Some(exchange) = self.find(exchange_id).await? else {
            return Ok(None);
        };

        match exchange.chat_id.as_deref() {
            Some(chat_id) => Ok(Some(self.store.find_by_chat(chat_id).await?)),
            None => Ok(Some(vec![exchange])),
        }
    }

    /* =========================
    Helpers
    ========================= */

    async fn find(&self, exchange_id: &str) -> anyhow::Result<Option<Exchange>> {
        warn_if_slow("db_find_exchange", self.slow_store_threshold, async {
            self.store.find_by_id(exchange_id).await
        })
        .await
    }

    async fn load(&self, exchange_id: &str) -> Result<Exchange, ExchangeError> {
        self.find(exchange_id).await?.ok_or_else(|| {
            warn!(exchange_id, "exchange not found");
            ExchangeError::NotFound(exchange_id.to_string())
        })
    }

    async fn persist_new(&self, exchange: &Exchange) -> anyhow::Result<()> {
        warn_if_slow("db_insert_exchange", self.slow_store_threshold, async {
            self.store.insert(exchange).await
        })
        .await
    }

    async fn persist_update(
        &self,
        exchange: &Exchange,
        expected_version: u64,
    ) -> Result<(), ExchangeError> {
        let written = warn_if_slow("db_update_exchange", self.slow_store_threshold, async {
            self.store.update(exchange, expected_version).await
        })
        .await?;

        if !written {
            return Err(Self::conflict(exchange, expected_version));
        }
        Ok(())
    }

    fn conflict(exchange: &Exchange, expected_version: u64) -> ExchangeError {
        warn!(exchange_id = %exchange.id, expected_version, "exchange version moved underneath us");
        ExchangeError::Conflict {
            id: exchange.id.clone(),
            expected_version,
        }
    }

    async fn holds_all(&self, user_id: &str, book_ids: &[String]) -> anyhow::Result<bool> {
        for book_id in book_ids {
            if !self.collaborators.ownership.owns(user_id, book_id).await? {
                debug!(user_id, book_id = %book_id, "library item not held by user");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn open_chat(&self, requester_id: &str, owner_id: &str) -> Option<String> {
        match self
            .collaborators
            .chat
            .create_or_get_thread(requester_id, owner_id)
            .await
        {
            Ok(Some(chat_id)) => Some(chat_id),
            Ok(None) => {
                warn!("chat unavailable; exchange proceeds without a thread");
                None
            }
            Err(e) => {
                warn!(error = ?e, "chat gateway failed; exchange proceeds without a thread");
                None
            }
        }
    }

    async fn award(&self, activity: ExchangeActivity, user_id: &str) {
        let gamification = &self.collaborators.gamification;
        let result = match activity {
            ExchangeActivity::Created => gamification.notify_exchange_created(user_id).await,
            ExchangeActivity::Completed => gamification.notify_exchange_completed(user_id).await,
        };

        if let Err(e) = result {
            warn!(
                error = ?e,
                user_id,
                activity = activity.as_str(),
                "gamification notification failed"
            );
        }
    }

    async fn enrich(&self, exchange: Exchange) -> anyhow::Result<ExchangeView> {
        let owner_books = self
            .resolve_books(&exchange.owner_id, &exchange.owner_book_ids)
            .await?;
        let requester_books = self
            .resolve_books(&exchange.requester_id, &exchange.requester_book_ids)
            .await?;

        let mut view = ExchangeView::bare(exchange);
        view.owner_books = owner_books;
        view.requester_books = requester_books;
        Ok(view)
    }

    async fn enrich_all(&self, exchanges: Vec<Exchange>) -> Result<Vec<ExchangeView>, ExchangeError> {
        let mut views = Vec::with_capacity(exchanges.len());
        for exchange in exchanges {
            views.push(self.enrich(exchange).await?);
        }
        Ok(views)
    }

    async fn resolve_books(&self, user_id: &str, ids: &[String]) -> anyhow::Result<Vec<UserBook>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.collaborators.catalog.find_user_books(user_id, ids).await
    }
}
