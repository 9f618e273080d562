#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use exchange::engine::{Collaborators, ExchangeEngine};
use exchange::gateway::{
    BookOwnershipValidator, ChatGateway, ExchangeActivity, GamificationGateway, LibraryCatalog,
    RatingGateway,
};
use exchange::model::{Exchange, ExchangeStatus, Rating, UserBook};
use exchange::store::{ExchangeStore, RatingStore};

/* =========================
Exchange store
========================= */

#[derive(Default)]
pub struct InMemoryExchangeStore {
    pub map: Arc<Mutex<HashMap<String, Exchange>>>,
    /// Every successful insert/update, in call order.
    pub writes: Arc<Mutex<Vec<Exchange>>>,
    pub fail_writes: AtomicBool,
    /// Simulates a concurrent writer: every compare-and-swap misses.
    pub stale_updates: AtomicBool,
    /// Only inserts fail; updates still go through.
    pub fail_inserts: AtomicBool,
}

impl InMemoryExchangeStore {
    pub async fn seed(&self, exchange: Exchange) {
        self.map.lock().await.insert(exchange.id.clone(), exchange);
    }

    pub async fn get(&self, id: &str) -> Option<Exchange> {
        self.map.lock().await.get(id).cloned()
    }

    pub async fn write_count(&self) -> usize {
        self.writes.lock().await.len()
    }

    async fn list<F>(&self, keep: F) -> Vec<Exchange>
    where
        F: Fn(&Exchange) -> bool,
    {
        let mut out: Vec<Exchange> = self
            .map
            .lock()
            .await
            .values()
            .filter(|e| keep(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.date_created
                .cmp(&a.date_created)
                .then_with(|| b.id.cmp(&a.id))
        });
        out
    }

    fn check_insertable(&self) -> anyhow::Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            anyhow::bail!("insert rejected");
        }
        Ok(())
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeStore for InMemoryExchangeStore {
    async fn insert(&self, exchange: &Exchange) -> anyhow::Result<()> {
        self.check_writable()?;
        self.check_insertable()?;
        let mut map = self.map.lock().await;
        if map.contains_key(&exchange.id) {
            anyhow::bail!("duplicate exchange id {}", exchange.id);
        }
        map.insert(exchange.id.clone(), exchange.clone());
        self.writes.lock().await.push(exchange.clone());
        Ok(())
    }

    async fn update(&self, exchange: &Exchange, expected_version: u64) -> anyhow::Result<bool> {
        self.check_writable()?;
        if self.stale_updates.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut map = self.map.lock().await;
        match map.get(&exchange.id) {
            Some(stored) if stored.version == expected_version => {
                map.insert(exchange.id.clone(), exchange.clone());
                self.writes.lock().await.push(exchange.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn close_and_insert(
        &self,
        closed: &Exchange,
        expected_version: u64,
        successor: &Exchange,
    ) -> anyhow::Result<bool> {
        self.check_writable()?;
        if self.stale_updates.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut map = self.map.lock().await;
        match map.get(&closed.id) {
            Some(stored) if stored.version == expected_version => {}
            _ => return Ok(false),
        }
        // Validate the insert half before touching anything.
        self.check_insertable()?;
        if map.contains_key(&successor.id) {
            anyhow::bail!("duplicate exchange id {}", successor.id);
        }

        map.insert(closed.id.clone(), closed.clone());
        map.insert(successor.id.clone(), successor.clone());
        let mut writes = self.writes.lock().await;
        writes.push(closed.clone());
        writes.push(successor.clone());
        Ok(true)
    }

    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<Exchange>> {
        Ok(self.get(id).await)
    }

    async fn find_by_participant(
        &self,
        user_id: &str,
        status: Option<ExchangeStatus>,
    ) -> anyhow::Result<Vec<Exchange>> {
        Ok(self
            .list(|e| e.is_participant(user_id) && status.is_none_or(|s| e.status == s))
            .await)
    }

    async fn find_by_requester(&self, user_id: &str) -> anyhow::Result<Vec<Exchange>> {
        Ok(self.list(|e| e.requester_id == user_id).await)
    }

    async fn find_by_owner(&self, user_id: &str) -> anyhow::Result<Vec<Exchange>> {
        Ok(self.list(|e| e.owner_id == user_id).await)
    }

    async fn find_by_chat(&self, chat_id: &str) -> anyhow::Result<Vec<Exchange>> {
        let mut out = self.list(|e| e.chat_id.as_deref() == Some(chat_id)).await;
        out.reverse();
        Ok(out)
    }

    async fn count_pending_by_requester(&self, user_id: &str) -> anyhow::Result<u64> {
        let n = self
            .list(|e| e.requester_id == user_id && e.status == ExchangeStatus::Pending)
            .await
            .len();
        Ok(n as u64)
    }

    async fn count_pending_by_owner(&self, user_id: &str) -> anyhow::Result<u64> {
        let n = self
            .list(|e| e.owner_id == user_id && e.status == ExchangeStatus::Pending)
            .await
            .len();
        Ok(n as u64)
    }
}

/* =========================
Collaborators
========================= */

/// Ownership table plus call log, standing in for the user library.
#[derive(Default)]
pub struct MockLibrary {
    pub owned: Mutex<HashSet<(String, String)>>,
    pub ownership_calls: AtomicUsize,
    pub catalog_calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockLibrary {
    pub async fn give(&self, user_id: &str, book_ids: &[&str]) {
        let mut owned = self.owned.lock().await;
        for id in book_ids {
            owned.insert((user_id.to_string(), id.to_string()));
        }
    }

    pub fn total_calls(&self) -> usize {
        self.ownership_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookOwnershipValidator for MockLibrary {
    async fn owns(&self, user_id: &str, book_id: &str) -> anyhow::Result<bool> {
        self.ownership_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .owned
            .lock()
            .await
            .contains(&(user_id.to_string(), book_id.to_string())))
    }
}

#[async_trait]
impl LibraryCatalog for MockLibrary {
    async fn find_user_books(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> anyhow::Result<Vec<UserBook>> {
        self.catalog_calls
            .lock()
            .await
            .push((user_id.to_string(), ids.to_vec()));

        Ok(ids
            .iter()
            .map(|id| UserBook {
                id: id.clone(),
                user_id: user_id.to_string(),
                book_id: format!("book-{id}"),
                title: format!("Title of {id}"),
                author: None,
                favorite: false,
                wants_to_exchange: true,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MockChat {
    pub thread: Option<String>,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl MockChat {
    pub fn with_thread(thread: &str) -> Self {
        Self {
            thread: Some(thread.to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ChatGateway for MockChat {
    async fn create_or_get_thread(
        &self,
        _user_a: &str,
        _user_b: &str,
    ) -> anyhow::Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("chat service down");
        }
        Ok(self.thread.clone())
    }
}

#[derive(Default)]
pub struct RecordingGamification {
    pub events: Mutex<Vec<(ExchangeActivity, String)>>,
    /// Users whose notifications fail.
    pub failing_users: HashSet<String>,
}

impl RecordingGamification {
    pub fn failing_for(users: &[&str]) -> Self {
        Self {
            failing_users: users.iter().map(|u| u.to_string()).collect(),
            ..Self::default()
        }
    }

    pub async fn events(&self) -> Vec<(ExchangeActivity, String)> {
        self.events.lock().await.clone()
    }

    async fn record(&self, activity: ExchangeActivity, user_id: &str) -> anyhow::Result<()> {
        self.events
            .lock()
            .await
            .push((activity, user_id.to_string()));
        if self.failing_users.contains(user_id) {
            anyhow::bail!("points service rejected {user_id}");
        }
        Ok(())
    }
}

#[async_trait]
impl GamificationGateway for RecordingGamification {
    async fn notify_exchange_created(&self, user_id: &str) -> anyhow::Result<()> {
        self.record(ExchangeActivity::Created, user_id).await
    }

    async fn notify_exchange_completed(&self, user_id: &str) -> anyhow::Result<()> {
        self.record(ExchangeActivity::Completed, user_id).await
    }
}

#[derive(Default)]
pub struct StubRatings {
    pub ratings: Vec<Rating>,
    pub fail: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl RatingGateway for StubRatings {
    async fn ratings_for_exchange(&self, exchange_id: &str) -> anyhow::Result<Vec<Rating>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("ratings unavailable");
        }
        Ok(self
            .ratings
            .iter()
            .filter(|r| r.exchange_id == exchange_id)
            .cloned()
            .collect())
    }
}

/* =========================
Rating store
========================= */

#[derive(Default)]
pub struct InMemoryRatingStore {
    pub ratings: Mutex<Vec<Rating>>,
}

#[async_trait]
impl RatingStore for InMemoryRatingStore {
    async fn insert(&self, rating: &Rating) -> anyhow::Result<()> {
        let mut ratings = self.ratings.lock().await;
        if ratings
            .iter()
            .any(|r| r.user_id == rating.user_id && r.exchange_id == rating.exchange_id)
        {
            anyhow::bail!("duplicate rating for {}", rating.exchange_id);
        }
        ratings.push(rating.clone());
        Ok(())
    }

    async fn exists_for(&self, user_id: &str, exchange_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .ratings
            .lock()
            .await
            .iter()
            .any(|r| r.user_id == user_id && r.exchange_id == exchange_id))
    }

    async fn find_by_exchange(&self, exchange_id: &str) -> anyhow::Result<Vec<Rating>> {
        Ok(self
            .ratings
            .lock()
            .await
            .iter()
            .filter(|r| r.exchange_id == exchange_id)
            .cloned()
            .collect())
    }

    async fn find_by_author(&self, user_id: &str) -> anyhow::Result<Vec<Rating>> {
        Ok(self
            .ratings
            .lock()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

/* =========================
Fixture
========================= */

pub struct Harness {
    pub engine: ExchangeEngine,
    pub store: Arc<InMemoryExchangeStore>,
    pub library: Arc<MockLibrary>,
    pub chat: Arc<MockChat>,
    pub gamification: Arc<RecordingGamification>,
    pub ratings: Arc<StubRatings>,
}

pub struct HarnessBuilder {
    chat: MockChat,
    gamification: RecordingGamification,
    ratings: StubRatings,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            chat: MockChat::with_thread("chat1"),
            gamification: RecordingGamification::default(),
            ratings: StubRatings::default(),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }
}

impl HarnessBuilder {
    pub fn chat(mut self, chat: MockChat) -> Self {
        self.chat = chat;
        self
    }

    pub fn gamification(mut self, gamification: RecordingGamification) -> Self {
        self.gamification = gamification;
        self
    }

    pub fn ratings(mut self, ratings: StubRatings) -> Self {
        self.ratings = ratings;
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(InMemoryExchangeStore::default());
        let library = Arc::new(MockLibrary::default());
        let chat = Arc::new(self.chat);
        let gamification = Arc::new(self.gamification);
        let ratings = Arc::new(self.ratings);

        let engine = ExchangeEngine::new(
            store.clone(),
            Collaborators {
                ownership: library.clone(),
                catalog: library.clone(),
                chat: chat.clone(),
                gamification: gamification.clone(),
                ratings: ratings.clone(),
            },
        );

        Harness {
            engine,
            store,
            library,
            chat,
            gamification,
            ratings,
        }
    }
}

/// A stored exchange between u1 (requester) and u2 (owner).
pub fn mk_exchange(id: &str, status: ExchangeStatus) -> Exchange {
    let mut e = Exchange::propose(
        "u1",
        "u2",
        vec!["ob1".into()],
        vec!["rb1".into()],
        Some("chat1".into()),
    );
    e.id = id.to_string();
    e.status = status;
    e
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
