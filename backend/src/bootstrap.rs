use std::sync::Arc;
use std::time::Duration;

use common::logger::init_tracing;
use exchange::ExchangeEngine;
use exchange::engine::Collaborators;
use exchange::rating::RatingService;
use exchange::store::sqlite_store::{SQLiteExchangeStore, SQLiteRatingStore};

use crate::config::AppConfig;
use crate::db::Db;
use crate::repository::{SqlxChatRepository, SqlxGamificationLedger, SqlxLibraryRepository};

const SERVICE_NAME: &str = "bookx-backend";

/// Everything a transport layer needs to serve exchange requests.
pub struct App {
    pub db: Db,
    pub engine: Arc<ExchangeEngine>,
    pub ratings: Arc<RatingService>,
    pub library: Arc<SqlxLibraryRepository>,
    pub chat: Arc<SqlxChatRepository>,
    pub gamification: Arc<SqlxGamificationLedger>,
}

/// Initializes logging and the DB, runs migrations and wires the engine.
pub async fn init_app(cfg: &AppConfig) -> anyhow::Result<App> {
    init_tracing(SERVICE_NAME, cfg.json_logs);

    let db = Db::connect(&cfg.database_url, cfg.max_connections).await?;
    db.migrate().await?;

    let app = assemble(db, cfg.slow_query);
    tracing::info!(
        database_url = %cfg.database_url,
        max_connections = cfg.max_connections,
        slow_query_ms = cfg.slow_query.as_millis() as u64,
        "exchange backend ready"
    );

    Ok(app)
}

/// Wires stores and collaborators over an already migrated database.
pub fn assemble(db: Db, slow_query: Duration) -> App {
    let exchanges = Arc::new(SQLiteExchangeStore::from_pool(db.pool.clone()));
    let rating_store = Arc::new(SQLiteRatingStore::from_pool(db.pool.clone()));

    let ratings = Arc::new(RatingService::new(exchanges.clone(), rating_store));
    let library = Arc::new(SqlxLibraryRepository::new(db.pool.clone()));
    let chat = Arc::new(SqlxChatRepository::new(db.pool.clone()));
    let gamification = Arc::new(SqlxGamificationLedger::new(db.pool.clone()));

    let engine = ExchangeEngine::new(
        exchanges,
        Collaborators {
            ownership: library.clone(),
            catalog: library.clone(),
            chat: chat.clone(),
            gamification: gamification.clone(),
            ratings: ratings.clone(),
        },
    )
    .with_slow_store_threshold(slow_query);

    App {
        db,
        engine: Arc::new(engine),
        ratings,
        library,
        chat,
        gamification,
    }
}
