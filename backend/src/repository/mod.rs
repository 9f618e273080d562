//! SQLx-backed collaborators of the exchange engine.
pub mod chat_sqlx;
pub mod gamification_sqlx;
pub mod library_sqlx;

pub use chat_sqlx::SqlxChatRepository;
pub use gamification_sqlx::{GamificationProfile, SqlxGamificationLedger};
pub use library_sqlx::SqlxLibraryRepository;
