pub mod engine;
pub mod error;
pub mod gateway;
pub mod model;
pub mod rating;
pub mod store;

pub use engine::ExchangeEngine;
pub use error::ExchangeError;
pub use model::{Exchange, ExchangeStatus, ExchangeView, Rating, UserBook};
