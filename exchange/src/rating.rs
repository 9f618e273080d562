//! Post-exchange ratings, gated on a COMPLETED negotiation.
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::gateway::RatingGateway;
use crate::model::{self, Exchange, ExchangeStatus, Rating};
use crate::store::{ExchangeStore, RatingStore};

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

pub struct RatingService {
    exchanges: Arc<dyn ExchangeStore>,
    ratings: Arc<dyn RatingStore>,
}

impl RatingService {
    pub fn new(exchanges: Arc<dyn ExchangeStore>, ratings: Arc<dyn RatingStore>) -> Self {
        Self { exchanges, ratings }
    }

    /// Rate the counterparty of a completed exchange, once per participant.
    #[instrument(skip(self, comment), target = "rating", fields(exchange_id = %exchange_id, user_id = %user_id))]
    pub async fn submit_rating(
        &self,
        exchange_id: &str,
        user_id: &str,
        score: u8,
        comment: Option<String>,
    ) -> Result<Rating, ExchangeError> {
        if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
            return Err(ExchangeError::BadRequest(format!(
                "rating must be between {MIN_SCORE} and {MAX_SCORE}, got {score}"
            )));
        }

        let exchange = self
            .exchanges
            .find_by_id(exchange_id)
            .await?
            .ok_or_else(|| ExchangeError::NotFound(exchange_id.to_string()))?;

        if let Some(reason) = self.rating_blocker(&exchange, user_id).await? {
            warn!(reason, "rating refused");
            return Err(ExchangeError::BadRequest(reason.to_string()));
        }

        let rating = Rating {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            exchange_id: exchange_id.to_string(),
            score,
            comment,
            date_created: model::now(),
        };
        self.ratings.insert(&rating).await?;

        info!(rating_id = %rating.id, score, "rating stored");
        Ok(rating)
    }

    /// Same gates as [`Self::submit_rating`], answered as a yes/no.
    pub async fn can_rate(&self, exchange_id: &str, user_id: &str) -> Result<bool, ExchangeError> {
        let Some(exchange) = self.exchanges.find_by_id(exchange_id).await? else {
            return Ok(false);
        };

        Ok(self.rating_blocker(&exchange, user_id).await?.is_none())
    }

    pub async fn ratings_by_user(&self, user_id: &str) -> Result<Vec<Rating>, ExchangeError> {
        debug!(user_id, "listing ratings authored by user");
        Ok(self.ratings.find_by_author(user_id).await?)
    }

    async fn rating_blocker(
        &self,
        exchange: &Exchange,
        user_id: &str,
    ) -> anyhow::Result<Option<&'static str>> {
        if exchange.status != ExchangeStatus::Completed {
            return Ok(Some("can only rate completed exchanges"));
        }
        if !exchange.is_participant(user_id) {
            return Ok(Some("user is not part of this exchange"));
        }
        if self.ratings.exists_for(user_id, &exchange.id).await? {
            return Ok(Some("user has already rated this exchange"));
        }
        Ok(None)
    }
}

#[async_trait]
impl RatingGateway for RatingService {
    async fn ratings_for_exchange(&self, exchange_id: &str) -> anyhow::Result<Vec<Rating>> {
        self.ratings.find_by_exchange(exchange_id).await
    }
}
