use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ExchangeId = String;
pub type UserId = String;

const EXCHANGE_ID_PREFIX: &str = "exchange-";

/// Current time at millisecond precision, the resolution the stores keep.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeStatus {
    Pending,
    Accepted,
    Rejected,
    /// Readable from storage, never written by the engine.
    Countered,
    Cancelled,
    Completed,
}

impl ExchangeStatus {
    pub const ALL: [ExchangeStatus; 6] = [
        ExchangeStatus::Pending,
        ExchangeStatus::Accepted,
        ExchangeStatus::Rejected,
        ExchangeStatus::Countered,
        ExchangeStatus::Cancelled,
        ExchangeStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeStatus::Pending => "PENDING",
            ExchangeStatus::Accepted => "ACCEPTED",
            ExchangeStatus::Rejected => "REJECTED",
            ExchangeStatus::Countered => "COUNTERED",
            ExchangeStatus::Cancelled => "CANCELLED",
            ExchangeStatus::Completed => "COMPLETED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExchangeStatus::Rejected | ExchangeStatus::Cancelled | ExchangeStatus::Completed
        )
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExchangeStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Invalid ExchangeStatus value: {}", s))
    }
}

/// One proposed or resolved trade of library items between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: ExchangeId,

    // Participants
    pub requester_id: UserId,
    pub owner_id: UserId,

    // Offer
    pub owner_book_ids: Vec<String>,
    pub requester_book_ids: Vec<String>,
    pub chat_id: Option<String>,

    // Lifecycle
    pub status: ExchangeStatus,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    /// Optimistic concurrency token, bumped on every write of an existing record.
    pub version: u64,
}

impl Exchange {
    /// `exchange-` followed by eight hex chars of a fresh v4 uuid.
    pub fn new_id() -> ExchangeId {
        let uuid = Uuid::new_v4().simple().to_string();
        format!("{EXCHANGE_ID_PREFIX}{}", &uuid[..8])
    }

    /// A fresh PENDING proposal from `requester_id` to `owner_id`.
    pub fn propose(
        requester_id: &str,
        owner_id: &str,
        owner_book_ids: Vec<String>,
        requester_book_ids: Vec<String>,
        chat_id: Option<String>,
    ) -> Self {
        let created = now();
        Self {
            id: Self::new_id(),
            requester_id: requester_id.to_string(),
            owner_id: owner_id.to_string(),
            owner_book_ids,
            requester_book_ids,
            chat_id,
            status: ExchangeStatus::Pending,
            date_created: created,
            date_updated: created,
            version: 1,
        }
    }

    /// The proposal that answers this one: roles swap, the chat thread is kept.
    pub fn counter_proposal(
        &self,
        owner_book_ids: Vec<String>,
        requester_book_ids: Vec<String>,
    ) -> Self {
        Self::propose(
            &self.owner_id,
            &self.requester_id,
            owner_book_ids,
            requester_book_ids,
            self.chat_id.clone(),
        )
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.requester_id == user_id || self.owner_id == user_id
    }

    /// Permission matrix keyed by the target status.
    ///
    /// The offeree accepts or rejects, the offeror withdraws, and either side
    /// confirms completion once accepted. Terminal records never move again.
    pub fn can_transition(&self, actor_id: &str, target: ExchangeStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        let is_owner = self.owner_id == actor_id;
        let is_requester = self.requester_id == actor_id;

        match target {
            ExchangeStatus::Accepted | ExchangeStatus::Rejected => is_owner,
            ExchangeStatus::Cancelled => is_requester && self.status != ExchangeStatus::Completed,
            ExchangeStatus::Completed => {
                self.status == ExchangeStatus::Accepted && (is_requester || is_owner)
            }
            ExchangeStatus::Pending | ExchangeStatus::Countered => false,
        }
    }

    /// Move to `status`, refresh `date_updated` and bump the version.
    /// Returns the version the record had before, for compare-and-swap writes.
    pub fn transition_to(&mut self, status: ExchangeStatus) -> u64 {
        let previous = self.version;
        self.status = status;
        self.date_updated = now();
        self.version += 1;
        previous
    }
}

/// A library item resolved for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBook {
    pub id: String,
    pub user_id: UserId,
    pub book_id: String,
    pub title: String,
    pub author: Option<String>,
    pub favorite: bool,
    pub wants_to_exchange: bool,
}

/// Post-exchange rating authored by `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub id: String,
    pub user_id: UserId,
    pub exchange_id: ExchangeId,
    /// 1-5
    pub score: u8,
    pub comment: Option<String>,
    pub date_created: DateTime<Utc>,
}

/// Read model: the stored record joined with books and, once completed, ratings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeView {
    #[serde(flatten)]
    pub exchange: Exchange,
    pub owner_books: Vec<UserBook>,
    pub requester_books: Vec<UserBook>,
    pub requester_rate: Option<Rating>,
    pub owner_rate: Option<Rating>,
}

impl ExchangeView {
    pub fn bare(exchange: Exchange) -> Self {
        Self {
            exchange,
            owner_books: Vec::new(),
            requester_books: Vec::new(),
            requester_rate: None,
            owner_rate: None,
        }
    }

    /// Attach ratings by author: whichever the requester wrote, whichever the owner wrote.
    pub fn attach_ratings(&mut self, ratings: Vec<Rating>) {
        for rating in ratings {
            if rating.user_id == self.exchange.requester_id && self.requester_rate.is_none() {
                self.requester_rate = Some(rating);
            } else if rating.user_id == self.exchange.owner_id && self.owner_rate.is_none() {
                self.owner_rate = Some(rating);
            }
        }
    }
}
