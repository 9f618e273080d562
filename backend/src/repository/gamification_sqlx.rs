use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use exchange::gateway::{ExchangeActivity, GamificationGateway};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamificationProfile {
    pub user_id: String,
    pub total_points: u64,
    pub exchanges_created: u64,
    pub exchanges_completed: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Points ledger. A profile is created on a user's first award.
pub struct SqlxGamificationLedger {
    pool: SqlitePool,
}

impl SqlxGamificationLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn award(&self, activity: ExchangeActivity, user_id: &str) -> anyhow::Result<()> {
        let (created, completed) = match activity {
            ExchangeActivity::Created => (1_i64, 0_i64),
            ExchangeActivity::Completed => (0, 1),
        };
        let now_ms = exchange::model::now().timestamp_millis();

        sqlx::query(
            r#"
INSERT INTO gamification_profiles (
  id, user_id, total_points, exchanges_created, exchanges_completed,
  last_activity_ms, date_created_ms
)
VALUES (?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(user_id) DO UPDATE SET
  total_points = total_points + excluded.total_points,
  exchanges_created = exchanges_created + excluded.exchanges_created,
  exchanges_completed = exchanges_completed + excluded.exchanges_completed,
  last_activity_ms = excluded.last_activity_ms;
"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(activity.points())
        .bind(created)
        .bind(completed)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to award {} points to {user_id}", activity.as_str()))?;

        info!(
            user_id,
            activity = activity.as_str(),
            points = activity.points(),
            "points awarded"
        );
        Ok(())
    }

    pub async fn profile(&self, user_id: &str) -> anyhow::Result<Option<GamificationProfile>> {
        let row = sqlx::query(
            r#"
SELECT user_id, total_points, exchanges_created, exchanges_completed, last_activity_ms
FROM gamification_profiles
WHERE user_id = ?;
"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        let last_activity = match r.get::<Option<i64>, _>("last_activity_ms") {
            Some(ms) => Some(
                DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| anyhow!("timestamp out of range: {ms}"))?,
            ),
            None => None,
        };

        Ok(Some(GamificationProfile {
            user_id: r.get("user_id"),
            total_points: non_negative(r.get("total_points"))?,
            exchanges_created: non_negative(r.get("exchanges_created"))?,
            exchanges_completed: non_negative(r.get("exchanges_completed"))?,
            last_activity,
        }))
    }
}

#[async_trait]
impl GamificationGateway for SqlxGamificationLedger {
    async fn notify_exchange_created(&self, user_id: &str) -> anyhow::Result<()> {
        self.award(ExchangeActivity::Created, user_id).await
    }

    async fn notify_exchange_completed(&self, user_id: &str) -> anyhow::Result<()> {
        self.award(ExchangeActivity::Completed, user_id).await
    }
}

fn non_negative(v: i64) -> anyhow::Result<u64> {
    u64::try_from(v).map_err(|_| anyhow!("negative counter: {v}"))
}
