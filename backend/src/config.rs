use std::time::Duration;

use crate::error::AppError;

const DEFAULT_DATABASE_URL: &str = "sqlite://bookx_dev.db?mode=rwc";

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Upper bound on pooled SQLite connections.
    pub max_connections: u32,

    /// Emit JSON logs instead of the pretty developer format.
    ///
    /// Switched on when `APP_ENV=production`.
    pub json_logs: bool,

    /// Store calls slower than this are reported on the `performance` target.
    pub slow_query: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key/value source; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let max_connections = parse_or("DB_MAX_CONNECTIONS", lookup("DB_MAX_CONNECTIONS"), 16)?;
        if max_connections == 0 {
            return Err(AppError::InvalidConfig {
                key: "DB_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "pool needs at least one connection".to_string(),
            });
        }

        let json_logs = lookup("APP_ENV")
            .map(|env| env.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let slow_query_ms: u64 = parse_or("SLOW_QUERY_MS", lookup("SLOW_QUERY_MS"), 100)?;

        Ok(Self {
            database_url,
            max_connections,
            json_logs,
            slow_query: Duration::from_millis(slow_query_ms),
        })
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(AppError::InvalidConfig {
                key,
                reason: e.to_string(),
                value,
            }),
        },
    }
}
