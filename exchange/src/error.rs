use thiserror::Error;

/// Failures surfaced by the engine and the rating service.
///
/// Legitimate business refusals (wrong actor, wrong source status, self-trade)
/// are not errors: operations report them as `Ok(None)`.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("exchange not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("exchange {id} was modified concurrently (expected version {expected_version})")]
    Conflict { id: String, expected_version: u64 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ExchangeError {
    /// HTTP-equivalent status for whatever boundary wraps the engine.
    pub fn status_code(&self) -> u16 {
        match self {
            ExchangeError::NotFound(_) => 404,
            ExchangeError::BadRequest(_) => 400,
            ExchangeError::Conflict { .. } => 409,
            ExchangeError::Store(_) => 500,
        }
    }
}
