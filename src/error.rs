use thiserror::Error;

/// Failures surfaced by the event store adapter.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Network-level failure (connect, timeout, broken transfer).
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend rejected the bearer credential. Fatal and non-retryable.
    #[error("authentication rejected (HTTP {0})")]
    Auth(u16),

    /// Non-auth HTTP failure from the backend.
    #[error("unexpected backend response (HTTP {0}): {1}")]
    Api(u16, String),

    /// Payload did not match the expected shape.
    #[error("malformed backend payload: {0}")]
    Decode(String),
}

impl StoreError {
    /// Only credential loss halts a query cycle; everything else degrades
    /// to a per-sub-query default.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Auth(_))
    }
}

/// User-visible failures. Transport-class store errors never reach the
/// dashboard as errors; they are folded into per-sub-query defaults before
/// this type is built.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("authentication rejected (HTTP {0})")]
    Auth(u16),

    #[error("invalid override: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Auth(status) => EngineError::Auth(status),
            other => EngineError::Transport(other.to_string()),
        }
    }
}
