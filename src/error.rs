use thiserror::Error;

// One error type crosses every layer of the engine; responses.rs owns
// the mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    // the one user-actionable failure: the slot was taken between the
    // availability check and the insert
    #[error("slot no longer available")]
    Conflict,

    #[error("datastore error: {0}")]
    Datastore(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EngineError::NotFound(msg.into())
    }
}
