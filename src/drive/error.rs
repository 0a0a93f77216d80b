use thiserror::Error;

use crate::retry::Transient;

/// Object store errors.
///
/// `is_transient()` separates transient transport failures from answers
/// that will not change on a second attempt (missing or ambiguous names,
/// auth problems, 4xx replies).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file not found: {name}")]
    NotFound { name: String },

    #[error("ambiguous file name {name}: {count} candidates")]
    Ambiguous { name: String, count: usize },

    #[error("drive request {context} failed with HTTP {status}: {message}")]
    HttpStatus {
        status: u16,
        context: String,
        message: String,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            StoreError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            StoreError::NotFound { .. }
            | StoreError::Ambiguous { .. }
            | StoreError::Io(_)
            | StoreError::Json(_) => false,
        }
    }
}
