use thiserror::Error;

/// Messaging gateway errors.
///
/// The `Display` text of these errors is written verbatim into the status
/// column of the row that failed, so keep it short and readable.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("telegram request error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("telegram request failed: {0}")]
    Http(reqwest::Error),

    #[error("telegram response malformed: {0}")]
    Json(#[from] serde_json::Error),
}

// Bot API URLs embed the bot token; it must never reach a status cell.
impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Http(e.without_url())
    }
}
