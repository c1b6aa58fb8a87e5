#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("webhook not found or not owned by caller")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, WebhookError>;
