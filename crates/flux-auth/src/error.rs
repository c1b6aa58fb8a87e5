#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("invalid role '{0}': must be one of admin, user, readonly")]
    InvalidRole(String),
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("username already exists: {0}")]
    DuplicateUsername(String),
    #[error("user not found or inactive")]
    UserNotFound,
    #[error("jwt secret must be at least {0} characters")]
    SecretTooShort(usize),
}

pub type Result<T> = std::result::Result<T, AuthError>;
