use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive entry invalid: {0}")]
    ArchiveInvalid(String),

    #[error("archive exceeds size limit: {0}")]
    SizeLimitExceeded(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;
