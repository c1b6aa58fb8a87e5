use thiserror::Error;

/// Cross-cutting error taxonomy. Leaf crates define their own narrower
/// `thiserror` enums and convert into this one at crate boundaries via
/// `#[from]`.
#[derive(Debug, Error)]
pub enum FluxError {
    #[error("auth failure")]
    AuthFailure,

    #[error("permission denied: {reason}")]
    AuthzDenied { reason: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("llm call failed after retries: {message}")]
    LlmRetryable { message: String },

    #[error("llm call failed fatally: {message}")]
    LlmFatal { message: String },

    #[error("tool '{name}' timed out after {seconds}s")]
    ToolTimeout { name: String, seconds: u64 },

    #[error("tool '{name}' failed: {message}")]
    ToolFailure { name: String, message: String },

    #[error("tool rounds exceeded ({max})")]
    ToolRoundsExceeded { max: u32 },

    #[error("security gate rejected '{file}': {reason}")]
    SecurityGateFailure { file: String, reason: String },

    #[error("storage busy")]
    StorageBusy,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FluxError {
    /// Short machine-readable code, e.g. for HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            FluxError::AuthFailure => "AUTH_FAILURE",
            FluxError::AuthzDenied { .. } => "AUTHZ_DENIED",
            FluxError::RateLimited { .. } => "RATE_LIMITED",
            FluxError::LlmRetryable { .. } => "LLM_RETRYABLE",
            FluxError::LlmFatal { .. } => "LLM_FATAL",
            FluxError::ToolTimeout { .. } => "TOOL_TIMEOUT",
            FluxError::ToolFailure { .. } => "TOOL_FAILURE",
            FluxError::ToolRoundsExceeded { .. } => "TOOL_ROUNDS_EXCEEDED",
            FluxError::SecurityGateFailure { .. } => "SECURITY_GATE_FAILURE",
            FluxError::StorageBusy => "STORAGE_BUSY",
            FluxError::NotFound(_) => "NOT_FOUND",
            FluxError::Config(_) => "CONFIG",
            FluxError::Serialization(_) => "SERIALIZATION",
            FluxError::Io(_) => "IO",
            FluxError::Internal(_) => "INTERNAL",
        }
    }

    /// Maps each variant onto its HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            FluxError::AuthFailure => 401,
            FluxError::AuthzDenied { .. } => 403,
            FluxError::RateLimited { .. } => 429,
            FluxError::NotFound(_) => 404,
            FluxError::StorageBusy => 503,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, FluxError>;
