use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of invoking a tool. `is_error` is surfaced to the LLM as a
/// `tool_result` with the matching flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// The two symbols a tool module must expose: a JSON schema describing
/// itself and an entry point. Extracted statically from source text —
/// the registry never executes a tool file to learn its shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("security gate rejected '{filename}': {reason}")]
    SecurityGate { filename: String, reason: String },
    #[error("tool '{0}' not registered")]
    NotRegistered(String),
    #[error("tool '{0}' is restricted on this interface")]
    Restricted(String),
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("tool execution timed out")]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
