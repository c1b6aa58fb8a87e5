pub mod error;
pub mod http_provider;
pub mod mock;
pub mod provider;
pub mod router;
pub mod sse;
pub mod types;

pub use error::ProviderError;
pub use http_provider::HttpProvider;
pub use mock::MockProvider;
pub use provider::LlmProvider;
pub use router::{ProviderRouter, ProviderSlot};
pub use types::{
    ChatRequest, ChatResponse, ContentBlock, Message, Role, StopReason, StreamEvent,
    ToolDefinition, Usage,
};
