use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider::LlmProvider;
use crate::types::{ChatRequest, ChatResponse, ContentBlock, StopReason, Usage};

/// Deterministic provider for tests and local runs without a real
/// vendor key. Always replies with a fixed text block unless the
/// request carries tool definitions, in which case it emits a
/// `ToolUse` block for the first tool so callers can exercise the
/// tool-use loop end to end.
pub struct MockProvider {
    pub reply_text: String,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            reply_text: "mock response".to_string(),
        }
    }
}

impl MockProvider {
    pub fn new(reply_text: impl Into<String>) -> Self {
        Self {
            reply_text: reply_text.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        if let Some(tool) = req.tools.first() {
            return Ok(ChatResponse {
                content: vec![ContentBlock::ToolUse {
                    id: "mock-tool-call-1".to_string(),
                    name: tool.name.clone(),
                    input: serde_json::json!({}),
                }],
                model: req.model.clone(),
                stop_reason: StopReason::ToolUse,
                usage: Usage {
                    input_tokens: 1,
                    output_tokens: 1,
                },
            });
        }

        Ok(ChatResponse {
            content: vec![ContentBlock::Text {
                text: self.reply_text.clone(),
            }],
            model: req.model.clone(),
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 1,
                output_tokens: 1,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, Role};

    #[tokio::test]
    async fn replies_with_fixed_text_when_no_tools() {
        let provider = MockProvider::new("hi there");
        let req = ChatRequest {
            model: "m".into(),
            system: "s".into(),
            messages: vec![Message::text(Role::User, "hello")],
            max_tokens: 16,
            tools: Vec::new(),
        };
        let resp = provider.send(&req).await.unwrap();
        assert_eq!(resp.text(), "hi there");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
    }
}
