use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::types::{ChatRequest, ChatResponse, StreamEvent};

/// Common interface for all LLM providers. Swapping providers never
/// changes anything above this trait: the router, the conversation
/// engine, and tests all speak `ChatRequest`/`ChatResponse`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a non-streaming chat request, wait for full response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Stream response events through a channel.
    /// Default: falls back to non-streaming `send`, emits deltas then
    /// `ContentComplete` synthetically.
    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let resp = self.send(req).await?;
        for block in &resp.content {
            match block {
                crate::types::ContentBlock::Text { text } => {
                    let _ = tx
                        .send(StreamEvent::TextDelta { text: text.clone() })
                        .await;
                }
                crate::types::ContentBlock::ToolUse { id, name, .. } => {
                    let _ = tx
                        .send(StreamEvent::ToolUseStart {
                            id: id.clone(),
                            name: name.clone(),
                        })
                        .await;
                    let _ = tx.send(StreamEvent::ToolUseEnd { id: id.clone() }).await;
                }
                crate::types::ContentBlock::ToolResult { .. } => {}
            }
        }
        let _ = tx.send(StreamEvent::ContentComplete { response: resp }).await;
        Ok(())
    }
}
