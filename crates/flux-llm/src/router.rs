use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use flux_core::resilience::retry_async;

use crate::error::ProviderError;
use crate::provider::LlmProvider;
use crate::types::{ChatRequest, ChatResponse, StreamEvent};

/// A provider plus the retry budget and backoff window to spend on it
/// before the router moves to the next slot.
pub struct ProviderSlot {
    pub provider: Box<dyn LlmProvider>,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ProviderSlot {
    pub fn new(provider: Box<dyn LlmProvider>, max_retries: u32) -> Self {
        Self {
            provider,
            max_retries,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }
}

/// Routes requests across provider slots in priority order, retrying
/// with jittered exponential backoff inside each slot before failing
/// over to the next one.
pub struct ProviderRouter {
    slots: Vec<ProviderSlot>,
}

impl ProviderRouter {
    pub fn new(slots: Vec<ProviderSlot>) -> Self {
        assert!(!slots.is_empty(), "ProviderRouter requires at least one provider slot");
        Self { slots }
    }
}

#[async_trait]
impl LlmProvider for ProviderRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for slot in &self.slots {
            let provider_name = slot.provider.name().to_string();
            let result = retry_async(
                || slot.provider.send(req),
                slot.max_retries,
                slot.base_delay,
                slot.max_delay,
            )
            .await;

            match result {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(provider = %provider_name, err = %e, "provider exhausted, trying next");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("all providers failed".into())))
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for slot in &self.slots {
            let provider_name = slot.provider.name().to_string();
            let result = retry_async(
                || slot.provider.send_stream(req, tx.clone()),
                slot.max_retries,
                slot.base_delay,
                slot.max_delay,
            )
            .await;

            match result {
                Ok(()) => {
                    info!(provider = %provider_name, "stream completed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(provider = %provider_name, err = %e, "stream provider exhausted, trying next");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("all providers failed".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatResponse, ContentBlock, Message, Role, StopReason, Usage};

    struct AlwaysFail;
    #[async_trait]
    impl LlmProvider for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::Unavailable("intentional".into()))
        }
    }

    struct AlwaysOk;
    #[async_trait]
    impl LlmProvider for AlwaysOk {
        fn name(&self) -> &str {
            "always-ok"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: vec![ContentBlock::Text { text: "ok".into() }],
                model: req.model.clone(),
                stop_reason: StopReason::EndTurn,
                usage: Usage {
                    input_tokens: 1,
                    output_tokens: 1,
                },
            })
        }
    }

    fn dummy_request() -> ChatRequest {
        ChatRequest {
            model: "test-model".into(),
            system: "you are a test".into(),
            messages: vec![Message::text(Role::User, "hello")],
            max_tokens: 64,
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn router_falls_back_to_second_provider() {
        let router = ProviderRouter::new(vec![
            ProviderSlot::new(Box::new(AlwaysFail), 0),
            ProviderSlot::new(Box::new(AlwaysOk), 0),
        ]);
        let result = router.send(&dummy_request()).await.unwrap();
        assert_eq!(result.text(), "ok");
    }

    #[tokio::test]
    async fn router_errors_when_all_fail() {
        let router = ProviderRouter::new(vec![
            ProviderSlot::new(Box::new(AlwaysFail), 0),
            ProviderSlot::new(Box::new(AlwaysFail), 0),
        ]);
        assert!(router.send(&dummy_request()).await.is_err());
    }
}
