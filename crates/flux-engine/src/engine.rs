use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use flux_core::config::EngineConfig;
use flux_core::resilience::retry_async;
use flux_cost::{CostTracker, UsageStore};
use flux_hooks::{HookContext, HookEngine, HookEvent};
use flux_llm::{
    ChatRequest, ChatResponse, ContentBlock, LlmProvider, Message, ProviderError, StopReason,
    StreamEvent, ToolDefinition,
};
use flux_tools::{filter_tool_input, ToolRegistry, ToolResult};

use crate::history::trim_history;
use crate::types::{TurnEvent, TurnResult};

const MAX_TOKENS_TRUNCATED_MESSAGE: &str = "Error: 응답이 잘려서 도구 실행 불가. 더 짧게 시도해주세요.";
const TOOL_RESULT_EVENT_TRUNCATE_CHARS: usize = 200;

/// The bounded tool-use loop, unifying what five separate
/// interface handlers used to each reimplement. Async-only: the
/// workspace's resilience primitives and every downstream store are
/// already tokio-based, so the sync/async method pairs of the source
/// collapse to one `run_turn` and one `run_turn_stream`.
pub struct ConversationEngine {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    cost_tracker: Arc<CostTracker>,
    usage: Arc<UsageStore>,
    hooks: Option<Arc<HookEngine>>,
    config: EngineConfig,
}

impl ConversationEngine {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        cost_tracker: Arc<CostTracker>,
        usage: Arc<UsageStore>,
        hooks: Option<Arc<HookEngine>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            cost_tracker,
            usage,
            hooks,
            config,
        }
    }

    fn schemas_for(&self, restricted_tools: &HashSet<String>) -> Vec<ToolDefinition> {
        self.tools
            .schemas()
            .into_iter()
            .filter(|s| !restricted_tools.contains(&s.name))
            .map(|s| ToolDefinition {
                name: s.name,
                description: s.description,
                input_schema: s.input_schema,
            })
            .collect()
    }

    /// Runs `Before` then (if allowed) `After` hooks for `event`.
    /// Returns the block reason, if any.
    fn hook_gate(&self, event: HookEvent, payload: Value, user_id: &str) -> Option<String> {
        let hooks = self.hooks.as_ref()?;
        let mut ctx = HookContext::new(event, payload);
        ctx.user_id = Some(user_id.to_string());
        let (_, blocked) = hooks.emit(ctx);
        blocked
    }

    /// Fire-and-forget `After` hooks; nothing to block at this point.
    fn hook_observe(&self, event: HookEvent, payload: Value, user_id: &str) {
        let Some(hooks) = self.hooks.as_ref() else {
            return;
        };
        let mut ctx = HookContext::new(event, payload);
        ctx.user_id = Some(user_id.to_string());
        hooks.emit_after(ctx);
    }

    async fn call_llm(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        retry_async(
            || self.provider.send(req),
            self.config.llm_retry_count,
            Duration::from_millis(self.config.llm_base_delay_ms),
            Duration::from_millis(self.config.llm_max_delay_ms),
        )
        .await
    }

    /// Runs a provider's streamed response on a spawned task and
    /// forwards each event to `tx`, returning the assembled response
    /// captured from `ContentComplete`. `None` means the stream ended
    /// without ever completing a response (treated as a fatal error by
    /// the caller).
    async fn stream_llm(
        &self,
        req: &ChatRequest,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<Option<ChatResponse>, ProviderError> {
        let (inner_tx, mut inner_rx) = mpsc::channel(64);
        let provider = self.provider.clone();
        let req_owned = req.clone();
        let handle = tokio::spawn(async move { provider.send_stream(&req_owned, inner_tx).await });

        let mut response = None;
        while let Some(event) = inner_rx.recv().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    let _ = tx.send(TurnEvent::TextDelta { text }).await;
                }
                StreamEvent::ToolUseStart { id, name } => {
                    let _ = tx.send(TurnEvent::ToolUseStart { id, name }).await;
                }
                StreamEvent::ToolUseDelta { id, partial_json } => {
                    let _ = tx.send(TurnEvent::ToolUseDelta { id, partial_json }).await;
                }
                StreamEvent::ToolUseEnd { id } => {
                    let _ = tx.send(TurnEvent::ToolUseEnd { id }).await;
                }
                StreamEvent::ContentComplete { response: r } => response = Some(r),
                StreamEvent::Error { message } => {
                    let _ = tx.send(TurnEvent::Error { message }).await;
                }
            }
        }

        match handle.await {
            Ok(Ok(())) => Ok(response),
            Ok(Err(e)) => Err(e),
            Err(join_err) => Err(ProviderError::Unavailable(format!(
                "stream task panicked: {join_err}"
            ))),
        }
    }

    /// Dispatches one `tool_use` block, applying the restricted-tool and
    /// unknown-tool gates before invocation. Error strings
    /// match `original_source/openclaw/conversation_engine.py` literally;
    /// unlike that source, every path here sets `is_error` explicitly
    /// (the source leaves it unset on the unknown-tool path, which this
    /// port treats as a gap to close rather than reproduce, since
    /// `ContentBlock::ToolResult.is_error` is a non-optional `bool`).
    async fn execute_one_tool(
        &self,
        tool_use_id: String,
        name: String,
        input: Value,
        restricted_tools: &HashSet<String>,
        user_id: &str,
        stream_tx: Option<&mpsc::Sender<TurnEvent>>,
    ) -> ContentBlock {
        if restricted_tools.contains(&name) {
            let content = format!("Error: '{name}' 도구는 사용할 수 없습니다. (보안 제한)");
            self.notify_tool_result(stream_tx, &name, &content).await;
            return ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error: true,
            };
        }

        if !self.tools.is_registered(&name) {
            let content = format!("Error: 알 수 없는 도구: {name}");
            self.notify_tool_result(stream_tx, &name, &content).await;
            return ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error: true,
            };
        }

        if let Some(reason) = self.hook_gate(
            HookEvent::ToolCall,
            json!({"name": name, "input": input}),
            user_id,
        ) {
            let content = format!("Error: 도구 호출이 차단되었습니다: {reason}");
            self.notify_tool_result(stream_tx, &name, &content).await;
            return ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error: true,
            };
        }

        let filtered = match self.tools.schema_for(&name) {
            Some(schema) => filter_tool_input(&input, &schema.input_schema),
            None => input,
        };

        let result: ToolResult = match self.tools.invoke(&name, filtered).await {
            Ok(r) => r,
            Err(e) => ToolResult::error(format!("Error: 도구 실행 실패: {e}")),
        };

        self.hook_observe(
            HookEvent::ToolResult,
            json!({"name": name, "is_error": result.is_error}),
            user_id,
        );
        self.notify_tool_result(stream_tx, &name, &result.content).await;

        let wrapped = format!("[TOOL OUTPUT]\n{}\n[/TOOL OUTPUT]", result.content);
        ContentBlock::ToolResult {
            tool_use_id,
            content: wrapped,
            is_error: result.is_error,
        }
    }

    async fn notify_tool_result(
        &self,
        stream_tx: Option<&mpsc::Sender<TurnEvent>>,
        name: &str,
        result: &str,
    ) {
        if let Some(tx) = stream_tx {
            let truncated: String = result.chars().take(TOOL_RESULT_EVENT_TRUNCATE_CHARS).collect();
            let _ = tx
                .send(TurnEvent::ToolResult {
                    name: name.to_string(),
                    result: truncated,
                })
                .await;
        }
    }

    /// Non-streaming turn. `messages` is mutated in place, matching the
    /// source's list-mutation convention.
    pub async fn run_turn(
        &self,
        messages: &mut Vec<Message>,
        system: &str,
        model: &str,
        user_id: &str,
        restricted_tools: &HashSet<String>,
    ) -> TurnResult {
        trim_history(messages, self.config.max_history);
        let tool_defs = self.schemas_for(restricted_tools);
        let mut result = TurnResult::default();

        if let Some(reason) = self.hook_gate(HookEvent::TurnStart, json!({}), user_id) {
            result.error = Some(format!("턴이 차단되었습니다: {reason}"));
            return result;
        }

        let mut tool_round: u32 = 0;
        while tool_round < self.config.max_tool_rounds {
            if let Some(reason) =
                self.hook_gate(HookEvent::LlmInput, json!({"round": tool_round}), user_id)
            {
                result.tool_rounds = tool_round;
                result.error = Some(format!("턴이 차단되었습니다: {reason}"));
                return result;
            }

            let req = ChatRequest {
                model: model.to_string(),
                system: system.to_string(),
                messages: messages.clone(),
                max_tokens: self.config.max_tokens,
                tools: tool_defs.clone(),
            };

            let response = match self.call_llm(&req).await {
                Ok(r) => r,
                Err(e) => {
                    self.hook_observe(HookEvent::LlmError, json!({"error": e.to_string()}), user_id);
                    result.tool_rounds = tool_round;
                    result.error = Some(format!("llm call failed: {e}"));
                    return result;
                }
            };
            self.hook_observe(HookEvent::LlmOutput, json!({"model": model}), user_id);

            if self.apply_usage_and_check_continue(
                &mut result,
                messages,
                response,
                model,
                user_id,
                restricted_tools,
                &mut tool_round,
                None,
            )
            .await
            {
                break;
            }
        }

        result.tool_rounds = tool_round;
        if tool_round >= self.config.max_tool_rounds {
            result.error = Some(format!(
                "도구 호출이 {}회를 초과하여 중단되었습니다.",
                self.config.max_tool_rounds
            ));
        }
        self.hook_observe(
            HookEvent::TurnComplete,
            json!({"tool_rounds": result.tool_rounds}),
            user_id,
        );
        result
    }

    /// Streaming turn. Forwards provider deltas as they arrive and
    /// emits a synthesised `ToolResult` event per tool invocation, the
    /// final event always `TurnComplete`. Providers without native
    /// streaming are handled transparently by `LlmProvider::send_stream`'s
    /// default non-streaming fallback.
    pub async fn run_turn_stream(
        &self,
        messages: &mut Vec<Message>,
        system: &str,
        model: &str,
        user_id: &str,
        restricted_tools: &HashSet<String>,
        tx: mpsc::Sender<TurnEvent>,
    ) {
        trim_history(messages, self.config.max_history);
        let tool_defs = self.schemas_for(restricted_tools);
        let mut result = TurnResult::default();

        if let Some(reason) = self.hook_gate(HookEvent::TurnStart, json!({}), user_id) {
            result.error = Some(format!("턴이 차단되었습니다: {reason}"));
            let _ = tx.send(TurnEvent::TurnComplete { result }).await;
            return;
        }

        let mut tool_round: u32 = 0;
        while tool_round < self.config.max_tool_rounds {
            if let Some(reason) =
                self.hook_gate(HookEvent::LlmInput, json!({"round": tool_round}), user_id)
            {
                result.tool_rounds = tool_round;
                result.error = Some(format!("턴이 차단되었습니다: {reason}"));
                let _ = tx.send(TurnEvent::TurnComplete { result }).await;
                return;
            }

            let req = ChatRequest {
                model: model.to_string(),
                system: system.to_string(),
                messages: messages.clone(),
                max_tokens: self.config.max_tokens,
                tools: tool_defs.clone(),
            };

            let response = match self.stream_llm(&req, &tx).await {
                Ok(Some(r)) => r,
                Ok(None) => {
                    result.tool_rounds = tool_round;
                    result.error = Some("llm stream ended without a completed response".to_string());
                    let _ = tx.send(TurnEvent::TurnComplete { result }).await;
                    return;
                }
                Err(e) => {
                    self.hook_observe(HookEvent::LlmError, json!({"error": e.to_string()}), user_id);
                    result.tool_rounds = tool_round;
                    result.error = Some(format!("llm call failed: {e}"));
                    let _ = tx
                        .send(TurnEvent::Error {
                            message: result.error.clone().unwrap_or_default(),
                        })
                        .await;
                    let _ = tx.send(TurnEvent::TurnComplete { result }).await;
                    return;
                }
            };
            self.hook_observe(HookEvent::LlmOutput, json!({"model": model}), user_id);

            if self.apply_usage_and_check_continue(
                &mut result,
                messages,
                response,
                model,
                user_id,
                restricted_tools,
                &mut tool_round,
                Some(&tx),
            )
            .await
            {
                break;
            }
        }

        result.tool_rounds = tool_round;
        if tool_round >= self.config.max_tool_rounds {
            result.error = Some(format!(
                "도구 호출이 {}회를 초과하여 중단되었습니다.",
                self.config.max_tool_rounds
            ));
        }
        self.hook_observe(
            HookEvent::TurnComplete,
            json!({"tool_rounds": result.tool_rounds}),
            user_id,
        );
        let _ = tx.send(TurnEvent::TurnComplete { result }).await;
    }

    /// Shared per-round body: tracks usage/cost, applies the
    /// `max_tokens` and no-tool-use branches, and dispatches any tool
    /// calls. Returns `true` when the round loop should stop (either the
    /// turn produced a final answer or a truncated response had no tool
    /// calls to retry with — `result.tool_rounds` is set by the caller
    /// afterwards either way, matching the source leaving `tool_round`
    /// un-incremented on both of those exits).
    #[allow(clippy::too_many_arguments)]
    async fn apply_usage_and_check_continue(
        &self,
        result: &mut TurnResult,
        messages: &mut Vec<Message>,
        response: ChatResponse,
        model: &str,
        user_id: &str,
        restricted_tools: &HashSet<String>,
        tool_round: &mut u32,
        stream_tx: Option<&mpsc::Sender<TurnEvent>>,
    ) -> bool {
        let cost = self
            .cost_tracker
            .price(model, response.usage.input_tokens, response.usage.output_tokens);
        self.usage.increment(
            user_id,
            response.usage.input_tokens,
            response.usage.output_tokens,
            cost.total_cost_usd,
        );
        result.input_tokens += response.usage.input_tokens;
        result.output_tokens += response.usage.output_tokens;
        result.cost_usd += cost.total_cost_usd;
        result.stop_reason = Some(response.stop_reason);

        if response.stop_reason == StopReason::MaxTokens {
            let truncated_tool_use_ids: Vec<String> = response
                .tool_uses()
                .into_iter()
                .map(|(id, _, _)| id.to_string())
                .collect();
            messages.push(Message::assistant(response.content));
            if truncated_tool_use_ids.is_empty() {
                return true;
            }
            let error_results = truncated_tool_use_ids
                .into_iter()
                .map(|id| ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: MAX_TOKENS_TRUNCATED_MESSAGE.to_string(),
                    is_error: true,
                })
                .collect();
            messages.push(Message::user_tool_results(error_results));
            *tool_round += 1;
            return false;
        }

        let tool_uses: Vec<(String, String, Value)> = response
            .tool_uses()
            .into_iter()
            .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
            .collect();

        if tool_uses.is_empty() {
            result.text = response.text();
            messages.push(Message::assistant(response.content));
            return true;
        }

        messages.push(Message::assistant(response.content));

        let mut tool_results = Vec::with_capacity(tool_uses.len());
        for (id, name, input) in tool_uses {
            tool_results.push(
                self.execute_one_tool(id, name, input, restricted_tools, user_id, stream_tx)
                    .await,
            );
        }
        messages.push(Message::user_tool_results(tool_results));
        *tool_round += 1;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_llm::{MockProvider, Role};
    use sha2::{Digest, Sha256};
    use std::collections::HashMap;

    fn cost_tracker() -> Arc<CostTracker> {
        Arc::new(CostTracker::new(HashMap::new()))
    }

    fn usage_store() -> Arc<UsageStore> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(UsageStore::load(dir.path().join("usage.json")))
    }

    fn empty_tool_registry() -> Arc<ToolRegistry> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(ToolRegistry::new(dir.path(), dir.path().join("approvals.json"), false))
    }

    #[tokio::test]
    async fn final_answer_with_no_tool_calls_returns_text() {
        let engine = ConversationEngine::new(
            Arc::new(MockProvider::new("hello there")),
            empty_tool_registry(),
            cost_tracker(),
            usage_store(),
            None,
            EngineConfig::default(),
        );

        let mut messages = vec![Message::text(Role::User, "hi")];
        let result = engine
            .run_turn(&mut messages, "system prompt", "claude-3-5-sonnet", "u1", &HashSet::new())
            .await;

        assert_eq!(result.text, "hello there");
        assert_eq!(result.tool_rounds, 0);
        assert!(result.error.is_none());
        assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
    }

    #[tokio::test]
    async fn unregistered_tool_call_is_reported_and_loop_runs_to_exhaustion() {
        let tools_dir = tempfile::tempdir().unwrap();
        let approvals = tools_dir.path().join("approvals.json");
        let code = "SCHEMA = {\"name\": \"echo_tool\", \"description\": \"echoes\", \"input_schema\": {\"type\": \"object\", \"properties\": {}}}\n\ndef main(**kwargs):\n    return 'ok'\n";
        std::fs::write(tools_dir.path().join("echo_tool.py"), code).unwrap();
        let hash = format!("{:x}", Sha256::digest(code.as_bytes()));

        let registry = ToolRegistry::new(tools_dir.path(), approvals, false);
        registry.approve("echo_tool.py", &hash).unwrap();
        registry.reload_if_changed().await;
        assert!(registry.is_registered("echo_tool"));

        let mut config = EngineConfig::default();
        config.max_tool_rounds = 2;

        let engine = ConversationEngine::new(
            Arc::new(MockProvider::new("unused, tools force tool_use")),
            Arc::new(registry),
            cost_tracker(),
            usage_store(),
            None,
            config,
        );

        let mut messages = vec![Message::text(Role::User, "run the tool")];
        let result = engine
            .run_turn(&mut messages, "system prompt", "claude-3-5-sonnet", "u1", &HashSet::new())
            .await;

        assert_eq!(result.tool_rounds, 2);
        assert!(result.error.is_some());
        assert!(result.error.unwrap().contains("초과"));
    }

    #[tokio::test]
    async fn restricted_tool_name_short_circuits_without_invoking() {
        let tools_dir = tempfile::tempdir().unwrap();
        let approvals = tools_dir.path().join("approvals.json");
        let code = "SCHEMA = {\"name\": \"danger_tool\", \"description\": \"d\", \"input_schema\": {\"type\": \"object\", \"properties\": {}}}\n\ndef main(**kwargs):\n    return 'ok'\n";
        std::fs::write(tools_dir.path().join("danger_tool.py"), code).unwrap();
        let hash = format!("{:x}", Sha256::digest(code.as_bytes()));
        let registry = ToolRegistry::new(tools_dir.path(), approvals, false);
        registry.approve("danger_tool.py", &hash).unwrap();
        registry.reload_if_changed().await;

        let engine = ConversationEngine::new(
            Arc::new(MockProvider::default()),
            Arc::new(registry),
            cost_tracker(),
            usage_store(),
            None,
            EngineConfig::default(),
        );

        let mut restricted = HashSet::new();
        restricted.insert("danger_tool".to_string());

        let block = engine
            .execute_one_tool(
                "call-1".to_string(),
                "danger_tool".to_string(),
                json!({}),
                &restricted,
                "u1",
                None,
            )
            .await;

        match block {
            ContentBlock::ToolResult { is_error, content, .. } => {
                assert!(is_error);
                assert!(content.contains("보안 제한"));
            }
            _ => panic!("expected a tool_result block"),
        }
    }
}
