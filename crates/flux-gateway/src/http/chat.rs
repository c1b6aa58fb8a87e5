use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use flux_llm::{ContentBlock, Message, Role};
use flux_webhooks::events::{EVENT_CHAT_COMPLETED, EVENT_CHAT_ERROR};

use crate::auth_ctx::authenticate;
use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatTurnRequest {
    pub message: String,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct UsageOut {
    input_tokens: u64,
    output_tokens: u64,
    cost_usd: f64,
}

#[derive(Debug, Serialize)]
struct ChatTurnResponse {
    response: String,
    conversation_id: String,
    usage: UsageOut,
}

const KNOWLEDGE_CONTEXT_CHARS: usize = 2000;
const HISTORY_PAGE_SIZE: i64 = 50;

fn record_to_message(role: &str, content: &serde_json::Value) -> Option<Message> {
    let role = match role {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => return None,
    };
    let blocks: Vec<ContentBlock> = serde_json::from_value(content.clone()).ok()?;
    Some(Message { role, content: blocks })
}

fn system_prompt(state: &AppState, user_message: &str) -> String {
    let context = state.knowledge.get_context(user_message, KNOWLEDGE_CONTEXT_CHARS).unwrap_or_default();
    if context.is_empty() {
        "You are Flux, a self-extending assistant runtime.".to_string()
    } else {
        format!("You are Flux, a self-extending assistant runtime.\n\nRelevant context:\n{context}")
    }
}

/// Loads prior turns, appends the new user message, and returns both the
/// resolved conversation id and the message count before this turn (so
/// the caller knows which tail of `messages` is new and needs persisting).
fn load_conversation(
    state: &AppState,
    conversation_id: Option<&str>,
    user_id: &str,
    user_message: &str,
) -> Result<(String, Vec<Message>, usize), GatewayError> {
    let record = state
        .conversations
        .conversations
        .create_conversation(conversation_id, "http", user_id)?;

    let history = state
        .conversations
        .conversations
        .get_messages(&record.id, HISTORY_PAGE_SIZE, 0)?;

    let mut messages: Vec<Message> = history
        .iter()
        .filter_map(|m| record_to_message(&m.role, &m.content))
        .collect();
    let before = messages.len();
    messages.push(Message::text(Role::User, user_message));

    Ok((record.id, messages, before))
}

fn persist_new_messages(state: &AppState, conversation_id: &str, messages: &[Message], from: usize) {
    for message in &messages[from..] {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content = serde_json::to_value(&message.content).unwrap_or(serde_json::Value::Null);
        if let Err(err) = state
            .conversations
            .conversations
            .add_message(conversation_id, role, &content, 0)
        {
            tracing::warn!(error = %err, conversation_id, "failed to persist message");
        }
    }
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatTurnRequest>,
) -> Result<Response, GatewayError> {
    let ctx = authenticate(&state, &headers, "http")?;

    let (allowed, rl) = state.rate_limiter.check(&ctx.user_id);
    if !allowed {
        state.metrics.record_error("rate_limited");
        return Err(GatewayError::RateLimited {
            retry_after_secs: rl.retry_after.unwrap_or(60),
        });
    }
    if !state.usage.check_daily_limit(&ctx.user_id, ctx.max_daily_calls as u64) {
        return Err(GatewayError::RateLimited { retry_after_secs: 86400 });
    }

    let (conversation_id, mut messages, before) =
        load_conversation(&state, req.conversation_id.as_deref(), &ctx.user_id, &req.message)?;
    let system = system_prompt(&state, &req.message);
    let model = state.config.provider.model.clone();

    let cancel = CancellationToken::new();
    state.active_operations.insert(conversation_id.clone(), cancel);

    let result = state
        .engine
        .run_turn(&mut messages, &system, &model, &ctx.user_id, &HashSet::new())
        .await;

    state.active_operations.remove(&conversation_id);
    state.metrics.record_chat_turn();
    persist_new_messages(&state, &conversation_id, &messages, before);

    if let Some(error) = result.error {
        state.webhook_dispatcher.dispatch(
            EVENT_CHAT_ERROR,
            json!({ "conversation_id": conversation_id, "user_id": ctx.user_id, "error": error }),
        );
        return Err(GatewayError::BadRequest(error));
    }

    state.webhook_dispatcher.dispatch(
        EVENT_CHAT_COMPLETED,
        json!({
            "conversation_id": conversation_id,
            "user_id": ctx.user_id,
            "cost_usd": result.cost_usd,
        }),
    );

    let body = ChatTurnResponse {
        response: result.text,
        conversation_id,
        usage: UsageOut {
            input_tokens: result.input_tokens,
            output_tokens: result.output_tokens,
            cost_usd: result.cost_usd,
        },
    };

    let mut response = Json(body).into_response();
    apply_rate_limit_headers(response.headers_mut(), &rl);
    Ok(response)
}

pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatTurnRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, GatewayError> {
    let ctx = authenticate(&state, &headers, "http")?;

    let (conversation_id, mut messages, before) =
        load_conversation(&state, req.conversation_id.as_deref(), &ctx.user_id, &req.message)?;
    let system = system_prompt(&state, &req.message);
    let model = state.config.provider.model.clone();

    let cancel = CancellationToken::new();
    state.active_operations.insert(conversation_id.clone(), cancel);

    let stream = async_stream::stream! {
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let engine_state = state.clone();
        let conv_id_for_task = conversation_id.clone();
        let user_id = ctx.user_id.clone();

        let handle = tokio::spawn(async move {
            engine_state
                .engine
                .run_turn_stream(&mut messages, &system, &model, &user_id, &HashSet::new(), tx)
                .await;
            (messages, engine_state)
        });

        while let Some(event) = rx.recv().await {
            match event {
                flux_engine::TurnEvent::TextDelta { text } => {
                    yield Ok(Event::default().data(json!({"type": "data", "text": text}).to_string()));
                }
                flux_engine::TurnEvent::ToolUseStart { name, .. } => {
                    yield Ok(Event::default().data(json!({"type": "tool_start", "tool": name}).to_string()));
                }
                flux_engine::TurnEvent::ToolResult { name, .. } => {
                    yield Ok(Event::default().data(json!({"type": "tool_end", "tool": name}).to_string()));
                }
                flux_engine::TurnEvent::Error { message } => {
                    yield Ok(Event::default().data(json!({"type": "error", "message": message}).to_string()));
                }
                flux_engine::TurnEvent::TurnComplete { result } => {
                    state.metrics.record_chat_turn();
                    yield Ok(Event::default().data(json!({
                        "usage": {
                            "input_tokens": result.input_tokens,
                            "output_tokens": result.output_tokens,
                            "cost_usd": result.cost_usd,
                        },
                        "conversation_id": conv_id_for_task,
                        "error": result.error,
                    }).to_string()));
                }
                _ => {}
            }
        }

        if let Ok((final_messages, state)) = handle.await {
            state.active_operations.remove(&conv_id_for_task);
            persist_new_messages(&state, &conv_id_for_task, &final_messages, before);
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn apply_rate_limit_headers(headers: &mut axum::http::HeaderMap, rl: &flux_auth::RateLimitHeaders) {
    if let Ok(v) = rl.limit.to_string().parse() {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = rl.remaining.to_string().parse() {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = rl.reset.to_string().parse() {
        headers.insert("X-RateLimit-Reset", v);
    }
}
