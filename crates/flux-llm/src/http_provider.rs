use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::provider::LlmProvider;
use crate::sse::{parse_sse_line, SseParsed};
use crate::types::{
    ChatRequest, ChatResponse, ContentBlock, Message, Role, StopReason, StreamEvent, Usage,
};

const PROTOCOL_VERSION: &str = "2023-06-01";

/// Adapter for vendors that speak the "messages" wire shape (content
/// block arrays, `x-api-key` auth, SSE streaming with
/// `content_block_start`/`_delta`/`_stop` events). One adapter covers
/// any provider compatible with that shape; point `base_url` at the
/// vendor's endpoint.
pub struct HttpProvider {
    client: reqwest::Client,
    name: String,
    api_key: String,
    base_url: String,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: name.into(),
            api_key,
            base_url,
        }
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        json!({
            "model": req.model,
            "system": req.system,
            "max_tokens": req.max_tokens,
            "messages": req.messages.iter().map(message_to_wire).collect::<Vec<_>>(),
            "tools": req.tools.iter().map(|t| json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })).collect::<Vec<_>>(),
        })
    }
}

fn message_to_wire(msg: &Message) -> Value {
    json!({
        "role": match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        },
        "content": msg.content.iter().map(block_to_wire).collect::<Vec<_>>(),
    })
}

fn block_to_wire(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::ToolUse { id, name, input } => {
            json!({"type": "tool_use", "id": id, "name": name, "input": input})
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    content: Vec<WireBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

fn stop_reason_from_wire(s: Option<&str>) -> StopReason {
    match s {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        Some(other) => {
            if other != "end_turn" {
                warn!(stop_reason = other, "unrecognized stop_reason, defaulting to end_turn");
            }
            StopReason::EndTurn
        }
        None => StopReason::EndTurn,
    }
}

fn wire_to_response(wire: WireResponse) -> ChatResponse {
    let content = wire
        .content
        .into_iter()
        .map(|b| match b {
            WireBlock::Text { text } => ContentBlock::Text { text },
            WireBlock::ToolUse { id, name, input } => ContentBlock::ToolUse { id, name, input },
        })
        .collect();
    ChatResponse {
        content,
        model: wire.model,
        stop_reason: stop_reason_from_wire(wire.stop_reason.as_deref()),
        usage: Usage {
            input_tokens: wire.usage.input_tokens,
            output_tokens: wire.usage.output_tokens,
        },
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = self.build_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, provider = %self.name, "sending chat request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("messages-version", PROTOCOL_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, provider = %self.name, "provider returned error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(wire_to_response(wire))
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let mut body = self.build_body(req);
        body["stream"] = json!(true);
        let url = format!("{}/v1/messages", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("messages-version", PROTOCOL_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        process_stream(resp, tx).await;
        Ok(())
    }
}

async fn process_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut current_event = String::new();
    let mut current_block_type = String::new();
    let mut current_tool_id = String::new();
    let mut model = String::new();
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;
    let mut stop_reason: Option<String> = None;
    let mut text_blocks: Vec<String> = Vec::new();
    let mut tool_blocks: Vec<ContentBlock> = Vec::new();
    let mut line_buf = String::new();

    let mut byte_stream = resp.bytes_stream();
    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };
        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_sse_line(line) {
                Some(SseParsed::Event(ev)) => current_event = ev,
                Some(SseParsed::Data(data)) => {
                    handle_data_block(
                        &current_event,
                        &data,
                        &mut current_block_type,
                        &mut current_tool_id,
                        &mut model,
                        &mut input_tokens,
                        &mut output_tokens,
                        &mut stop_reason,
                        &mut text_blocks,
                        &mut tool_blocks,
                        &tx,
                    )
                    .await;
                }
                None => {}
            }
        }
        line_buf = remainder;
    }

    let mut content: Vec<ContentBlock> = text_blocks
        .into_iter()
        .map(|text| ContentBlock::Text { text })
        .collect();
    content.extend(tool_blocks);

    let response = ChatResponse {
        content,
        model,
        stop_reason: stop_reason_from_wire(stop_reason.as_deref()),
        usage: Usage {
            input_tokens,
            output_tokens,
        },
    };
    let _ = tx.send(StreamEvent::ContentComplete { response }).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_data_block(
    event_type: &str,
    data: &str,
    current_block_type: &mut String,
    current_tool_id: &mut String,
    model: &mut String,
    input_tokens: &mut u64,
    output_tokens: &mut u64,
    stop_reason: &mut Option<String>,
    text_blocks: &mut Vec<String>,
    tool_blocks: &mut Vec<ContentBlock>,
    tx: &mpsc::Sender<StreamEvent>,
) {
    let parsed: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return,
    };

    match event_type {
        "message_start" => {
            if let Some(m) = parsed.pointer("/message/model").and_then(|v| v.as_str()) {
                *model = m.to_string();
            }
            if let Some(t) = parsed
                .pointer("/message/usage/input_tokens")
                .and_then(|v| v.as_u64())
            {
                *input_tokens = t;
            }
        }
        "content_block_start" => {
            if let Some(block) = parsed.get("content_block") {
                *current_block_type = block
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if current_block_type == "tool_use" {
                    let id = block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    *current_tool_id = id.clone();
                    let _ = tx
                        .send(StreamEvent::ToolUseStart {
                            id: id.clone(),
                            name: name.clone(),
                        })
                        .await;
                    tool_blocks.push(ContentBlock::ToolUse {
                        id,
                        name,
                        input: Value::Null,
                    });
                }
            }
        }
        "content_block_delta" => {
            if let Some(delta) = parsed.get("delta") {
                let delta_type = delta.get("type").and_then(|v| v.as_str()).unwrap_or_default();
                if delta_type == "text_delta" {
                    let text = delta.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                    text_blocks.push(text.to_string());
                    let _ = tx
                        .send(StreamEvent::TextDelta {
                            text: text.to_string(),
                        })
                        .await;
                } else if delta_type == "input_json_delta" {
                    let partial = delta
                        .get("partial_json")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    let _ = tx
                        .send(StreamEvent::ToolUseDelta {
                            id: current_tool_id.clone(),
                            partial_json: partial.to_string(),
                        })
                        .await;
                }
            }
        }
        "content_block_stop" => {
            if current_block_type == "tool_use" {
                let _ = tx
                    .send(StreamEvent::ToolUseEnd {
                        id: current_tool_id.clone(),
                    })
                    .await;
            }
        }
        "message_delta" => {
            if let Some(sr) = parsed
                .pointer("/delta/stop_reason")
                .and_then(|v| v.as_str())
            {
                *stop_reason = Some(sr.to_string());
            }
            if let Some(t) = parsed.pointer("/usage/output_tokens").and_then(|v| v.as_u64()) {
                *output_tokens = t;
            }
        }
        _ => {}
    }
}
