use serde::{Deserialize, Serialize};

use flux_llm::StopReason;

/// Outcome of one `ConversationEngine::run_turn`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnResult {
    pub text: String,
    pub tool_rounds: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub stop_reason: Option<StopReason>,
    pub error: Option<String>,
}

/// Events emitted by `run_turn_stream`, mirroring
/// `original_source/openclaw/conversation_engine.py`'s `StreamEvent`
/// union. The `ToolResult` variant is synthesised by the engine itself
/// (the provider never emits it); its `result` is truncated to 200
/// characters the way the source truncates before yielding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    TextDelta { text: String },
    ToolUseStart { id: String, name: String },
    ToolUseDelta { id: String, partial_json: String },
    ToolUseEnd { id: String },
    ToolResult { name: String, result: String },
    Error { message: String },
    TurnComplete { result: TurnResult },
}
