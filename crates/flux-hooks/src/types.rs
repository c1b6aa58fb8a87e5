use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Named observation points exposed to hook handlers. Replaces the
/// source's optional function-pointer callbacks (`on_tool_start`, …)
/// with a channel/observer interface instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    MessageReceived,
    MessageSent,
    ToolCall,
    ToolResult,
    TurnStart,
    TurnComplete,
    LlmInput,
    LlmOutput,
    LlmError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookTiming {
    Before,
    After,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HookAction {
    Allow,
    Block { reason: String },
    Modify { payload: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookContext {
    pub event: HookEvent,
    pub payload: Value,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub timestamp: i64,
}

impl HookContext {
    pub fn new(event: HookEvent, payload: Value) -> Self {
        Self {
            event,
            payload,
            user_id: None,
            conversation_id: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HookResult {
    pub action: HookAction,
}

impl HookResult {
    pub fn allow() -> Self {
        Self {
            action: HookAction::Allow,
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            action: HookAction::Block {
                reason: reason.into(),
            },
        }
    }
}

pub trait HookHandler: Send + Sync {
    fn handle(&self, ctx: &HookContext) -> HookResult;
}

#[derive(Clone)]
pub struct HookDefinition {
    pub name: String,
    pub event: HookEvent,
    pub timing: HookTiming,
    pub handler: Arc<dyn HookHandler>,
    pub priority: i32,
}

impl HookDefinition {
    pub fn new(
        name: impl Into<String>,
        event: HookEvent,
        timing: HookTiming,
        handler: Arc<dyn HookHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            event,
            timing,
            handler,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
