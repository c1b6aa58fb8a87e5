use std::sync::RwLock;

use tracing::warn;

use crate::types::{HookAction, HookContext, HookDefinition, HookEvent, HookResult, HookTiming};

/// Registry + dispatcher for hooks, mirroring `skynet-hooks::HookEngine`.
/// `Before` hooks run in priority order and may block or rewrite the
/// payload in place; `After` hooks run fire-and-forget.
pub struct HookEngine {
    hooks: RwLock<Vec<HookDefinition>>,
}

impl Default for HookEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HookEngine {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, def: HookDefinition) {
        let mut hooks = self.hooks.write().unwrap();
        hooks.push(def);
        hooks.sort_by_key(|h| h.priority);
    }

    pub fn unregister(&self, name: &str) {
        self.hooks.write().unwrap().retain(|h| h.name != name);
    }

    /// Runs `Before` hooks, then (if not blocked) `After` hooks.
    /// Returns the (possibly modified) context and whether it was
    /// blocked.
    pub fn emit(&self, mut ctx: HookContext) -> (HookContext, Option<String>) {
        let (new_ctx, blocked) = self.emit_before(ctx.clone());
        ctx = new_ctx;
        if blocked.is_none() {
            self.emit_after(ctx.clone());
        }
        (ctx, blocked)
    }

    pub fn emit_before(&self, mut ctx: HookContext) -> (HookContext, Option<String>) {
        let hooks: Vec<HookDefinition> = self
            .hooks
            .read()
            .unwrap()
            .iter()
            .filter(|h| h.event == ctx.event && h.timing == HookTiming::Before)
            .cloned()
            .collect();

        for hook in hooks {
            let HookResult { action } = hook.handler.handle(&ctx);
            match action {
                HookAction::Allow => {}
                HookAction::Block { reason } => return (ctx, Some(reason)),
                HookAction::Modify { payload } => ctx.payload = payload,
            }
        }
        (ctx, None)
    }

    pub fn emit_after(&self, ctx: HookContext) {
        let hooks: Vec<HookDefinition> = self
            .hooks
            .read()
            .unwrap()
            .iter()
            .filter(|h| h.event == ctx.event && h.timing == HookTiming::After)
            .cloned()
            .collect();

        for hook in hooks {
            let HookResult { action } = hook.handler.handle(&ctx);
            if matches!(action, HookAction::Block { .. }) {
                warn!(hook = %hook.name, "after-hook returned Block, ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HookHandler;
    use std::sync::Arc;

    struct Blocker;
    impl HookHandler for Blocker {
        fn handle(&self, _ctx: &HookContext) -> HookResult {
            HookResult::block("nope")
        }
    }

    struct Allower;
    impl HookHandler for Allower {
        fn handle(&self, _ctx: &HookContext) -> HookResult {
            HookResult::allow()
        }
    }

    #[test]
    fn before_hook_can_block() {
        let engine = HookEngine::new();
        engine.register(HookDefinition::new(
            "blocker",
            HookEvent::ToolCall,
            HookTiming::Before,
            Arc::new(Blocker),
        ));
        let ctx = HookContext::new(HookEvent::ToolCall, serde_json::json!({}));
        let (_, blocked) = engine.emit(ctx);
        assert_eq!(blocked, Some("nope".to_string()));
    }

    #[test]
    fn allowed_event_runs_after_hooks() {
        let engine = HookEngine::new();
        engine.register(HookDefinition::new(
            "allower",
            HookEvent::ToolCall,
            HookTiming::Before,
            Arc::new(Allower),
        ));
        let ctx = HookContext::new(HookEvent::ToolCall, serde_json::json!({}));
        let (_, blocked) = engine.emit(ctx);
        assert!(blocked.is_none());
    }
}
