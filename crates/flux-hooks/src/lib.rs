pub mod engine;
pub mod types;

pub use engine::HookEngine;
pub use types::{
    HookAction, HookContext, HookDefinition, HookEvent, HookHandler, HookResult, HookTiming,
};
