pub mod dispatch;
pub mod loop_impl;
pub mod prompt;

pub use dispatch::{FunctionCallSpec, SEARCH_TOOL_NAME, tool_declarations};
pub use loop_impl::{
    AgentAnswer, AgentConfig, AgentProgressEvent, TurnDecision, run_turn_with_events,
};
pub use prompt::{LANGUAGE_GREETING, PERSONA_PROMPT};
