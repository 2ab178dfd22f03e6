use anyhow::{Result, bail};

use crate::agent::{AgentAnswer, AgentConfig, AgentProgressEvent, run_turn_with_events};
use crate::llm::provider::LlmProvider;
use crate::memory::{ConversationStore, SessionId};
use crate::search::{SearchProvider, SiteSearchTool};
use crate::trace::SessionTrace;

/// Farming assistant: a model that may consult the site search tool, plus
/// per-session conversation memory.
pub struct FarmAssistant<P, S> {
    provider: P,
    search: SiteSearchTool<S>,
    store: ConversationStore,
    config: AgentConfig,
    max_output_tokens: Option<u32>,
    trace: Option<SessionTrace>,
}

impl<P: LlmProvider, S: SearchProvider> FarmAssistant<P, S> {
    pub fn new(provider: P, search: SiteSearchTool<S>, store: ConversationStore) -> Self {
        Self {
            provider,
            search,
            store,
            config: AgentConfig::default(),
            max_output_tokens: None,
            trace: None,
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn with_trace(mut self, trace: SessionTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn search_tool(&self) -> &SiteSearchTool<S> {
        &self.search
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Advances the conversation `session` by one user turn.
    ///
    /// The turn is committed to the store only when the model produced a
    /// regular answer; degraded answers are returned but forgotten.
    pub async fn advance<F: FnMut(AgentProgressEvent)>(
        &self,
        session: &SessionId,
        user_text: &str,
        on_event: &mut F,
    ) -> Result<AgentAnswer> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            bail!("Cannot send an empty message to the assistant");
        }

        let history = self.store.history(session);
        tracing::debug!(session = %session, history = history.len(), "advancing conversation");
        if let Some(trace) = &self.trace {
            trace.log_user_input(user_text);
        }

        let mut observe = |event: AgentProgressEvent| {
            if let Some(trace) = &self.trace {
                trace_event(trace, &event);
            }
            on_event(event);
        };

        let answer = run_turn_with_events(
            &self.provider,
            &self.search,
            &history,
            user_text,
            &self.config,
            self.max_output_tokens,
            &mut observe,
        )
        .await?;

        if answer.degraded {
            tracing::warn!(session = %session, "turn degraded; history left unchanged");
            if let Some(trace) = &self.trace {
                trace.log_answer_error(&answer.text);
            }
        } else {
            self.store.append(session, answer.new_messages.iter().cloned());
            if let Some(trace) = &self.trace {
                trace.log_answer(&answer.text);
            }
        }

        Ok(answer)
    }
}

fn trace_event(trace: &SessionTrace, event: &AgentProgressEvent) {
    match event {
        AgentProgressEvent::ToolRequest {
            name, args_json, ..
        } => trace.log_tool_call(name, &args_json.to_string()),
        AgentProgressEvent::ToolResult {
            name,
            response_json,
            ..
        } => trace.log_tool_result(name, &response_json.to_string()),
        AgentProgressEvent::StepStarted { .. } | AgentProgressEvent::ModelResponse { .. } => {}
    }
}
