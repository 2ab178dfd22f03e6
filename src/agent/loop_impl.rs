use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::Value;
use tokio::time::timeout;

use crate::agent::dispatch::{FunctionCallSpec, dispatch_calls, tool_declarations};
use crate::agent::prompt::{FINALIZE_SUFFIX, PERSONA_PROMPT};
use crate::llm::provider::{
    AssistantCandidate, AssistantInput, AssistantMessage, AssistantPart, AssistantRole,
    LlmProvider, LlmTokenUsageTotals, ToolCallingMode,
};
use crate::search::{SearchProvider, SiteSearchTool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub per_step_timeout_ms: u64,
    pub total_timeout_ms: u64,
    pub invalid_response_retries: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 6,
            per_step_timeout_ms: 20_000,
            total_timeout_ms: 60_000,
            invalid_response_retries: 1,
        }
    }
}

/// Result of one user turn.
///
/// `new_messages` holds the turn as it should be remembered: the user message,
/// any tool round trips, and the final model text. It is empty for degraded
/// turns so that failures never leak into the conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentAnswer {
    pub text: String,
    pub degraded: bool,
    pub new_messages: Vec<AssistantMessage>,
    pub token_usage: Option<LlmTokenUsageTotals>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentProgressEvent {
    StepStarted {
        step: usize,
    },
    ModelResponse {
        step: usize,
        thought_signatures: usize,
        tool_calls: usize,
        has_text: bool,
    },
    ToolRequest {
        step: usize,
        id: Option<String>,
        name: String,
        args_json: Value,
    },
    ToolResult {
        step: usize,
        id: Option<String>,
        name: String,
        response_json: Value,
    },
}

/// What the model chose to do on one step.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnDecision {
    AnswerDirectly(String),
    InvokeTools(Vec<FunctionCallSpec>),
}

impl TurnDecision {
    /// `None` when the candidate carries neither calls nor usable text.
    pub fn from_parts(parts: &[AssistantPart]) -> Option<Self> {
        let calls = extract_function_calls(parts);
        if !calls.is_empty() {
            return Some(Self::InvokeTools(calls));
        }
        let text = extract_text(parts);
        if text.is_empty() {
            None
        } else {
            Some(Self::AnswerDirectly(text))
        }
    }
}

pub async fn run_turn_with_events<
    P: LlmProvider,
    S: SearchProvider,
    F: FnMut(AgentProgressEvent),
>(
    provider: &P,
    search: &SiteSearchTool<S>,
    history: &[AssistantMessage],
    user_text: &str,
    config: &AgentConfig,
    max_output_tokens: Option<u32>,
    on_event: &mut F,
) -> Result<AgentAnswer> {
    let user_message = AssistantMessage::user_text(user_text);
    let mut messages = history.to_vec();
    messages.push(user_message.clone());
    let mut turn = vec![user_message];

    let tools = tool_declarations();
    let total_deadline = Instant::now() + Duration::from_millis(config.total_timeout_ms);
    let mut invalid_response_attempts = 0usize;
    let mut usage = LlmTokenUsageTotals::default();

    for step in 1..=config.max_steps {
        on_event(AgentProgressEvent::StepStarted { step });

        let Some(timeout_budget) = step_budget(config, total_deadline) else {
            return Ok(degraded(
                "Assistant hit the total time limit while looking into your question.",
                usage,
            ));
        };

        let llm = timeout(
            timeout_budget,
            provider.generate(AssistantInput {
                system_instruction: Some(PERSONA_PROMPT.to_string()),
                messages: messages.clone(),
                tools: tools.clone(),
                tool_calling_mode: ToolCallingMode::Auto,
                max_output_tokens,
            }),
        )
        .await;

        let output = match llm {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                tracing::error!(step, error = %err, "model request failed");
                return Ok(degraded(
                    format!("Assistant request failed while reasoning: {err}"),
                    usage,
                ));
            }
            Err(_) => {
                tracing::warn!(step, "model step timed out");
                return Ok(degraded(
                    "Assistant hit a per-step timeout while looking into your question.",
                    usage,
                ));
            }
        };
        usage.add(output.usage);

        let decision = select_candidate(&output.candidates)
            .and_then(|candidate| Some((candidate, TurnDecision::from_parts(&candidate.message.parts)?)));

        let Some((candidate, decision)) = decision else {
            if invalid_response_attempts >= config.invalid_response_retries {
                return Ok(degraded(
                    "Assistant returned an invalid response repeatedly and could not answer.",
                    usage,
                ));
            }
            invalid_response_attempts += 1;
            tracing::debug!(step, "invalid model response, asking for a repair");
            messages.push(repair_prompt_message());
            continue;
        };

        let parts = &candidate.message.parts;
        on_event(AgentProgressEvent::ModelResponse {
            step,
            thought_signatures: count_thought_signatures(parts),
            tool_calls: match &decision {
                TurnDecision::InvokeTools(calls) => calls.len(),
                TurnDecision::AnswerDirectly(_) => 0,
            },
            has_text: !extract_text(parts).is_empty(),
        });

        messages.push(candidate.message.clone());
        turn.push(candidate.message.clone());

        let calls = match decision {
            TurnDecision::AnswerDirectly(text) => {
                return Ok(AgentAnswer {
                    text,
                    degraded: false,
                    new_messages: turn,
                    token_usage: Some(usage),
                });
            }
            TurnDecision::InvokeTools(calls) => calls,
        };

        for call in &calls {
            on_event(AgentProgressEvent::ToolRequest {
                step,
                id: call.id.clone(),
                name: call.name.clone(),
                args_json: call.args_json.clone(),
            });
        }

        let responses = dispatch_calls(search, &calls).await;
        for response in &responses {
            if let AssistantPart::FunctionResponse {
                id,
                name,
                response_json,
                ..
            } = response
            {
                on_event(AgentProgressEvent::ToolResult {
                    step,
                    id: id.clone(),
                    name: name.clone(),
                    response_json: response_json.clone(),
                });
            }
        }
        let tool_message = AssistantMessage {
            role: AssistantRole::User,
            parts: responses,
        };
        messages.push(tool_message.clone());
        turn.push(tool_message);
    }

    if let Some(timeout_budget) = step_budget(config, total_deadline)
        && let Some(text) =
            finalize_without_tools(provider, &messages, timeout_budget, max_output_tokens, &mut usage)
                .await
    {
        return Ok(AgentAnswer {
            text,
            degraded: true,
            new_messages: Vec::new(),
            token_usage: Some(usage),
        });
    }

    Ok(degraded(
        "Assistant reached the step limit while looking into your question.",
        usage,
    ))
}

fn step_budget(config: &AgentConfig, total_deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= total_deadline {
        return None;
    }
    let budget = Duration::from_millis(config.per_step_timeout_ms).min(total_deadline - now);
    (!budget.is_zero()).then_some(budget)
}

fn degraded(message: impl Into<String>, usage: LlmTokenUsageTotals) -> AgentAnswer {
    AgentAnswer {
        text: message.into(),
        degraded: true,
        new_messages: Vec::new(),
        token_usage: (usage.requests > 0).then_some(usage),
    }
}

fn repair_prompt_message() -> AssistantMessage {
    AssistantMessage::user_text(
        "Your previous response was empty or unusable. Either call search_kau_website or reply with a short plain-text answer.",
    )
}

fn select_candidate(candidates: &[AssistantCandidate]) -> Option<&AssistantCandidate> {
    candidates
        .iter()
        .find(|candidate| {
            is_usable_candidate(candidate)
                && !has_function_calls(&candidate.message.parts)
                && !extract_text(&candidate.message.parts).is_empty()
        })
        .or_else(|| {
            candidates.iter().find(|candidate| {
                is_usable_candidate(candidate) && has_function_calls(&candidate.message.parts)
            })
        })
        .or_else(|| candidates.iter().find(|candidate| is_usable_candidate(candidate)))
}

fn is_usable_candidate(candidate: &AssistantCandidate) -> bool {
    !candidate.safety_blocked
        && !candidate.message.parts.is_empty()
        && !matches!(
            candidate.finish_reason.as_deref(),
            Some("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")
        )
}

fn has_function_calls(parts: &[AssistantPart]) -> bool {
    parts
        .iter()
        .any(|part| matches!(part, AssistantPart::FunctionCall { .. }))
}

fn count_thought_signatures(parts: &[AssistantPart]) -> usize {
    parts
        .iter()
        .filter(|part| match part {
            AssistantPart::Text {
                thought_signature, ..
            }
            | AssistantPart::FunctionCall {
                thought_signature, ..
            }
            | AssistantPart::FunctionResponse {
                thought_signature, ..
            } => thought_signature.is_some(),
        })
        .count()
}

async fn finalize_without_tools<P: LlmProvider>(
    provider: &P,
    messages: &[AssistantMessage],
    timeout_budget: Duration,
    max_output_tokens: Option<u32>,
    usage: &mut LlmTokenUsageTotals,
) -> Option<String> {
    let output = timeout(
        timeout_budget,
        provider.generate(AssistantInput {
            system_instruction: Some(format!("{PERSONA_PROMPT}\n\n{FINALIZE_SUFFIX}")),
            messages: messages.to_vec(),
            tools: vec![],
            tool_calling_mode: ToolCallingMode::None,
            max_output_tokens,
        }),
    )
    .await
    .ok()?
    .ok()?;
    usage.add(output.usage);

    let candidate = select_candidate(&output.candidates)?;
    let text = extract_text(&candidate.message.parts);
    if text.is_empty() { None } else { Some(text) }
}

fn extract_function_calls(parts: &[AssistantPart]) -> Vec<FunctionCallSpec> {
    parts
        .iter()
        .filter_map(|part| match part {
            AssistantPart::FunctionCall {
                id,
                name,
                args_json,
                ..
            } => Some(FunctionCallSpec {
                id: id.clone(),
                name: name.clone(),
                args_json: args_json.clone(),
            }),
            _ => None,
        })
        .collect()
}

fn extract_text(parts: &[AssistantPart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            AssistantPart::Text { text, .. } => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::{TurnDecision, extract_text, select_candidate};
    use crate::agent::prompt::{FINALIZE_SUFFIX, PERSONA_PROMPT};
    use crate::agent::{AgentConfig, AgentProgressEvent, run_turn_with_events};
    use crate::llm::provider::{
        AssistantCandidate, AssistantInput, AssistantMessage, AssistantOutput, AssistantPart,
        AssistantRole, LlmError, LlmProvider, LlmTokenUsage, ToolCallingMode,
    };
    use crate::search::{SearchProvider, SearchResult, SiteSearchTool};

    struct FakeProvider {
        responses: Arc<Mutex<VecDeque<Result<AssistantOutput, LlmError>>>>,
        seen_inputs: Arc<Mutex<Vec<AssistantInput>>>,
    }

    impl FakeProvider {
        fn new(responses: Vec<Result<AssistantOutput, LlmError>>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(VecDeque::from(responses))),
                seen_inputs: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl LlmProvider for FakeProvider {
        async fn generate(&self, input: AssistantInput) -> Result<AssistantOutput, LlmError> {
            self.seen_inputs.lock().expect("lock").push(input);
            self.responses
                .lock()
                .expect("lock")
                .pop_front()
                .expect("queued response")
        }
    }

    #[derive(Clone)]
    struct KauOnly(&'static str);

    impl SearchProvider for KauOnly {
        async fn run(&self, query: &str) -> SearchResult<String> {
            if query.starts_with("site:") {
                Ok(self.0.to_string())
            } else {
                Ok(String::new())
            }
        }
    }

    fn kau_tool() -> SiteSearchTool<KauOnly> {
        SiteSearchTool::new(KauOnly("Apply pseudomonas for rice blast."), "kau.in")
    }

    fn reply(parts: Vec<AssistantPart>) -> Result<AssistantOutput, LlmError> {
        Ok(AssistantOutput {
            candidates: vec![AssistantCandidate {
                message: AssistantMessage {
                    role: AssistantRole::Model,
                    parts,
                },
                finish_reason: Some("STOP".to_string()),
                safety_blocked: false,
            }],
            usage: Some(LlmTokenUsage {
                input_tokens: 10,
                output_tokens: 2,
            }),
        })
    }

    fn search_call(id: &str, query: &str) -> AssistantPart {
        AssistantPart::FunctionCall {
            id: Some(id.to_string()),
            name: "search_kau_website".to_string(),
            args_json: json!({ "query": query }),
            thought_signature: None,
        }
    }

    #[tokio::test]
    async fn greeting_turn_answers_directly_without_tools() {
        let provider = FakeProvider::new(vec![reply(vec![AssistantPart::text(
            "Hello, I am Krishi Sakhi. English or Malayalam?",
        )])]);

        let answer = run_turn_with_events(
            &provider,
            &kau_tool(),
            &[],
            "hi",
            &AgentConfig::default(),
            Some(1024),
            &mut |_| {},
        )
        .await
        .expect("answer");

        assert!(!answer.degraded);
        assert_eq!(answer.text, "Hello, I am Krishi Sakhi. English or Malayalam?");
        assert_eq!(answer.new_messages.len(), 2);
        assert_eq!(answer.new_messages[0], AssistantMessage::user_text("hi"));
        assert_eq!(answer.token_usage.map(|usage| usage.requests), Some(1));
    }

    #[tokio::test]
    async fn search_result_is_fed_back_to_model() {
        let provider = FakeProvider::new(vec![
            reply(vec![search_call("c1", "rice blast")]),
            reply(vec![AssistantPart::text("Use pseudomonas.")]),
        ]);
        let mut events = Vec::new();

        let answer = run_turn_with_events(
            &provider,
            &kau_tool(),
            &[],
            "How do I treat rice blast?",
            &AgentConfig::default(),
            None,
            &mut |event| events.push(event),
        )
        .await
        .expect("answer");

        assert_eq!(answer.text, "Use pseudomonas.");
        assert!(!answer.degraded);
        assert_eq!(answer.new_messages.len(), 4);

        let inputs = provider.seen_inputs.lock().expect("lock");
        let second = &inputs[1];
        let AssistantPart::FunctionResponse { response_json, .. } =
            &second.messages.last().expect("tool message").parts[0]
        else {
            panic!("expected function response");
        };
        assert_eq!(response_json["result"]["provenance"], json!("primary"));
        assert_eq!(
            response_json["result"]["text"],
            json!("Apply pseudomonas for rice blast.")
        );

        assert!(events.iter().any(|event| matches!(
            event,
            AgentProgressEvent::ToolRequest { name, .. } if name == "search_kau_website"
        )));
        assert!(
            events
                .iter()
                .any(|event| matches!(event, AgentProgressEvent::ToolResult { step: 1, .. }))
        );
    }

    #[tokio::test]
    async fn persona_is_the_system_instruction_on_every_step() {
        let provider = FakeProvider::new(vec![
            reply(vec![search_call("c1", "coconut mite")]),
            reply(vec![AssistantPart::text("Spray neem oil.")]),
        ]);

        run_turn_with_events(
            &provider,
            &kau_tool(),
            &[],
            "coconut mite?",
            &AgentConfig::default(),
            None,
            &mut |_| {},
        )
        .await
        .expect("answer");

        let inputs = provider.seen_inputs.lock().expect("lock");
        assert_eq!(inputs.len(), 2);
        for input in inputs.iter() {
            assert_eq!(input.system_instruction.as_deref(), Some(PERSONA_PROMPT));
            assert_eq!(input.tools.len(), 1);
            assert_eq!(input.tool_calling_mode, ToolCallingMode::Auto);
        }
    }

    #[tokio::test]
    async fn prior_history_precedes_new_user_message() {
        let provider = FakeProvider::new(vec![reply(vec![AssistantPart::text("ശരി")])]);
        let history = vec![
            AssistantMessage::user_text("hi"),
            AssistantMessage::model_text("English or Malayalam?"),
        ];

        run_turn_with_events(
            &provider,
            &kau_tool(),
            &history,
            "Malayalam",
            &AgentConfig::default(),
            None,
            &mut |_| {},
        )
        .await
        .expect("answer");

        let inputs = provider.seen_inputs.lock().expect("lock");
        assert_eq!(inputs[0].messages.len(), 3);
        assert_eq!(inputs[0].messages[..2], history[..]);
        assert_eq!(inputs[0].messages[2].plain_text(), "Malayalam");
    }

    #[tokio::test]
    async fn skips_unusable_first_candidate() {
        let provider = FakeProvider::new(vec![Ok(AssistantOutput {
            candidates: vec![
                AssistantCandidate {
                    message: AssistantMessage::model_text("blocked"),
                    finish_reason: Some("SAFETY".to_string()),
                    safety_blocked: true,
                },
                AssistantCandidate {
                    message: AssistantMessage::model_text("usable"),
                    finish_reason: Some("STOP".to_string()),
                    safety_blocked: false,
                },
            ],
            usage: None,
        })]);

        let answer = run_turn_with_events(
            &provider,
            &kau_tool(),
            &[],
            "say something",
            &AgentConfig::default(),
            None,
            &mut |_| {},
        )
        .await
        .expect("answer");

        assert_eq!(answer.text, "usable");
        assert!(!answer.degraded);
    }

    #[tokio::test]
    async fn retries_once_after_blank_response_and_keeps_repair_out_of_history() {
        let provider = FakeProvider::new(vec![
            reply(vec![AssistantPart::text(" ")]),
            reply(vec![AssistantPart::text("recovered")]),
        ]);

        let answer = run_turn_with_events(
            &provider,
            &kau_tool(),
            &[],
            "pepper wilt",
            &AgentConfig::default(),
            None,
            &mut |_| {},
        )
        .await
        .expect("answer");

        assert_eq!(answer.text, "recovered");
        assert!(!answer.degraded);
        assert_eq!(answer.new_messages.len(), 2);
        assert_eq!(answer.new_messages[1].plain_text(), "recovered");
    }

    #[tokio::test]
    async fn degrades_after_retry_budget_exhausted() {
        let provider = FakeProvider::new(vec![reply(vec![]), reply(vec![])]);

        let answer = run_turn_with_events(
            &provider,
            &kau_tool(),
            &[],
            "retry fail",
            &AgentConfig::default(),
            None,
            &mut |_| {},
        )
        .await
        .expect("answer");

        assert!(answer.degraded);
        assert!(answer.text.contains("invalid response repeatedly"));
        assert!(answer.new_messages.is_empty());
    }

    #[tokio::test]
    async fn provider_error_becomes_degraded_answer() {
        let provider = FakeProvider::new(vec![Err(LlmError::HttpStatus {
            status: 429,
            body: "rate limited".to_string(),
        })]);

        let answer = run_turn_with_events(
            &provider,
            &kau_tool(),
            &[],
            "banana pest",
            &AgentConfig::default(),
            None,
            &mut |_| {},
        )
        .await
        .expect("answer");

        assert!(answer.degraded);
        assert!(answer.text.starts_with("Assistant request failed while reasoning:"));
        assert!(answer.text.contains("429"));
        assert!(answer.new_messages.is_empty());
        assert_eq!(answer.token_usage, None);
    }

    #[tokio::test]
    async fn forces_tool_less_answer_after_step_limit() {
        let provider = FakeProvider::new(vec![
            reply(vec![search_call("c1", "rice")]),
            reply(vec![search_call("c2", "rice blast")]),
            reply(vec![AssistantPart::text("Drain the field and apply pseudomonas.")]),
        ]);
        let config = AgentConfig {
            max_steps: 2,
            ..AgentConfig::default()
        };

        let answer = run_turn_with_events(
            &provider,
            &kau_tool(),
            &[],
            "rice blast",
            &config,
            None,
            &mut |_| {},
        )
        .await
        .expect("answer");

        assert_eq!(answer.text, "Drain the field and apply pseudomonas.");
        assert!(answer.degraded);
        assert!(answer.new_messages.is_empty());
        assert_eq!(answer.token_usage.map(|usage| usage.requests), Some(3));

        let inputs = provider.seen_inputs.lock().expect("lock");
        let last = inputs.last().expect("last input");
        assert!(last.tools.is_empty());
        assert_eq!(last.tool_calling_mode, ToolCallingMode::None);
        assert!(
            last.system_instruction
                .as_deref()
                .is_some_and(|prompt| prompt.ends_with(FINALIZE_SUFFIX))
        );
    }

    #[tokio::test]
    async fn skips_fallback_when_total_budget_exhausted() {
        let provider = FakeProvider::new(vec![]);
        let config = AgentConfig {
            max_steps: 0,
            per_step_timeout_ms: 8_000,
            total_timeout_ms: 0,
            invalid_response_retries: 1,
        };

        let answer =
            run_turn_with_events(&provider, &kau_tool(), &[], "anything", &config, None, &mut |_| {})
                .await
                .expect("answer");

        assert!(answer.degraded);
        assert!(answer.text.contains("step limit"));
        assert!(provider.seen_inputs.lock().expect("lock").is_empty());
    }

    #[test]
    fn decision_prefers_tools_when_calls_are_present() {
        let decision = TurnDecision::from_parts(&[
            AssistantPart::text("let me look that up"),
            search_call("c1", "ginger rot"),
        ]);
        assert!(matches!(decision, Some(TurnDecision::InvokeTools(calls)) if calls.len() == 1));

        assert_eq!(
            TurnDecision::from_parts(&[AssistantPart::text(" done ")]),
            Some(TurnDecision::AnswerDirectly("done".to_string()))
        );
        assert_eq!(TurnDecision::from_parts(&[AssistantPart::text("  ")]), None);
    }

    #[test]
    fn select_candidate_prefers_final_text_over_tool_call() {
        let candidates = vec![
            AssistantCandidate {
                message: AssistantMessage {
                    role: AssistantRole::Model,
                    parts: vec![search_call("c1", "rice")],
                },
                finish_reason: Some("STOP".to_string()),
                safety_blocked: false,
            },
            AssistantCandidate {
                message: AssistantMessage::model_text("final answer"),
                finish_reason: Some("STOP".to_string()),
                safety_blocked: false,
            },
        ];

        let selected = select_candidate(&candidates).expect("selected candidate");
        assert_eq!(extract_text(&selected.message.parts), "final answer");
    }
}
