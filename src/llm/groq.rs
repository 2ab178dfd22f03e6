use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::provider::{
    AssistantCandidate, AssistantInput, AssistantMessage, AssistantOutput, AssistantPart,
    AssistantRole, LlmError, LlmProvider, LlmResult, LlmTokenUsage, ToolCallingMode,
    clip_error_body,
};
use crate::http::{HttpClient, RequestAuth};

pub const DEFAULT_GROQ_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com";

/// Groq's OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct GroqProvider {
    http: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
}

impl GroqProvider {
    pub fn new(
        http: HttpClient,
        api_key: Option<String>,
        model: String,
        base_url: String,
    ) -> LlmResult<Self> {
        let api_key = api_key
            .filter(|v| !v.trim().is_empty())
            .ok_or(LlmError::MissingApiKey("GROQ_API_KEY"))?;

        Ok(Self {
            http,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/openai/v1/chat/completions", self.base_url)
    }

    fn build_request(&self, input: &AssistantInput) -> ChatRequest {
        let mut messages = Vec::new();
        if let Some(system) = &input.system_instruction {
            messages.push(ChatMessage {
                role: "system",
                content: Some(system.clone()),
                ..ChatMessage::default()
            });
        }
        for message in &input.messages {
            append_chat_messages(&mut messages, message);
        }

        let tools: Vec<ChatTool> = input
            .tools
            .iter()
            .map(|decl| ChatTool {
                kind: "function",
                function: ChatFunction {
                    name: decl.name.clone(),
                    description: decl.description.clone(),
                    parameters: decl.parameters_json_schema.clone(),
                },
            })
            .collect();
        let tool_choice = (!tools.is_empty()).then(|| match input.tool_calling_mode {
            ToolCallingMode::Auto => "auto",
            ToolCallingMode::None => "none",
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            tools,
            tool_choice,
            max_tokens: input.max_output_tokens,
        }
    }

    fn parse_response(resp: ChatResponse) -> LlmResult<AssistantOutput> {
        if resp.choices.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let candidates = resp
            .choices
            .into_iter()
            .map(|choice| {
                let mut parts = Vec::new();
                if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
                    parts.push(AssistantPart::text(text));
                }
                for call in choice.message.tool_calls {
                    let args_json = serde_json::from_str::<Value>(&call.function.arguments)
                        .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
                    parts.push(AssistantPart::FunctionCall {
                        id: Some(call.id),
                        name: call.function.name,
                        args_json,
                        thought_signature: None,
                    });
                }
                AssistantCandidate {
                    message: AssistantMessage {
                        role: AssistantRole::Model,
                        parts,
                    },
                    safety_blocked: choice.finish_reason.as_deref() == Some("content_filter"),
                    finish_reason: choice.finish_reason,
                }
            })
            .collect();

        Ok(AssistantOutput {
            candidates,
            usage: resp.usage.map(|usage| LlmTokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            }),
        })
    }
}

impl LlmProvider for GroqProvider {
    async fn generate(&self, input: AssistantInput) -> LlmResult<AssistantOutput> {
        let payload = self.build_request(&input);
        let resp = self
            .http
            .post_json(&self.endpoint(), RequestAuth::Bearer(&self.api_key), &payload)
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        if !resp.is_success() {
            return Err(LlmError::HttpStatus {
                status: resp.status,
                body: clip_error_body(&resp.body),
            });
        }

        let parsed = serde_json::from_str::<ChatResponse>(&resp.body)
            .map_err(|err| LlmError::Parse(err.to_string()))?;
        Self::parse_response(parsed)
    }
}

/// One provider-neutral message can fan out into several chat messages:
/// function responses become individual `tool` messages.
fn append_chat_messages(out: &mut Vec<ChatMessage>, message: &AssistantMessage) {
    let text = message.plain_text();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for part in &message.parts {
        match part {
            AssistantPart::Text { .. } => {}
            AssistantPart::FunctionCall {
                id, name, args_json, ..
            } => tool_calls.push(ChatToolCall {
                id: id.clone().unwrap_or_else(|| format!("call_{name}")),
                kind: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: args_json.to_string(),
                },
            }),
            AssistantPart::FunctionResponse {
                id,
                name,
                response_json,
                ..
            } => tool_results.push(ChatMessage {
                role: "tool",
                content: Some(response_json.to_string()),
                tool_call_id: Some(id.clone().unwrap_or_else(|| format!("call_{name}"))),
                ..ChatMessage::default()
            }),
        }
    }

    match message.role {
        AssistantRole::Model => out.push(ChatMessage {
            role: "assistant",
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            ..ChatMessage::default()
        }),
        AssistantRole::User => {
            if !text.is_empty() {
                out.push(ChatMessage {
                    role: "user",
                    content: Some(text),
                    ..ChatMessage::default()
                });
            }
            out.extend(tool_results);
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ChatToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: ChatToolCallFunction,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCallFunction {
    name: String,
    #[serde(default = "empty_arguments")]
    arguments: String,
}

fn empty_arguments() -> String {
    json!({}).to_string()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
