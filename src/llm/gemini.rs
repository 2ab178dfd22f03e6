use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::provider::{
    AssistantCandidate, AssistantInput, AssistantMessage, AssistantOutput, AssistantPart,
    AssistantRole, LlmError, LlmProvider, LlmResult, LlmTokenUsage, ToolCallingMode,
    clip_error_body,
};
use crate::http::{HttpClient, RequestAuth};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    http: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(
        http: HttpClient,
        api_key: Option<String>,
        model: String,
        base_url: String,
    ) -> LlmResult<Self> {
        let api_key = api_key
            .filter(|v| !v.trim().is_empty())
            .ok_or(LlmError::MissingApiKey("GEMINI_API_KEY"))?;

        Ok(Self {
            http,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn build_request(input: &AssistantInput) -> GeminiGenerateRequest {
        let tools = if input.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTool {
                function_declarations: input
                    .tools
                    .iter()
                    .map(|decl| GeminiFunctionDeclaration {
                        name: decl.name.clone(),
                        description: decl.description.clone(),
                        parameters: decl.parameters_json_schema.clone(),
                    })
                    .collect(),
            }]
        };
        let tool_config = (!tools.is_empty()).then(|| GeminiToolConfig {
            function_calling_config: GeminiFunctionCallingConfig {
                mode: match input.tool_calling_mode {
                    ToolCallingMode::Auto => "AUTO",
                    ToolCallingMode::None => "NONE",
                },
            },
        });

        GeminiGenerateRequest {
            contents: input.messages.iter().map(to_gemini_content).collect(),
            system_instruction: input.system_instruction.as_ref().map(|text| {
                GeminiSystemInstruction {
                    parts: vec![GeminiTextPart { text: text.clone() }],
                }
            }),
            tools,
            tool_config,
            generation_config: input.max_output_tokens.map(|max| GeminiGenerationConfig {
                max_output_tokens: max,
            }),
        }
    }

    fn parse_response(resp: GeminiGenerateResponse) -> LlmResult<AssistantOutput> {
        if resp.candidates.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let candidates = resp
            .candidates
            .into_iter()
            .map(|candidate| {
                let parts = candidate
                    .content
                    .map(|content| content.parts)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(from_gemini_part)
                    .collect();
                let safety_blocked = matches!(
                    candidate.finish_reason.as_deref(),
                    Some("SAFETY") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT")
                );
                AssistantCandidate {
                    message: AssistantMessage {
                        role: AssistantRole::Model,
                        parts,
                    },
                    finish_reason: candidate.finish_reason,
                    safety_blocked,
                }
            })
            .collect();

        Ok(AssistantOutput {
            candidates,
            usage: resp.usage_metadata.map(|usage| LlmTokenUsage {
                input_tokens: usage.prompt_token_count,
                output_tokens: usage.candidates_token_count,
            }),
        })
    }
}

impl LlmProvider for GeminiProvider {
    async fn generate(&self, input: AssistantInput) -> LlmResult<AssistantOutput> {
        let payload = Self::build_request(&input);
        let resp = self
            .http
            .post_json(&self.endpoint(), RequestAuth::QueryKey(&self.api_key), &payload)
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        if !resp.is_success() {
            return Err(LlmError::HttpStatus {
                status: resp.status,
                body: clip_error_body(&resp.body),
            });
        }

        let parsed = serde_json::from_str::<GeminiGenerateResponse>(&resp.body)
            .map_err(|err| LlmError::Parse(err.to_string()))?;
        Self::parse_response(parsed)
    }
}

fn to_gemini_content(message: &AssistantMessage) -> GeminiContent {
    GeminiContent {
        role: match message.role {
            AssistantRole::User => "user".to_string(),
            AssistantRole::Model => "model".to_string(),
        },
        parts: message.parts.iter().map(to_gemini_part).collect(),
    }
}

fn to_gemini_part(part: &AssistantPart) -> GeminiPart {
    match part {
        AssistantPart::Text {
            text,
            thought_signature,
        } => GeminiPart {
            text: Some(text.clone()),
            thought_signature: thought_signature.clone(),
            ..GeminiPart::default()
        },
        AssistantPart::FunctionCall {
            id,
            name,
            args_json,
            thought_signature,
        } => GeminiPart {
            function_call: Some(GeminiFunctionCall {
                id: id.clone(),
                name: name.clone(),
                args: Some(args_json.clone()),
            }),
            thought_signature: thought_signature.clone(),
            ..GeminiPart::default()
        },
        AssistantPart::FunctionResponse {
            id,
            name,
            response_json,
            thought_signature,
        } => GeminiPart {
            function_response: Some(GeminiFunctionResponse {
                id: id.clone(),
                name: name.clone(),
                response: response_json.clone(),
            }),
            thought_signature: thought_signature.clone(),
            ..GeminiPart::default()
        },
    }
}

fn from_gemini_part(part: GeminiPart) -> Option<AssistantPart> {
    if let Some(call) = part.function_call {
        return Some(AssistantPart::FunctionCall {
            id: call.id,
            name: call.name,
            args_json: call.args.unwrap_or(Value::Null),
            thought_signature: part.thought_signature,
        });
    }

    part.text.map(|text| AssistantPart::Text {
        text,
        thought_signature: part.thought_signature,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerateRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<GeminiToolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiTextPart>,
}

#[derive(Debug, Serialize)]
struct GeminiTextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolConfig {
    function_calling_config: GeminiFunctionCallingConfig,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionCallingConfig {
    mode: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}
