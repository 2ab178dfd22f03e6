use serde_json::{Value, json};

use crate::llm::provider::{AssistantPart, FunctionDeclaration};
use crate::search::{SearchOutcome, SearchProvider, SiteSearchTool};

pub const SEARCH_TOOL_NAME: &str = "search_kau_website";

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallSpec {
    pub id: Option<String>,
    pub name: String,
    pub args_json: Value,
}

pub fn tool_declarations() -> Vec<FunctionDeclaration> {
    vec![FunctionDeclaration {
        name: SEARCH_TOOL_NAME.to_string(),
        description:
            "Searches the Kerala Agricultural University website for farming information, falling back to a general web search."
                .to_string(),
        parameters_json_schema: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The farming question or keywords to search for"
                }
            },
            "required": ["query"]
        }),
    }]
}

pub async fn dispatch_calls<S: SearchProvider>(
    search: &SiteSearchTool<S>,
    calls: &[FunctionCallSpec],
) -> Vec<AssistantPart> {
    let mut parts = Vec::with_capacity(calls.len());
    for call in calls {
        let response_json = dispatch_one(search, call).await;
        parts.push(AssistantPart::FunctionResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            response_json,
            thought_signature: None,
        });
    }
    parts
}

async fn dispatch_one<S: SearchProvider>(search: &SiteSearchTool<S>, call: &FunctionCallSpec) -> Value {
    match call.name.as_str() {
        SEARCH_TOOL_NAME => dispatch_search(search, call).await,
        _ => error_envelope(
            "unknown_function",
            format!("unknown function: {}", call.name),
            json!({}),
        ),
    }
}

async fn dispatch_search<S: SearchProvider>(search: &SiteSearchTool<S>, call: &FunctionCallSpec) -> Value {
    let Some(query) = query_arg(&call.args_json) else {
        return error_envelope(
            "invalid_args",
            format!("{SEARCH_TOOL_NAME} requires a non-empty string argument 'query'"),
            json!({ "args": call.args_json }),
        );
    };

    let outcome = search.search_outcome(query).await;
    outcome_envelope(&outcome)
}

fn query_arg(args: &Value) -> Option<&str> {
    match args {
        Value::Object(map) => map.get("query").and_then(Value::as_str),
        Value::String(raw) => Some(raw.as_str()),
        _ => None,
    }
    .map(str::trim)
    .filter(|query| !query.is_empty())
}

/// The model only ever sees rendered text plus its provenance tag.
fn outcome_envelope(outcome: &SearchOutcome) -> Value {
    json!({
        "ok": true,
        "result": {
            "provenance": outcome.provenance().as_str(),
            "text": outcome.render(),
        }
    })
}

fn error_envelope(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details,
        }
    })
}
