use std::io::{self, Write};

use anyhow::{Result, bail};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::commands::{Command, HELP_TEXT, is_command_line, is_exit_line, parse_command};
use super::theme::Theme;
use crate::agent::AgentProgressEvent;
use crate::assistant::FarmAssistant;
use crate::config::ThemeToken;
use crate::llm::provider::{AssistantMessage, AssistantPart, AssistantRole, LlmError, LlmProvider};
use crate::memory::{ConversationStore, SessionId};
use crate::search::{SearchProvider, SiteSearchTool};
use crate::trace::SessionTrace;

pub const PROMPT: &str = "krishi> ";

pub struct AppState<P, S> {
    pub session_id: SessionId,
    pub assistant: Result<FarmAssistant<P, S>, LlmError>,
    pub search: SiteSearchTool<S>,
    pub store: ConversationStore,
    pub theme: Theme,
    pub show_steps: bool,
    pub trace: SessionTrace,
}

pub async fn run_repl<P: LlmProvider, S: SearchProvider>(state: &mut AppState<P, S>) -> Result<()> {
    let mut out = io::stdout();
    write_banner(state, &mut out)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        write!(out, "{}", state.theme.paint(ThemeToken::Prompt, PROMPT))?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };
        if is_exit_line(&line) {
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        handle_line(state, line, &mut out).await?;
    }

    Ok(())
}

/// Answers one question without the interactive loop.
pub async fn run_once<P: LlmProvider, S: SearchProvider>(
    state: &mut AppState<P, S>,
    question: &str,
) -> Result<()> {
    let assistant = match &state.assistant {
        Ok(assistant) => assistant,
        Err(err) => bail!("{}", unavailable_message(err)),
    };

    let answer = assistant
        .advance(&state.session_id, question, &mut |_| {})
        .await?;
    if answer.degraded {
        bail!("{}", answer.text);
    }

    println!("{}", answer.text);
    Ok(())
}

fn write_banner<P, S, W: Write>(state: &AppState<P, S>, out: &mut W) -> io::Result<()> {
    let banner = format!(
        "Krishi Sakhi, your farming friend. Session {}. Type /help for commands, exit to leave.",
        state.session_id
    );
    writeln!(out, "{}", state.theme.paint(ThemeToken::SystemInfo, &banner))?;
    if let Err(err) = &state.assistant {
        writeln!(
            out,
            "{}",
            state
                .theme
                .paint(ThemeToken::SystemError, &unavailable_message(err))
        )?;
    }
    Ok(())
}

pub(crate) async fn handle_line<P, S, W>(
    state: &mut AppState<P, S>,
    line: &str,
    out: &mut W,
) -> io::Result<()>
where
    P: LlmProvider,
    S: SearchProvider,
    W: Write,
{
    if is_command_line(line) {
        return match parse_command(line) {
            Ok(command) => handle_command(state, command, out).await,
            Err(err) => writeln!(
                out,
                "{}",
                state.theme.paint(ThemeToken::SystemError, err.message())
            ),
        };
    }

    ask_assistant(state, line, out).await
}

async fn ask_assistant<P, S, W>(state: &AppState<P, S>, line: &str, out: &mut W) -> io::Result<()>
where
    P: LlmProvider,
    S: SearchProvider,
    W: Write,
{
    let assistant = match &state.assistant {
        Ok(assistant) => assistant,
        Err(err) => {
            return writeln!(
                out,
                "{}",
                state
                    .theme
                    .paint(ThemeToken::SystemError, &unavailable_message(err))
            );
        }
    };

    let theme = &state.theme;
    writeln!(
        out,
        "{}",
        theme.paint(ThemeToken::AssistantWaiting, "Krishi Sakhi is thinking...")
    )?;
    out.flush()?;

    let show_steps = state.show_steps;
    let mut write_error = None;
    let result = {
        let mut on_event = |event: AgentProgressEvent| {
            if !show_steps || write_error.is_some() {
                return;
            }
            if let Some((token, text)) = format_event(&event)
                && let Err(err) = writeln!(out, "{}", theme.paint(token, &text))
            {
                write_error = Some(err);
            }
        };
        assistant
            .advance(&state.session_id, line, &mut on_event)
            .await
    };
    // A failed step line does not abort the turn; it is reported after the turn is stored.
    if let Some(err) = write_error {
        return Err(err);
    }

    match result {
        Ok(answer) if answer.degraded => {
            writeln!(out, "{}", theme.paint(ThemeToken::SystemError, &answer.text))
        }
        Ok(answer) => writeln!(out, "{}", theme.paint(ThemeToken::AssistantText, &answer.text)),
        Err(err) => writeln!(
            out,
            "{}",
            theme.paint(ThemeToken::SystemError, &format!("error: {err}"))
        ),
    }
}

async fn handle_command<P, S, W>(
    state: &mut AppState<P, S>,
    command: Command,
    out: &mut W,
) -> io::Result<()>
where
    P: LlmProvider,
    S: SearchProvider,
    W: Write,
{
    let theme = &state.theme;
    match command {
        Command::Help => writeln!(out, "{}", theme.paint(ThemeToken::SystemInfo, HELP_TEXT)),
        Command::New => {
            state.session_id = SessionId::generate();
            state.trace.log_session(state.session_id.as_str());
            tracing::info!(session = %state.session_id, "started new session");
            writeln!(
                out,
                "{}",
                state.theme.paint(
                    ThemeToken::SystemInfo,
                    &format!("Started new session {}", state.session_id)
                )
            )
        }
        Command::Session => {
            let count = state.store.message_count(&state.session_id);
            writeln!(
                out,
                "{}",
                theme.paint(
                    ThemeToken::SystemInfo,
                    &format!("Session {} ({count} messages)", state.session_id)
                )
            )
        }
        Command::History(limit) => {
            let history = state.store.history(&state.session_id);
            let entries = history
                .iter()
                .filter_map(describe_message)
                .collect::<Vec<_>>();
            if entries.is_empty() {
                return writeln!(
                    out,
                    "{}",
                    theme.paint(ThemeToken::SystemInfo, "No messages in this session yet.")
                );
            }
            let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
            for (token, text) in entries.into_iter().skip(skip) {
                writeln!(out, "{}", theme.paint(token, &text))?;
            }
            Ok(())
        }
        Command::Search { query } => {
            let outcome = state.search.search_outcome(&query).await;
            writeln!(
                out,
                "{} {}",
                theme.paint(
                    ThemeToken::SearchProvenance,
                    &format!("[{}]", outcome.provenance().as_str())
                ),
                theme.paint(ThemeToken::AssistantText, &outcome.render())
            )
        }
        Command::Steps(None) => {
            let state_text = if state.show_steps { "on" } else { "off" };
            writeln!(
                out,
                "{}",
                theme.paint(ThemeToken::SystemInfo, &format!("steps: {state_text}"))
            )
        }
        Command::Steps(Some(enabled)) => {
            state.show_steps = enabled;
            let state_text = if enabled { "on" } else { "off" };
            writeln!(
                out,
                "{}",
                state
                    .theme
                    .paint(ThemeToken::SystemInfo, &format!("steps: {state_text}"))
            )
        }
        Command::Trace => writeln!(
            out,
            "{}",
            theme.paint(
                ThemeToken::SystemInfo,
                &format!("Trace file: {}", state.trace.file_path().display())
            )
        ),
    }
}

fn unavailable_message(err: &LlmError) -> String {
    match err {
        LlmError::MissingApiKey(var) => format!(
            "Assistant unavailable: missing {var}. Configure it in your shell, .env file or config.toml (example: {var}=your_key). /search still works."
        ),
        other => format!("Assistant unavailable: {other}"),
    }
}

fn format_event(event: &AgentProgressEvent) -> Option<(ThemeToken, String)> {
    match event {
        AgentProgressEvent::ToolRequest {
            step,
            name,
            args_json,
            ..
        } => Some((
            ThemeToken::ProgressRequest,
            format!("  step {step}: {name} {args_json}"),
        )),
        AgentProgressEvent::ToolResult {
            step,
            name,
            response_json,
            ..
        } => {
            let summary = match response_json.pointer("/result/provenance") {
                Some(Value::String(provenance)) => format!("provenance {provenance}"),
                _ => match response_json.pointer("/error/code") {
                    Some(Value::String(code)) => format!("error {code}"),
                    _ => "done".to_string(),
                },
            };
            Some((
                ThemeToken::ProgressResult,
                format!("  step {step}: {name} -> {summary}"),
            ))
        }
        AgentProgressEvent::StepStarted { .. } | AgentProgressEvent::ModelResponse { .. } => None,
    }
}

fn describe_message(message: &AssistantMessage) -> Option<(ThemeToken, String)> {
    let text = message.plain_text();
    match message.role {
        AssistantRole::User if !text.is_empty() => {
            Some((ThemeToken::HistoryUser, format!("you: {text}")))
        }
        AssistantRole::Model if !text.is_empty() => {
            Some((ThemeToken::HistoryModel, format!("krishi: {text}")))
        }
        AssistantRole::Model => {
            let queries = message
                .parts
                .iter()
                .filter_map(|part| match part {
                    AssistantPart::FunctionCall { args_json, .. } => args_json
                        .get("query")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                    _ => None,
                })
                .collect::<Vec<_>>();
            (!queries.is_empty()).then(|| {
                (
                    ThemeToken::ProgressRequest,
                    format!("krishi searched: {}", queries.join("; ")),
                )
            })
        }
        AssistantRole::User => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::{AppState, describe_message, format_event, handle_line};
    use crate::agent::AgentProgressEvent;
    use crate::assistant::FarmAssistant;
    use crate::cli::theme::Theme;
    use crate::llm::provider::{
        AssistantCandidate, AssistantInput, AssistantMessage, AssistantOutput, AssistantPart,
        AssistantRole, LlmError, LlmProvider,
    };
    use crate::memory::{ConversationStore, SessionId};
    use crate::search::{SearchProvider, SearchResult, SiteSearchTool};
    use crate::trace::SessionTrace;

    #[derive(Clone)]
    struct ScriptedModel {
        replies: Arc<Mutex<VecDeque<AssistantMessage>>>,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Self {
            Self::with_messages(
                replies
                    .iter()
                    .map(|reply| AssistantMessage::model_text(*reply))
                    .collect(),
            )
        }

        fn with_messages(replies: Vec<AssistantMessage>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            }
        }
    }

    impl LlmProvider for ScriptedModel {
        async fn generate(&self, _input: AssistantInput) -> Result<AssistantOutput, LlmError> {
            let message = self
                .replies
                .lock()
                .expect("lock")
                .pop_front()
                .expect("queued reply");
            Ok(AssistantOutput {
                candidates: vec![AssistantCandidate {
                    message,
                    finish_reason: Some("STOP".to_string()),
                    safety_blocked: false,
                }],
                usage: None,
            })
        }
    }

    #[derive(Clone)]
    struct GeneralOnly;

    impl SearchProvider for GeneralOnly {
        async fn run(&self, query: &str) -> SearchResult<String> {
            if query.starts_with("site:") {
                Ok(String::new())
            } else {
                Ok("Banana weevil is a common pest.".to_string())
            }
        }
    }

    fn state(
        model: Result<ScriptedModel, LlmError>,
        trace_dir: &std::path::Path,
    ) -> AppState<ScriptedModel, GeneralOnly> {
        let store = ConversationStore::new();
        let search = SiteSearchTool::new(GeneralOnly, "kau.in");
        let session_id = SessionId::new("repl-test").expect("id");
        let trace = SessionTrace::create_in_temp_dir(session_id.as_str(), trace_dir)
            .expect("trace");
        AppState {
            assistant: model
                .map(|model| FarmAssistant::new(model, search.clone(), store.clone())),
            session_id,
            search,
            store,
            theme: Theme::disabled(),
            show_steps: false,
            trace,
        }
    }

    async fn run_line(state: &mut AppState<ScriptedModel, GeneralOnly>, line: &str) -> String {
        let mut out = Vec::new();
        handle_line(state, line, &mut out).await.expect("handle line");
        String::from_utf8(out).expect("utf8 output")
    }

    #[tokio::test]
    async fn question_is_answered_and_kept_in_history() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut state = state(Ok(ScriptedModel::new(&["English or Malayalam?"])), tmp.path());

        let output = run_line(&mut state, "hello").await;
        assert!(output.contains("English or Malayalam?"));

        let history = run_line(&mut state, "/history").await;
        assert_eq!(history, "you: hello\nkrishi: English or Malayalam?\n");

        let last = run_line(&mut state, "/history 1").await;
        assert_eq!(last, "krishi: English or Malayalam?\n");
    }

    #[tokio::test]
    async fn new_session_starts_with_empty_history() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut state = state(Ok(ScriptedModel::new(&["Namaskaram"])), tmp.path());
        run_line(&mut state, "hi").await;
        let old_id = state.session_id.clone();

        let output = run_line(&mut state, "/new").await;
        assert!(output.starts_with("Started new session "));
        assert_ne!(state.session_id, old_id);
        assert_eq!(
            run_line(&mut state, "/history").await,
            "No messages in this session yet.\n"
        );
        assert_eq!(state.store.message_count(&old_id), 2);
    }

    #[tokio::test]
    async fn search_command_reports_provenance_without_a_model() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut state = state(Err(LlmError::MissingApiKey("GROQ_API_KEY")), tmp.path());

        let output = run_line(&mut state, "/search banana pest").await;
        assert!(output.starts_with("[secondary] I could not find specific information"));
        assert!(output.trim_end().ends_with("Banana weevil is a common pest."));
    }

    #[tokio::test]
    async fn question_without_model_explains_missing_key() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut state = state(Err(LlmError::MissingApiKey("GROQ_API_KEY")), tmp.path());

        let output = run_line(&mut state, "rice blast?").await;
        assert!(output.contains("Assistant unavailable: missing GROQ_API_KEY"));
    }

    #[tokio::test]
    async fn steps_and_session_commands_report_state() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut state = state(Ok(ScriptedModel::new(&[])), tmp.path());

        assert_eq!(run_line(&mut state, "/steps").await, "steps: off\n");
        assert_eq!(run_line(&mut state, "/steps on").await, "steps: on\n");
        assert!(state.show_steps);
        assert_eq!(
            run_line(&mut state, "/session").await,
            "Session repl-test (0 messages)\n"
        );
        assert!(run_line(&mut state, "/trace").await.starts_with("Trace file: "));
        assert_eq!(
            run_line(&mut state, "/bogus").await,
            "unknown command '/bogus'. Try /help\n"
        );
    }

    /// Accepts everything except the live step lines.
    struct StepLinesFail {
        written: Vec<u8>,
    }

    impl std::io::Write for StepLinesFail {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if String::from_utf8_lossy(buf).contains("step 1:") {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "stdout closed",
                ));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn step_output_failure_is_returned_after_turn_is_stored() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let call = AssistantMessage {
            role: AssistantRole::Model,
            parts: vec![AssistantPart::FunctionCall {
                id: Some("c1".to_string()),
                name: "search_kau_website".to_string(),
                args_json: json!({"query": "banana pest"}),
                thought_signature: None,
            }],
        };
        let model = ScriptedModel::with_messages(vec![
            call,
            AssistantMessage::model_text("Use pseudostem traps for banana weevil."),
        ]);
        let mut state = state(Ok(model), tmp.path());
        state.show_steps = true;
        let mut out = StepLinesFail {
            written: Vec::new(),
        };

        let err = handle_line(&mut state, "banana pest", &mut out)
            .await
            .expect_err("step line write fails");

        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
        assert_eq!(state.store.message_count(&state.session_id), 4);
        let written = String::from_utf8(out.written).expect("utf8");
        assert_eq!(written, "Krishi Sakhi is thinking...\n");
    }

    #[test]
    fn tool_events_are_summarised_for_steps_output() {
        let request = AgentProgressEvent::ToolRequest {
            step: 1,
            id: None,
            name: "search_kau_website".to_string(),
            args_json: json!({"query": "rice"}),
        };
        let result = AgentProgressEvent::ToolResult {
            step: 1,
            id: None,
            name: "search_kau_website".to_string(),
            response_json: json!({"ok": true, "result": {"provenance": "primary", "text": "x"}}),
        };

        assert_eq!(
            format_event(&request).map(|(_, text)| text),
            Some(r#"  step 1: search_kau_website {"query":"rice"}"#.to_string())
        );
        assert_eq!(
            format_event(&result).map(|(_, text)| text),
            Some("  step 1: search_kau_website -> provenance primary".to_string())
        );
        assert_eq!(format_event(&AgentProgressEvent::StepStarted { step: 1 }), None);
    }

    #[test]
    fn history_shows_searches_and_hides_tool_payloads() {
        let call = AssistantMessage {
            role: AssistantRole::Model,
            parts: vec![AssistantPart::FunctionCall {
                id: None,
                name: "search_kau_website".to_string(),
                args_json: json!({"query": "coconut mite"}),
                thought_signature: None,
            }],
        };
        let response = AssistantMessage {
            role: AssistantRole::User,
            parts: vec![AssistantPart::FunctionResponse {
                id: None,
                name: "search_kau_website".to_string(),
                response_json: json!({"ok": true}),
                thought_signature: None,
            }],
        };

        assert_eq!(
            describe_message(&call).map(|(_, text)| text),
            Some("krishi searched: coconut mite".to_string())
        );
        assert_eq!(describe_message(&response), None);
    }
}
