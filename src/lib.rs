pub mod agent;
pub mod assistant;
pub mod cli;
pub mod config;
pub mod http;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod search;
pub mod trace;

use anyhow::{Result, anyhow};
use assistant::FarmAssistant;
use cli::{AppState, CliArgs, Theme, run_once, run_repl};
use config::{AppConfig, LlmProviderKind};
use http::{HttpClient, HttpDebugConfig};
use llm::LlmBackend;
use llm::gemini::GeminiProvider;
use llm::groq::GroqProvider;
use llm::provider::LlmResult;
use memory::{ConversationStore, SessionId};
use search::{DuckDuckGoProvider, SiteSearchTool};
use std::io::IsTerminal;
use std::time::Duration;
use trace::SessionTrace;

const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; krishi-sakhi/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

pub async fn run(args: CliArgs) -> Result<()> {
    logging::init(args.verbose);

    let config = AppConfig::load_with_path(args.config.as_deref())?;
    let session_id = match args.session.as_deref() {
        Some(id) => SessionId::new(id).map_err(|err| anyhow!("Invalid --session: {err}"))?,
        None => SessionId::generate(),
    };
    let trace = SessionTrace::create(session_id.as_str())?;
    tracing::debug!(
        config = %config.config_path.display(),
        trace = %trace.file_path().display(),
        session = %session_id,
        "starting"
    );

    let debug = HttpDebugConfig::from_verbose(args.verbose);
    let search_http = HttpClient::new(
        build_reqwest_client(Some(Duration::from_secs(config.search.timeout_secs)))?,
        debug,
    )
    .with_trace(trace.clone());
    let llm_http = HttpClient::new(build_reqwest_client(None)?, debug).with_trace(trace.clone());

    let search = SiteSearchTool::new(
        DuckDuckGoProvider::new(
            search_http,
            config.search.base_url.clone(),
            config.search.region.clone(),
            config.search.max_results,
        ),
        config.search.site.clone(),
    )
    .with_trace(trace.clone());

    let store = ConversationStore::new();
    let assistant = build_backend(&config, llm_http).map(|backend| {
        tracing::info!(provider = backend.name(), "assistant ready");
        FarmAssistant::new(backend, search.clone(), store.clone())
            .with_max_output_tokens(config.max_output_tokens)
            .with_trace(trace.clone())
    });
    if let Err(err) = &assistant {
        tracing::warn!(provider = %config.llm_provider, %err, "assistant unavailable");
    }

    let mut state = AppState {
        session_id,
        assistant,
        search,
        store,
        theme: Theme::from_config(color_enabled(), &config.theme),
        show_steps: false,
        trace,
    };

    match args.ask.as_deref() {
        Some(question) => run_once(&mut state, question).await,
        None => run_repl(&mut state).await,
    }
}

fn build_reqwest_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|err| anyhow!("Failed to build HTTP client: {err}"))
}

fn build_backend(config: &AppConfig, http: HttpClient) -> LlmResult<LlmBackend> {
    match config.llm_provider {
        LlmProviderKind::Gemini => GeminiProvider::new(
            http,
            config.gemini_api_key.clone(),
            config.gemini_model.clone(),
            config.gemini_base_url.clone(),
        )
        .map(LlmBackend::Gemini),
        LlmProviderKind::Groq => GroqProvider::new(
            http,
            config.groq_api_key.clone(),
            config.groq_model.clone(),
            config.groq_base_url.clone(),
        )
        .map(LlmBackend::Groq),
    }
}

fn color_enabled() -> bool {
    should_color(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty()),
    )
}

fn should_color(is_terminal: bool, no_color: bool) -> bool {
    is_terminal && !no_color
}
