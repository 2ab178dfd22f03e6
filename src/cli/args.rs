use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone, PartialEq, Eq)]
#[command(name = "krishi_sakhi")]
#[command(
    about = "Krishi Sakhi, a farming assistant for Kerala backed by the KAU website",
    long_about = "Krishi Sakhi, a farming assistant for Kerala backed by the KAU website\n\nConfig file loading:\n  - --config <path> (explicit file, overrides default path discovery)\n  - Default probe path when --config is not provided:\n    1. $XDG_CONFIG_HOME/krishi-sakhi/config.toml\n    2. ~/.config/krishi-sakhi/config.toml\n\nEnvironment variables override the config file: KRISHI_LLM_PROVIDER, GROQ_API_KEY, GEMINI_API_KEY, ..."
)]
pub struct CliArgs {
    /// Load config from this file path instead of the default discovery path.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Use this session id instead of generating a fresh one.
    #[arg(long, value_name = "ID")]
    pub session: Option<String>,

    /// Ask one question, print the answer and exit.
    #[arg(long, value_name = "TEXT")]
    pub ask: Option<String>,

    /// Log debug output and HTTP exchanges to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}
