use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV_VAR: &str = "KRISHI_LOG";

/// Installs the stderr subscriber. `KRISHI_LOG` wins over `--verbose`.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    // A second install (tests, embedding) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

// Routine search fallbacks log at warn; only errors reach the REPL's stderr.
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "krishi_sakhi=debug" } else { "error" }
}
