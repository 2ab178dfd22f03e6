#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Help,
    New,
    Session,
    History(Option<usize>),
    Search { query: String },
    Steps(Option<bool>),
    Trace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParseError {
    message: String,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub(crate) fn message(&self) -> &str {
        &self.message
    }
}

pub(crate) const HELP_TEXT: &str = "Available commands:\n  /help                Show this command list\n  /new                 Start a fresh conversation with a new session id\n  /session             Show the current session id and its message count\n  /history [n]         Show the conversation so far (or the last n messages)\n  /search <query>      Run the KAU site search directly and show where the answer came from\n  /steps [on|off]      Show or hide the assistant's search steps\n  /trace               Show path to the current trace file\n  exit | quit          Leave Krishi Sakhi";

pub(crate) fn parse_command(line: &str) -> Result<Command, ParseError> {
    if !is_command_line(line) {
        return Err(ParseError::new("not a command"));
    }

    let command_text = line.trim()[1..].trim_end();
    let mut parts = command_text.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("").to_ascii_lowercase();
    if name.is_empty() {
        return Err(ParseError::new("empty command. Try /help"));
    }
    let rest = parts.next().map(str::trim).unwrap_or("");

    match name.as_str() {
        "help" => expect_no_args(rest, Command::Help, "usage: /help"),
        "new" => expect_no_args(rest, Command::New, "usage: /new"),
        "session" => expect_no_args(rest, Command::Session, "usage: /session"),
        "history" => parse_history(rest),
        "search" => parse_search(rest),
        "steps" => parse_steps(rest),
        "trace" => expect_no_args(rest, Command::Trace, "usage: /trace"),
        _ => Err(ParseError::new(format!(
            "unknown command '/{name}'. Try /help"
        ))),
    }
}

pub(crate) fn is_command_line(line: &str) -> bool {
    line.starts_with('/')
}

pub(crate) fn is_exit_line(line: &str) -> bool {
    let line = line.trim();
    line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit")
}

fn expect_no_args(rest: &str, command: Command, usage: &str) -> Result<Command, ParseError> {
    if rest.is_empty() {
        Ok(command)
    } else {
        Err(ParseError::new(usage))
    }
}

fn parse_history(rest: &str) -> Result<Command, ParseError> {
    if rest.is_empty() {
        return Ok(Command::History(None));
    }

    let value = rest
        .parse::<usize>()
        .map_err(|_| ParseError::new("usage: /history [n]"))?;
    if value == 0 {
        return Err(ParseError::new("usage: /history [n] (n must be >= 1)"));
    }

    Ok(Command::History(Some(value)))
}

fn parse_search(rest: &str) -> Result<Command, ParseError> {
    if rest.is_empty() {
        return Err(ParseError::new(
            "missing query argument. usage: /search <query>",
        ));
    }

    Ok(Command::Search {
        query: rest.to_string(),
    })
}

fn parse_steps(rest: &str) -> Result<Command, ParseError> {
    match rest {
        "" => Ok(Command::Steps(None)),
        "on" => Ok(Command::Steps(Some(true))),
        "off" => Ok(Command::Steps(Some(false))),
        _ => Err(ParseError::new("usage: /steps [on|off]")),
    }
}
