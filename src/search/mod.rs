pub mod duckduckgo;
pub mod site;

use std::error::Error;
use std::fmt::{Display, Formatter};

pub use duckduckgo::DuckDuckGoProvider;
pub use site::SiteSearchTool;

pub const FALLBACK_PREAMBLE: &str = "I could not find specific information on the Kerala Agricultural University website, but here is some general information I found: ";
pub const NOT_FOUND_MESSAGE: &str = "I was unable to find any information regarding your query.";
pub const SEARCH_FAILED_MESSAGE: &str =
    "Sorry, I encountered an error while trying to search for information.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    Transport(String),
    HttpStatus { status: u16, body: String },
    Parse(String),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "search transport error: {msg}"),
            Self::HttpStatus { status, body } => {
                write!(f, "search request failed with status {status}: {body}")
            }
            Self::Parse(msg) => write!(f, "search parse error: {msg}"),
        }
    }
}

impl Error for SearchError {}

pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// A free-text web search. `Ok("")` means the engine had nothing for the query.
pub trait SearchProvider {
    fn run(&self, query: &str) -> impl std::future::Future<Output = SearchResult<String>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Primary,
    Secondary,
    None,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::None => "none",
        }
    }
}

/// What a site-scoped search produced, before it is rendered for a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found { text: String },
    FoundFallback { text: String },
    NotFound,
    Failed { reason: String },
}

impl SearchOutcome {
    pub fn provenance(&self) -> Provenance {
        match self {
            Self::Found { .. } => Provenance::Primary,
            Self::FoundFallback { .. } => Provenance::Secondary,
            Self::NotFound | Self::Failed { .. } => Provenance::None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. } | Self::FoundFallback { .. })
    }

    pub fn render(&self) -> String {
        match self {
            Self::Found { text } => text.clone(),
            Self::FoundFallback { text } => format!("{FALLBACK_PREAMBLE}{text}"),
            Self::NotFound => NOT_FOUND_MESSAGE.to_string(),
            Self::Failed { .. } => SEARCH_FAILED_MESSAGE.to_string(),
        }
    }
}
