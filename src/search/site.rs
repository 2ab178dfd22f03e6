use tracing::{error, info, warn};

use super::{SearchError, SearchOutcome, SearchProvider};
use crate::trace::SessionTrace;

pub const DEFAULT_SEARCH_SITE: &str = "kau.in";

/// Searches one authoritative site first and the open web second.
#[derive(Clone)]
pub struct SiteSearchTool<S> {
    provider: S,
    site: String,
    trace: Option<SessionTrace>,
}

impl<S: SearchProvider> SiteSearchTool<S> {
    pub fn new(provider: S, site: impl Into<String>) -> Self {
        Self {
            provider,
            site: site.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: SessionTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn refine_query(&self, query: &str) -> String {
        format!("site:{} {query}", self.site)
    }

    /// Renders the outcome; the returned text is never empty.
    pub async fn search(&self, query: &str) -> String {
        self.search_outcome(query).await.render()
    }

    pub async fn search_outcome(&self, query: &str) -> SearchOutcome {
        let outcome = match self.scoped_then_general(query).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(%err, "search failed");
                SearchOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };

        if let Some(trace) = &self.trace {
            trace.log_search_outcome(outcome.provenance().as_str(), &outcome.render());
        }
        outcome
    }

    async fn scoped_then_general(&self, query: &str) -> Result<SearchOutcome, SearchError> {
        let refined = self.refine_query(query);
        info!(query = %refined, "searching {}", self.site);

        let scoped = self.run_traced(&refined).await?;
        if !scoped.is_empty() {
            info!(query = %refined, "found results on {}", self.site);
            return Ok(SearchOutcome::Found { text: scoped });
        }

        warn!(query, "no results on {}, expanding search", self.site);
        let general = self.run_traced(query).await?;
        if general.is_empty() {
            Ok(SearchOutcome::NotFound)
        } else {
            Ok(SearchOutcome::FoundFallback { text: general })
        }
    }

    async fn run_traced(&self, query: &str) -> Result<String, SearchError> {
        if let Some(trace) = &self.trace {
            trace.log_search_query(query);
        }
        self.provider.run(query).await
    }
}
