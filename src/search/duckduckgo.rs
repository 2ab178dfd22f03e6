use scraper::{Html, Selector};
use tracing::debug;

use super::{SearchError, SearchProvider, SearchResult};
use crate::http::HttpClient;

pub const DEFAULT_DUCKDUCKGO_BASE_URL: &str = "https://html.duckduckgo.com";
pub const DEFAULT_SEARCH_REGION: &str = "wt-wt";
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Web search over DuckDuckGo's HTML endpoint; snippets are joined into one
/// block of text.
#[derive(Debug, Clone)]
pub struct DuckDuckGoProvider {
    http: HttpClient,
    base_url: String,
    region: String,
    max_results: usize,
}

impl DuckDuckGoProvider {
    pub fn new(http: HttpClient, base_url: String, region: String, max_results: usize) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            region,
            max_results: max_results.max(1),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/html/", self.base_url)
    }
}

impl SearchProvider for DuckDuckGoProvider {
    async fn run(&self, query: &str) -> SearchResult<String> {
        let response = self
            .http
            .get_text(
                &self.endpoint(),
                &[("q", query), ("kl", self.region.as_str())],
            )
            .await
            .map_err(|err| SearchError::Transport(err.to_string()))?;

        // DuckDuckGo answers throttled clients with 202 and a challenge page.
        if response.status != 200 {
            return Err(SearchError::HttpStatus {
                status: response.status,
                body: response.body.chars().take(200).collect(),
            });
        }

        let snippets = extract_snippets(&response.body, self.max_results)?;
        debug!(query, count = snippets.len(), "duckduckgo snippets");
        Ok(snippets.join(" "))
    }
}

fn extract_snippets(html: &str, max_results: usize) -> SearchResult<Vec<String>> {
    let selector = Selector::parse(".result__snippet")
        .map_err(|err| SearchError::Parse(format!("invalid snippet selector: {err:?}")))?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&selector)
        .map(|node| normalize_whitespace(&node.text().collect::<String>()))
        .filter(|text| !text.is_empty())
        .take(max_results)
        .collect())
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
