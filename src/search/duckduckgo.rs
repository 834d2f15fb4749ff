//! DuckDuckGo web search client
//!
//! Scrapes the keyless HTML results page. Organic results are returned in
//! page order; ads are skipped. Result links go through a DuckDuckGo
//! redirect, so the target URL is recovered from its `uddg` parameter.

use super::SearchProvider;
use crate::error::OrchestrationError;
use crate::models::SearchHit;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, info, warn};

const DDG_HTML_URL: &str = "https://html.duckduckgo.com/html/";
const DDG_ORIGIN: &str = "https://duckduckgo.com";
const MAX_SNIPPET_CHARS: usize = 400;

pub struct DuckDuckGoClient {
    client: Client,
    base_url: String,
}

impl DuckDuckGoClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(20))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36")
            .build()?;

        Ok(Self {
            client,
            base_url: DDG_HTML_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        info!(query, "Searching DuckDuckGo");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", query), ("kl", "us-en")])
            .send()
            .await
            .map_err(|e| OrchestrationError::SearchError(format!("DuckDuckGo request failed: {}", e)))?;

        let status = response.status();
        // 202 carries a bot-check page instead of results
        if status == StatusCode::ACCEPTED {
            warn!(query, "DuckDuckGo throttled the request");
            return Err(OrchestrationError::SearchError(
                "DuckDuckGo rate limited the request".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(OrchestrationError::SearchError(format!(
                "DuckDuckGo returned {}",
                status
            )));
        }

        let body = response.text().await.map_err(|e| {
            OrchestrationError::SearchError(format!("Failed to read DuckDuckGo response: {}", e))
        })?;

        let hits = parse_results(&body, limit)?;
        debug!(query, hits = hits.len(), "Search complete");

        Ok(hits)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| OrchestrationError::SearchError(format!("Bad selector {}: {:?}", css, e)))
}

/// Organic results from a results page, best first
fn parse_results(html: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let result_sel = selector("div.result:not(.result--ad)")?;
    let title_sel = selector("a.result__a")?;
    let snippet_sel = selector(".result__snippet")?;

    let document = Html::parse_document(html);

    let hits = document
        .select(&result_sel)
        .filter_map(|result| {
            let link = result.select(&title_sel).next()?;
            let url = resolve_link(link.value().attr("href")?)?;
            let title = element_text(link);
            if title.is_empty() {
                return None;
            }

            let snippet = result
                .select(&snippet_sel)
                .next()
                .map(element_text)
                .unwrap_or_default()
                .chars()
                .take(MAX_SNIPPET_CHARS)
                .collect();

            Some(SearchHit { title, snippet, url })
        })
        .take(limit)
        .collect();

    Ok(hits)
}

/// Whitespace-collapsed text content
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Target URL of a result link; unwraps `/l/?uddg=` redirects
fn resolve_link(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else if href.starts_with('/') {
        format!("{}{}", DDG_ORIGIN, href)
    } else {
        href.to_string()
    };

    let url = Url::parse(&absolute).ok()?;
    let is_redirect = url
        .domain()
        .is_some_and(|d| d.ends_with("duckduckgo.com"))
        && url.path().starts_with("/l/");

    if is_redirect {
        return url
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, target)| target.into_owned());
    }

    Some(url.to_string())
}
