//! Web search collaborator

use crate::error::OrchestrationError;
use crate::models::SearchHit;
use crate::Result;
use async_trait::async_trait;
use std::sync::Mutex;

pub mod duckduckgo;
pub use duckduckgo::DuckDuckGoClient;

/// Keyword search returning ranked hits, best first
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Canned search results for tests and demos. Records every query.
pub struct StaticSearch {
    hits: Vec<SearchHit>,
    outage: Option<String>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            outage: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            hits: Vec::new(),
            outage: Some(reason.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }

        if let Some(reason) = &self.outage {
            return Err(OrchestrationError::SearchError(reason.clone()));
        }

        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}
