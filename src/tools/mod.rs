//! Tool trait and registry
//!
//! Tools are the capabilities the News Analyst may invoke mid-reasoning.
//! The registry advertises them to the model and dispatches its calls.

use crate::error::OrchestrationError;
use crate::llm::ToolSpec;
use crate::models::{SearchHit, ToolCall, ToolInput, ToolOutput};
use crate::search::SearchProvider;
use crate::timeout::with_timeout;
use crate::Result;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const WEB_SEARCH: &str = "web_search";

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;
    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Specs advertised to the model, in name order
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Dispatch a model-issued call
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| OrchestrationError::ToolNotFound(call.name.clone()))?;

        tool.execute(&ToolInput {
            tool_name: call.name.clone(),
            parameters: call.arguments.clone(),
        })
        .await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolOutput {
    /// Text handed back to the model as the tool-result message
    pub fn as_message_content(&self) -> String {
        if let Some(error) = &self.error {
            return format!("Tool failed: {}", error);
        }
        self.data
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.data.to_string())
    }
}

fn require_query(input: &ToolInput) -> Result<String> {
    input
        .parameters
        .get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            OrchestrationError::InvalidToolInput(
                "Expected a non-empty 'query' in tool arguments".to_string(),
            )
        })
}

/// Numbered, model-readable listing of search hits
pub fn format_hits(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results for \"{}\".", query);
    }

    let mut out = format!("Results for \"{}\":\n", query);
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "{}. {}\n   {}\n   {}\n",
            i + 1,
            hit.title,
            hit.snippet,
            hit.url
        ));
    }
    out
}

/// Keyword web search backed by a `SearchProvider`
pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    limit: usize,
    timeout: Duration,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, limit: usize, timeout: Duration) -> Self {
        Self {
            provider,
            limit,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        WEB_SEARCH
    }

    fn description(&self) -> &'static str {
        "Search the web for recent news, headlines and commentary about a company, \
         ticker or market event. Returns ranked titles, snippets and URLs."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Keyword search query, e.g. \"AAPL earnings guidance\""
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let query = require_query(input)?;

        let searched = with_timeout(
            self.timeout,
            "web search",
            self.provider.search(&query, self.limit),
        )
        .await;

        let hits = match searched {
            Ok(hits) => hits,
            Err(e) => {
                warn!(%query, error = %e, "Web search failed");
                return Ok(ToolOutput {
                    success: false,
                    data: json!({ "query": query }),
                    error: Some(e.to_string()),
                });
            }
        };
        let text = format_hits(&query, &hits);

        Ok(ToolOutput {
            success: true,
            data: json!({
                "query": query,
                "results": hits,
                "text": text,
            }),
            error: None,
        })
    }
}

/// Registry holding the tools available to the News Analyst
pub fn create_news_registry(
    search: Arc<dyn SearchProvider>,
    limit: usize,
    timeout: Duration,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(WebSearchTool::new(search, limit, timeout)));
    registry
}
