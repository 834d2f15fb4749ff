//! Environment-driven configuration
//!
//! `.env` is loaded by the binaries through `dotenv`; everything here reads
//! plain environment variables so tests can build configs directly.

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_OPENBB_BASE_URL: &str = "http://127.0.0.1:6900";
pub const DEFAULT_PORT: u16 = 5002;

/// Knobs of a single workflow run
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Cap on News Analyst model turns
    pub max_tool_iterations: usize,
    /// Total structured-generation attempts, including the first
    pub synthesis_attempts: usize,
    /// Number of values in `price_predictions`
    pub prediction_horizon: usize,
    /// Calendar days of history requested from the market-data provider
    pub history_days: i64,
    /// Search hits returned per tool call
    pub search_results: usize,
    pub llm_timeout: Duration,
    pub market_data_timeout: Duration,
    pub search_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 4,
            synthesis_attempts: 2,
            prediction_horizon: 5,
            history_days: 90,
            search_results: 5,
            llm_timeout: Duration::from_secs(60),
            market_data_timeout: Duration::from_secs(20),
            search_timeout: Duration::from_secs(15),
        }
    }
}

/// Process-level configuration for the binaries
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub groq_api_key: Option<String>,
    pub model: String,
    pub openbb_pat: Option<String>,
    pub openbb_base_url: String,
    pub market_data_provider: String,
    pub port: u16,
    /// CORS origin; `None` means permissive
    pub allowed_origin: Option<String>,
    pub workflow: WorkflowConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = WorkflowConfig::default();

        let workflow = WorkflowConfig {
            max_tool_iterations: parse_var("MAX_TOOL_ITERATIONS", defaults.max_tool_iterations)?,
            synthesis_attempts: parse_var("SYNTHESIS_ATTEMPTS", defaults.synthesis_attempts)?,
            prediction_horizon: parse_var("PREDICTION_HORIZON", defaults.prediction_horizon)?,
            history_days: parse_var("HISTORY_DAYS", defaults.history_days)?,
            search_results: parse_var("SEARCH_RESULTS", defaults.search_results)?,
            llm_timeout: parse_secs("LLM_TIMEOUT_SECS", defaults.llm_timeout)?,
            market_data_timeout: parse_secs("MARKET_DATA_TIMEOUT_SECS", defaults.market_data_timeout)?,
            search_timeout: parse_secs("SEARCH_TIMEOUT_SECS", defaults.search_timeout)?,
        };

        if workflow.max_tool_iterations == 0 {
            return Err(OrchestrationError::ConfigError(
                "MAX_TOOL_ITERATIONS must be at least 1".to_string(),
            ));
        }
        if workflow.synthesis_attempts == 0 {
            return Err(OrchestrationError::ConfigError(
                "SYNTHESIS_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if workflow.prediction_horizon == 0 {
            return Err(OrchestrationError::ConfigError(
                "PREDICTION_HORIZON must be at least 1".to_string(),
            ));
        }

        let port = match non_empty("PORT").or_else(|| non_empty("API_PORT")) {
            Some(raw) => raw.parse().map_err(|_| {
                OrchestrationError::ConfigError(format!("PORT is not a valid port: {}", raw))
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            groq_api_key: non_empty("GROQ_API_KEY").or_else(|| non_empty("CHATGROQ_API_KEY")),
            model: non_empty("GROQ_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            openbb_pat: non_empty("OPENBB_PAT"),
            openbb_base_url: non_empty("OPENBB_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENBB_BASE_URL.to_string()),
            market_data_provider: non_empty("MARKET_DATA_PROVIDER")
                .unwrap_or_else(|| "yfinance".to_string()),
            port,
            allowed_origin: allowed_origin(
                non_empty("ALLOWED_ORIGIN"),
                non_empty("EXTENSION_ID"),
            ),
            workflow,
        })
    }
}

/// An explicit origin wins; a bare extension id becomes its extension origin.
fn allowed_origin(origin: Option<String>, extension_id: Option<String>) -> Option<String> {
    origin.or_else(|| extension_id.map(|id| format!("chrome-extension://{}", id)))
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T> {
    match non_empty(key) {
        Some(raw) => raw.parse().map_err(|_| {
            OrchestrationError::ConfigError(format!("{} has an invalid value: {}", key, raw))
        }),
        None => Ok(default),
    }
}

fn parse_secs(key: &str, default: Duration) -> Result<Duration> {
    parse_var(key, default.as_secs()).map(Duration::from_secs)
}
