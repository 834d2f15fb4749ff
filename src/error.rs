//! Error types for the financial query workflow

use thiserror::Error;

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Workflow Errors
    // =============================

    #[error("Ticker detection error: {0}")]
    TickerDetection(String),

    #[error("Workflow state error: {0}")]
    StateError(String),

    #[error("Routing error: {0}")]
    RoutingError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    // =============================
    // Collaborator Errors
    // =============================

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Search error: {0}")]
    SearchError(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
