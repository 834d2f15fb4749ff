//! Financial Query Workflow
//!
//! Answers a natural-language financial question. General questions are
//! answered directly; questions about a tradable instrument go through:
//! - concurrent price/technical and news/sentiment analysis
//! - a validated structured recommendation (action, score, trend, sentiment,
//!   short-horizon price predictions)
//! - a composed natural-language answer
//!
//! STATE MACHINE:
//! START → DETECT_TICKER → (ANALYZE → SYNTHESIZE)? → RESPOND → END

pub mod agent;
pub mod analysts;
pub mod api;
pub mod classifier;
pub mod config;
pub mod conversational;
pub mod error;
pub mod llm;
pub mod market_data;
pub mod models;
pub mod search;
pub mod synthesis;
pub mod timeout;
pub mod tools;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use agent::Workflow;
pub use config::{AppConfig, WorkflowConfig};
pub use models::*;
