//! Price Analyst
//!
//! symbol extraction → price history → local indicators → model report.
//! Failures at any step produce a failure note instead of an error.

use crate::error::OrchestrationError;
use crate::llm::{require_text, CompletionRequest, LanguageModel, Task};
use crate::market_data::{IndicatorSnapshot, MarketDataProvider};
use crate::models::{AnalystReport, Message};
use crate::timeout::with_timeout;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SYMBOL_PROMPT: &str = r#"Extract the ticker symbol of the financial instrument the user is asking about.
Reply with the bare symbol only (for example: AAPL, BRK-B, ^GSPC, BTC-USD).
If the question names a company, reply with its primary listing's symbol.
If you cannot tell, reply with NONE."#;

const ANALYST_PROMPT: &str = r#"You are a technical analyst. You receive price statistics that were computed from recent daily bars, plus the user's question.

Write a concise technical report (under 200 words):
- trend direction and strength over the window
- momentum (RSI) and moving-average position
- notable support/resistance from the high/low range
- volume context

Use only the numbers provided. Do not invent prices or dates."#;

const MAX_SYMBOL_LEN: usize = 10;

pub struct PriceAnalyst {
    model: Arc<dyn LanguageModel>,
    market_data: Arc<dyn MarketDataProvider>,
    llm_timeout: Duration,
    market_data_timeout: Duration,
}

impl PriceAnalyst {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        market_data: Arc<dyn MarketDataProvider>,
        llm_timeout: Duration,
        market_data_timeout: Duration,
    ) -> Self {
        Self {
            model,
            market_data,
            llm_timeout,
            market_data_timeout,
        }
    }

    /// Never fails; see module docs
    pub async fn analyze(&self, user_query: &str) -> AnalystReport {
        match self.try_analyze(user_query).await {
            Ok(report) => {
                info!(chars = report.len(), "Price analysis complete");
                AnalystReport::complete(report)
            }
            Err(e) => {
                warn!(error = %e, "Price analysis degraded");
                AnalystReport::unavailable(failure_note(&e))
            }
        }
    }

    async fn try_analyze(&self, user_query: &str) -> Result<String> {
        let symbol = self.extract_symbol(user_query).await?;
        info!(%symbol, "Symbol extracted");

        let series = with_timeout(
            self.market_data_timeout,
            "market data fetch",
            self.market_data.price_history(&symbol),
        )
        .await?;

        let snapshot = IndicatorSnapshot::from_series(&series)
            .ok_or_else(|| OrchestrationError::SymbolNotFound(symbol.clone()))?;
        debug!(%symbol, sessions = snapshot.sessions, "Indicators computed");

        let request = CompletionRequest::new(
            Task::PriceAnalysis,
            vec![
                Message::system(ANALYST_PROMPT),
                Message::user(format!(
                    "Question: {}\n\nPrice statistics:\n{}",
                    user_query,
                    snapshot.to_prompt()
                )),
            ],
        );

        let completion =
            with_timeout(self.llm_timeout, "price analysis", self.model.complete(request)).await?;
        let narrative = require_text(completion, Task::PriceAnalysis)?;

        Ok(format!("{}\n\n{}", snapshot.to_prompt(), narrative))
    }

    async fn extract_symbol(&self, user_query: &str) -> Result<String> {
        let request = CompletionRequest::new(
            Task::SymbolExtraction,
            vec![Message::system(SYMBOL_PROMPT), Message::user(user_query)],
        );

        let completion =
            with_timeout(self.llm_timeout, "symbol extraction", self.model.complete(request))
                .await?;

        parse_symbol(&completion.content)
    }
}

/// Accepts a bare symbol, optionally `$`-prefixed or quoted
pub fn parse_symbol(raw: &str) -> Result<String> {
    let token = raw
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '$' || c == ',')
        .trim_end_matches('.')
        .to_uppercase();

    if token.is_empty() || token == "NONE" {
        return Err(OrchestrationError::SymbolNotFound(
            "no instrument symbol could be identified in the question".to_string(),
        ));
    }

    let valid = token.len() <= MAX_SYMBOL_LEN
        && token.chars().any(|c| c.is_ascii_alphabetic())
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^'));

    if !valid {
        return Err(OrchestrationError::SymbolNotFound(format!(
            "model replied with an invalid symbol {:?}",
            raw
        )));
    }

    Ok(token)
}

fn failure_note(error: &OrchestrationError) -> String {
    let reason = match error {
        OrchestrationError::SymbolNotFound(detail) => format!("symbol not found ({})", detail),
        OrchestrationError::MarketData(detail) => format!("market data provider error ({})", detail),
        OrchestrationError::Timeout { operation, .. } => format!("{} timed out", operation),
        other => other.to_string(),
    };
    format!("Price data unavailable: {}. No technical analysis could be performed.", reason)
}
