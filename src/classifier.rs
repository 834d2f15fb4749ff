//! Ticker Detector
//!
//! Classifies a query as referencing a tradable instrument or not with a
//! single inference call. The reply must resolve to exactly `yes` or `no`;
//! anything else fails the run, since every later branch depends on it.

use crate::error::OrchestrationError;
use crate::llm::{CompletionRequest, LanguageModel, Task};
use crate::models::{Message, TickerVerdict};
use crate::timeout::with_timeout;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const DETECTOR_PROMPT: &str = r#"You decide whether a user's question is about a specific tradable financial instrument: a listed stock, ETF, index, cryptocurrency or similar asset with a ticker symbol.

Answer "yes" when the question names or clearly refers to such an instrument (by ticker or by company/asset name).
Answer "no" for general finance, economics or personal-finance questions that do not target one instrument.

Reply with exactly one word: yes or no."#;

pub struct TickerDetector {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl TickerDetector {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub async fn detect(&self, user_query: &str) -> Result<TickerVerdict> {
        let request = CompletionRequest::new(
            Task::TickerDetection,
            vec![Message::system(DETECTOR_PROMPT), Message::user(user_query)],
        );

        let completion = with_timeout(self.timeout, "ticker detection", self.model.complete(request))
            .await
            .map_err(|e| {
                error!(error = %e, "Ticker detection call failed");
                OrchestrationError::TickerDetection(e.to_string())
            })?;

        let verdict = parse_verdict(&completion.content)?;
        info!(%verdict, "Ticker detection complete");

        Ok(verdict)
    }
}

/// Constrained parser: exactly one of the two labels, case and trailing
/// punctuation aside.
pub fn parse_verdict(raw: &str) -> Result<TickerVerdict> {
    let label = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim_end_matches(|c: char| c == '.' || c == '!')
        .trim()
        .to_lowercase();

    match label.as_str() {
        "yes" => Ok(TickerVerdict::Yes),
        "no" => Ok(TickerVerdict::No),
        _ => Err(OrchestrationError::TickerDetection(format!(
            "expected \"yes\" or \"no\", model replied {:?}",
            raw
        ))),
    }
}
