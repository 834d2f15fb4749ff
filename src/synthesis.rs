//! Report Synthesizer
//!
//! Generate-then-validate: the model is asked for a JSON object, which is
//! parsed into `StructuredReport` and checked against its invariants. A
//! rejected output is sent back with the validation error for correction.
//! When every attempt fails the workflow simply goes on without a report.

use crate::error::OrchestrationError;
use crate::llm::{CompletionRequest, LanguageModel, Task};
use crate::models::{AnalystReport, Message, StructuredReport, SCORE_RANGE};
use crate::timeout::with_timeout;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct ReportSynthesizer {
    model: Arc<dyn LanguageModel>,
    attempts: usize,
    horizon: usize,
    timeout: Duration,
}

impl ReportSynthesizer {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        attempts: usize,
        horizon: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            attempts: attempts.max(1),
            horizon,
            timeout,
        }
    }

    pub async fn synthesize(
        &self,
        user_query: &str,
        price: Option<&AnalystReport>,
        news: Option<&AnalystReport>,
    ) -> Option<StructuredReport> {
        let mut messages = vec![
            Message::system(schema_prompt(self.horizon)),
            Message::user(reports_prompt(user_query, price, news)),
        ];

        for attempt in 1..=self.attempts {
            let request = CompletionRequest::new(Task::ReportSynthesis, messages.clone()).json();

            let raw = match with_timeout(self.timeout, "report synthesis", self.model.complete(request)).await {
                Ok(completion) => completion.content,
                Err(e) => {
                    warn!(attempt, error = %e, "Report synthesis call failed");
                    continue;
                }
            };

            match parse_report(&raw, self.horizon) {
                Ok(report) => {
                    info!(attempt, action = %report.action, score = report.score, "Structured report validated");
                    return Some(report);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Structured report rejected");
                    messages.push(Message::assistant(raw));
                    messages.push(Message::user(format!(
                        "That output was rejected: {}. Reply again with only the corrected JSON object.",
                        e
                    )));
                }
            }
        }

        warn!(attempts = self.attempts, "Giving up on structured report");
        None
    }
}

/// Parse and validate one model reply
pub fn parse_report(raw: &str, horizon: usize) -> Result<StructuredReport> {
    let json = extract_json_object(raw).ok_or_else(|| {
        OrchestrationError::Validation("no JSON object found in the reply".to_string())
    })?;

    let report: StructuredReport = serde_json::from_str(json)
        .map_err(|e| OrchestrationError::Validation(format!("does not match the schema: {}", e)))?;

    report.validate(horizon)?;
    Ok(report)
}

/// A fenced ```json block if present, otherwise the outermost `{ ... }`
fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        if let Some(end) = after.find("```") {
            return Some(after[..end].trim());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn schema_prompt(horizon: usize) -> String {
    let (low, high) = SCORE_RANGE;
    format!(
        r#"You are an investment analyst who turns analyst reports into a structured recommendation.

Reply with a single JSON object and nothing else, with exactly these fields:
{{
  "action": "buy" | "sell" | "hold",
  "score": number between {low} and {high} (confidence in the action),
  "trend": "up" | "down" | "flat",
  "sentiment": "positive" | "negative" | "neutral",
  "price_predictions": array of exactly {horizon} positive numbers (projected closing price for each of the next {horizon} trading sessions),
  "summary": non-empty string, two or three sentences
}}

If a report is marked UNAVAILABLE, do not invent its content; lower the score to reflect the missing evidence."#
    )
}

fn reports_prompt(
    user_query: &str,
    price: Option<&AnalystReport>,
    news: Option<&AnalystReport>,
) -> String {
    format!(
        "Question: {}\n\n## Price / technical report\n{}\n\n## News / sentiment report\n{}",
        user_query,
        describe(price),
        describe(news)
    )
}

fn describe(report: Option<&AnalystReport>) -> String {
    match report {
        Some(r) if !r.degraded => r.content.clone(),
        Some(r) => format!("UNAVAILABLE. {}", r.content),
        None => "UNAVAILABLE.".to_string(),
    }
}
