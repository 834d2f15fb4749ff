//! Response Composer
//!
//! Always the last node. Turns whatever the run produced into one assistant
//! message. Unavailable reports are described as unavailable so the answer
//! never cites data that was not retrieved. If the model call fails a plain
//! templated answer is used instead, so a run always ends with a response.

use crate::llm::{require_text, CompletionRequest, LanguageModel, Task};
use crate::models::{AnalystReport, Message, StructuredReport, TickerVerdict, WorkflowState};
use crate::timeout::with_timeout;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const COMPOSER_PROMPT: &str = r#"You are a professional financial assistant answering a user's question.

Guidelines:
- Answer the question directly in clear, plain language
- When analysis sections are provided, ground the answer in them and state the recommendation, confidence and outlook
- Sections marked UNAVAILABLE must not be used as evidence; say the data could not be retrieved
- Be concise: at most three short paragraphs
- End with a one-line reminder that this is not personalised financial advice when a recommendation is given"#;

pub struct ResponseComposer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl ResponseComposer {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub async fn compose(&self, state: &WorkflowState) -> Message {
        let request = CompletionRequest::new(
            Task::Response,
            vec![
                Message::system(COMPOSER_PROMPT),
                Message::user(build_context(state)),
            ],
        );

        let answer = match with_timeout(self.timeout, "response", self.model.complete(request)).await {
            Ok(completion) => require_text(completion, Task::Response),
            Err(e) => Err(e),
        };

        match answer {
            Ok(text) => {
                info!(chars = text.len(), "Response composed");
                Message::assistant(text)
            }
            Err(e) => {
                warn!(error = %e, "Response model failed, using fallback answer");
                Message::assistant(fallback_answer(state))
            }
        }
    }
}

fn build_context(state: &WorkflowState) -> String {
    let mut out = format!("Question: {}\n", state.user_query());

    match state.ticker_detected() {
        Ok(TickerVerdict::Yes) => {
            out.push_str("\n## Price / technical analysis\n");
            out.push_str(&section(state.price_analyst_report()));
            out.push_str("\n\n## News / sentiment analysis\n");
            out.push_str(&section(state.news_analyst_report()));
            out.push_str("\n\n## Structured recommendation\n");
            match state.final_report() {
                Some(report) => out.push_str(&describe_report(report)),
                None => out.push_str(
                    "UNAVAILABLE. No structured recommendation could be produced; do not state one.",
                ),
            }
        }
        _ => out.push_str(
            "\nThis is a general question that does not target a specific instrument. Answer it directly.",
        ),
    }

    out
}

fn section(report: Option<&AnalystReport>) -> String {
    match report {
        Some(r) if !r.degraded => r.content.clone(),
        Some(r) => format!("UNAVAILABLE. {}", r.content),
        None => "UNAVAILABLE.".to_string(),
    }
}

fn describe_report(report: &StructuredReport) -> String {
    let predictions = report
        .price_predictions
        .iter()
        .map(|p| format!("{:.2}", p))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Action: {}\nConfidence score: {:.2}\nTrend: {}\nSentiment: {}\nProjected closes: {}\nSummary: {}",
        report.action, report.score, report.trend, report.sentiment, predictions, report.summary
    )
}

fn fallback_answer(state: &WorkflowState) -> String {
    if let Some(report) = state.final_report() {
        return format!(
            "Recommendation: {} (confidence {:.2}). Trend looks {} and news sentiment is {}. {}",
            report.action.to_string().to_uppercase(),
            report.score,
            report.trend,
            report.sentiment,
            report.summary
        );
    }

    match state.ticker_detected() {
        Ok(TickerVerdict::Yes) => {
            let available: Vec<&str> = [state.price_analyst_report(), state.news_analyst_report()]
                .into_iter()
                .flatten()
                .filter(|r| !r.degraded)
                .map(|r| r.content.as_str())
                .collect();

            if available.is_empty() {
                "I could not retrieve market data or news for this instrument right now, so I can't give an assessment. Please try again shortly.".to_string()
            } else {
                format!(
                    "I couldn't produce a full recommendation, but here is the analysis that was available:\n\n{}",
                    available.join("\n\n")
                )
            }
        }
        _ => "I'm unable to answer right now because the language service is unavailable. Please try again shortly.".to_string(),
    }
}
