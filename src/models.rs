//! Core data models for the financial query workflow

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::Result;

//
// ================= Enums =================
//

/// Ticker Detector verdict
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TickerVerdict {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Executor stages. `End` is the only terminal stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    DetectTicker,
    Analyze,
    Synthesize,
    Respond,
    End,
}

//
// ================= Structured Report =================
//

/// Lower/upper bound of `StructuredReport::score`
pub const SCORE_RANGE: (f64, f64) = (0.0, 1.0);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredReport {
    pub action: Action,
    pub score: f64,
    pub trend: Trend,
    pub sentiment: Sentiment,
    pub price_predictions: Vec<f64>,
    pub summary: String,
}

impl StructuredReport {
    /// Check the value invariants serde cannot express.
    pub fn validate(&self, horizon: usize) -> Result<()> {
        let (low, high) = SCORE_RANGE;
        if !self.score.is_finite() || self.score < low || self.score > high {
            return Err(OrchestrationError::Validation(format!(
                "score {} is outside [{}, {}]",
                self.score, low, high
            )));
        }

        if self.price_predictions.len() != horizon {
            return Err(OrchestrationError::Validation(format!(
                "price_predictions must contain exactly {} values, got {}",
                horizon,
                self.price_predictions.len()
            )));
        }

        if let Some(bad) = self
            .price_predictions
            .iter()
            .find(|p| !p.is_finite() || **p <= 0.0)
        {
            return Err(OrchestrationError::Validation(format!(
                "price prediction {} is not a positive price",
                bad
            )));
        }

        if self.summary.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "summary must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

//
// ================= Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A model-issued request to run a tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }

    /// Assistant turn that requested tools; echoed back into history
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(MessageRole::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(MessageRole::Tool, content)
        }
    }
}

//
// ================= Analyst Output =================
//

/// Free-text analyst output. `degraded` marks a failure note standing in
/// for a real analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystReport {
    pub content: String,
    pub degraded: bool,
}

impl AnalystReport {
    pub fn complete(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            degraded: false,
        }
    }

    pub fn unavailable(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            degraded: true,
        }
    }
}

//
// ================= Market Data / Search =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSeries {
    pub symbol: String,
    /// Oldest first
    pub bars: Vec<PriceBar>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<String>,
}

//
// ================= Workflow State =================
//

/// Context threaded through a single workflow run.
///
/// Every node output is write-once: a second write is a `StateError`
/// rather than an overwrite.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    user_query: String,
    ticker_detected: Option<TickerVerdict>,
    price_analyst_report: Option<AnalystReport>,
    news_analyst_report: Option<AnalystReport>,
    final_report: Option<StructuredReport>,
    final_response: Vec<Message>,
    trace: Vec<Stage>,
}

fn write_once<T>(slot: &mut Option<T>, value: T, field: &str) -> Result<()> {
    if slot.is_some() {
        return Err(OrchestrationError::StateError(format!(
            "{} was already written",
            field
        )));
    }
    *slot = Some(value);
    Ok(())
}

impl WorkflowState {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            user_query: user_query.into(),
            ticker_detected: None,
            price_analyst_report: None,
            news_analyst_report: None,
            final_report: None,
            final_response: Vec::new(),
            trace: Vec::new(),
        }
    }

    pub fn user_query(&self) -> &str {
        &self.user_query
    }

    /// The Ticker Detector verdict; an error until the detector has run.
    pub fn ticker_detected(&self) -> Result<TickerVerdict> {
        self.ticker_detected.ok_or_else(|| {
            OrchestrationError::StateError(
                "ticker_detected read before the detector ran".to_string(),
            )
        })
    }

    pub fn set_ticker_detected(&mut self, verdict: TickerVerdict) -> Result<()> {
        write_once(&mut self.ticker_detected, verdict, "ticker_detected")
    }

    pub fn price_analyst_report(&self) -> Option<&AnalystReport> {
        self.price_analyst_report.as_ref()
    }

    pub fn set_price_analyst_report(&mut self, report: AnalystReport) -> Result<()> {
        write_once(&mut self.price_analyst_report, report, "price_analyst_report")
    }

    pub fn news_analyst_report(&self) -> Option<&AnalystReport> {
        self.news_analyst_report.as_ref()
    }

    pub fn set_news_analyst_report(&mut self, report: AnalystReport) -> Result<()> {
        write_once(&mut self.news_analyst_report, report, "news_analyst_report")
    }

    pub fn final_report(&self) -> Option<&StructuredReport> {
        self.final_report.as_ref()
    }

    pub fn set_final_report(&mut self, report: StructuredReport) -> Result<()> {
        write_once(&mut self.final_report, report, "final_report")
    }

    pub fn final_response(&self) -> &[Message] {
        &self.final_response
    }

    /// The user-facing answer: content of the last response message
    pub fn answer(&self) -> Option<&str> {
        self.final_response.last().map(|m| m.content.as_str())
    }

    pub fn push_response(&mut self, message: Message) {
        self.final_response.push(message);
    }

    pub fn trace(&self) -> &[Stage] {
        &self.trace
    }

    pub(crate) fn record_stage(&mut self, stage: Stage) {
        self.trace.push(stage);
    }
}

impl fmt::Display for TickerVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TickerVerdict::Yes => "yes",
            TickerVerdict::No => "no",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Flat => "flat",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Start => "start",
            Stage::DetectTicker => "detect_ticker",
            Stage::Analyze => "analyze",
            Stage::Synthesize => "synthesize",
            Stage::Respond => "respond",
            Stage::End => "end",
        };
        write!(f, "{}", s)
    }
}
