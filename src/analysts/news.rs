//! News Analyst: bounded tool-calling loop
//!
//! The model either asks for tools or answers. Tool results are appended to
//! a private history and the model is asked again, at most
//! `max_iterations` times. The last permitted turn is sent without tools so
//! a well-behaved model has to answer; a model that still asks for tools is
//! cut off and the best partial answer is returned as a degraded report.

use crate::llm::{Completion, CompletionRequest, LanguageModel, Task};
use crate::models::{AnalystReport, Message, MessageRole, ToolCall};
use crate::timeout::with_timeout;
use crate::tools::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const NEWS_PROMPT: &str = r#"You are a financial news and sentiment analyst.

Use the web_search tool to find recent news, earnings, analyst actions and events for the instrument in the user's question. Search as often as you need, with focused keyword queries.

When you have enough information, reply WITHOUT calling a tool with a news report (under 250 words):
- key recent developments, with dates when known
- overall sentiment: positive, negative or neutral, and why
- risks or catalysts to watch

Cite only what the search results support."#;

const FINAL_TURN_NOTE: &str =
    "Search budget exhausted. Write your final news report now using only the results above.";

/// Tool calls honoured per model turn; the rest are answered as skipped.
const MAX_CALLS_PER_TURN: usize = 3;
const MAX_DIGEST_CHARS: usize = 1500;

/// What the model wants to do next
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    ToolCalls { calls: Vec<ToolCall>, note: String },
    FinalAnswer { text: String },
}

impl NextAction {
    /// Tool-call intent wins over any accompanying text.
    pub fn from_completion(completion: Completion) -> Self {
        if completion.tool_calls.is_empty() {
            NextAction::FinalAnswer {
                text: completion.content.trim().to_string(),
            }
        } else {
            NextAction::ToolCalls {
                calls: completion.tool_calls,
                note: completion.content.trim().to_string(),
            }
        }
    }
}

pub struct NewsAnalyst {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    max_iterations: usize,
    llm_timeout: Duration,
}

impl NewsAnalyst {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: ToolRegistry,
        max_iterations: usize,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            model,
            tools,
            max_iterations: max_iterations.max(1),
            llm_timeout,
        }
    }

    pub async fn analyze(&self, user_query: &str) -> AnalystReport {
        let mut history = vec![Message::system(NEWS_PROMPT), Message::user(user_query)];
        let mut partial: Option<String> = None;
        let mut searches_run = 0;
        let mut searches_ok = 0;

        for iteration in 1..=self.max_iterations {
            let final_turn = iteration == self.max_iterations;
            let mut request = CompletionRequest::new(Task::NewsAnalysis, history.clone());
            if final_turn {
                request.messages.push(Message::system(FINAL_TURN_NOTE));
            } else {
                request = request.with_tools(self.tools.specs());
            }

            let completion =
                match with_timeout(self.llm_timeout, "news analysis", self.model.complete(request))
                    .await
                {
                    Ok(completion) => completion,
                    Err(e) => {
                        warn!(iteration, error = %e, "News analysis model call failed");
                        return AnalystReport::unavailable(format!(
                            "News analysis unavailable: {}.{}",
                            e,
                            partial_suffix(partial.as_deref(), &history)
                        ));
                    }
                };

            match NextAction::from_completion(completion) {
                NextAction::FinalAnswer { .. } if searches_run > 0 && searches_ok == 0 => {
                    warn!(iteration, searches_run, "Every web search failed");
                    return AnalystReport::unavailable(format!(
                        "News analysis unavailable: all {} web searches failed, no news could be retrieved.",
                        searches_run
                    ));
                }
                NextAction::FinalAnswer { text } if !text.is_empty() => {
                    info!(iteration, "News analysis complete");
                    return AnalystReport::complete(text);
                }
                NextAction::FinalAnswer { .. } => {
                    warn!(iteration, "News analyst returned an empty answer");
                    return AnalystReport::unavailable(format!(
                        "News analysis unavailable: the model returned an empty answer.{}",
                        partial_suffix(partial.as_deref(), &history)
                    ));
                }
                NextAction::ToolCalls { calls, note } => {
                    if !note.is_empty() {
                        partial = Some(note.clone());
                    }
                    if final_turn {
                        break;
                    }
                    debug!(iteration, calls = calls.len(), "News analyst requested tools");
                    history.push(Message::assistant_with_tools(note, calls.clone()));
                    let (run, ok) = self.run_tools(&calls, &mut history).await;
                    searches_run += run;
                    searches_ok += ok;
                }
            }
        }

        warn!(max_iterations = self.max_iterations, "News analysis hit its iteration cap");
        AnalystReport::unavailable(format!(
            "News analysis incomplete: search limit of {} rounds reached.{}",
            self.max_iterations,
            partial_suffix(partial.as_deref(), &history)
        ))
    }

    /// Runs calls one after another; every call id gets a tool message.
    /// Returns how many calls ran and how many of those succeeded.
    async fn run_tools(&self, calls: &[ToolCall], history: &mut Vec<Message>) -> (usize, usize) {
        let mut run = 0;
        let mut ok = 0;
        for (index, call) in calls.iter().enumerate() {
            let content = if index >= MAX_CALLS_PER_TURN {
                format!("Skipped: at most {} searches per turn.", MAX_CALLS_PER_TURN)
            } else {
                run += 1;
                match self.tools.execute(call).await {
                    Ok(output) if output.success => {
                        ok += 1;
                        output.as_message_content()
                    }
                    Ok(output) => format!(
                        "Search unavailable: {}",
                        output.error.as_deref().unwrap_or("unknown error")
                    ),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool call failed");
                        format!("Search unavailable: {}", e)
                    }
                }
            };
            history.push(Message::tool_result(call.id.clone(), content));
        }
        (run, ok)
    }
}

/// Best partial answer: the model's last interim text, otherwise a digest
/// of the search results gathered so far.
fn partial_suffix(partial: Option<&str>, history: &[Message]) -> String {
    if let Some(text) = partial {
        return format!(" Partial findings: {}", text);
    }

    let digest: String = history
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
        .chars()
        .take(MAX_DIGEST_CHARS)
        .collect();

    if digest.trim().is_empty() {
        String::new()
    } else {
        format!(" Raw search results gathered:\n{}", digest)
    }
}
