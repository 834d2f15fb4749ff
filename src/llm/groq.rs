//! Groq chat-completions client
//!
//! Groq serves an OpenAI-compatible API, so tool calling and JSON mode map
//! onto the standard `tools` / `response_format` request fields.
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{Completion, CompletionRequest, LanguageModel, ToolSpec};
use crate::error::OrchestrationError;
use crate::models::{Message, MessageRole, ToolCall};
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Reusable Groq client (connection-pooled)
pub struct GroqClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GroqClient {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: GROQ_CHAT_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LanguageModel for GroqClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::LlmError(
                "GROQ_API_KEY not configured".to_string(),
            ));
        }

        let task = request.task;
        let body = build_request(&self.model, request);

        info!(%task, model = %self.model, "Calling Groq API");
        debug!(messages = body.messages.len(), tools = body.tools.as_ref().map_or(0, Vec::len), "Groq request");

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Groq API request failed: {}", e);
                OrchestrationError::LlmError(format!("Groq API error: {}", e))
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(OrchestrationError::LlmError(
                "Groq API rate limit exceeded".to_string(),
            ));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Groq API error response ({}): {}", status, error_text);
            return Err(OrchestrationError::LlmError(format!(
                "Groq API returned {}: {}",
                status, error_text
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Groq response: {}", e);
            OrchestrationError::LlmError(format!("Groq parse error: {}", e))
        })?;

        if let Some(usage) = &parsed.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Groq usage"
            );
        }

        let completion = into_completion(parsed)?;
        info!(%task, tool_calls = completion.tool_calls.len(), "Groq response received");

        Ok(completion)
    }
}

fn build_request(model: &str, request: CompletionRequest) -> ChatRequest {
    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(request.tools.into_iter().map(to_wire_tool).collect())
    };

    ChatRequest {
        model: model.to_string(),
        messages: request.messages.into_iter().map(to_wire_message).collect(),
        temperature: 0.0,
        max_tokens: 1024,
        tool_choice: tools.as_ref().map(|_| "auto".to_string()),
        tools,
        response_format: request.json_mode.then(|| ResponseFormat {
            format_type: "json_object".to_string(),
        }),
    }
}

fn to_wire_tool(spec: ToolSpec) -> WireTool {
    WireTool {
        tool_type: "function".to_string(),
        function: WireFunction {
            name: spec.name,
            description: spec.description,
            parameters: spec.parameters,
        },
    }
}

fn to_wire_message(message: Message) -> WireMessage {
    let role = match message.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    };

    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(
            message
                .tool_calls
                .into_iter()
                .map(|call| WireToolCall {
                    id: call.id,
                    tool_type: "function".to_string(),
                    function: WireFunctionCall {
                        name: call.name,
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect(),
        )
    };

    WireMessage {
        role: role.to_string(),
        content: Some(message.content),
        tool_calls,
        tool_call_id: message.tool_call_id,
    }
}

fn into_completion(response: ChatResponse) -> Result<Completion> {
    let choice = response.choices.into_iter().next().ok_or_else(|| {
        OrchestrationError::LlmError("No choices in Groq response".to_string())
    })?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let arguments = serde_json::from_str(&call.function.arguments).map_err(|e| {
                OrchestrationError::LlmError(format!(
                    "Malformed arguments for tool {}: {}",
                    call.function.name, e
                ))
            })?;
            Ok(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Completion {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Task;

    #[test]
    fn test_request_serialization() {
        let request = CompletionRequest::new(
            Task::NewsAnalysis,
            vec![
                Message::system("You are a news analyst"),
                Message::user("Latest on NVDA?"),
                Message::assistant_with_tools(
                    "",
                    vec![ToolCall {
                        id: "call_1".to_string(),
                        name: "web_search".to_string(),
                        arguments: serde_json::json!({ "query": "NVDA news" }),
                    }],
                ),
                Message::tool_result("call_1", "1. NVDA beats estimates"),
            ],
        )
        .with_tools(vec![ToolSpec {
            name: "web_search".to_string(),
            description: "Search the web".to_string(),
            parameters: serde_json::json!({ "type": "object" }),
        }]);

        let json = serde_json::to_value(build_request("llama-3.1-8b-instant", request)).unwrap();

        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["tool_choice"], "auto");
        assert_eq!(json["tools"][0]["function"]["name"], "web_search");
        assert_eq!(json["messages"][2]["tool_calls"][0]["function"]["arguments"], "{\"query\":\"NVDA news\"}");
        assert_eq!(json["messages"][3]["role"], "tool");
        assert_eq!(json["messages"][3]["tool_call_id"], "call_1");
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_json_mode_sets_response_format() {
        let request =
            CompletionRequest::new(Task::ReportSynthesis, vec![Message::user("report")]).json();
        let json = serde_json::to_value(build_request("m", request)).unwrap();

        assert_eq!(json["response_format"]["type"], "json_object");
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_response_with_tool_call() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": { "name": "web_search", "arguments": "{\"query\":\"AAPL earnings\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 18 }
        }"#;

        let completion = into_completion(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(completion.content, "");
        assert_eq!(completion.tool_calls[0].arguments["query"], "AAPL earnings");
        assert_eq!(completion.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_malformed_tool_arguments_are_rejected() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [{ "id": "c", "function": { "name": "web_search", "arguments": "{query" } }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;

        assert!(into_completion(serde_json::from_str(raw).unwrap()).is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = GroqClient::new(String::new(), "m".to_string()).unwrap();
        let result = client
            .complete(CompletionRequest::new(Task::Response, vec![Message::user("hi")]))
            .await;
        assert!(matches!(result, Err(OrchestrationError::LlmError(_))));
    }

    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/openai/v1/chat/completions", addr)
    }

    #[tokio::test]
    async fn test_round_trip_against_local_endpoint() {
        use axum::{http::HeaderMap, routing::post, Json};

        async fn chat(headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Json(serde_json::json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": format!("{} | {} | {}", body["model"], body["temperature"], auth)
                    },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
            }))
        }

        let url = serve(axum::Router::new().route("/openai/v1/chat/completions", post(chat))).await;
        let client = GroqClient::new("gsk_test".to_string(), "llama-test".to_string())
            .unwrap()
            .with_base_url(url);

        let completion = client
            .complete(CompletionRequest::new(Task::Response, vec![Message::user("hi")]))
            .await
            .unwrap();

        assert_eq!(completion.content, "\"llama-test\" | 0.0 | Bearer gsk_test");
        assert!(completion.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_and_server_errors() {
        use axum::{http::StatusCode as Code, routing::post};

        let router = axum::Router::new()
            .route("/openai/v1/chat/completions", post(|| async { Code::TOO_MANY_REQUESTS }))
            .route("/down", post(|| async { (Code::BAD_GATEWAY, "upstream down") }));
        let url = serve(router).await;

        let limited = GroqClient::new("k".to_string(), "m".to_string())
            .unwrap()
            .with_base_url(url.clone())
            .complete(CompletionRequest::new(Task::Response, vec![Message::user("hi")]))
            .await;
        match limited {
            Err(OrchestrationError::LlmError(msg)) => assert!(msg.contains("rate limit")),
            other => panic!("expected rate limit error, got {:?}", other),
        }

        let down_url = url.replace("/openai/v1/chat/completions", "/down");
        let down = GroqClient::new("k".to_string(), "m".to_string())
            .unwrap()
            .with_base_url(down_url)
            .complete(CompletionRequest::new(Task::Response, vec![Message::user("hi")]))
            .await;
        match down {
            Err(OrchestrationError::LlmError(msg)) => {
                assert!(msg.contains("502"));
                assert!(msg.contains("upstream down"));
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }
}
