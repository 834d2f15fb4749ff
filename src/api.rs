//! REST API server for the financial query workflow
//!
//! POST /analyze runs one workflow per request. The reply carries the
//! composed answer and, only for ticker queries, the analyst reports and
//! the structured report (`null` when synthesis failed).

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::agent::Workflow;
use crate::error::OrchestrationError;
use crate::models::{StructuredReport, TickerVerdict, WorkflowState};
use crate::Result;

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub user_query: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AnalyzeResponse {
    pub final_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_analyst_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub news_analyst_report: Option<String>,
    /// Outer `None` omits the field; `Some(None)` serializes as `null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<Option<StructuredReport>>,
}

impl AnalyzeResponse {
    pub fn from_state(state: &WorkflowState) -> Self {
        let final_response = state.answer().unwrap_or_default().to_string();

        match state.ticker_detected() {
            Ok(TickerVerdict::Yes) => Self {
                final_response,
                price_analyst_report: state.price_analyst_report().map(|r| r.content.clone()),
                news_analyst_report: state.news_analyst_report().map(|r| r.content.clone()),
                final_report: Some(state.final_report().cloned()),
            },
            _ => Self {
                final_response,
                price_analyst_report: None,
                news_analyst_report: None,
                final_report: None,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub workflow: Arc<Workflow>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Analyze Endpoint
/// =============================

async fn analyze(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<AnalyzeRequest>, JsonRejection>,
) -> std::result::Result<Json<AnalyzeResponse>, ApiError> {
    let Json(req) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected malformed request body");
        api_error(StatusCode::BAD_REQUEST, rejection.body_text())
    })?;

    let query = req
        .user_query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "user_query is required"))?;

    info!(query = %query, "Received analyze request");

    match state.workflow.run(&query).await {
        Ok(run) => Ok(Json(AnalyzeResponse::from_state(&run))),
        Err(OrchestrationError::Validation(message)) => {
            Err(api_error(StatusCode::BAD_REQUEST, message))
        }
        Err(e) => {
            error!(error = %e, "Workflow run failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// =============================
/// Router
/// =============================

fn cors_layer(allowed_origin: Option<&str>) -> Result<CorsLayer> {
    let Some(origin) = allowed_origin else {
        return Ok(CorsLayer::permissive());
    };

    let origin = HeaderValue::from_str(origin).map_err(|e| {
        OrchestrationError::ConfigError(format!("invalid CORS origin {:?}: {}", origin, e))
    })?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]))
}

pub fn create_router(workflow: Arc<Workflow>, allowed_origin: Option<&str>) -> Result<Router> {
    let state = ApiState { workflow };

    Ok(Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .with_state(state)
        .layer(cors_layer(allowed_origin)?)
        .layer(TraceLayer::new_for_http()))
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    workflow: Arc<Workflow>,
    port: u16,
    allowed_origin: Option<&str>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(workflow, allowed_origin)?;

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!(origin = ?allowed_origin, "CORS configured");

    axum::serve(listener, router).await?;

    Ok(())
}
