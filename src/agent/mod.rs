//! Workflow executor - explicit state machine over the analysis nodes
//!
//! START → DETECT_TICKER → (no)  → RESPOND → END
//!                       → (yes) → ANALYZE → SYNTHESIZE → RESPOND → END
//!
//! All transitions are decided by `route`. Node bodies only write their own
//! fields of the state.

use crate::analysts::{NewsAnalyst, PriceAnalyst};
use crate::classifier::TickerDetector;
use crate::config::{AppConfig, WorkflowConfig};
use crate::conversational::ResponseComposer;
use crate::error::OrchestrationError;
use crate::llm::{GroqClient, LanguageModel};
use crate::market_data::{MarketDataProvider, OpenBbClient};
use crate::models::{Stage, TickerVerdict, WorkflowState};
use crate::search::{DuckDuckGoClient, SearchProvider};
use crate::synthesis::ReportSynthesizer;
use crate::tools::create_news_registry;
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

/// Upper bound on recorded stages per run, `Start` and `End` included
pub const MAX_STAGES: usize = 8;

/// Decide the stage after `stage` from the current state.
pub fn route(stage: Stage, state: &WorkflowState) -> Result<Stage> {
    match stage {
        Stage::Start => Ok(Stage::DetectTicker),
        Stage::DetectTicker => match state.ticker_detected()? {
            TickerVerdict::Yes => Ok(Stage::Analyze),
            TickerVerdict::No => Ok(Stage::Respond),
        },
        Stage::Analyze => {
            if state.price_analyst_report().is_some() && state.news_analyst_report().is_some() {
                Ok(Stage::Synthesize)
            } else {
                Err(OrchestrationError::RoutingError(
                    "analyze finished without both analyst reports".to_string(),
                ))
            }
        }
        Stage::Synthesize => Ok(Stage::Respond),
        Stage::Respond => {
            if state.answer().is_some() {
                Ok(Stage::End)
            } else {
                Err(OrchestrationError::RoutingError(
                    "respond finished without a response message".to_string(),
                ))
            }
        }
        Stage::End => Err(OrchestrationError::RoutingError(
            "end is terminal".to_string(),
        )),
    }
}

/// One instance serves every request; runs share nothing but the clients.
pub struct Workflow {
    detector: TickerDetector,
    price_analyst: PriceAnalyst,
    news_analyst: NewsAnalyst,
    synthesizer: ReportSynthesizer,
    composer: ResponseComposer,
}

impl Workflow {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        market_data: Arc<dyn MarketDataProvider>,
        search: Arc<dyn SearchProvider>,
        config: WorkflowConfig,
    ) -> Self {
        let tools = create_news_registry(search, config.search_results, config.search_timeout);

        Self {
            detector: TickerDetector::new(model.clone(), config.llm_timeout),
            price_analyst: PriceAnalyst::new(
                model.clone(),
                market_data,
                config.llm_timeout,
                config.market_data_timeout,
            ),
            news_analyst: NewsAnalyst::new(
                model.clone(),
                tools,
                config.max_tool_iterations,
                config.llm_timeout,
            ),
            synthesizer: ReportSynthesizer::new(
                model.clone(),
                config.synthesis_attempts,
                config.prediction_horizon,
                config.llm_timeout,
            ),
            composer: ResponseComposer::new(model, config.llm_timeout),
        }
    }

    /// Production wiring: Groq, OpenBB and DuckDuckGo. A Groq key is required.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let key = config.groq_api_key.clone().ok_or_else(|| {
            OrchestrationError::ConfigError("GROQ_API_KEY is required".to_string())
        })?;
        let model = Arc::new(GroqClient::new(key, config.model.clone())?);

        Self::with_model(config, model)
    }

    /// OpenBB and DuckDuckGo wiring around a caller-chosen model
    pub fn with_model(config: &AppConfig, model: Arc<dyn LanguageModel>) -> Result<Self> {
        let market_data = Arc::new(OpenBbClient::new(
            &config.openbb_base_url,
            config.openbb_pat.clone(),
            config.market_data_provider.clone(),
            config.workflow.history_days,
        )?);
        let search = Arc::new(DuckDuckGoClient::new()?);

        Ok(Self::new(model, market_data, search, config.workflow.clone()))
    }

    /// Run one query to completion
    pub async fn run(&self, user_query: &str) -> Result<WorkflowState> {
        if user_query.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "user_query must not be empty".to_string(),
            ));
        }

        let state = WorkflowState::new(user_query.trim());
        let span = info_span!("workflow", run_id = %state.run_id);

        self.drive(state).instrument(span).await
    }

    async fn drive(&self, mut state: WorkflowState) -> Result<WorkflowState> {
        let start_time = Instant::now();
        info!(query = %state.user_query(), "Workflow: starting run");

        let mut stage = Stage::Start;
        state.record_stage(stage);

        loop {
            if state.trace().len() >= MAX_STAGES {
                error!(trace = ?state.trace(), "Stage limit reached");
                return Err(OrchestrationError::RoutingError(format!(
                    "exceeded {} stages",
                    MAX_STAGES
                )));
            }

            let next = route(stage, &state)?;
            debug!(from = %stage, to = %next, "Transition");
            state.record_stage(next);

            if next == Stage::End {
                info!(
                    elapsed_ms = start_time.elapsed().as_millis() as u64,
                    has_report = state.final_report().is_some(),
                    "Workflow: run complete"
                );
                return Ok(state);
            }

            self.execute(next, &mut state).await?;
            stage = next;
        }
    }

    async fn execute(&self, stage: Stage, state: &mut WorkflowState) -> Result<()> {
        let query = state.user_query().to_string();

        match stage {
            Stage::DetectTicker => {
                let verdict = self.detector.detect(&query).await?;
                state.set_ticker_detected(verdict)?;
            }
            Stage::Analyze => {
                let (price, news) = tokio::join!(
                    self.price_analyst.analyze(&query),
                    self.news_analyst.analyze(&query)
                );
                info!(
                    price_degraded = price.degraded,
                    news_degraded = news.degraded,
                    "Analysts finished"
                );
                state.set_price_analyst_report(price)?;
                state.set_news_analyst_report(news)?;
            }
            Stage::Synthesize => {
                let report = self
                    .synthesizer
                    .synthesize(
                        &query,
                        state.price_analyst_report(),
                        state.news_analyst_report(),
                    )
                    .await;
                if let Some(report) = report {
                    state.set_final_report(report)?;
                }
            }
            Stage::Respond => {
                let message = self.composer.compose(state).await;
                state.push_response(message);
            }
            Stage::Start | Stage::End => {
                return Err(OrchestrationError::RoutingError(format!(
                    "{} has no node to execute",
                    stage
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, CompletionRequest, OfflineModel, ScriptedModel, Task};
    use crate::market_data::StaticMarketData;
    use crate::models::{
        Action, AnalystReport, Message, MessageRole, PriceSeries, SearchHit, Sentiment, Trend,
        SCORE_RANGE,
    };
    use async_trait::async_trait;
    use crate::search::StaticSearch;
    use crate::tools::WEB_SEARCH;
    use serde_json::json;
    use std::time::Duration;

    const HOLD_REPORT: &str = r#"{"action":"hold","score":0.62,"trend":"flat","sentiment":"neutral","price_predictions":[190.2,190.6,191.0,190.8,191.3],"summary":"Range-bound into earnings with mixed coverage."}"#;

    fn config() -> WorkflowConfig {
        WorkflowConfig {
            max_tool_iterations: 3,
            synthesis_attempts: 2,
            prediction_horizon: 5,
            llm_timeout: Duration::from_secs(5),
            market_data_timeout: Duration::from_secs(5),
            search_timeout: Duration::from_secs(5),
            ..WorkflowConfig::default()
        }
    }

    fn closes() -> Vec<f64> {
        (0..30).map(|i| 185.0 + (i % 4) as f64).collect()
    }

    fn market() -> Arc<StaticMarketData> {
        Arc::new(StaticMarketData::new().with_closes("AAPL", &closes()))
    }

    fn search() -> Arc<StaticSearch> {
        Arc::new(StaticSearch::new(vec![SearchHit {
            title: "Apple holds steady ahead of earnings".to_string(),
            snippet: "Analysts see limited upside near term".to_string(),
            url: "https://news.example/aapl".to_string(),
        }]))
    }

    fn has_tool_results(request: &CompletionRequest) -> bool {
        request.messages.iter().any(|m| m.role == MessageRole::Tool)
    }

    /// Well-behaved collaborator: detects tickers by the presence of "AAPL"
    fn analyst_model() -> Arc<ScriptedModel> {
        Arc::new(ScriptedModel::new(|request| {
            let completion = match request.task {
                Task::TickerDetection => {
                    if request.last_user_content().contains("AAPL") {
                        Completion::text("yes")
                    } else {
                        Completion::text("no")
                    }
                }
                Task::SymbolExtraction => Completion::text("AAPL"),
                Task::PriceAnalysis => Completion::text("Sideways between 185 and 188."),
                Task::NewsAnalysis if has_tool_results(request) => {
                    Completion::text("Coverage is neutral; earnings are the next catalyst.")
                }
                Task::NewsAnalysis => {
                    Completion::tool_call("call_1", WEB_SEARCH, json!({ "query": "AAPL news" }))
                }
                Task::ReportSynthesis => Completion::text(HOLD_REPORT),
                Task::Response => {
                    let context = request.last_user_content();
                    if context.contains("Action: hold") {
                        Completion::text("Our view on AAPL this week is hold: the trend is flat and sentiment neutral.")
                    } else {
                        Completion::text("Inflation is the rate at which the general price level rises.")
                    }
                }
            };
            Ok(completion)
        }))
    }

    fn workflow(model: Arc<ScriptedModel>, market: Arc<StaticMarketData>) -> Workflow {
        Workflow::new(model, market, search(), config())
    }

    #[tokio::test]
    async fn test_general_question_skips_analysis() {
        let model = analyst_model();
        let state = workflow(model.clone(), market())
            .run("What is inflation?")
            .await
            .unwrap();

        assert_eq!(state.ticker_detected().unwrap(), TickerVerdict::No);
        assert!(state.price_analyst_report().is_none());
        assert!(state.news_analyst_report().is_none());
        assert!(state.final_report().is_none());
        assert_eq!(state.final_response().len(), 1);
        assert!(state.answer().unwrap().contains("Inflation"));
        assert_eq!(
            state.trace(),
            &[Stage::Start, Stage::DetectTicker, Stage::Respond, Stage::End]
        );
        assert_eq!(model.calls(), vec![Task::TickerDetection, Task::Response]);
    }

    #[tokio::test]
    async fn test_ticker_question_produces_valid_report() {
        let state = workflow(analyst_model(), market())
            .run("What's your take on AAPL this week?")
            .await
            .unwrap();

        let report = state.final_report().unwrap();
        let (low, high) = SCORE_RANGE;
        assert!(report.score >= low && report.score <= high);
        assert_eq!(report.action, Action::Hold);
        assert_eq!(report.trend, Trend::Flat);
        assert_eq!(report.sentiment, Sentiment::Neutral);
        assert_eq!(report.price_predictions.len(), 5);

        assert!(!state.price_analyst_report().unwrap().degraded);
        assert!(!state.news_analyst_report().unwrap().degraded);
        assert!(state.answer().unwrap().contains("hold"));
        assert_eq!(
            state.trace(),
            &[
                Stage::Start,
                Stage::DetectTicker,
                Stage::Analyze,
                Stage::Synthesize,
                Stage::Respond,
                Stage::End
            ]
        );
    }

    #[tokio::test]
    async fn test_market_data_failure_still_completes() {
        let state = workflow(
            analyst_model(),
            Arc::new(StaticMarketData::unavailable("provider unavailable")),
        )
        .run("What's your take on AAPL this week?")
        .await
        .unwrap();

        let price = state.price_analyst_report().unwrap();
        assert!(price.degraded);
        assert!(price.content.starts_with("Price data unavailable"));
        assert!(!state.answer().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_hungry_model_is_bounded() {
        let model = Arc::new(ScriptedModel::new(|request| match request.task {
            Task::TickerDetection => Ok(Completion::text("yes")),
            Task::SymbolExtraction => Ok(Completion::text("AAPL")),
            Task::NewsAnalysis => Ok(Completion::tool_call(
                "again",
                WEB_SEARCH,
                json!({ "query": "AAPL more news" }),
            )),
            Task::ReportSynthesis => Ok(Completion::text(HOLD_REPORT)),
            _ => Ok(Completion::text("Analysis text.")),
        }));

        let state = workflow(model.clone(), market())
            .run("AAPL outlook?")
            .await
            .unwrap();

        assert!(model.count(Task::NewsAnalysis) <= config().max_tool_iterations);
        assert!(state.news_analyst_report().unwrap().degraded);
        assert!(state.answer().is_some());
    }

    #[tokio::test]
    async fn test_identical_runs_give_identical_reports() {
        let flow = workflow(analyst_model(), market());

        let first = flow.run("What's your take on AAPL this week?").await.unwrap();
        let second = flow.run("What's your take on AAPL this week?").await.unwrap();

        assert_eq!(first.final_report(), second.final_report());
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_synthesis_failure_leaves_report_absent() {
        let model = Arc::new(ScriptedModel::new(|request| match request.task {
            Task::TickerDetection => Ok(Completion::text("yes")),
            Task::SymbolExtraction => Ok(Completion::text("AAPL")),
            Task::ReportSynthesis => Ok(Completion::text("I think it's a buy!")),
            _ => Ok(Completion::text("Some analysis.")),
        }));

        let state = workflow(model.clone(), market())
            .run("Is AAPL a buy?")
            .await
            .unwrap();

        assert!(state.final_report().is_none());
        assert_eq!(model.count(Task::ReportSynthesis), config().synthesis_attempts);
        assert!(state.answer().is_some());
    }

    #[tokio::test]
    async fn test_detector_failure_is_fatal() {
        let failing = Arc::new(ScriptedModel::new(|_| {
            Err(OrchestrationError::LlmError("503".to_string()))
        }));
        let result = workflow(failing, market()).run("AAPL?").await;
        assert!(matches!(result, Err(OrchestrationError::TickerDetection(_))));

        let rambling = Arc::new(ScriptedModel::new(|_| Ok(Completion::text("maybe"))));
        let result = workflow(rambling.clone(), market()).run("AAPL?").await;
        assert!(matches!(result, Err(OrchestrationError::TickerDetection(_))));
        assert_eq!(rambling.calls(), vec![Task::TickerDetection]);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let model = analyst_model();
        let result = workflow(model.clone(), market()).run("   ").await;
        assert!(matches!(result, Err(OrchestrationError::Validation(_))));
        assert!(model.calls().is_empty());
    }

    #[tokio::test]
    async fn test_offline_model_runs_end_to_end() {
        let flow = Workflow::new(
            Arc::new(OfflineModel::new(5)),
            market(),
            search(),
            config(),
        );

        let state = flow.run("What's your take on AAPL this week?").await.unwrap();
        let report = state.final_report().unwrap();
        assert_eq!(report.action, Action::Hold);
        assert_eq!(report.price_predictions.len(), 5);
        assert!(!state.news_analyst_report().unwrap().degraded);

        let state = flow.run("What is inflation?").await.unwrap();
        assert!(state.final_report().is_none());
        assert!(state.answer().is_some());
    }

    #[test]
    fn test_route_guards() {
        let mut state = WorkflowState::new("AAPL?");
        assert_eq!(route(Stage::Start, &state).unwrap(), Stage::DetectTicker);
        assert!(route(Stage::DetectTicker, &state).is_err());

        state.set_ticker_detected(TickerVerdict::Yes).unwrap();
        assert_eq!(route(Stage::DetectTicker, &state).unwrap(), Stage::Analyze);
        assert!(route(Stage::Analyze, &state).is_err());

        state
            .set_price_analyst_report(AnalystReport::complete("p"))
            .unwrap();
        state
            .set_news_analyst_report(AnalystReport::unavailable("n"))
            .unwrap();
        assert_eq!(route(Stage::Analyze, &state).unwrap(), Stage::Synthesize);
        assert_eq!(route(Stage::Synthesize, &state).unwrap(), Stage::Respond);
        assert!(route(Stage::Respond, &state).is_err());

        state.push_response(Message::assistant("done"));
        assert_eq!(route(Stage::Respond, &state).unwrap(), Stage::End);
        assert!(route(Stage::End, &state).is_err());

        let mut general = WorkflowState::new("What is inflation?");
        general.set_ticker_detected(TickerVerdict::No).unwrap();
        assert_eq!(route(Stage::DetectTicker, &general).unwrap(), Stage::Respond);
    }

    #[tokio::test]
    async fn test_offline_model_without_prices_gives_no_report() {
        let flow = Workflow::new(
            Arc::new(OfflineModel::new(5)),
            Arc::new(StaticMarketData::unavailable("maintenance")),
            search(),
            config(),
        );

        let state = flow.run("What's your take on AAPL this week?").await.unwrap();
        assert!(state.price_analyst_report().unwrap().degraded);
        assert!(state.final_report().is_none());
        assert!(state.answer().is_some());
    }

    fn app_config(groq_api_key: Option<&str>) -> AppConfig {
        AppConfig {
            groq_api_key: groq_api_key.map(str::to_string),
            model: "llama-3.1-8b-instant".to_string(),
            openbb_pat: None,
            openbb_base_url: "http://127.0.0.1:6900".to_string(),
            market_data_provider: "yfinance".to_string(),
            port: 5002,
            allowed_origin: None,
            workflow: config(),
        }
    }

    #[test]
    fn test_production_wiring_requires_model_key() {
        let result = Workflow::from_config(&app_config(None));
        assert!(matches!(result, Err(OrchestrationError::ConfigError(_))));

        assert!(Workflow::from_config(&app_config(Some("gsk_test"))).is_ok());
        assert!(Workflow::with_model(&app_config(None), Arc::new(OfflineModel::new(5))).is_ok());
    }

    // Timeouts

    fn tight_config() -> WorkflowConfig {
        WorkflowConfig {
            llm_timeout: Duration::from_millis(50),
            market_data_timeout: Duration::from_millis(50),
            ..config()
        }
    }

    struct SlowMarketData;

    #[async_trait]
    impl MarketDataProvider for SlowMarketData {
        async fn price_history(&self, symbol: &str) -> Result<PriceSeries> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Err(OrchestrationError::SymbolNotFound(symbol.to_string()))
        }
    }

    /// Records every call through `inner`, then hangs on `stalled` tasks
    struct StallingModel {
        inner: Arc<ScriptedModel>,
        stalled: Task,
    }

    #[async_trait]
    impl LanguageModel for StallingModel {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
            let task = request.task;
            let completion = self.inner.complete(request).await;
            if task == self.stalled {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            completion
        }
    }

    fn stalling(inner: Arc<ScriptedModel>, stalled: Task) -> Arc<StallingModel> {
        Arc::new(StallingModel { inner, stalled })
    }

    #[tokio::test]
    async fn test_slow_market_data_degrades_price_report() {
        let model = analyst_model();
        let flow = Workflow::new(model.clone(), Arc::new(SlowMarketData), search(), tight_config());

        let state = flow.run("What's your take on AAPL this week?").await.unwrap();

        let price = state.price_analyst_report().unwrap();
        assert!(price.degraded);
        assert!(price.content.contains("market data fetch timed out"));
        assert!(!state.news_analyst_report().unwrap().degraded);
        assert!(state.answer().is_some());
    }

    #[tokio::test]
    async fn test_slow_detector_is_fatal() {
        let model = analyst_model();
        let flow = Workflow::new(
            stalling(model.clone(), Task::TickerDetection),
            market(),
            search(),
            tight_config(),
        );

        let result = flow.run("What's your take on AAPL this week?").await;
        assert!(matches!(result, Err(OrchestrationError::TickerDetection(_))));
        assert_eq!(model.calls(), vec![Task::TickerDetection]);
    }

    #[tokio::test]
    async fn test_slow_synthesis_leaves_report_absent() {
        let model = analyst_model();
        let flow = Workflow::new(
            stalling(model.clone(), Task::ReportSynthesis),
            market(),
            search(),
            tight_config(),
        );

        let state = flow.run("What's your take on AAPL this week?").await.unwrap();

        assert!(state.final_report().is_none());
        assert_eq!(model.count(Task::ReportSynthesis), tight_config().synthesis_attempts);
        assert!(state.answer().is_some());
    }
}
