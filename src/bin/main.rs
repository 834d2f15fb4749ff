use financial_query_workflow::llm::OfflineModel;
use financial_query_workflow::{api::AnalyzeResponse, AppConfig, Workflow};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: orchestrator <question>";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }

    let config = AppConfig::from_env()?;
    let workflow = match config.groq_api_key {
        Some(_) => Workflow::from_config(&config)?,
        None => {
            warn!("GROQ_API_KEY not set, using the offline model");
            let model = Arc::new(OfflineModel::new(config.workflow.prediction_horizon));
            Workflow::with_model(&config, model)?
        }
    };

    info!(query = %query, "Running workflow");

    match workflow.run(&query).await {
        Ok(state) => {
            info!(
                run_id = %state.run_id,
                trace = ?state.trace(),
                "Workflow successful"
            );
            let reply = AnalyzeResponse::from_state(&state);
            println!("{}", serde_json::to_string_pretty(&reply)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Workflow failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
