use financial_query_workflow::{api::start_server, AppConfig, Workflow};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    info!("Financial Query Workflow - API Server");
    info!(
        port = config.port,
        model = %config.model,
        market_data = %config.openbb_base_url,
        provider = %config.market_data_provider,
        "Configuration loaded"
    );

    let workflow = Arc::new(Workflow::from_config(&config)?);
    info!("Workflow initialized");

    start_server(workflow, config.port, config.allowed_origin.as_deref()).await?;

    Ok(())
}
