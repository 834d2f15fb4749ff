//! OpenBB Platform REST client
//!
//! Reads `/api/v1/equity/price/historical` from an OpenBB Platform API
//! instance. The personal access token, when configured, is sent as a
//! bearer token.

use super::MarketDataProvider;
use crate::error::OrchestrationError;
use crate::models::{PriceBar, PriceSeries};
use crate::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const HISTORICAL_PATH: &str = "/api/v1/equity/price/historical";

pub struct OpenBbClient {
    client: Client,
    base_url: String,
    pat: Option<String>,
    provider: String,
    history_days: i64,
}

impl OpenBbClient {
    pub fn new(
        base_url: &str,
        pat: Option<String>,
        provider: String,
        history_days: i64,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            pat,
            provider,
            history_days,
        })
    }
}

#[async_trait]
impl MarketDataProvider for OpenBbClient {
    async fn price_history(&self, symbol: &str) -> Result<PriceSeries> {
        let start_date = (Utc::now() - ChronoDuration::days(self.history_days))
            .date_naive()
            .to_string();
        let url = format!("{}{}", self.base_url, HISTORICAL_PATH);

        info!(symbol, provider = %self.provider, "Fetching price history");

        let mut request = self.client.get(&url).query(&[
            ("symbol", symbol),
            ("provider", self.provider.as_str()),
            ("start_date", start_date.as_str()),
        ]);
        if let Some(pat) = &self.pat {
            request = request.bearer_auth(pat);
        }

        let response = request.send().await.map_err(|e| {
            OrchestrationError::MarketData(format!("OpenBB request failed for {}: {}", symbol, e))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(OrchestrationError::SymbolNotFound(symbol.to_string()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(symbol, %status, "OpenBB returned an error");
            return Err(OrchestrationError::MarketData(format!(
                "OpenBB returned {} for {}: {}",
                status, symbol, detail
            )));
        }

        let body: HistoricalResponse = response.json().await.map_err(|e| {
            OrchestrationError::MarketData(format!("Invalid OpenBB payload: {}", e))
        })?;

        let series = into_series(symbol, body)?;
        debug!(symbol, bars = series.bars.len(), "Price history received");

        Ok(series)
    }
}

fn into_series(symbol: &str, body: HistoricalResponse) -> Result<PriceSeries> {
    let mut bars = body
        .results
        .into_iter()
        .map(|row| {
            Ok(PriceBar {
                date: parse_date(&row.date)?,
                open: row.open.unwrap_or(row.close),
                high: row.high.unwrap_or(row.close),
                low: row.low.unwrap_or(row.close),
                close: row.close,
                volume: row.volume.unwrap_or(0.0),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if bars.is_empty() {
        return Err(OrchestrationError::SymbolNotFound(symbol.to_string()));
    }

    bars.sort_by_key(|bar| bar.date);

    Ok(PriceSeries {
        symbol: symbol.to_uppercase(),
        bars,
    })
}

/// Accepts `YYYY-MM-DD` and full timestamps
fn parse_date(raw: &str) -> Result<NaiveDate> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| OrchestrationError::MarketData(format!("Bad date {}: {}", raw, e)))
}

#[derive(Debug, Deserialize)]
struct HistoricalResponse {
    #[serde(default)]
    results: Vec<HistoricalRow>,
}

#[derive(Debug, Deserialize)]
struct HistoricalRow {
    date: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: f64,
    volume: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_parsing() {
        let raw = r#"{
            "results": [
                {"date": "2024-03-05T00:00:00", "open": 170.8, "high": 172.0, "low": 169.4, "close": 170.1, "volume": 95132400},
                {"date": "2024-03-04", "open": 176.2, "high": 176.9, "low": 173.8, "close": 175.1, "volume": 81510100}
            ],
            "provider": "yfinance",
            "warnings": null
        }"#;

        let series = into_series("aapl", serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(series.symbol, "AAPL");
        assert_eq!(series.bars.len(), 2);
        assert_eq!(series.bars[0].close, 175.1);
        assert_eq!(series.bars[1].date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_empty_results_mean_unknown_symbol() {
        let body: HistoricalResponse = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert!(matches!(
            into_series("NOPE", body),
            Err(OrchestrationError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn test_bad_date_is_an_error() {
        assert!(parse_date("03/05/2024").is_err());
        assert!(parse_date("2024-03-05").is_ok());
    }
}
