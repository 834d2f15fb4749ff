//! Market data collaborator
//!
//! Price/volume history is fetched through `MarketDataProvider`; technical
//! indicators are computed locally and deterministically from that history.

use crate::error::OrchestrationError;
use crate::models::{PriceBar, PriceSeries};
use crate::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

pub mod indicators;
pub mod openbb;

pub use indicators::IndicatorSnapshot;
pub use openbb::OpenBbClient;

/// Trait for price-history retrieval
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Daily bars for `symbol`, oldest first. Unknown symbols are
    /// `OrchestrationError::SymbolNotFound`.
    async fn price_history(&self, symbol: &str) -> Result<PriceSeries>;
}

/// In-memory provider for tests and demos
pub struct StaticMarketData {
    series: HashMap<String, PriceSeries>,
    outage: Option<String>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
            outage: None,
        }
    }

    /// Provider that fails every request with `reason`
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            series: HashMap::new(),
            outage: Some(reason.into()),
        }
    }

    /// Register daily bars built from closing prices, one session per day
    /// starting at 2024-01-02.
    pub fn with_closes(mut self, symbol: &str, closes: &[f64]) -> Self {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, close)| PriceBar {
                date: start + Duration::days(i as i64),
                open: *close,
                high: close * 1.01,
                low: close * 0.99,
                close: *close,
                volume: 1_000_000.0 + (i as f64) * 10_000.0,
            })
            .collect();

        self.series.insert(
            symbol.to_uppercase(),
            PriceSeries {
                symbol: symbol.to_uppercase(),
                bars,
            },
        );
        self
    }
}

impl Default for StaticMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for StaticMarketData {
    async fn price_history(&self, symbol: &str) -> Result<PriceSeries> {
        if let Some(reason) = &self.outage {
            return Err(OrchestrationError::MarketData(reason.clone()));
        }

        self.series
            .get(&symbol.to_uppercase())
            .cloned()
            .ok_or_else(|| OrchestrationError::SymbolNotFound(symbol.to_string()))
    }
}
