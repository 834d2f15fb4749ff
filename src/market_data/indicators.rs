//! Technical indicators over a daily price series
//!
//! Pure functions; the Price Analyst hands their output to the model so the
//! numbers in its report come from here, not from the model.

use crate::models::PriceSeries;
use chrono::NaiveDate;

pub const SMA_SHORT: usize = 5;
pub const SMA_LONG: usize = 20;
pub const RSI_PERIOD: usize = 14;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub sessions: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub last_close: f64,
    pub change_pct: f64,
    pub period_high: f64,
    pub period_low: f64,
    pub avg_volume: f64,
    pub sma_short: Option<f64>,
    pub sma_long: Option<f64>,
    pub rsi: Option<f64>,
}

impl IndicatorSnapshot {
    /// `None` for an empty series
    pub fn from_series(series: &PriceSeries) -> Option<Self> {
        let first = series.bars.first()?;
        let last = series.bars.last()?;
        let closes: Vec<f64> = series.bars.iter().map(|b| b.close).collect();

        let change_pct = if first.close != 0.0 {
            (last.close - first.close) / first.close * 100.0
        } else {
            0.0
        };

        let period_high = series.bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let period_low = series.bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let avg_volume =
            series.bars.iter().map(|b| b.volume).sum::<f64>() / series.bars.len() as f64;

        Some(Self {
            symbol: series.symbol.clone(),
            sessions: series.bars.len(),
            first_date: first.date,
            last_date: last.date,
            last_close: last.close,
            change_pct,
            period_high,
            period_low,
            avg_volume,
            sma_short: sma(&closes, SMA_SHORT),
            sma_long: sma(&closes, SMA_LONG),
            rsi: rsi(&closes, RSI_PERIOD),
        })
    }

    /// Plain-text block embedded in analyst prompts
    pub fn to_prompt(&self) -> String {
        let fmt_opt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v));

        format!(
            "Symbol: {}\n\
             Window: {} to {} ({} sessions)\n\
             Last close: {:.2}\n\
             Change over window: {:+.2}%\n\
             High / low: {:.2} / {:.2}\n\
             Average volume: {:.0}\n\
             SMA-{}: {}\n\
             SMA-{}: {}\n\
             RSI-{}: {}",
            self.symbol,
            self.first_date,
            self.last_date,
            self.sessions,
            self.last_close,
            self.change_pct,
            self.period_high,
            self.period_low,
            self.avg_volume,
            SMA_SHORT,
            fmt_opt(self.sma_short),
            SMA_LONG,
            fmt_opt(self.sma_long),
            RSI_PERIOD,
            fmt_opt(self.rsi),
        )
    }
}

/// Simple moving average of the last `window` values
pub fn sma(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    let tail = &values[values.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

/// Wilder's relative strength index; needs `period + 1` closes
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = changes.split_at(period);

    let mut avg_gain = seed.iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss = -seed.iter().filter(|c| **c < 0.0).sum::<f64>() / period as f64;

    for change in rest {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}
