use serde::Deserialize;
use stock_symbol::Symbol;
use time::{Date, OffsetDateTime};

/// One daily aggregate bar as returned by the market-data API.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawDailyBar {
    /// Millisecond Unix timestamp of the start of the aggregate window.
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "vw", default)]
    pub volume_weighted_average: f64,
    #[serde(rename = "v", default)]
    pub volume: f64,
}

/// One stored day of price history for a ticker. Rows are immutable once
/// written; the store only ever inserts days it does not yet have.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyPriceRecord {
    pub ticker: Symbol,
    pub date: Date,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub average: f64,
    pub volume: u64,
}

impl DailyPriceRecord {
    /// Converts a raw feed bar into a stored record. The bar's timestamp is
    /// truncated to its UTC calendar date.
    pub fn from_raw(ticker: Symbol, bar: &RawDailyBar) -> anyhow::Result<Self> {
        let timestamp_nanos = i128::from(bar.timestamp_ms) * 1_000_000;
        let date = OffsetDateTime::from_unix_timestamp_nanos(timestamp_nanos)?.date();

        Ok(Self {
            ticker,
            date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            average: bar.volume_weighted_average,
            volume: bar.volume.max(0.0) as u64,
        })
    }
}
