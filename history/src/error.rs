use thiserror::Error;
use time::Date;

/// Fatal failures of a `get_history` call. Per-edge feed failures and store
/// write failures are not fatal; they surface in the returned `StockHistory`.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: Date, end: Date },
    #[error("invalid ticker: {0:?}")]
    InvalidTicker(String),
    #[error("price store read failed: {0}")]
    Store(#[source] anyhow::Error),
}
