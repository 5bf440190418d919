use async_trait::async_trait;
use entity::{
    data::{DailyPriceRecord, RawDailyBar},
    range::DateRange,
};
use rest::{FeedUnavailable, PolygonRestApi};
use stock_symbol::Symbol;

/// Persistence boundary for daily price history. The store is the sole
/// authority on `(ticker, date)` uniqueness; `insert_many` must skip rows
/// whose key is already present rather than erroring, which also makes
/// concurrent double-fills of the same gap harmless.
#[async_trait]
pub trait PriceStore: Send + Sync + 'static {
    /// All records for `ticker` within the inclusive range, ascending by date.
    async fn find_by_range(
        &self,
        ticker: Symbol,
        range: DateRange,
    ) -> anyhow::Result<Vec<DailyPriceRecord>>;

    /// Inserts the given records, ignoring duplicate keys. Returns the number
    /// of rows actually inserted.
    async fn insert_many(&self, records: &[DailyPriceRecord]) -> anyhow::Result<u64>;
}

/// External market-data provider boundary. Returns raw daily bars for the
/// inclusive range, or an empty list when the provider has no data there.
#[async_trait]
pub trait PriceFeed: Send + Sync + 'static {
    async fn fetch_daily_aggregates(
        &self,
        ticker: Symbol,
        range: DateRange,
    ) -> Result<Vec<RawDailyBar>, FeedUnavailable>;
}

#[async_trait]
impl PriceFeed for PolygonRestApi {
    async fn fetch_daily_aggregates(
        &self,
        ticker: Symbol,
        range: DateRange,
    ) -> Result<Vec<RawDailyBar>, FeedUnavailable> {
        self.daily_aggregates(ticker, range.start, range.end).await
    }
}
