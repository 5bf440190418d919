use std::str::FromStr;

use entity::{data::DailyPriceRecord, range::DateRange};
use log::{debug, info, warn};
use rest::FeedUnavailable;
use stock_symbol::Symbol;
use time::Date;

use crate::{
    api::{PriceFeed, PriceStore},
    error::HistoryError,
};

/// Gaps spanning at most this many business days are assumed to be weekend or
/// holiday artifacts and never trigger an external fetch. Applied identically
/// to the leading and trailing edge.
const GAP_TOLERANCE_BUSINESS_DAYS: u32 = 1;

/// Assembles gap-free daily price series by merging the local store with
/// ranges fetched from the external feed, writing fetched rows back so later
/// requests are served from the store. Stateless between calls; the injected
/// store and feed are its only collaborators.
pub struct HistoryAssembler<S, F> {
    store: S,
    feed: F,
}

/// What happened on one edge (leading or trailing) of a request.
#[derive(Debug)]
pub enum GapOutcome {
    /// The edge was covered by the store, or its gap was within the
    /// business-day tolerance.
    NotNeeded,
    /// The gap was fetched and merged into the result. `persisted` is false
    /// when the write-back failed; the rows are still in the result and will
    /// simply be fetched again next time.
    Filled { rows: usize, persisted: bool },
    /// The fetch for this edge failed. The result lacks this region.
    Failed(FeedUnavailable),
}

impl GapOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, GapOutcome::Failed(_))
    }
}

/// The outcome of a `get_history` call: the assembled records plus a
/// per-edge account of the gap fills, so callers can tell a complete series
/// from a best-effort one.
#[derive(Debug)]
pub struct StockHistory {
    /// Ascending by date, at most one record per date.
    pub records: Vec<DailyPriceRecord>,
    pub leading: GapOutcome,
    pub trailing: GapOutcome,
}

impl StockHistory {
    /// True when no edge fetch failed, i.e. the records cover everything the
    /// store and feed jointly had for the requested range.
    pub fn is_complete(&self) -> bool {
        !self.leading.is_failed() && !self.trailing.is_failed()
    }
}

impl<S, F> HistoryAssembler<S, F>
where
    S: PriceStore,
    F: PriceFeed,
{
    pub fn new(store: S, feed: F) -> Self {
        Self { store, feed }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    /// Returns the daily price records for `ticker` within the inclusive
    /// `[start, end]` range, ascending by date, fetching and persisting any
    /// uncached edge of the range from the feed.
    pub async fn get_history(
        &self,
        ticker: &str,
        start: Date,
        end: Date,
    ) -> Result<StockHistory, HistoryError> {
        if start > end {
            return Err(HistoryError::InvalidRange { start, end });
        }
        let ticker = normalize_ticker(ticker)?;
        let range = DateRange::new(start, end);

        let cached = self
            .store
            .find_by_range(ticker, range)
            .await
            .map_err(HistoryError::Store)?;

        let (first_cached, last_cached) = match (cached.first(), cached.last()) {
            (Some(first), Some(last)) => (first.date, last.date),
            // Nothing cached: the whole range is one gap. Fetching it in a
            // single call keeps the leading and trailing fills from both
            // covering the interior.
            _ => {
                let (records, outcome) = if range.business_days() > GAP_TOLERANCE_BUSINESS_DAYS {
                    self.fill_gap(ticker, range).await
                } else {
                    (Vec::new(), GapOutcome::NotNeeded)
                };

                return Ok(StockHistory {
                    records,
                    leading: outcome,
                    trailing: GapOutcome::NotNeeded,
                });
            }
        };

        let leading_gap = match first_cached.previous_day() {
            Some(day_before) if first_cached > range.start => {
                exceeds_tolerance(DateRange::new(range.start, day_before))
            }
            _ => None,
        };
        let trailing_gap = match last_cached.next_day() {
            Some(day_after) if last_cached < range.end => {
                exceeds_tolerance(DateRange::new(day_after, range.end))
            }
            _ => None,
        };

        // The two edge fetches are independent; order of the result comes
        // from dates, not from completion order.
        let ((leading_rows, leading), (trailing_rows, trailing)) = futures::join!(
            self.fill_edge(ticker, leading_gap),
            self.fill_edge(ticker, trailing_gap),
        );

        let mut records =
            Vec::with_capacity(leading_rows.len() + cached.len() + trailing_rows.len());
        records.extend(leading_rows);
        records.extend(cached);
        records.extend(trailing_rows);

        Ok(StockHistory {
            records,
            leading,
            trailing,
        })
    }

    async fn fill_edge(
        &self,
        ticker: Symbol,
        gap: Option<DateRange>,
    ) -> (Vec<DailyPriceRecord>, GapOutcome) {
        match gap {
            Some(gap) => self.fill_gap(ticker, gap).await,
            None => (Vec::new(), GapOutcome::NotNeeded),
        }
    }

    /// Fetches one uncached span from the feed, persists whatever came back,
    /// and returns the rows for merging. Feed and store failures are reported
    /// through the outcome rather than aborting the whole request.
    async fn fill_gap(&self, ticker: Symbol, gap: DateRange) -> (Vec<DailyPriceRecord>, GapOutcome) {
        info!("Fetching {ticker} bars for uncached span {}..{}", gap.start, gap.end);

        let bars = match self.feed.fetch_daily_aggregates(ticker, gap).await {
            Ok(bars) => bars,
            Err(error) => {
                warn!("Feed fetch for {ticker} {}..{} failed: {error}", gap.start, gap.end);
                return (Vec::new(), GapOutcome::Failed(error));
            }
        };

        let mut rows = Vec::with_capacity(bars.len());
        for bar in &bars {
            match DailyPriceRecord::from_raw(ticker, bar) {
                Ok(record) if gap.contains(record.date) => rows.push(record),
                Ok(record) => {
                    debug!("Discarding out-of-span {ticker} bar dated {}", record.date);
                }
                Err(error) => warn!("Discarding undecodable {ticker} bar: {error}"),
            }
        }
        rows.sort_by_key(|record| record.date);
        rows.dedup_by_key(|record| record.date);

        if rows.is_empty() {
            // The provider has no data here (holiday span, delisted ticker)
            return (
                rows,
                GapOutcome::Filled {
                    rows: 0,
                    persisted: true,
                },
            );
        }

        let persisted = match self.store.insert_many(&rows).await {
            Ok(count) => {
                debug!("Persisted {count} of {} fetched {ticker} rows", rows.len());
                true
            }
            Err(error) => {
                warn!(
                    "Failed to persist {} fetched {ticker} rows, they will be refetched \
                     on the next request: {error}",
                    rows.len()
                );
                false
            }
        };

        let outcome = GapOutcome::Filled {
            rows: rows.len(),
            persisted,
        };
        (rows, outcome)
    }
}

fn exceeds_tolerance(gap: DateRange) -> Option<DateRange> {
    (gap.business_days() > GAP_TOLERANCE_BUSINESS_DAYS).then_some(gap)
}

fn normalize_ticker(raw: &str) -> Result<Symbol, HistoryError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(HistoryError::InvalidTicker(raw.to_owned()));
    }

    Symbol::from_str(&trimmed.to_uppercase())
        .map_err(|_| HistoryError::InvalidTicker(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::util::SECONDS_TO_DAYS;
    use entity::data::RawDailyBar;
    use entity::range::is_business_day;
    use rest::StatusCode;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };
    use time::{macros::date, Duration};

    fn ticker() -> Symbol {
        Symbol::from_str("AAPL").unwrap()
    }

    fn bar_for(date: Date) -> RawDailyBar {
        let day = date.midnight().assume_utc().unix_timestamp() / SECONDS_TO_DAYS;
        RawDailyBar {
            timestamp_ms: day * SECONDS_TO_DAYS * 1000,
            open: 100.0 + day as f64,
            high: 101.0 + day as f64,
            low: 99.0 + day as f64,
            close: 100.5 + day as f64,
            volume_weighted_average: 100.25 + day as f64,
            volume: 1_000_000.0,
        }
    }

    fn record_for(date: Date) -> DailyPriceRecord {
        DailyPriceRecord::from_raw(ticker(), &bar_for(date)).unwrap()
    }

    fn business_days_in(range: DateRange) -> Vec<Date> {
        let mut days = Vec::new();
        let mut day = range.start;
        while day <= range.end {
            if is_business_day(day) {
                days.push(day);
            }
            day += Duration::days(1);
        }
        days
    }

    #[derive(Default)]
    struct MockStore {
        rows: Mutex<Vec<DailyPriceRecord>>,
        fail_reads: bool,
        fail_inserts: bool,
        find_calls: AtomicUsize,
        insert_calls: AtomicUsize,
    }

    impl MockStore {
        fn seeded(range: DateRange) -> Self {
            let store = Self::default();
            store
                .rows
                .lock()
                .unwrap()
                .extend(business_days_in(range).into_iter().map(record_for));
            store
        }
    }

    #[async_trait]
    impl PriceStore for MockStore {
        async fn find_by_range(
            &self,
            ticker: Symbol,
            range: DateRange,
        ) -> anyhow::Result<Vec<DailyPriceRecord>> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(anyhow::anyhow!("database connection lost"));
            }

            let mut matching = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|record| record.ticker == ticker && range.contains(record.date))
                .copied()
                .collect::<Vec<_>>();
            matching.sort_by_key(|record| record.date);
            Ok(matching)
        }

        async fn insert_many(&self, records: &[DailyPriceRecord]) -> anyhow::Result<u64> {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_inserts {
                return Err(anyhow::anyhow!("disk full"));
            }

            let mut rows = self.rows.lock().unwrap();
            let mut inserted = 0;
            for record in records {
                let duplicate = rows
                    .iter()
                    .any(|row| row.ticker == record.ticker && row.date == record.date);
                if !duplicate {
                    rows.push(*record);
                    inserted += 1;
                }
            }
            Ok(inserted)
        }
    }

    #[derive(Default)]
    struct MockFeed {
        calls: Mutex<Vec<DateRange>>,
        fail_ranges: Vec<DateRange>,
        empty_ranges: Vec<DateRange>,
    }

    impl MockFeed {
        fn calls(&self) -> Vec<DateRange> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PriceFeed for MockFeed {
        async fn fetch_daily_aggregates(
            &self,
            _ticker: Symbol,
            range: DateRange,
        ) -> Result<Vec<RawDailyBar>, FeedUnavailable> {
            self.calls.lock().unwrap().push(range);

            if self.fail_ranges.contains(&range) {
                return Err(FeedUnavailable::Rejected(StatusCode::SERVICE_UNAVAILABLE));
            }
            if self.empty_ranges.contains(&range) {
                return Ok(Vec::new());
            }

            Ok(business_days_in(range)
                .into_iter()
                .map(|date| bar_for(date))
                .collect())
        }
    }

    fn assembler(store: MockStore, feed: MockFeed) -> HistoryAssembler<MockStore, MockFeed> {
        HistoryAssembler::new(store, feed)
    }

    fn dates(history: &StockHistory) -> Vec<Date> {
        history.records.iter().map(|record| record.date).collect()
    }

    // 2022-04-01 is a Friday; 2022-04-04 through 2022-04-08 the following
    // business week; 2022-04-09/10 a weekend.

    #[tokio::test]
    async fn invalid_range_rejected_before_any_io() {
        let sut = assembler(MockStore::default(), MockFeed::default());

        let result = sut
            .get_history("AAPL", date!(2022 - 04 - 10), date!(2022 - 04 - 01))
            .await;

        assert!(matches!(result, Err(HistoryError::InvalidRange { .. })));
        assert_eq!(sut.store().find_calls.load(Ordering::SeqCst), 0);
        assert!(sut.feed().calls().is_empty());
    }

    #[tokio::test]
    async fn blank_ticker_is_rejected() {
        let sut = assembler(MockStore::default(), MockFeed::default());

        let result = sut
            .get_history("   ", date!(2022 - 04 - 01), date!(2022 - 04 - 10))
            .await;

        assert!(matches!(result, Err(HistoryError::InvalidTicker(_))));
        assert_eq!(sut.store().find_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ticker_is_normalized_to_uppercase() {
        let seeded = DateRange::new(date!(2022 - 04 - 01), date!(2022 - 04 - 08));
        let sut = assembler(MockStore::seeded(seeded), MockFeed::default());

        let history = sut
            .get_history("aapl", date!(2022 - 04 - 01), date!(2022 - 04 - 08))
            .await
            .unwrap();

        assert_eq!(history.records.len(), 6);
        assert!(history.records.iter().all(|r| r.ticker == ticker()));
    }

    #[tokio::test]
    async fn fully_cached_range_never_touches_the_feed() {
        let seeded = DateRange::new(date!(2022 - 04 - 01), date!(2022 - 04 - 08));
        let sut = assembler(MockStore::seeded(seeded), MockFeed::default());

        let history = sut
            .get_history("AAPL", date!(2022 - 04 - 01), date!(2022 - 04 - 10))
            .await
            .unwrap();

        assert!(sut.feed().calls().is_empty());
        assert_eq!(history.records.len(), 6);
        assert!(history.is_complete());
        assert!(matches!(history.leading, GapOutcome::NotNeeded));
        assert!(matches!(history.trailing, GapOutcome::NotNeeded));
    }

    #[tokio::test]
    async fn empty_store_fetches_the_whole_range_once() {
        let sut = assembler(MockStore::default(), MockFeed::default());

        let history = sut
            .get_history("AAPL", date!(2022 - 04 - 01), date!(2022 - 04 - 10))
            .await
            .unwrap();

        assert_eq!(
            sut.feed().calls(),
            vec![DateRange::new(date!(2022 - 04 - 01), date!(2022 - 04 - 10))]
        );
        assert_eq!(history.records.len(), 6);
        assert!(matches!(
            history.leading,
            GapOutcome::Filled {
                rows: 6,
                persisted: true
            }
        ));
        // All six rows were written back
        assert_eq!(sut.store().rows.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn second_identical_call_is_served_from_the_store() {
        let sut = assembler(MockStore::default(), MockFeed::default());

        let first = sut
            .get_history("AAPL", date!(2022 - 04 - 01), date!(2022 - 04 - 10))
            .await
            .unwrap();
        let second = sut
            .get_history("AAPL", date!(2022 - 04 - 01), date!(2022 - 04 - 10))
            .await
            .unwrap();

        assert_eq!(sut.feed().calls().len(), 1);
        assert_eq!(first.records, second.records);
        assert!(matches!(second.leading, GapOutcome::NotNeeded));
    }

    #[tokio::test]
    async fn both_edge_gaps_are_fetched_and_merged_in_order() {
        // Cached: Tue 04-05 and Wed 04-06. Leading gap [04-01, 04-04] spans
        // two business days, trailing gap [04-07, 04-08] spans two as well.
        let seeded = DateRange::new(date!(2022 - 04 - 05), date!(2022 - 04 - 06));
        let sut = assembler(MockStore::seeded(seeded), MockFeed::default());

        let history = sut
            .get_history("AAPL", date!(2022 - 04 - 01), date!(2022 - 04 - 08))
            .await
            .unwrap();

        let calls = sut.feed().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.contains(&DateRange::new(date!(2022 - 04 - 01), date!(2022 - 04 - 04))));
        assert!(calls.contains(&DateRange::new(date!(2022 - 04 - 07), date!(2022 - 04 - 08))));

        assert_eq!(
            dates(&history),
            vec![
                date!(2022 - 04 - 01),
                date!(2022 - 04 - 04),
                date!(2022 - 04 - 05),
                date!(2022 - 04 - 06),
                date!(2022 - 04 - 07),
                date!(2022 - 04 - 08),
            ]
        );
        assert!(history.is_complete());
    }

    #[tokio::test]
    async fn single_business_day_gaps_do_not_fetch() {
        // Leading gap [04-01, 04-03] holds one business day (Friday), the
        // trailing gap [04-08, 04-08] exactly one as well.
        let seeded = DateRange::new(date!(2022 - 04 - 04), date!(2022 - 04 - 07));
        let sut = assembler(MockStore::seeded(seeded), MockFeed::default());

        let history = sut
            .get_history("AAPL", date!(2022 - 04 - 01), date!(2022 - 04 - 08))
            .await
            .unwrap();

        assert!(sut.feed().calls().is_empty());
        assert_eq!(history.records.len(), 4);
        assert!(matches!(history.leading, GapOutcome::NotNeeded));
        assert!(matches!(history.trailing, GapOutcome::NotNeeded));
    }

    #[tokio::test]
    async fn trailing_feed_failure_keeps_leading_and_cached_data() {
        let seeded = DateRange::new(date!(2022 - 04 - 05), date!(2022 - 04 - 06));
        let feed = MockFeed {
            fail_ranges: vec![DateRange::new(date!(2022 - 04 - 07), date!(2022 - 04 - 08))],
            ..MockFeed::default()
        };
        let sut = assembler(MockStore::seeded(seeded), feed);

        let history = sut
            .get_history("AAPL", date!(2022 - 04 - 01), date!(2022 - 04 - 08))
            .await
            .unwrap();

        assert_eq!(
            dates(&history),
            vec![
                date!(2022 - 04 - 01),
                date!(2022 - 04 - 04),
                date!(2022 - 04 - 05),
                date!(2022 - 04 - 06),
            ]
        );
        assert!(matches!(history.leading, GapOutcome::Filled { rows: 2, .. }));
        assert!(history.trailing.is_failed());
        assert!(!history.is_complete());
    }

    #[tokio::test]
    async fn empty_feed_response_yields_empty_success() {
        let range = DateRange::new(date!(2022 - 04 - 01), date!(2022 - 04 - 10));
        let feed = MockFeed {
            empty_ranges: vec![range],
            ..MockFeed::default()
        };
        let sut = assembler(MockStore::default(), feed);

        let history = sut
            .get_history("AAPL", range.start, range.end)
            .await
            .unwrap();

        assert!(history.records.is_empty());
        assert!(history.is_complete());
        assert!(matches!(history.leading, GapOutcome::Filled { rows: 0, .. }));
        // Nothing to persist
        assert_eq!(sut.store().insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_write_failure_still_returns_fetched_rows() {
        let store = MockStore {
            fail_inserts: true,
            ..MockStore::default()
        };
        let sut = assembler(store, MockFeed::default());

        let history = sut
            .get_history("AAPL", date!(2022 - 04 - 01), date!(2022 - 04 - 10))
            .await
            .unwrap();

        assert_eq!(history.records.len(), 6);
        assert!(matches!(
            history.leading,
            GapOutcome::Filled {
                rows: 6,
                persisted: false
            }
        ));
        assert!(history.is_complete());
    }

    #[tokio::test]
    async fn store_read_failure_is_fatal() {
        let store = MockStore {
            fail_reads: true,
            ..MockStore::default()
        };
        let sut = assembler(store, MockFeed::default());

        let result = sut
            .get_history("AAPL", date!(2022 - 04 - 01), date!(2022 - 04 - 10))
            .await;

        assert!(matches!(result, Err(HistoryError::Store(_))));
        assert!(sut.feed().calls().is_empty());
    }

    #[tokio::test]
    async fn results_are_sorted_and_free_of_duplicates() {
        let seeded = DateRange::new(date!(2022 - 04 - 05), date!(2022 - 04 - 06));
        let sut = assembler(MockStore::seeded(seeded), MockFeed::default());

        let history = sut
            .get_history("AAPL", date!(2022 - 04 - 01), date!(2022 - 04 - 08))
            .await
            .unwrap();

        let days = dates(&history);
        let mut sorted = days.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(days, sorted);
    }
}
