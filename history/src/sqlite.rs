use std::str::FromStr;

use async_trait::async_trait;
use common::util::{date_to_day, day_to_date};
use entity::{data::DailyPriceRecord, range::DateRange};
use futures::StreamExt;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Error as SqlxError,
};
use stock_symbol::Symbol;

use crate::api::PriceStore;

/// SQLite-backed `PriceStore`. Dates are stored as days since the Unix epoch
/// and `(ticker, pulldate)` is the primary key, so duplicate inserts are
/// ignored at the database level.
pub struct SqlitePriceStore {
    connection_pool: SqlitePool,
}

impl SqlitePriceStore {
    pub async fn new(database_file: &str) -> Result<Self, SqlxError> {
        let options = SqliteConnectOptions::from_str(database_file)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// Ephemeral store for tests and scratch work. The pool is pinned to one
    /// connection since every in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self, SqlxError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(connection_pool: SqlitePool) -> Result<Self, SqlxError> {
        sqlx::query(
            "
            CREATE TABLE IF NOT EXISTS stock_history (
                ticker varchar(8) NOT NULL,
                pulldate INT8 NOT NULL,
                open FLOAT NOT NULL,
                high FLOAT NOT NULL,
                low FLOAT NOT NULL,
                close FLOAT NOT NULL,
                average FLOAT NOT NULL,
                volume INT8 NOT NULL,
                PRIMARY KEY (ticker, pulldate)
            )
            ",
        )
        .execute(&connection_pool)
        .await?;

        Ok(Self { connection_pool })
    }

    async fn find_by_range(
        &self,
        ticker: Symbol,
        range: DateRange,
    ) -> anyhow::Result<Vec<DailyPriceRecord>> {
        let mut row_stream = sqlx::query_as::<_, (i64, f64, f64, f64, f64, f64, i64)>(
            "SELECT pulldate,open,high,low,close,average,volume \
             FROM stock_history WHERE ticker = ? AND pulldate >= ? AND pulldate <= ? \
             ORDER BY pulldate ASC",
        )
        .bind(ticker.as_str())
        .bind(date_to_day(range.start))
        .bind(date_to_day(range.end))
        .fetch(&self.connection_pool);

        let mut records = Vec::new();
        while let Some((pulldate, open, high, low, close, average, volume)) =
            row_stream.next().await.transpose()?
        {
            records.push(DailyPriceRecord {
                ticker,
                date: day_to_date(pulldate)?,
                open,
                high,
                low,
                close,
                average,
                volume: u64::try_from(volume)?,
            });
        }

        Ok(records)
    }

    async fn insert_many(&self, records: &[DailyPriceRecord]) -> anyhow::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut transaction = self.connection_pool.begin().await?;
        let mut inserted = 0;

        for record in records {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO stock_history \
                 (ticker,pulldate,open,high,low,close,average,volume) \
                 VALUES (?,?,?,?,?,?,?,?)",
            )
            .bind(record.ticker.as_str())
            .bind(date_to_day(record.date))
            .bind(record.open)
            .bind(record.high)
            .bind(record.low)
            .bind(record.close)
            .bind(record.average)
            .bind(i64::try_from(record.volume)?)
            .execute(&mut *transaction)
            .await?;

            inserted += result.rows_affected();
        }

        transaction.commit().await?;
        Ok(inserted)
    }
}

#[async_trait]
impl PriceStore for SqlitePriceStore {
    async fn find_by_range(
        &self,
        ticker: Symbol,
        range: DateRange,
    ) -> anyhow::Result<Vec<DailyPriceRecord>> {
        SqlitePriceStore::find_by_range(self, ticker, range).await
    }

    async fn insert_many(&self, records: &[DailyPriceRecord]) -> anyhow::Result<u64> {
        SqlitePriceStore::insert_many(self, records).await
    }
}
