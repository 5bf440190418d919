mod api;
mod assembler;
mod error;
mod sqlite;

pub use api::*;
pub use assembler::{GapOutcome, HistoryAssembler, StockHistory};
pub use error::HistoryError;
pub use sqlite::SqlitePriceStore;

use common::config::Config;
use rest::PolygonRestApi;

pub type LocalAssembler = HistoryAssembler<SqlitePriceStore, PolygonRestApi>;

/// Opens (creating if necessary) the price store configured on disk.
pub async fn init_local_store() -> anyhow::Result<SqlitePriceStore> {
    SqlitePriceStore::new(&Config::get().store.database_file)
        .await
        .map_err(Into::into)
}

/// Wires the configured store and feed into a ready-to-use assembler.
pub async fn init_assembler() -> anyhow::Result<LocalAssembler> {
    let store = init_local_store().await?;
    let feed = PolygonRestApi::connect().await?;
    Ok(HistoryAssembler::new(store, feed))
}
