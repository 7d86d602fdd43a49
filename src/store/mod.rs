//! DuckDB-backed persistence for listings, metric snapshots, import batches
//! and products.

pub mod batches;
pub mod export;
pub mod listings;
pub mod products;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use duckdb::Connection;
use once_cell::sync::Lazy;
use std::{fs, path::Path};
use tracing::{debug, info};

use crate::ingest::columns::METRIC_NAMES;

pub use batches::{BatchRecord, DeleteSummary};
pub use listings::{ListingRecord, ReconcileSummary};
pub use products::Product;

static METRIC_COLUMNS_DDL: Lazy<String> = Lazy::new(|| {
    METRIC_NAMES
        .iter()
        .map(|c| format!("    {} DOUBLE NOT NULL", c))
        .collect::<Vec<_>>()
        .join(",\n")
});

fn schema_sql() -> String {
    format!(
        "CREATE SEQUENCE IF NOT EXISTS seq_import_batches START 1;
        CREATE SEQUENCE IF NOT EXISTS seq_products START 1;

        CREATE TABLE IF NOT EXISTS import_batches (
            id BIGINT PRIMARY KEY DEFAULT nextval('seq_import_batches'),
            upload_name VARCHAR NOT NULL,
            period VARCHAR NOT NULL,
            imported_ms BIGINT NOT NULL,
            rows_total BIGINT NOT NULL,
            rows_imported BIGINT NOT NULL,
            rows_skipped BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS products (
            id BIGINT PRIMARY KEY DEFAULT nextval('seq_products'),
            name VARCHAR NOT NULL,
            created_ms BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS listings (
            item_id VARCHAR PRIMARY KEY,
            title VARCHAR NOT NULL,
            category VARCHAR NOT NULL,
            promoted_status VARCHAR NOT NULL,
            start_date_ms BIGINT NOT NULL,
            product_id BIGINT,
            first_seen_ms BIGINT NOT NULL,
            last_seen_ms BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snapshots (
            item_id VARCHAR NOT NULL,
            period VARCHAR NOT NULL,
            batch_id BIGINT NOT NULL,
{metrics}
        );

        -- rows waiting to be applied by an import; always empty outside one
        CREATE TABLE IF NOT EXISTS staged_listings (
            item_id VARCHAR NOT NULL,
            title VARCHAR NOT NULL,
            category VARCHAR NOT NULL,
            promoted_status VARCHAR NOT NULL,
            start_date_ms BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS staged_snapshots (
            item_id VARCHAR NOT NULL,
            period VARCHAR NOT NULL,
            batch_id BIGINT NOT NULL,
{metrics}
        );",
        metrics = *METRIC_COLUMNS_DDL
    )
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Handle to the analytics database.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open a DuckDB database on disk at `path`, creating the file (and its
    /// parent directory) if it doesn't exist.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("opening database {}", path.display()))?;
        info!(path = %path.display(), "opened database");
        Self::with_connection(conn)
    }

    /// Open a DuckDB in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(&schema_sql())
            .context("creating database schema")?;
        debug!("schema ready");
        Ok(Self { conn })
    }

    /// Drop every listing, snapshot, batch and product.
    pub fn purge(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM snapshots;
             DELETE FROM listings;
             DELETE FROM import_batches;
             DELETE FROM products;",
        )
        .context("purging tables")?;
        tx.commit()?;
        info!("purged all data");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::ingest::{fixtures, ingest_text};
    use chrono::TimeZone;

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    /// Import `rows` of `(item_id, title, impressions, page_views)` as one batch.
    pub fn import(
        store: &mut Store,
        upload: &str,
        period: &str,
        rows: &[(&str, &str, u32, u32)],
    ) -> ReconcileSummary {
        let lines: Vec<String> = rows
            .iter()
            .map(|(id, title, imp, pv)| fixtures::data_line(id, title, *imp, *pv))
            .collect();
        let batch = ingest_text(&fixtures::report(&lines), now()).unwrap();
        store.import_batch(upload, period, &batch, now()).unwrap()
    }
}
