use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use duckdb::{params, params_from_iter, Connection, Row, ToSql};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{from_millis, Store};
use crate::ingest::columns::{METRIC_COUNT, METRIC_NAMES};
use crate::ingest::{NormalizedBatch, NormalizedRow};
use crate::model::{ListingInfo, ListingSnapshot, Metrics};

const LISTING_COLUMNS: &str =
    "l.item_id, l.title, l.category, l.promoted_status, l.start_date_ms, l.product_id";

/// `s.period, s.batch_id, s.<metric>...`
static SNAPSHOT_COLUMNS: Lazy<String> = Lazy::new(|| {
    let metrics: Vec<String> = METRIC_NAMES.iter().map(|c| format!("s.{}", c)).collect();
    format!("s.period, s.batch_id, {}", metrics.join(", "))
});

/// Applies `staged_snapshots` onto the snapshots they replace.
static APPLY_STAGED_SNAPSHOTS: Lazy<String> = Lazy::new(|| {
    let sets: Vec<String> = METRIC_NAMES.iter().map(|c| format!("{c} = s.{c}")).collect();
    format!(
        "UPDATE snapshots SET batch_id = s.batch_id, {}
         FROM staged_snapshots s
         WHERE snapshots.item_id = s.item_id AND snapshots.period = s.period",
        sets.join(", ")
    )
});

const APPLY_STAGED_LISTINGS: &str = "UPDATE listings SET title = s.title,
         category = s.category, promoted_status = s.promoted_status,
         start_date_ms = s.start_date_ms, last_seen_ms = ?
     FROM staged_listings s
     WHERE listings.item_id = s.item_id";

static SELECT_PERIOD_METRICS: Lazy<String> = Lazy::new(|| {
    format!(
        "SELECT item_id, {} FROM snapshots WHERE period = ?",
        METRIC_NAMES.join(", ")
    )
});

/// A listing row with bookkeeping columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingRecord {
    pub info: ListingInfo,
    pub product_id: Option<i64>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// What an import did to existing data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub batch_id: i64,
    pub listings_inserted: usize,
    pub listings_updated: usize,
    pub listings_unchanged: usize,
    pub snapshots_inserted: usize,
    pub snapshots_updated: usize,
    pub snapshots_unchanged: usize,
}

fn metrics_from_row(row: &Row<'_>, offset: usize) -> duckdb::Result<Metrics> {
    let mut values = [0.0; METRIC_COUNT];
    for (i, slot) in values.iter_mut().enumerate() {
        *slot = row.get(offset + i)?;
    }
    Ok(Metrics::from_array(values))
}

fn listing_from_row(row: &Row<'_>) -> duckdb::Result<(ListingInfo, Option<i64>)> {
    Ok((
        ListingInfo {
            item_id: row.get(0)?,
            title: row.get(1)?,
            category: row.get(2)?,
            promoted_status: row.get(3)?,
            start_date: from_millis(row.get(4)?),
        },
        row.get(5)?,
    ))
}

/// Expects `LISTING_COLUMNS` followed by `SNAPSHOT_COLUMNS`.
fn snapshot_from_row(row: &Row<'_>) -> duckdb::Result<ListingSnapshot> {
    let (listing, product_id) = listing_from_row(row)?;
    Ok(ListingSnapshot {
        listing,
        product_id,
        period: row.get(6)?,
        batch_id: row.get(7)?,
        metrics: metrics_from_row(row, 8)?,
    })
}

/// Every stored listing, keyed by item ID.
fn stored_listings(conn: &Connection) -> Result<HashMap<String, ListingInfo>> {
    let sql = format!("SELECT {} FROM listings l", LISTING_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let listings = stmt
        .query_map([], listing_from_row)?
        .map(|r| r.map(|(info, _)| (info.item_id.clone(), info)))
        .collect::<duckdb::Result<HashMap<_, _>>>()?;
    Ok(listings)
}

/// Stored metrics of one period, keyed by item ID.
fn stored_metrics(conn: &Connection, period: &str) -> Result<HashMap<String, Metrics>> {
    let mut stmt = conn.prepare(&SELECT_PERIOD_METRICS)?;
    let metrics = stmt
        .query_map(params![period], |r| {
            Ok((r.get::<_, String>(0)?, metrics_from_row(r, 1)?))
        })?
        .collect::<duckdb::Result<HashMap<_, _>>>()?;
    Ok(metrics)
}

/// Listing attributes differ in a way worth writing. Start dates compare at
/// the millisecond precision they are stored with.
fn listing_changed(stored: &ListingInfo, incoming: &ListingInfo) -> bool {
    stored.title != incoming.title
        || stored.category != incoming.category
        || stored.promoted_status != incoming.promoted_status
        || stored.start_date.timestamp_millis() != incoming.start_date.timestamp_millis()
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Decide what to do with an incoming listing. Stored listings come back
/// with the attributes to write over them.
fn reconcile_listing(
    stored: Option<&ListingInfo>,
    row: &NormalizedRow,
) -> (Outcome, Option<ListingInfo>) {
    let Some(stored) = stored else {
        return (Outcome::Inserted, None);
    };
    // a fallback date never overwrites a known one
    let mut merged = row.listing.clone();
    if row.start_date_fallback {
        merged.start_date = stored.start_date;
    }
    let outcome = if listing_changed(stored, &merged) {
        Outcome::Updated
    } else {
        Outcome::Unchanged
    };
    (outcome, Some(merged))
}

fn reconcile_snapshot(stored: Option<&Metrics>, incoming: &Metrics) -> Outcome {
    match stored {
        None => Outcome::Inserted,
        Some(stored) if stored == incoming => Outcome::Unchanged,
        Some(_) => Outcome::Updated,
    }
}

impl Store {
    /// Persist a normalized batch for `period` in one transaction, reconciling
    /// against what is already stored: new listings and snapshots are
    /// inserted, changed ones updated, identical ones left alone.
    ///
    /// Item IDs are unique within a normalized batch. New rows are appended
    /// directly; rows replacing stored ones are appended to the staging
    /// tables and applied with one `UPDATE .. FROM` per table.
    #[tracing::instrument(skip(self, batch, now), fields(rows = batch.rows.len()))]
    pub fn import_batch(
        &mut self,
        upload_name: &str,
        period: &str,
        batch: &NormalizedBatch,
        now: DateTime<Utc>,
    ) -> Result<ReconcileSummary> {
        let now_ms = now.timestamp_millis();
        let tx = self.conn.transaction()?;

        let batch_id: i64 = tx
            .query_row(
                "INSERT INTO import_batches
                     (upload_name, period, imported_ms, rows_total, rows_imported, rows_skipped)
                 VALUES (?, ?, ?, ?, ?, ?)
                 RETURNING id",
                params![
                    upload_name,
                    period,
                    now_ms,
                    batch.total_rows() as i64,
                    batch.rows.len() as i64,
                    batch.skipped_count() as i64
                ],
                |r| r.get(0),
            )
            .context("recording import batch")?;

        let known_listings = stored_listings(&tx).context("loading stored listings")?;
        let known_metrics = stored_metrics(&tx, period)
            .with_context(|| format!("loading snapshots for {}", period))?;
        debug!(
            listings = known_listings.len(),
            snapshots = known_metrics.len(),
            "loaded existing rows"
        );

        let mut summary = ReconcileSummary {
            batch_id,
            ..Default::default()
        };

        {
            let mut listings = tx.appender("listings")?;
            let mut staged_listings = tx.appender("staged_listings")?;
            let mut snapshots = tx.appender("snapshots")?;
            let mut staged_snapshots = tx.appender("staged_snapshots")?;

            for row in &batch.rows {
                let item_id = row.listing.item_id.as_str();
                match reconcile_listing(known_listings.get(item_id), row) {
                    (Outcome::Inserted, _) => {
                        summary.listings_inserted += 1;
                        let l = &row.listing;
                        listings.append_row(params![
                            l.item_id,
                            l.title,
                            l.category,
                            l.promoted_status,
                            l.start_date.timestamp_millis(),
                            None::<i64>,
                            now_ms,
                            now_ms
                        ])?;
                    }
                    (outcome, merged) => {
                        if outcome == Outcome::Updated {
                            summary.listings_updated += 1;
                        } else {
                            summary.listings_unchanged += 1;
                        }
                        // unchanged listings are staged too, for last_seen
                        if let Some(m) = merged {
                            staged_listings.append_row(params![
                                m.item_id,
                                m.title,
                                m.category,
                                m.promoted_status,
                                m.start_date.timestamp_millis()
                            ])?;
                        }
                    }
                }

                let values = row.metrics.to_array();
                let mut args: Vec<&dyn ToSql> = vec![&row.listing.item_id, &period, &batch_id];
                args.extend(values.iter().map(|v| v as &dyn ToSql));
                match reconcile_snapshot(known_metrics.get(item_id), &row.metrics) {
                    Outcome::Inserted => {
                        summary.snapshots_inserted += 1;
                        snapshots.append_row(args.as_slice())?;
                    }
                    Outcome::Updated => {
                        summary.snapshots_updated += 1;
                        staged_snapshots.append_row(args.as_slice())?;
                    }
                    Outcome::Unchanged => summary.snapshots_unchanged += 1,
                }
            }

            listings.flush().context("appending listings")?;
            staged_listings.flush().context("staging listings")?;
            snapshots.flush().context("appending snapshots")?;
            staged_snapshots.flush().context("staging snapshots")?;
        }

        let touched = tx
            .execute(APPLY_STAGED_LISTINGS, params![now_ms])
            .context("updating stored listings")?;
        let replaced = tx
            .execute(&APPLY_STAGED_SNAPSHOTS, [])
            .context("updating stored snapshots")?;
        tx.execute_batch("DELETE FROM staged_listings; DELETE FROM staged_snapshots;")
            .context("clearing staged rows")?;
        debug!(touched, replaced, "applied staged rows");

        tx.commit().context("committing import")?;
        info!(?summary, "import reconciled");
        Ok(summary)
    }

    /// Distinct report periods, oldest first.
    pub fn periods(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT period FROM snapshots ORDER BY period")?;
        let periods = stmt
            .query_map([], |r| r.get(0))?
            .collect::<duckdb::Result<Vec<String>>>()?;
        Ok(periods)
    }

    pub fn latest_period(&self) -> Result<Option<String>> {
        let latest = self
            .conn
            .query_row("SELECT MAX(period) FROM snapshots", [], |r| r.get(0))?;
        Ok(latest)
    }

    fn query_snapshots(&self, filter: &str, args: &[&dyn ToSql]) -> Result<Vec<ListingSnapshot>> {
        let sql = format!(
            "SELECT {}, {} FROM snapshots s JOIN listings l ON l.item_id = s.item_id {} \
             ORDER BY s.period, s.item_id",
            LISTING_COLUMNS, *SNAPSHOT_COLUMNS, filter
        );
        debug!(%sql, "querying snapshots");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), snapshot_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every listing's snapshot for one period.
    pub fn snapshots_for_period(&self, period: &str) -> Result<Vec<ListingSnapshot>> {
        self.query_snapshots("WHERE s.period = ?", &[&period])
    }

    /// All snapshots, ordered by period then item ID.
    pub fn all_snapshots(&self) -> Result<Vec<ListingSnapshot>> {
        self.query_snapshots("", &[])
    }

    /// One listing's snapshots, oldest period first.
    pub fn listing_history(&self, item_id: &str) -> Result<Vec<ListingSnapshot>> {
        self.query_snapshots("WHERE s.item_id = ?", &[&item_id])
    }

    fn query_listings(&self, filter: &str, args: &[&dyn ToSql]) -> Result<Vec<ListingRecord>> {
        let sql = format!(
            "SELECT {}, l.first_seen_ms, l.last_seen_ms FROM listings l {} \
             ORDER BY l.title, l.item_id",
            LISTING_COLUMNS, filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |r| {
                let (info, product_id) = listing_from_row(r)?;
                Ok(ListingRecord {
                    info,
                    product_id,
                    first_seen: from_millis(r.get(6)?),
                    last_seen: from_millis(r.get(7)?),
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All listings ordered by title.
    pub fn listings(&self) -> Result<Vec<ListingRecord>> {
        self.query_listings("", &[])
    }

    pub fn listing(&self, item_id: &str) -> Result<Option<ListingRecord>> {
        Ok(self
            .query_listings("WHERE l.item_id = ?", &[&item_id])?
            .into_iter()
            .next())
    }
}
