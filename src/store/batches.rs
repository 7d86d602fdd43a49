use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use duckdb::params;
use serde::Serialize;
use tracing::info;

use super::{from_millis, Store};

/// One recorded upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRecord {
    pub id: i64,
    pub upload_name: String,
    pub period: String,
    pub imported_at: DateTime<Utc>,
    pub rows_total: i64,
    pub rows_imported: i64,
    pub rows_skipped: i64,
    /// Snapshots whose current values came from this batch
    pub snapshots: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub snapshots_removed: usize,
    pub listings_removed: usize,
}

impl Store {
    /// Whether an upload with this name has been imported before.
    pub fn has_upload(&self, upload_name: &str) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM import_batches WHERE upload_name = ?",
            params![upload_name],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// All import batches, newest first.
    pub fn batches(&self) -> Result<Vec<BatchRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.id, b.upload_name, b.period, b.imported_ms,
                    b.rows_total, b.rows_imported, b.rows_skipped,
                    (SELECT COUNT(*) FROM snapshots s WHERE s.batch_id = b.id)
             FROM import_batches b
             ORDER BY b.id DESC",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(BatchRecord {
                    id: r.get(0)?,
                    upload_name: r.get(1)?,
                    period: r.get(2)?,
                    imported_at: from_millis(r.get(3)?),
                    rows_total: r.get(4)?,
                    rows_imported: r.get(5)?,
                    rows_skipped: r.get(6)?,
                    snapshots: r.get(7)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Remove a batch and the snapshots it currently owns. Listings left with
    /// no snapshots and no product are removed too.
    pub fn delete_batch(&mut self, batch_id: i64) -> Result<DeleteSummary> {
        let tx = self.conn.transaction()?;
        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM import_batches WHERE id = ?",
            params![batch_id],
            |r| r.get(0),
        )?;
        if exists == 0 {
            bail!("no import batch with id {}", batch_id);
        }

        let snapshots_removed = tx.execute(
            "DELETE FROM snapshots WHERE batch_id = ?",
            params![batch_id],
        )?;
        let listings_removed = tx.execute(
            "DELETE FROM listings
             WHERE product_id IS NULL
               AND item_id NOT IN (SELECT DISTINCT item_id FROM snapshots)",
            [],
        )?;
        tx.execute("DELETE FROM import_batches WHERE id = ?", params![batch_id])?;
        tx.commit()?;

        let summary = DeleteSummary {
            snapshots_removed,
            listings_removed,
        };
        info!(batch_id, ?summary, "deleted import batch");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{import, now};
    use super::*;

    #[test]
    fn batches_are_listed_newest_first_with_counts() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(!store.has_upload("a.csv").unwrap());
        import(&mut store, "a.csv", "2024-05-01", &[("1", "Kite", 1, 1)]);
        import(
            &mut store,
            "b.csv",
            "2024-06-01",
            &[("1", "Kite", 2, 1), ("2", "Yoyo", 3, 1)],
        );
        assert!(store.has_upload("a.csv").unwrap());

        let batches = store.batches().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].upload_name, "b.csv");
        assert_eq!(batches[0].rows_imported, 2);
        assert_eq!(batches[0].snapshots, 2);
        assert_eq!(batches[1].period, "2024-05-01");
        assert_eq!(batches[1].rows_total, 1);
    }

    #[test]
    fn deleting_a_batch_removes_its_snapshots_and_orphans() {
        let mut store = Store::open_in_memory().unwrap();
        let first = import(&mut store, "a.csv", "2024-05-01", &[("1", "Kite", 1, 1)]);
        import(
            &mut store,
            "b.csv",
            "2024-06-01",
            &[("2", "Yoyo", 3, 1), ("3", "Ball", 4, 1)],
        );
        let p = store.create_product("Balls", now()).unwrap();
        store.assign(p, &["3".to_string()]).unwrap();

        let second_id = store.batches().unwrap()[0].id;
        let summary = store.delete_batch(second_id).unwrap();
        assert_eq!(summary.snapshots_removed, 2);
        // listing 3 belongs to a product and survives
        assert_eq!(summary.listings_removed, 1);
        assert!(store.listing("2").unwrap().is_none());
        assert!(store.listing("3").unwrap().is_some());

        assert_eq!(store.periods().unwrap(), vec!["2024-05-01"]);
        assert_eq!(store.batches().unwrap().len(), 1);
        assert_eq!(store.batches().unwrap()[0].id, first.batch_id);
    }

    #[test]
    fn deleting_unknown_batch_fails() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store.delete_batch(42).unwrap_err();
        assert!(err.to_string().contains("42"));
    }
}
