use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use duckdb::params;
use serde::Serialize;
use tracing::{info, warn};

use super::{from_millis, Store};

/// A user-defined group of listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub members: i64,
}

const PRODUCT_SELECT: &str = "SELECT p.id, p.name, p.created_ms,
        (SELECT COUNT(*) FROM listings l WHERE l.product_id = p.id)
    FROM products p";

impl Store {
    fn product_name_taken(&self, name: &str, except: Option<i64>) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM products WHERE lower(name) = lower(?) AND id <> ?",
            params![name, except.unwrap_or(-1)],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    fn require_product(&self, id: i64) -> Result<Product> {
        match self.product(id)? {
            Some(p) => Ok(p),
            None => bail!("no product with id {}", id),
        }
    }

    /// Create a product; names are unique ignoring case.
    pub fn create_product(&mut self, name: &str, now: DateTime<Utc>) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            bail!("product name must not be empty");
        }
        if self.product_name_taken(name, None)? {
            bail!("a product named {:?} already exists", name);
        }
        let id: i64 = self
            .conn
            .query_row(
                "INSERT INTO products (name, created_ms) VALUES (?, ?) RETURNING id",
                params![name, now.timestamp_millis()],
                |r| r.get(0),
            )
            .context("inserting product")?;
        info!(id, name, "created product");
        Ok(id)
    }

    pub fn rename_product(&mut self, id: i64, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            bail!("product name must not be empty");
        }
        self.require_product(id)?;
        if self.product_name_taken(name, Some(id))? {
            bail!("a product named {:?} already exists", name);
        }
        self.conn.execute(
            "UPDATE products SET name = ? WHERE id = ?",
            params![name, id],
        )?;
        Ok(())
    }

    /// Delete a product; its listings become unmapped.
    pub fn delete_product(&mut self, id: i64) -> Result<()> {
        self.require_product(id)?;
        let tx = self.conn.transaction()?;
        let released = tx.execute(
            "UPDATE listings SET product_id = NULL WHERE product_id = ?",
            params![id],
        )?;
        tx.execute("DELETE FROM products WHERE id = ?", params![id])?;
        tx.commit()?;
        info!(id, released, "deleted product");
        Ok(())
    }

    /// All products by name.
    pub fn products(&self) -> Result<Vec<Product>> {
        let sql = format!("{} ORDER BY lower(p.name)", PRODUCT_SELECT);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], product_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn product(&self, id: i64) -> Result<Option<Product>> {
        let sql = format!("{} WHERE p.id = ?", PRODUCT_SELECT);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], product_from_row)?;
        Ok(rows.next().transpose()?)
    }

    /// Map listings onto a product, moving them from any previous product.
    /// Fails without changes if any item ID is unknown.
    pub fn assign(&mut self, product_id: i64, item_ids: &[String]) -> Result<usize> {
        self.require_product(product_id)?;
        let tx = self.conn.transaction()?;
        let mut missing = Vec::new();
        let mut assigned = 0;
        for item_id in item_ids {
            let n = tx.execute(
                "UPDATE listings SET product_id = ? WHERE item_id = ?",
                params![product_id, item_id],
            )?;
            if n == 0 {
                missing.push(item_id.as_str());
            }
            assigned += n;
        }
        if !missing.is_empty() {
            warn!(?missing, "unknown listings; nothing assigned");
            bail!("unknown item IDs: {}", missing.join(", "));
        }
        tx.commit()?;
        info!(product_id, assigned, "assigned listings");
        Ok(assigned)
    }

    /// Clear the product mapping of the given listings.
    pub fn unassign(&mut self, item_ids: &[String]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut released = 0;
        for item_id in item_ids {
            released += tx.execute(
                "UPDATE listings SET product_id = NULL
                 WHERE item_id = ? AND product_id IS NOT NULL",
                params![item_id],
            )?;
        }
        tx.commit()?;
        Ok(released)
    }
}

fn product_from_row(r: &duckdb::Row<'_>) -> duckdb::Result<Product> {
    Ok(Product {
        id: r.get(0)?,
        name: r.get(1)?,
        created_at: from_millis(r.get(2)?),
        members: r.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{import, now};
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn create_rename_delete() {
        let mut store = Store::open_in_memory().unwrap();
        let kites = store.create_product("Kites", now()).unwrap();
        assert!(store.create_product("kites", now()).is_err());
        assert!(store.create_product("   ", now()).is_err());

        let balls = store.create_product("Balls", now()).unwrap();
        let names: Vec<String> = store
            .products()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Balls", "Kites"]);

        assert!(store.rename_product(balls, "KITES").is_err());
        store.rename_product(balls, "Spheres").unwrap();
        // renaming to its own name is fine
        store.rename_product(kites, "Kites").unwrap();
        assert_eq!(store.product(balls).unwrap().unwrap().name, "Spheres");

        store.delete_product(kites).unwrap();
        assert!(store.product(kites).unwrap().is_none());
        assert!(store.delete_product(kites).is_err());
    }

    #[test]
    fn assign_and_unassign_listings() {
        let mut store = Store::open_in_memory().unwrap();
        import(
            &mut store,
            "a.csv",
            "2024-05-01",
            &[
                ("1", "Kite", 1, 1),
                ("2", "Yoyo", 1, 1),
                ("3", "Ball", 1, 1),
            ],
        );
        let toys = store.create_product("Toys", now()).unwrap();

        assert_eq!(store.assign(toys, &ids(&["1", "2"])).unwrap(), 2);
        assert_eq!(store.product(toys).unwrap().unwrap().members, 2);
        assert_eq!(store.listing("1").unwrap().unwrap().product_id, Some(toys));

        // unknown IDs roll the whole call back
        assert!(store.assign(toys, &ids(&["3", "999"])).is_err());
        assert_eq!(store.listing("3").unwrap().unwrap().product_id, None);

        assert!(store.assign(12345, &ids(&["3"])).is_err());

        assert_eq!(store.unassign(&ids(&["1", "3"])).unwrap(), 1);
        assert_eq!(store.product(toys).unwrap().unwrap().members, 1);

        store.delete_product(toys).unwrap();
        assert_eq!(store.listing("2").unwrap().unwrap().product_id, None);
    }
}
