use serde::Serialize;

use super::Totals;
use crate::model::ListingSnapshot;
use crate::store::Product;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSummary {
    pub product: Product,
    /// Totals over member listings that have a snapshot in the period
    pub totals: Totals,
}

/// Aggregate each product's member listings within one period's snapshots.
pub fn summarize(products: Vec<Product>, snaps: &[ListingSnapshot]) -> Vec<ProductSummary> {
    products
        .into_iter()
        .map(|product| {
            let totals =
                Totals::from_snapshots(snaps.iter().filter(|s| s.product_id == Some(product.id)));
            ProductSummary { product, totals }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::snap;
    use super::*;
    use chrono::{TimeZone, Utc};

    fn product(id: i64, name: &str) -> Product {
        Product {
            id,
            name: name.into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            members: 0,
        }
    }

    #[test]
    fn sums_member_snapshots_only() {
        let mut snaps = vec![
            snap("1", "p", 100.0, 10.0, 1.0),
            snap("2", "p", 300.0, 30.0, 6.0),
            snap("3", "p", 999.0, 99.0, 9.0),
        ];
        snaps[0].product_id = Some(1);
        snaps[1].product_id = Some(1);
        snaps[2].product_id = Some(2);

        let out = summarize(
            vec![
                product(1, "Kites"),
                product(2, "Balls"),
                product(3, "Empty"),
            ],
            &snaps,
        );
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].totals.listings, 2);
        assert_eq!(out[0].totals.impressions, 400.0);
        assert!((out[0].totals.conversion - 7.0 / 40.0).abs() < 1e-12);
        assert_eq!(out[1].totals.sold, 9.0);
        assert_eq!(out[2].totals, Totals::default());
    }
}
