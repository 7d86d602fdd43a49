use serde::Serialize;
use std::collections::HashMap;

use crate::model::{ListingSnapshot, Metrics};
use crate::store::{ListingRecord, Product};

#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub search: Option<String>,
    pub product_id: Option<i64>,
    pub unmapped_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingRow {
    pub record: ListingRecord,
    pub product_name: Option<String>,
}

fn product_names(products: &[Product]) -> HashMap<i64, &str> {
    products.iter().map(|p| (p.id, p.name.as_str())).collect()
}

/// Listings matching `filter`, annotated with their product's name.
pub fn filter_listings(
    records: Vec<ListingRecord>,
    products: &[Product],
    filter: &ListingFilter,
) -> Vec<ListingRow> {
    let names = product_names(products);
    let needle = filter.search.as_ref().map(|s| s.to_lowercase());
    records
        .into_iter()
        .filter(|r| !filter.unmapped_only || r.product_id.is_none())
        .filter(|r| filter.product_id.is_none() || r.product_id == filter.product_id)
        .filter(|r| match &needle {
            Some(n) => {
                r.info.title.to_lowercase().contains(n) || r.info.item_id.contains(n.as_str())
            }
            None => true,
        })
        .map(|record| {
            let product_name = record
                .product_id
                .and_then(|id| names.get(&id))
                .map(|n| n.to_string());
            ListingRow {
                record,
                product_name,
            }
        })
        .collect()
}

/// Difference of the headline metrics against the previous period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricChange {
    pub impressions: f64,
    pub page_views: f64,
    pub ctr: f64,
    pub sold: f64,
    pub sales: f64,
}

impl MetricChange {
    fn between(prev: &Metrics, cur: &Metrics) -> Self {
        Self {
            impressions: cur.total_impressions - prev.total_impressions,
            page_views: cur.total_page_views - prev.total_page_views,
            ctr: cur.ctr - prev.ctr,
            sold: cur.quantity_sold - prev.quantity_sold,
            sales: cur.total_sales - prev.total_sales,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub period: String,
    pub batch_id: i64,
    pub metrics: Metrics,
    pub change: Option<MetricChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingDetail {
    pub record: ListingRecord,
    pub product_name: Option<String>,
    pub history: Vec<HistoryPoint>,
}

/// Per-listing view: attributes, product, and snapshot history with
/// period-over-period change. `history` must be ordered oldest first.
pub fn listing_detail(
    record: ListingRecord,
    products: &[Product],
    history: &[ListingSnapshot],
) -> ListingDetail {
    let product_name = record
        .product_id
        .and_then(|id| products.iter().find(|p| p.id == id))
        .map(|p| p.name.clone());

    let mut points = Vec::with_capacity(history.len());
    let mut prev: Option<&Metrics> = None;
    for s in history {
        points.push(HistoryPoint {
            period: s.period.clone(),
            batch_id: s.batch_id,
            metrics: s.metrics,
            change: prev.map(|p| MetricChange::between(p, &s.metrics)),
        });
        prev = Some(&s.metrics);
    }

    ListingDetail {
        record,
        product_name,
        history: points,
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::snap;
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(item_id: &str, title: &str, product_id: Option<i64>) -> ListingRecord {
        let s = snap(item_id, "p", 0.0, 0.0, 0.0);
        let mut info = s.listing;
        info.title = title.to_string();
        ListingRecord {
            info,
            product_id,
            first_seen: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            last_seen: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        }
    }

    fn products() -> Vec<Product> {
        vec![Product {
            id: 3,
            name: "Kites".into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            members: 1,
        }]
    }

    fn records() -> Vec<ListingRecord> {
        vec![
            record("100", "Red Kite", Some(3)),
            record("200", "Yoyo", None),
            record("300", "Kite string", None),
        ]
    }

    #[test]
    fn filters_and_names_products() {
        let all = filter_listings(records(), &products(), &ListingFilter::default());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].product_name.as_deref(), Some("Kites"));
        assert_eq!(all[1].product_name, None);

        let unmapped = filter_listings(
            records(),
            &products(),
            &ListingFilter {
                unmapped_only: true,
                ..Default::default()
            },
        );
        assert_eq!(unmapped.len(), 2);

        let kites = filter_listings(
            records(),
            &products(),
            &ListingFilter {
                search: Some("kite".into()),
                ..Default::default()
            },
        );
        assert_eq!(kites.len(), 2);

        let by_id = filter_listings(
            records(),
            &products(),
            &ListingFilter {
                search: Some("20".into()),
                ..Default::default()
            },
        );
        assert_eq!(by_id.len(), 1);

        let in_product = filter_listings(
            records(),
            &products(),
            &ListingFilter {
                product_id: Some(3),
                ..Default::default()
            },
        );
        assert_eq!(in_product.len(), 1);
        assert_eq!(in_product[0].record.info.item_id, "100");
    }

    #[test]
    fn detail_computes_changes_between_periods() {
        let history = vec![
            snap("100", "2024-05-01", 100.0, 10.0, 1.0),
            snap("100", "2024-06-01", 150.0, 12.0, 3.0),
        ];
        let detail = listing_detail(record("100", "Red Kite", Some(3)), &products(), &history);
        assert_eq!(detail.product_name.as_deref(), Some("Kites"));
        assert_eq!(detail.history.len(), 2);
        assert!(detail.history[0].change.is_none());
        let change = detail.history[1].change.unwrap();
        assert_eq!(change.impressions, 50.0);
        assert_eq!(change.page_views, 2.0);
        assert_eq!(change.sold, 2.0);
        assert_eq!(change.sales, 20.0);
    }
}
