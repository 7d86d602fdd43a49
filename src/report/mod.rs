//! Read-side computations over stored snapshots. Everything here is pure;
//! the CLI loads data from the store and hands it in.

pub mod dashboard;
pub mod league;
pub mod listings;
pub mod products;
pub mod render;

use serde::Serialize;

use crate::model::ListingSnapshot;

/// Sums and traffic-weighted rates over a set of snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub listings: usize,
    pub impressions: f64,
    pub page_views: f64,
    pub sold: f64,
    pub sales: f64,
    /// page views / impressions
    pub ctr: f64,
    /// sold / page views
    pub conversion: f64,
    /// unweighted mean of the listings' reported CTR
    pub mean_ctr: f64,
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

impl Totals {
    pub fn from_snapshots<'a>(snaps: impl IntoIterator<Item = &'a ListingSnapshot>) -> Self {
        let mut t = Totals::default();
        let mut ctr_sum = 0.0;
        for s in snaps {
            let m = &s.metrics;
            t.listings += 1;
            t.impressions += m.total_impressions;
            t.page_views += m.total_page_views;
            t.sold += m.quantity_sold;
            t.sales += m.total_sales;
            ctr_sum += m.ctr;
        }
        t.ctr = ratio(t.page_views, t.impressions);
        t.conversion = ratio(t.sold, t.page_views);
        t.mean_ctr = ratio(ctr_sum, t.listings as f64);
        t
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};

    use crate::model::{ListingInfo, ListingSnapshot, Metrics};

    pub fn snap(
        item_id: &str,
        period: &str,
        impressions: f64,
        page_views: f64,
        sold: f64,
    ) -> ListingSnapshot {
        ListingSnapshot {
            listing: ListingInfo {
                item_id: item_id.to_string(),
                title: format!("Listing {}", item_id),
                category: "Toys".to_string(),
                promoted_status: "Promoted".to_string(),
                start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            },
            product_id: None,
            period: period.to_string(),
            batch_id: 1,
            metrics: Metrics {
                total_impressions: impressions,
                total_page_views: page_views,
                quantity_sold: sold,
                ctr: if impressions > 0.0 { page_views / impressions } else { 0.0 },
                conversion_rate: if page_views > 0.0 { sold / page_views } else { 0.0 },
                total_sales: sold * 10.0,
                ..Default::default()
            },
        }
    }
}
