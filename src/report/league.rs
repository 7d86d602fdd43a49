use serde::Serialize;
use std::cmp::Ordering;

use crate::model::{ListingSnapshot, Metric, Metrics};

/// Filters and ordering for a league table.
#[derive(Debug, Clone)]
pub struct LeagueQuery {
    pub metric: Metric,
    pub ascending: bool,
    pub limit: Option<usize>,
    /// Case-insensitive substring of the title
    pub search: Option<String>,
    /// Exact category, ignoring case
    pub category: Option<String>,
    pub product_id: Option<i64>,
    pub min_impressions: f64,
}

impl LeagueQuery {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            ascending: false,
            limit: None,
            search: None,
            category: None,
            product_id: None,
            min_impressions: 0.0,
        }
    }

    fn matches(&self, s: &ListingSnapshot) -> bool {
        if s.metrics.total_impressions < self.min_impressions {
            return false;
        }
        if let Some(pid) = self.product_id {
            if s.product_id != Some(pid) {
                return false;
            }
        }
        if let Some(cat) = &self.category {
            if !s.listing.category.eq_ignore_ascii_case(cat) {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            if !s
                .listing
                .title
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeagueEntry {
    /// 1-based, assigned after filtering
    pub rank: usize,
    pub item_id: String,
    pub title: String,
    pub category: String,
    pub product_id: Option<i64>,
    pub value: f64,
    pub metrics: Metrics,
}

/// Rank `snaps` by the query's metric. Ties are broken by item ID so the
/// order is stable across runs.
pub fn league_table(snaps: &[ListingSnapshot], q: &LeagueQuery) -> Vec<LeagueEntry> {
    let mut rows: Vec<(&ListingSnapshot, f64)> = snaps
        .iter()
        .filter(|s| q.matches(s))
        .map(|s| (s, q.metric.value(&s.metrics)))
        .collect();

    rows.sort_by(|(a, av), (b, bv)| {
        let by_value = if q.ascending {
            av.total_cmp(bv)
        } else {
            bv.total_cmp(av)
        };
        match by_value {
            Ordering::Equal => a.listing.item_id.cmp(&b.listing.item_id),
            other => other,
        }
    });

    rows.into_iter()
        .take(q.limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, (s, value))| LeagueEntry {
            rank: i + 1,
            item_id: s.listing.item_id.clone(),
            title: s.listing.title.clone(),
            category: s.listing.category.clone(),
            product_id: s.product_id,
            value,
            metrics: s.metrics,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::snap;
    use super::*;

    fn data() -> Vec<ListingSnapshot> {
        let mut d = vec![
            snap("a", "p", 1000.0, 10.0, 1.0), // ctr 0.01
            snap("b", "p", 100.0, 20.0, 2.0),  // ctr 0.2
            snap("c", "p", 400.0, 20.0, 0.0),  // ctr 0.05
            snap("d", "p", 50.0, 10.0, 1.0),   // ctr 0.2
        ];
        d[0].listing.title = "Red Kite".into();
        d[1].listing.title = "Blue kite".into();
        d[2].listing.category = "Garden".into();
        d[3].product_id = Some(7);
        d
    }

    fn ids(entries: &[LeagueEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.item_id.as_str()).collect()
    }

    #[test]
    fn ranks_descending_with_stable_ties() {
        let table = league_table(&data(), &LeagueQuery::new(Metric::Ctr));
        assert_eq!(ids(&table), vec!["b", "d", "c", "a"]);
        assert_eq!(table[0].rank, 1);
        assert_eq!(table[3].rank, 4);
        assert!((table[2].value - 0.05).abs() < 1e-12);
    }

    #[test]
    fn ascending_and_limit() {
        let mut q = LeagueQuery::new(Metric::Impressions);
        q.ascending = true;
        q.limit = Some(2);
        let table = league_table(&data(), &q);
        assert_eq!(ids(&table), vec!["d", "b"]);
    }

    #[test]
    fn filters_apply_before_ranking() {
        let mut q = LeagueQuery::new(Metric::PageViews);
        q.search = Some("KITE".into());
        assert_eq!(ids(&league_table(&data(), &q)), vec!["b", "a"]);

        let mut q = LeagueQuery::new(Metric::Sold);
        q.category = Some("garden".into());
        let table = league_table(&data(), &q);
        assert_eq!(ids(&table), vec!["c"]);
        assert_eq!(table[0].rank, 1);

        let mut q = LeagueQuery::new(Metric::Sold);
        q.product_id = Some(7);
        assert_eq!(ids(&league_table(&data(), &q)), vec!["d"]);

        let mut q = LeagueQuery::new(Metric::Ctr);
        q.min_impressions = 100.0;
        assert_eq!(ids(&league_table(&data(), &q)), vec!["b", "c", "a"]);
    }
}
