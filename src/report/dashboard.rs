use serde::Serialize;
use std::collections::BTreeMap;

use super::Totals;
use crate::model::ListingSnapshot;

/// One point of the per-period chart series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub period: String,
    pub totals: Totals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    /// `None` when nothing has been imported yet
    pub period: Option<String>,
    pub totals: Totals,
    /// The period before `period`, for comparison
    pub previous: Option<SeriesPoint>,
    pub series: Vec<SeriesPoint>,
}

/// Aggregate totals per period, oldest first.
pub fn series(all: &[ListingSnapshot]) -> Vec<SeriesPoint> {
    let mut by_period: BTreeMap<&str, Vec<&ListingSnapshot>> = BTreeMap::new();
    for s in all {
        by_period.entry(s.period.as_str()).or_default().push(s);
    }
    by_period
        .into_iter()
        .map(|(period, snaps)| SeriesPoint {
            period: period.to_string(),
            totals: Totals::from_snapshots(snaps),
        })
        .collect()
}

/// KPIs for `period` (default: the latest one) plus chart series across all
/// periods.
pub fn build(all: &[ListingSnapshot], period: Option<&str>) -> Dashboard {
    let series = series(all);
    let period = period
        .map(str::to_string)
        .or_else(|| series.last().map(|p| p.period.clone()));

    let Some(period) = period else {
        return Dashboard {
            period: None,
            totals: Totals::default(),
            previous: None,
            series,
        };
    };

    let idx = series.iter().position(|p| p.period == period);
    let totals = idx.map(|i| series[i].totals).unwrap_or_default();
    let previous = idx.filter(|&i| i > 0).map(|i| series[i - 1].clone());

    Dashboard {
        period: Some(period),
        totals,
        previous,
        series,
    }
}
