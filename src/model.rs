use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::ingest::columns::METRIC_COUNT;

/// Descriptive attributes of a listing, as of its latest upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingInfo {
    pub item_id: String,
    pub title: String,
    pub category: String,
    pub promoted_status: String,
    pub start_date: DateTime<Utc>,
}

/// Every numeric column of a traffic report. Percentages are fractions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub quantity_available: f64,
    pub total_impressions: f64,
    pub ctr: f64,
    pub quantity_sold: f64,
    pub top20_search_share: f64,
    pub conversion_rate: f64,
    pub top20_promoted_impressions: f64,
    pub top20_promoted_change: f64,
    pub top20_organic_impressions: f64,
    pub top20_organic_change: f64,
    pub rest_of_search_impressions: f64,
    pub non_search_promoted_impressions: f64,
    pub non_search_promoted_change: f64,
    pub non_search_organic_impressions: f64,
    pub non_search_organic_change: f64,
    pub total_promoted_impressions: f64,
    pub total_organic_impressions: f64,
    pub total_page_views: f64,
    pub total_sales: f64,
}

impl Metrics {
    /// Values in column order, matching [`METRIC_NAMES`](crate::ingest::columns::METRIC_NAMES).
    pub fn to_array(&self) -> [f64; METRIC_COUNT] {
        [
            self.quantity_available,
            self.total_impressions,
            self.ctr,
            self.quantity_sold,
            self.top20_search_share,
            self.conversion_rate,
            self.top20_promoted_impressions,
            self.top20_promoted_change,
            self.top20_organic_impressions,
            self.top20_organic_change,
            self.rest_of_search_impressions,
            self.non_search_promoted_impressions,
            self.non_search_promoted_change,
            self.non_search_organic_impressions,
            self.non_search_organic_change,
            self.total_promoted_impressions,
            self.total_organic_impressions,
            self.total_page_views,
            self.total_sales,
        ]
    }

    pub fn from_array(v: [f64; METRIC_COUNT]) -> Self {
        Self {
            quantity_available: v[0],
            total_impressions: v[1],
            ctr: v[2],
            quantity_sold: v[3],
            top20_search_share: v[4],
            conversion_rate: v[5],
            top20_promoted_impressions: v[6],
            top20_promoted_change: v[7],
            top20_organic_impressions: v[8],
            top20_organic_change: v[9],
            rest_of_search_impressions: v[10],
            non_search_promoted_impressions: v[11],
            non_search_promoted_change: v[12],
            non_search_organic_impressions: v[13],
            non_search_organic_change: v[14],
            total_promoted_impressions: v[15],
            total_organic_impressions: v[16],
            total_page_views: v[17],
            total_sales: v[18],
        }
    }
}

/// Metrics a league table can be ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    Impressions,
    PageViews,
    Ctr,
    Conversion,
    Sold,
    Sales,
    Top20,
    Available,
}

impl Metric {
    pub fn value(&self, m: &Metrics) -> f64 {
        match self {
            Metric::Impressions => m.total_impressions,
            Metric::PageViews => m.total_page_views,
            Metric::Ctr => m.ctr,
            Metric::Conversion => m.conversion_rate,
            Metric::Sold => m.quantity_sold,
            Metric::Sales => m.total_sales,
            Metric::Top20 => m.top20_search_share,
            Metric::Available => m.quantity_available,
        }
    }

    /// Whether values are fractions that should render as percentages.
    pub fn is_ratio(&self) -> bool {
        matches!(self, Metric::Ctr | Metric::Conversion | Metric::Top20)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Impressions => "Impressions",
            Metric::PageViews => "Page views",
            Metric::Ctr => "CTR",
            Metric::Conversion => "Conversion",
            Metric::Sold => "Sold",
            Metric::Sales => "Sales",
            Metric::Top20 => "Top 20 share",
            Metric::Available => "Available",
        }
    }
}

/// A listing's metrics for one report period, joined with its attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingSnapshot {
    pub listing: ListingInfo,
    pub product_id: Option<i64>,
    /// Report date, `YYYY-MM-DD`
    pub period: String,
    pub batch_id: i64,
    pub metrics: Metrics,
}
