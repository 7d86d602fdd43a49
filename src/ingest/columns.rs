//! The fixed layout of an eBay listings traffic report.

/// How a cell in a given column is coerced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Date,
    Number,
    /// Parsed like a number, then divided by 100
    Percent,
}

#[derive(Clone, Copy, Debug)]
pub struct ColumnSpec {
    pub header: &'static str,
    pub kind: ColumnKind,
}

const fn col(header: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec { header, kind }
}

pub const COLUMN_COUNT: usize = 24;

pub const TITLE: usize = 0;
pub const ITEM_ID: usize = 1;
pub const START_DATE: usize = 2;
pub const CATEGORY: usize = 3;
pub const PROMOTED_STATUS: usize = 4;
/// First metric column; every column from here on is numeric.
pub const FIRST_METRIC: usize = 5;

pub const METRIC_COUNT: usize = COLUMN_COUNT - FIRST_METRIC;

/// Ordered header names. Matching is case-insensitive.
pub static COLUMNS: [ColumnSpec; COLUMN_COUNT] = [
    col("Listing title", ColumnKind::Text),
    col("eBay item ID", ColumnKind::Text),
    col("Item Start Date", ColumnKind::Date),
    col("Category", ColumnKind::Text),
    col("Current promoted listings status", ColumnKind::Text),
    col("Quantity available", ColumnKind::Number),
    col("Total impressions", ColumnKind::Number),
    col(
        "Click-through rate = Page views from eBay site/Total impressions",
        ColumnKind::Percent,
    ),
    col("Quantity sold", ColumnKind::Number),
    col("% Top 20 Search Impressions", ColumnKind::Percent),
    col(
        "Sales conversion rate = Quantity sold/Total page views",
        ColumnKind::Percent,
    ),
    col(
        "Top 20 search slot impressions from promoted listings",
        ColumnKind::Number,
    ),
    col(
        "% change in top 20 search slot impressions from promoted listings",
        ColumnKind::Percent,
    ),
    col("Top 20 search slot organic impressions", ColumnKind::Number),
    col(
        "% change in top 20 search slot organic impressions",
        ColumnKind::Percent,
    ),
    col("Rest of search slot impressions", ColumnKind::Number),
    col(
        "Non-search promoted listings impressions",
        ColumnKind::Number,
    ),
    col(
        "% change in non-search promoted listings impressions",
        ColumnKind::Percent,
    ),
    col("Non-search organic impressions", ColumnKind::Number),
    col(
        "% change in non-search organic impressions",
        ColumnKind::Percent,
    ),
    col("Total promoted listings impressions", ColumnKind::Number),
    col("Total organic impressions on eBay site", ColumnKind::Number),
    col("Total page views", ColumnKind::Number),
    col("Total sales", ColumnKind::Number),
];

/// Snake-case names for the metric columns, in file order. These double as
/// database column names.
pub static METRIC_NAMES: [&str; METRIC_COUNT] = [
    "quantity_available",
    "total_impressions",
    "ctr",
    "quantity_sold",
    "top20_search_share",
    "conversion_rate",
    "top20_promoted_impressions",
    "top20_promoted_change",
    "top20_organic_impressions",
    "top20_organic_change",
    "rest_of_search_impressions",
    "non_search_promoted_impressions",
    "non_search_promoted_change",
    "non_search_organic_impressions",
    "non_search_organic_change",
    "total_promoted_impressions",
    "total_organic_impressions",
    "total_page_views",
    "total_sales",
];

/// The header row exactly as eBay writes it, comma-joined.
#[cfg(test)]
pub fn header_line() -> String {
    COLUMNS
        .iter()
        .map(|c| c.header)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_columns_are_all_numeric() {
        for spec in &COLUMNS[FIRST_METRIC..] {
            assert!(
                matches!(spec.kind, ColumnKind::Number | ColumnKind::Percent),
                "{} should be numeric",
                spec.header
            );
        }
        assert_eq!(METRIC_NAMES.len(), METRIC_COUNT);
    }

    #[test]
    fn headers_contain_no_commas() {
        // header_line() relies on this
        assert!(COLUMNS.iter().all(|c| !c.header.contains(',')));
    }
}
