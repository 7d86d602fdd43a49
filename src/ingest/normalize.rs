use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use super::columns::{
    ColumnKind, CATEGORY, COLUMNS, COLUMN_COUNT, FIRST_METRIC, ITEM_ID, METRIC_COUNT,
    PROMOTED_STATUS, START_DATE, TITLE,
};
use super::date_parser::parse_date;
use super::parse::RawRow;
use crate::model::{ListingInfo, Metrics};

/// A leading currency code and/or symbol, e.g. `US $`, `GBP£`, `€`.
static CURRENCY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:[a-z]{1,3})?\s*[$£€¥₹]").expect("valid currency regex"));

/// Currency symbols, thousands separators, whitespace and percent signs.
static NUMBER_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[$£€¥₹,%\s]").expect("valid noise regex"));

const PLACEHOLDERS: &[&str] = &["", "n/a", "na", "-", "--", "—"];

/// Parse a numeric cell. Currency symbols and thousands separators are
/// stripped; placeholders and anything unparseable become 0.
pub fn parse_number(raw: &str) -> f64 {
    let s = raw.trim();
    if PLACEHOLDERS.iter().any(|p| s.eq_ignore_ascii_case(p)) {
        return 0.0;
    }

    let (negative, s) = match s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, s),
    };
    let s = CURRENCY_PREFIX.replace(s, "");
    let s = NUMBER_NOISE.replace_all(&s, "");

    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => {
            if negative {
                -v
            } else {
                v
            }
        }
        _ => 0.0,
    }
}

/// Parse a percentage cell (`"12.5%"`, `"12.5"`) into a fraction (`0.125`).
pub fn parse_percentage(raw: &str) -> f64 {
    parse_number(raw) / 100.0
}

/// Why a data row was left out of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    TooFewColumns { found: usize },
    MissingTitle,
    MissingItemId,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooFewColumns { found } => write!(
                f,
                "expected at least {} filled columns, found {}",
                COLUMN_COUNT, found
            ),
            SkipReason::MissingTitle => f.write_str("listing title is empty"),
            SkipReason::MissingItemId => f.write_str("item ID is empty"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub line: usize,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRow {
    pub line: usize,
    pub listing: ListingInfo,
    pub metrics: Metrics,
    /// The start date cell was unparseable and `now` was used instead
    pub start_date_fallback: bool,
}

/// The outcome of normalizing every data row of one upload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedBatch {
    pub rows: Vec<NormalizedRow>,
    pub skipped: Vec<SkippedRow>,
    pub date_fallbacks: usize,
    /// Rows replaced by a later row with the same item ID
    pub duplicates: usize,
}

impl NormalizedBatch {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Data rows seen, including skipped and superseded ones.
    pub fn total_rows(&self) -> usize {
        self.rows.len() + self.skipped.len() + self.duplicates
    }
}

/// Coerce one data row. `now` stands in for an unparseable start date.
pub fn normalize_row(row: &RawRow, now: DateTime<Utc>) -> Result<NormalizedRow, SkipReason> {
    let filled = row.filled_cells();
    if filled < COLUMN_COUNT || row.cells.len() < COLUMN_COUNT {
        return Err(SkipReason::TooFewColumns { found: filled });
    }

    let cell = |i: usize| row.cells[i].as_str();
    if cell(TITLE).is_empty() {
        return Err(SkipReason::MissingTitle);
    }
    if cell(ITEM_ID).is_empty() {
        return Err(SkipReason::MissingItemId);
    }

    let (start_date, start_date_fallback) = match parse_date(cell(START_DATE)) {
        Some(dt) => (dt, false),
        None => {
            debug!(
                line = row.line,
                value = cell(START_DATE),
                "unparseable start date"
            );
            (now, true)
        }
    };

    let mut values = [0.0; METRIC_COUNT];
    for (offset, slot) in values.iter_mut().enumerate() {
        let idx = FIRST_METRIC + offset;
        *slot = match COLUMNS[idx].kind {
            ColumnKind::Percent => parse_percentage(cell(idx)),
            _ => parse_number(cell(idx)),
        };
    }

    Ok(NormalizedRow {
        line: row.line,
        listing: ListingInfo {
            item_id: cell(ITEM_ID).to_string(),
            title: cell(TITLE).to_string(),
            category: cell(CATEGORY).to_string(),
            promoted_status: cell(PROMOTED_STATUS).to_string(),
            start_date,
        },
        metrics: Metrics::from_array(values),
        start_date_fallback,
    })
}

/// Normalize data rows (header already removed). Malformed rows are skipped
/// and recorded; a repeated item ID replaces the earlier row in place.
pub fn normalize_rows(rows: &[RawRow], now: DateTime<Utc>) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    let mut by_item: HashMap<String, usize> = HashMap::new();

    for row in rows {
        match normalize_row(row, now) {
            Ok(norm) => {
                if norm.start_date_fallback {
                    batch.date_fallbacks += 1;
                }
                match by_item.get(&norm.listing.item_id) {
                    Some(&idx) => {
                        debug!(
                            item_id = %norm.listing.item_id,
                            line = norm.line,
                            "duplicate item ID supersedes earlier row"
                        );
                        if batch.rows[idx].start_date_fallback {
                            batch.date_fallbacks -= 1;
                        }
                        batch.rows[idx] = norm;
                        batch.duplicates += 1;
                    }
                    None => {
                        by_item.insert(norm.listing.item_id.clone(), batch.rows.len());
                        batch.rows.push(norm);
                    }
                }
            }
            Err(reason) => {
                warn!(line = row.line, %reason, "skipping row");
                batch.skipped.push(SkippedRow {
                    line: row.line,
                    reason,
                });
            }
        }
    }
    batch
}
