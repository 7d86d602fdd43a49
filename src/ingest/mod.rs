//! CSV ingestion: tokenize, validate the header row, normalize data rows.

pub mod archive;
pub mod columns;
pub mod date_parser;
pub mod error;
pub mod normalize;
pub mod parse;
pub mod validate;

use chrono::{DateTime, Utc};
use tracing::info;

pub use archive::{read_uploads, Upload};
pub use error::IngestError;
pub use normalize::{NormalizedBatch, NormalizedRow, SkipReason, SkippedRow};

/// Run the whole pipeline over one upload's text. Header problems abort;
/// row problems are collected in the returned batch.
#[tracing::instrument(level = "debug", skip(text, now), fields(bytes = text.len()))]
pub fn ingest_text(text: &str, now: DateTime<Utc>) -> Result<NormalizedBatch, IngestError> {
    let rows = parse::parse_rows(text)?;
    let (header, data) = rows.split_first().ok_or(IngestError::Empty)?;
    validate::validate_headers(&header.cells)?;

    let batch = normalize::normalize_rows(data, now);
    info!(
        rows = batch.rows.len(),
        skipped = batch.skipped_count(),
        duplicates = batch.duplicates,
        date_fallbacks = batch.date_fallbacks,
        "normalized upload"
    );
    Ok(batch)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::columns::header_line;

    /// A data line with all 24 columns filled.
    pub fn data_line(item_id: &str, title: &str, impressions: u32, page_views: u32) -> String {
        format!(
            "\"{title}\",{item_id},2024-03-14,Toys,Promoted,5,\"{impressions}\",2.5%,3,40%,7.5%,\
             10,1%,20,2%,30,40,3%,50,4%,60,70,{page_views},\"$1,000.00\""
        )
    }

    pub fn report(lines: &[String]) -> String {
        let mut text = header_line();
        text.push('\n');
        for l in lines {
            text.push_str(l);
            text.push('\n');
        }
        text
    }
}
