use super::columns::{COLUMNS, COLUMN_COUNT};
use super::error::IngestError;
use super::parse::clean_str;

/// Check a header row against the fixed traffic-report layout: exactly
/// [`COLUMN_COUNT`] cells, names matching in order (ASCII case-insensitive).
pub fn validate_headers(headers: &[String]) -> Result<(), IngestError> {
    if headers.len() != COLUMN_COUNT {
        return Err(IngestError::HeaderCount {
            expected: COLUMN_COUNT,
            actual: headers.len(),
        });
    }

    for (i, (actual, spec)) in headers.iter().zip(COLUMNS.iter()).enumerate() {
        let actual = clean_str(actual);
        if !actual.eq_ignore_ascii_case(spec.header) {
            return Err(IngestError::HeaderMismatch {
                position: i + 1,
                expected: spec.header.to_string(),
                actual,
            });
        }
    }
    Ok(())
}
