use thiserror::Error;

/// Errors that abort ingestion of a whole upload.
///
/// Row-level problems never show up here; they are collected as
/// [`SkippedRow`](super::normalize::SkippedRow)s instead.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("upload is empty: no header row found")]
    Empty,

    #[error("invalid CSV format: expected {expected} columns but found {actual}")]
    HeaderCount { expected: usize, actual: usize },

    #[error(
        "invalid CSV format: column {position} should be \"{expected}\" but found \"{actual}\""
    )]
    HeaderMismatch {
        /// 1-based column position
        position: usize,
        expected: String,
        actual: String,
    },

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}
