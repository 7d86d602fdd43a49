use csv::ReaderBuilder;
use std::io::Cursor;
use tracing::trace;

use super::error::IngestError;

/// One tokenized CSV record.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based line number of the record's first line in the upload
    pub line: usize,
    pub cells: Vec<String>,
}

impl RawRow {
    /// Number of cells that are non-empty after cleaning.
    pub fn filled_cells(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }
}

/// Trim whitespace, a leading BOM, and strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('\u{feff}').trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Tracks physical line numbers across records. The tokenizer's record
/// position points just past the previous record, before any blank lines it
/// skipped, so those are stepped over here.
struct LineCounter<'a> {
    bytes: &'a [u8],
    offset: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            offset: 0,
            line: 1,
        }
    }

    /// Whether the byte at `i` ends a line: `\n`, or a `\r` not followed by one.
    fn is_break(&self, i: usize) -> bool {
        match self.bytes[i] {
            b'\n' => true,
            b'\r' => self.bytes.get(i + 1) != Some(&b'\n'),
            _ => false,
        }
    }

    /// 1-based line of the first non-blank line at or after byte `start`.
    fn line_at(&mut self, start: usize) -> usize {
        let start = start.clamp(self.offset, self.bytes.len());
        let breaks = (self.offset..start).filter(|&i| self.is_break(i)).count();
        self.line += breaks;
        let mut pos = start;
        loop {
            match &self.bytes[pos..] {
                [b'\r', b'\n', ..] => pos += 2,
                [b'\n', ..] | [b'\r', ..] => pos += 1,
                _ => break,
            }
            self.line += 1;
        }
        self.offset = pos;
        self.line
    }
}

/// Split `text` into rows of cleaned cells. Records may have differing field
/// counts; blank lines are dropped by the tokenizer.
pub fn parse_rows(text: &str) -> Result<Vec<RawRow>, IngestError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(Cursor::new(text.as_bytes()));

    let mut lines = LineCounter::new(text);
    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result?;
        let line = match record.position() {
            Some(p) => lines.line_at(p.byte() as usize),
            None => idx + 1,
        };
        let cells: Vec<String> = record.iter().map(clean_str).collect();
        trace!(line, cells = cells.len(), "tokenized record");
        rows.push(RawRow { line, cells });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_str_strips_quotes_and_bom() {
        assert_eq!(clean_str("  \"abc\" "), "abc");
        assert_eq!(clean_str("\u{feff}Listing title"), "Listing title");
        assert_eq!(clean_str("\""), "\"");
        assert_eq!(clean_str("  "), "");
    }

    #[test]
    fn parse_rows_handles_quoted_commas_and_ragged_rows() {
        let text = "a,b,c\n\"Widget, blue\",2\n\nx,y,z,w\n";
        let rows = parse_rows(text).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].cells, vec!["Widget, blue", "2"]);
        assert_eq!(rows[1].line, 2);
        assert_eq!(rows[2].cells.len(), 4);
        assert_eq!(rows[2].line, 4);
    }

    #[test]
    fn line_numbers_count_blank_and_multiline_records() {
        let text = "a,b\n\n\n\"two\nlines\",x\r\n\r\nlast,row\n";
        let rows = parse_rows(text).unwrap();
        let lines: Vec<usize> = rows.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![1, 4, 7]);
        assert_eq!(rows[1].cells, vec!["two\nlines", "x"]);
    }

    #[test]
    fn bare_carriage_returns_end_lines() {
        let rows = parse_rows("a,b\rc,d\r\re,f\r").unwrap();
        let lines: Vec<usize> = rows.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![1, 2, 4]);
        assert_eq!(rows[2].cells, vec!["e", "f"]);
    }

    #[test]
    fn filled_cells_ignores_blanks() {
        let row = RawRow {
            line: 1,
            cells: vec!["a".into(), "".into(), "c".into()],
        };
        assert_eq!(row.filled_cells(), 2);
    }
}
