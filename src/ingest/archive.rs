use std::{fs::File, io::Read, path::Path};
use tracing::{debug, warn};
use zip::ZipArchive;

use super::error::IngestError;

/// One CSV document to ingest, with the name it is tracked under.
#[derive(Debug, Clone)]
pub struct Upload {
    /// File name, or `<archive>/<entry>` for CSVs inside a ZIP
    pub name: String,
    pub text: String,
}

fn is_csv(name: &str) -> bool {
    name.to_lowercase().ends_with(".csv")
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read `path` into uploads: a ZIP yields one upload per `.csv` entry, in
/// archive order; anything else is read as a single CSV. Invalid UTF-8 is
/// replaced rather than rejected.
pub fn read_uploads(path: &Path) -> Result<Vec<Upload>, IngestError> {
    if !is_zip(path) {
        let bytes = std::fs::read(path)?;
        return Ok(vec![Upload {
            name: display_name(path),
            text: String::from_utf8_lossy(&bytes).into_owned(),
        }]);
    }

    let archive_name = display_name(path);
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let mut uploads = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if !entry.is_file() || !is_csv(&name) {
            debug!(archive = %archive_name, entry = %name, "ignoring non-CSV entry");
            continue;
        }
        // declared sizes are untrusted; grow as bytes arrive
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        uploads.push(Upload {
            name: format!("{}/{}", archive_name, name),
            text: String::from_utf8_lossy(&buf).into_owned(),
        });
    }

    if uploads.is_empty() {
        warn!(archive = %archive_name, "archive contains no CSV files");
    }
    Ok(uploads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    #[test]
    fn reads_every_csv_entry_from_a_zip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exports.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            zip.start_file("march.csv", options).unwrap();
            zip.write_all(b"a,b\n1,2\n").unwrap();
            zip.start_file("notes.txt", options).unwrap();
            zip.write_all(b"ignore me").unwrap();
            zip.start_file("april.CSV", options).unwrap();
            zip.write_all(b"c,d\n").unwrap();
            zip.finish().unwrap();
        }

        let uploads = read_uploads(&path).unwrap();
        let names: Vec<&str> = uploads.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["exports.zip/march.csv", "exports.zip/april.CSV"]
        );
        assert_eq!(uploads[0].text, "a,b\n1,2\n");
    }

    #[test]
    fn plain_file_is_a_single_upload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traffic_2024-05-01.csv");
        std::fs::write(&path, b"x,y\n").unwrap();
        let uploads = read_uploads(&path).unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].name, "traffic_2024-05-01.csv");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_uploads(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, IngestError::Io(_)));
    }
}
