//! Upload orchestration: resolve inputs, parse them concurrently on the
//! blocking pool, then persist one batch at a time.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use glob::glob;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::ingest::{self, IngestError, NormalizedBatch};
use crate::store::{ReconcileSummary, Store};

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Report period for every upload; otherwise taken from the file name
    pub period: Option<NaiveDate>,
    /// Re-import uploads whose name is already recorded
    pub force: bool,
    /// Parse and preview only
    pub dry_run: bool,
    pub max_concurrent: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            period: None,
            force: false,
            dry_run: false,
            max_concurrent: 4,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Imported {
        name: String,
        period: String,
        batch: NormalizedBatch,
        summary: ReconcileSummary,
    },
    Previewed {
        name: String,
        period: String,
        batch: NormalizedBatch,
    },
    AlreadyImported { name: String },
    Failed { name: String, error: String },
}

impl UploadOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, UploadOutcome::Failed { .. })
    }
}

fn is_upload_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv") || e.eq_ignore_ascii_case("zip"))
}

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Expand inputs into upload files: directories contribute their `.csv` and
/// `.zip` files, patterns are globbed, plain paths must exist. Results are
/// sorted within each input and deduplicated.
pub fn resolve_inputs(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut out: Vec<PathBuf> = Vec::new();
    for input in inputs {
        let path = PathBuf::from(input);
        let mut found: Vec<PathBuf> = if path.is_dir() {
            fs::read_dir(&path)
                .with_context(|| format!("reading directory {}", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| is_upload_file(p))
                .collect()
        } else if has_glob_meta(input) {
            glob(input)
                .with_context(|| format!("invalid glob pattern {:?}", input))?
                .filter_map(Result::ok)
                .filter(|p| is_upload_file(p))
                .collect()
        } else if path.is_file() {
            vec![path]
        } else {
            bail!("input not found: {}", input);
        };

        if found.is_empty() {
            warn!(input = %input, "no CSV or ZIP files matched");
        }
        found.sort();
        for p in found {
            if !out.contains(&p) {
                out.push(p);
            }
        }
    }
    Ok(out)
}

/// Extracts a date from a file name, trying:
///  - an 8-digit contiguous `YYYYMMDD`
///  - a 10-char `YYYY-MM-DD` or `YYYY_MM_DD`
pub fn extract_date_from_filename(filename: &str) -> Option<NaiveDate> {
    let chars: Vec<char> = filename.chars().collect();

    // Try YYYYMMDD
    for i in 0..=chars.len().saturating_sub(8) {
        let Some(slice) = chars.get(i..i + 8) else {
            break;
        };
        if slice.iter().all(|c| c.is_ascii_digit()) {
            let s: String = slice.iter().collect();
            if let Ok(d) = NaiveDate::parse_from_str(&s, "%Y%m%d") {
                if (2000..=2099).contains(&chrono::Datelike::year(&d)) {
                    return Some(d);
                }
            }
        }
    }

    // Try YYYY-MM-DD or YYYY_MM_DD
    for i in 0..=chars.len().saturating_sub(10) {
        let Some(slice) = chars.get(i..i + 10) else {
            break;
        };
        let s: String = slice.iter().collect();
        let normalized = s.replace('_', "-");
        if let Ok(d) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d") {
            if (2000..=2099).contains(&chrono::Datelike::year(&d)) {
                return Some(d);
            }
        }
    }

    None
}

/// Report period for an upload: explicit, from its name, else `today`.
pub fn period_for(upload_name: &str, explicit: Option<NaiveDate>, today: NaiveDate) -> String {
    explicit
        .or_else(|| {
            // the innermost name; archives can carry their own date
            let base = upload_name.rsplit('/').next().unwrap_or(upload_name);
            extract_date_from_filename(base).or_else(|| extract_date_from_filename(upload_name))
        })
        .unwrap_or(today)
        .format("%Y-%m-%d")
        .to_string()
}

/// A parsed upload waiting to be persisted.
pub struct Parsed {
    pub name: String,
    pub result: Result<NormalizedBatch, IngestError>,
}

/// Every upload parsed from the input at `index`.
pub struct ParsedFile {
    pub index: usize,
    pub uploads: Vec<Parsed>,
}

fn parse_path(path: &Path, now: DateTime<Utc>) -> Vec<Parsed> {
    match ingest::read_uploads(path) {
        Ok(uploads) => uploads
            .into_iter()
            .map(|u| Parsed {
                result: ingest::ingest_text(&u.text, now),
                name: u.name,
            })
            .collect(),
        Err(e) => vec![Parsed {
            name: path.display().to_string(),
            result: Err(e),
        }],
    }
}

/// Parse every path on the blocking pool, at most `max_concurrent` at once.
/// Results arrive on the returned channel as they finish, tagged with the
/// path's position in `paths`.
pub fn spawn_parsers(
    paths: Vec<PathBuf>,
    max_concurrent: usize,
    now: DateTime<Utc>,
) -> mpsc::Receiver<ParsedFile> {
    let (tx, rx) = mpsc::channel::<ParsedFile>(64);
    let sem = Arc::new(Semaphore::new(max_concurrent.max(1)));

    for (index, path) in paths.into_iter().enumerate() {
        let tx = tx.clone();
        let sem = sem.clone();
        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };
            let shown = path.display().to_string();
            let uploads = match tokio::task::spawn_blocking(move || parse_path(&path, now)).await {
                Ok(uploads) => uploads,
                Err(e) => {
                    error!(path = %shown, "parser task failed: {}", e);
                    vec![Parsed {
                        name: shown.clone(),
                        result: Err(IngestError::Io(std::io::Error::other(e.to_string()))),
                    }]
                }
            };
            let _ = tx.send(ParsedFile { index, uploads }).await;
        });
    }
    // drop the last sender so `rx.recv()` ends once all parsers complete
    drop(tx);
    rx
}

/// Reorders parser output back into input order.
#[derive(Default)]
struct InOrder {
    next: usize,
    pending: BTreeMap<usize, Vec<Parsed>>,
}

impl InOrder {
    /// Buffer `file` and return every upload that is now next in line.
    fn push(&mut self, file: ParsedFile) -> Vec<Parsed> {
        self.pending.insert(file.index, file.uploads);
        let mut ready = Vec::new();
        while let Some(uploads) = self.pending.remove(&self.next) {
            ready.extend(uploads);
            self.next += 1;
        }
        ready
    }
}

/// Import `paths`: parse concurrently, then persist each upload in input
/// order so later inputs win. A bad upload is reported and the rest continue.
pub async fn run_import(
    store: &mut Store,
    paths: Vec<PathBuf>,
    opts: &ImportOptions,
) -> Result<Vec<UploadOutcome>> {
    let now = Utc::now();
    info!(
        files = paths.len(),
        dry_run = opts.dry_run,
        "starting import"
    );

    let mut rx = spawn_parsers(paths, opts.max_concurrent, now);
    let mut order = InOrder::default();
    let mut outcomes = Vec::new();

    while let Some(file) = rx.recv().await {
        for Parsed { name, result } in order.push(file) {
            outcomes.push(persist(store, name, result, opts, now)?);
        }
    }

    info!(uploads = outcomes.len(), "import finished");
    Ok(outcomes)
}

/// Store one parsed upload, or preview it on a dry run.
fn persist(
    store: &mut Store,
    name: String,
    result: Result<NormalizedBatch, IngestError>,
    opts: &ImportOptions,
    now: DateTime<Utc>,
) -> Result<UploadOutcome> {
    let batch = match result {
        Ok(batch) => batch,
        Err(e) => {
            error!(upload = %name, "rejected: {}", e);
            return Ok(UploadOutcome::Failed {
                name,
                error: e.to_string(),
            });
        }
    };

    let period = period_for(&name, opts.period, now.date_naive());
    if opts.dry_run {
        return Ok(UploadOutcome::Previewed {
            name,
            period,
            batch,
        });
    }

    if !opts.force && store.has_upload(&name)? {
        info!(upload = %name, "already imported; skipping");
        return Ok(UploadOutcome::AlreadyImported { name });
    }

    Ok(match store.import_batch(&name, &period, &batch, now) {
        Ok(summary) => UploadOutcome::Imported {
            name,
            period,
            batch,
            summary,
        },
        Err(e) => {
            error!(upload = %name, "persisting failed: {:#}", e);
            UploadOutcome::Failed {
                name,
                error: format!("{:#}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::{data_line, report};
    use tempfile::tempdir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn dates_come_from_file_names() {
        for name in [
            "traffic_20240514.csv",
            "traffic-2024-05-14.csv",
            "traffic_2024_05_14.csv",
        ] {
            let expected = Some(d(2024, 5, 14));
            assert_eq!(extract_date_from_filename(name), expected, "{name}");
        }
        assert_eq!(extract_date_from_filename("item 123456789012.csv"), None);
        assert_eq!(extract_date_from_filename("report.csv"), None);
        assert_eq!(extract_date_from_filename("x"), None);
    }

    #[test]
    fn period_prefers_explicit_then_name_then_today() {
        let today = d(2025, 1, 1);
        let explicit = Some(d(2023, 2, 2));
        assert_eq!(period_for("a_20240514.csv", explicit, today), "2023-02-02");
        assert_eq!(period_for("a_20240514.csv", None, today), "2024-05-14");
        assert_eq!(
            period_for("may_2024-05-31.zip/traffic.csv", None, today),
            "2024-05-31"
        );
        assert_eq!(
            period_for("may_2024-05-31.zip/2024-06-02.csv", None, today),
            "2024-06-02"
        );
        assert_eq!(period_for("traffic.csv", None, today), "2025-01-01");
    }

    #[test]
    fn resolves_dirs_globs_and_files() {
        let dir = tempdir().unwrap();
        for name in ["b.csv", "a.csv", "c.zip", "notes.txt"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        let dir_str = dir.path().display().to_string();

        let from_dir = resolve_inputs(&[dir_str.clone()]).unwrap();
        let names: Vec<String> = from_dir
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv", "c.zip"]);

        let pattern = format!("{}/*.csv", dir_str);
        let file = format!("{}/a.csv", dir_str);
        let mixed = resolve_inputs(&[pattern, file]).unwrap();
        assert_eq!(mixed.len(), 2);

        assert!(resolve_inputs(&[format!("{}/missing.csv", dir_str)]).is_err());
    }

    #[tokio::test]
    async fn imports_skips_repeats_and_reports_failures() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("traffic_20240501.csv");
        fs::write(&good, report(&[data_line("1", "Kite", 100, 10)])).unwrap();
        let bad = dir.path().join("broken_20240501.csv");
        fs::write(&bad, "not,a,traffic,report\n1,2,3,4\n").unwrap();

        let mut store = Store::open_in_memory().unwrap();
        let opts = ImportOptions::default();

        let outcomes = run_import(&mut store, vec![good.clone(), bad], &opts)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes.iter().filter(|o| o.is_failure()).count(), 1);
        let imported = outcomes
            .iter()
            .find_map(|o| match o {
                UploadOutcome::Imported { period, summary, .. } => Some((period, summary)),
                _ => None,
            })
            .unwrap();
        assert_eq!(imported.0, "2024-05-01");
        assert_eq!(imported.1.listings_inserted, 1);

        // second run: same name is skipped unless forced
        let again = run_import(&mut store, vec![good.clone()], &opts)
            .await
            .unwrap();
        assert!(matches!(again[0], UploadOutcome::AlreadyImported { .. }));

        let forced = ImportOptions {
            force: true,
            ..Default::default()
        };
        let again = run_import(&mut store, vec![good], &forced).await.unwrap();
        match &again[0] {
            UploadOutcome::Imported { summary, .. } => assert_eq!(summary.snapshots_unchanged, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.batches().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traffic.csv");
        fs::write(&path, report(&[data_line("1", "Kite", 100, 10)])).unwrap();

        let mut store = Store::open_in_memory().unwrap();
        let opts = ImportOptions {
            dry_run: true,
            period: Some(d(2024, 7, 1)),
            ..Default::default()
        };
        let outcomes = run_import(&mut store, vec![path], &opts).await.unwrap();
        match &outcomes[0] {
            UploadOutcome::Previewed { period, batch, .. } => {
                assert_eq!(period, "2024-07-01");
                assert_eq!(batch.rows.len(), 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(store.batches().unwrap().is_empty());
    }

    fn parsed_file(index: usize, names: &[&str]) -> ParsedFile {
        ParsedFile {
            index,
            uploads: names
                .iter()
                .map(|n| Parsed {
                    name: n.to_string(),
                    result: Ok(NormalizedBatch::default()),
                })
                .collect(),
        }
    }

    #[test]
    fn out_of_order_results_are_released_in_input_order() {
        let mut order = InOrder::default();
        assert!(order.push(parsed_file(2, &["c.csv"])).is_empty());
        let released = order.push(parsed_file(1, &["b.zip/1.csv", "b.zip/2.csv"]));
        assert!(released.is_empty());
        let ready: Vec<String> = order
            .push(parsed_file(0, &["a.csv"]))
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(ready, vec!["a.csv", "b.zip/1.csv", "b.zip/2.csv", "c.csv"]);
        assert!(order.pending.is_empty());
    }

    #[tokio::test]
    async fn later_input_wins_even_when_it_parses_first() {
        let dir = tempdir().unwrap();
        let big = dir.path().join("a_big.csv");
        let mut lines = vec![data_line("1", "Kite", 100, 10)];
        lines.extend((0..5_000).map(|i| data_line(&format!("9{i:05}"), "Filler", 1, 1)));
        fs::write(&big, report(&lines)).unwrap();
        let small = dir.path().join("b_small.csv");
        fs::write(&small, report(&[data_line("1", "Kite", 200, 10)])).unwrap();

        let mut store = Store::open_in_memory().unwrap();
        let opts = ImportOptions {
            period: Some(d(2024, 5, 1)),
            max_concurrent: 2,
            ..Default::default()
        };
        let outcomes = run_import(&mut store, vec![big, small], &opts)
            .await
            .unwrap();
        let names: Vec<&str> = outcomes
            .iter()
            .map(|o| match o {
                UploadOutcome::Imported { name, .. } => name.as_str(),
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["a_big.csv", "b_small.csv"]);

        let history = store.listing_history("1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].metrics.total_impressions, 200.0);
    }
}
