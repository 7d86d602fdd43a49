use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::model::Metric;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "sellerboard.yaml";

pub const ENV_DATABASE: &str = "SELLERBOARD_DATABASE";
pub const ENV_LOG: &str = "SELLERBOARD_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub database_path: PathBuf,
    /// `tracing` env-filter directive used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Rows shown when previewing an upload
    pub preview_rows: usize,
    pub max_concurrent_parses: usize,
    /// Default league table length; 0 means unlimited
    pub league_limit: usize,
    pub default_metric: Metric,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/sellerboard.duckdb"),
            log_filter: "info".to_string(),
            preview_rows: 5,
            max_concurrent_parses: 4,
            league_limit: 25,
            default_metric: Metric::Sales,
        }
    }
}

impl Settings {
    /// Parse YAML; missing fields keep their defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing settings YAML")
    }

    /// Load settings from `path` (which must exist) or, without one, from
    /// `sellerboard.yaml` in the working directory if present. Environment
    /// overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::read_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::read_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        settings.apply_env(|k| env::var(k).ok());
        settings.sanitize();
        Ok(settings)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("in config {}", path.display()))
    }

    /// Apply `SELLERBOARD_*` overrides looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(db) = var(ENV_DATABASE).filter(|v| !v.trim().is_empty()) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(filter) = var(ENV_LOG).filter(|v| !v.trim().is_empty()) {
            self.log_filter = filter;
        }
    }

    fn sanitize(&mut self) {
        self.max_concurrent_parses = self.max_concurrent_parses.max(1);
    }

    pub fn league_limit(&self) -> Option<usize> {
        (self.league_limit > 0).then_some(self.league_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let s = Settings::from_yaml("preview_rows: 10\ndefault_metric: page-views\n").unwrap();
        assert_eq!(s.preview_rows, 10);
        assert_eq!(s.default_metric, Metric::PageViews);
        assert_eq!(s.league_limit, 25);
        assert_eq!(s.database_path, PathBuf::from("data/sellerboard.duckdb"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Settings::from_yaml("databse_path: x\n").is_err());
    }

    #[test]
    fn load_reads_file_and_applies_sanitizing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("board.yaml");
        fs::write(
            &path,
            "database_path: /tmp/x.duckdb\nmax_concurrent_parses: 0\nleague_limit: 0\n",
        )
        .unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.max_concurrent_parses, 1);
        assert_eq!(s.league_limit(), None);

        assert!(Settings::load(Some(&dir.path().join("missing.yaml"))).is_err());
    }

    #[test]
    fn env_overrides_win() {
        let vars: HashMap<&str, &str> =
            HashMap::from([(ENV_DATABASE, "/var/db.duckdb"), (ENV_LOG, "debug")]);
        let mut s = Settings::default();
        s.apply_env(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(s.database_path, PathBuf::from("/var/db.duckdb"));
        assert_eq!(s.log_filter, "debug");

        let mut s = Settings::default();
        s.apply_env(|_| Some("  ".to_string()));
        assert_eq!(s, Settings::default());
    }
}
