//! Engine configuration
//!
//! Everything the engine needs is carried in [`EngineConfig`] and handed over at
//! construction; nothing downstream reads the environment.

use crate::error::{Result, ScoreError};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// One sub-directory per logical data set.
    pub data_root: PathBuf,
    /// Directory holding `metric_*.yml`.
    pub metric_dir: PathBuf,
    /// Detail table output (Parquet).
    pub detail_path: PathBuf,
    /// Persisted snapshot (Parquet).
    pub summary_path: PathBuf,
    /// Also export both tables as JSON records here.
    pub json_export_dir: Option<PathBuf>,
    /// Redact `resource` and `detail` in the detail table.
    pub privacy: bool,
    /// Only evaluate the metric with this id or file stem.
    pub metric_filter: Option<String>,
    pub dry_run: bool,
    /// Overrides the run date; defaults to today (UTC).
    pub run_date: Option<NaiveDate>,
    /// Extra `{{ name }}` substitutions for query templates.
    pub params: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("../data/source"),
            metric_dir: PathBuf::from("."),
            detail_path: PathBuf::from("../data/detail.parquet"),
            summary_path: PathBuf::from("../data/summary.parquet"),
            json_export_dir: None,
            privacy: true,
            metric_filter: None,
            dry_run: false,
            run_date: None,
            params: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Build a config from the process environment (after loading `.env`).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("SCORECARD_DATA_ROOT") {
            config.data_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCORECARD_METRIC_DIR") {
            config.metric_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCORECARD_DETAIL_PATH") {
            config.detail_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCORECARD_SUMMARY_PATH") {
            config.summary_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCORECARD_JSON_DIR") {
            config.json_export_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SCORECARD_RUN_DATE") {
            config.run_date = Some(parse_run_date(&v)?);
        }
        Ok(config)
    }

    /// The run's datestamp.
    pub fn datestamp(&self) -> NaiveDate {
        self.run_date.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Notifications are for scheduled runs only.
    pub fn alerts_enabled(&self) -> bool {
        !self.dry_run && self.metric_filter.is_none()
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

pub fn parse_run_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| ScoreError::Config(format!("invalid run date '{}': {}", value, e)))
}

/// Parse a `KEY=VALUE` template parameter.
pub fn parse_param(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(ScoreError::Config(format!(
            "template parameter '{}' is not KEY=VALUE",
            pair
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_lookup_overrides() {
        let env: HashMap<&str, &str> = [
            ("SCORECARD_DATA_ROOT", "/srv/source"),
            ("SCORECARD_RUN_DATE", "2024-12-01"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/srv/source"));
        assert_eq!(config.datestamp(), NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert!(config.privacy);
    }

    #[test]
    fn test_bad_run_date() {
        assert!(EngineConfig::from_lookup(|k| {
            (k == "SCORECARD_RUN_DATE").then(|| "12/01/2024".to_string())
        })
        .is_err());
    }

    #[test]
    fn test_alerts_suppressed_for_filtered_runs() {
        let mut config = EngineConfig::default();
        assert!(config.alerts_enabled());
        config.metric_filter = Some("patch_mgmt".to_string());
        assert!(!config.alerts_enabled());
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("tenancy=prod").unwrap(),
            ("tenancy".to_string(), "prod".to_string())
        );
        assert!(parse_param("novalue").is_err());
    }
}
