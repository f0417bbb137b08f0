//! Data-set registry
//!
//! Maps a logical data-set name to the JSON exports collected for it
//! (`<root>/<name>/*.json`) and loads them as a single lazy frame.

use crate::error::{Result, ScoreError};
use polars::prelude::*;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Columns of `crowdstrike_hosts` whose JSON types drift between exports.
const CROWDSTRIKE_HOST_STRING_COLUMNS: [&str; 3] = ["last_seen", "device_id", "hostname"];

pub struct DataSetRegistry {
    root: PathBuf,
    string_columns: HashMap<String, BTreeSet<String>>,
}

impl DataSetRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let registry = Self {
            root: root.into(),
            string_columns: HashMap::new(),
        };
        CROWDSTRIKE_HOST_STRING_COLUMNS
            .iter()
            .fold(registry, |r, column| r.with_string_column("crowdstrike_hosts", column))
    }

    /// Force `column` of `dataset` to be read as a string in every file.
    pub fn with_string_column(mut self, dataset: &str, column: &str) -> Self {
        self.string_columns
            .entry(dataset.to_string())
            .or_default()
            .insert(column.to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Glob pattern for the files of a data set.
    pub fn pattern(&self, dataset: &str) -> String {
        self.root
            .join(dataset)
            .join("*.json")
            .to_string_lossy()
            .into_owned()
    }

    pub fn files(&self, dataset: &str) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = glob::glob(&self.pattern(dataset))?
            .filter_map(|entry| entry.ok())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Check every referenced data set has at least one file.
    ///
    /// All missing sets are logged; the first one is returned as the error.
    pub fn ensure_available<'a>(&self, datasets: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut first_missing = None;
        for dataset in datasets {
            if self.files(dataset)?.is_empty() {
                let pattern = self.pattern(dataset);
                error!(dataset, %pattern, "Data set does not exist");
                first_missing.get_or_insert(ScoreError::MissingDataSet {
                    dataset: dataset.to_string(),
                    pattern,
                });
            } else {
                info!(dataset, "Data set exists");
            }
        }
        match first_missing {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Load all files of a data set into one frame.
    pub fn load(&self, dataset: &str) -> Result<LazyFrame> {
        let forced = self.string_columns.get(dataset);
        let mut frames = Vec::new();
        for path in self.files(dataset)? {
            match read_records(&path, forced)? {
                Some(df) => frames.push(df.lazy()),
                None => debug!(file = %path.display(), "Skipping empty export"),
            }
        }

        if frames.is_empty() {
            return Ok(DataFrame::empty().lazy());
        }
        let args = UnionArgs {
            to_supertypes: true,
            ..Default::default()
        };
        let combined = concat_lf_diagonal(frames, args)?;

        // A hinted column that is null or absent everywhere must still be a string.
        let Some(columns) = forced else {
            return Ok(combined);
        };
        let schema = combined.schema()?;
        let hinted: Vec<Expr> = columns
            .iter()
            .map(|column| {
                if schema.contains(column) {
                    col(column).cast(DataType::String)
                } else {
                    lit(NULL).cast(DataType::String).alias(column)
                }
            })
            .collect();
        Ok(combined.with_columns(hinted))
    }
}

/// Read one array-of-objects export. Returns `None` for an empty array.
fn read_records(path: &Path, forced: Option<&BTreeSet<String>>) -> Result<Option<DataFrame>> {
    let raw = std::fs::read(path)?;
    let mut records = match serde_json::from_slice::<Value>(&raw)? {
        Value::Array(records) => records,
        other @ Value::Object(_) => vec![other],
        _ => {
            return Err(ScoreError::QueryExecution(format!(
                "{} is not an array of records",
                path.display()
            )))
        }
    };
    if records.is_empty() {
        return Ok(None);
    }

    if let Some(columns) = forced {
        for record in records.iter_mut() {
            if let Value::Object(fields) = record {
                for column in columns {
                    if let Some(value) = fields.get_mut(column) {
                        force_string(value);
                    }
                }
            }
        }
    }

    let bytes = serde_json::to_vec(&Value::Array(records))?;
    let df = JsonReader::new(Cursor::new(bytes))
        .with_json_format(JsonFormat::Json)
        .infer_schema_len(None)
        .finish()?;
    Ok(Some(df))
}

fn force_string(value: &mut Value) {
    match value {
        Value::Null | Value::String(_) => {}
        other => *other = Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_export(root: &Path, dataset: &str, file: &str, records: Value) {
        let dir = root.join(dataset);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), serde_json::to_vec(&records).unwrap()).unwrap();
    }

    #[test]
    fn test_missing_data_set_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_export(dir.path(), "okta_users", "a.json", json!([{"id": 1}]));
        let registry = DataSetRegistry::new(dir.path());

        assert!(registry.ensure_available(["okta_users"]).is_ok());
        match registry.ensure_available(["okta_users", "snyk_issues"]) {
            Err(ScoreError::MissingDataSet { dataset, .. }) => assert_eq!(dataset, "snyk_issues"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_files_with_different_columns_combine() {
        let dir = tempfile::tempdir().unwrap();
        write_export(dir.path(), "domains", "a.json", json!([{"name": "a.com", "dnssec": true}]));
        write_export(dir.path(), "domains", "b.json", json!([{"name": "b.com"}, {"name": "c.com"}]));
        write_export(dir.path(), "domains", "c.json", json!([]));

        let df = DataSetRegistry::new(dir.path()).load("domains").unwrap().collect().unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(df.column("dnssec").unwrap().null_count(), 2);
    }

    #[test]
    fn test_crowdstrike_hosts_forced_to_string() {
        let dir = tempfile::tempdir().unwrap();
        write_export(
            dir.path(),
            "crowdstrike_hosts",
            "a.json",
            json!([{"hostname": "web-01", "device_id": 17, "last_seen": null}]),
        );
        write_export(
            dir.path(),
            "crowdstrike_hosts",
            "b.json",
            json!([{"hostname": 42, "device_id": "abc", "last_seen": "2024-12-01T00:00:00Z"}]),
        );

        let df = DataSetRegistry::new(dir.path())
            .load("crowdstrike_hosts")
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(df.height(), 2);
        for column in CROWDSTRIKE_HOST_STRING_COLUMNS {
            assert_eq!(df.column(column).unwrap().dtype(), &DataType::String);
        }
    }

    #[test]
    fn test_hinted_columns_null_or_absent_everywhere_are_strings() {
        let dir = tempfile::tempdir().unwrap();
        write_export(
            dir.path(),
            "crowdstrike_hosts",
            "a.json",
            json!([{"hostname": "web-01", "last_seen": null}]),
        );
        write_export(
            dir.path(),
            "crowdstrike_hosts",
            "b.json",
            json!([{"hostname": "web-02", "last_seen": null}]),
        );

        let df = DataSetRegistry::new(dir.path())
            .load("crowdstrike_hosts")
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(df.height(), 2);
        for column in CROWDSTRIKE_HOST_STRING_COLUMNS {
            let series = df.column(column).unwrap();
            assert_eq!(series.dtype(), &DataType::String);
        }
        assert_eq!(df.column("last_seen").unwrap().null_count(), 2);
        assert_eq!(df.column("device_id").unwrap().null_count(), 2);
    }

    #[test]
    fn test_unhinted_data_sets_keep_inferred_types() {
        let dir = tempfile::tempdir().unwrap();
        write_export(dir.path(), "okta_users", "a.json", json!([{"id": 1, "mfa": true}]));

        let df = DataSetRegistry::new(dir.path()).load("okta_users").unwrap().collect().unwrap();
        assert_eq!(df.column("id").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("mfa").unwrap().dtype(), &DataType::Boolean);
    }
}
