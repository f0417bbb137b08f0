//! Metric catalogue
//!
//! Metric definitions live one per YAML document (`metric_*.yml`). Scalars that
//! operators tend to write loosely (`weight`, `slo`, `indicator`) are kept as raw
//! YAML values here and coerced by the validator, so a malformed value discards
//! that metric instead of failing the whole catalogue load.

use crate::error::{Result, ScoreError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Vulnerability Management")]
    VulnerabilityManagement,
    #[serde(rename = "User Security")]
    UserSecurity,
    #[serde(rename = "Software Development")]
    SoftwareDevelopment,
    #[serde(rename = "Identity Management")]
    IdentityManagement,
    #[serde(rename = "Network Security")]
    NetworkSecurity,
    #[serde(rename = "Disaster Recovery")]
    DisasterRecovery,
    #[serde(rename = "Data Protection")]
    DataProtection,
    #[serde(rename = "Malware Protection")]
    MalwareProtection,
    #[serde(rename = "Asset Management")]
    AssetManagement,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::VulnerabilityManagement,
        Category::UserSecurity,
        Category::SoftwareDevelopment,
        Category::IdentityManagement,
        Category::NetworkSecurity,
        Category::DisasterRecovery,
        Category::DataProtection,
        Category::MalwareProtection,
        Category::AssetManagement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::VulnerabilityManagement => "Vulnerability Management",
            Category::UserSecurity => "User Security",
            Category::SoftwareDevelopment => "Software Development",
            Category::IdentityManagement => "Identity Management",
            Category::NetworkSecurity => "Network Security",
            Category::DisasterRecovery => "Disaster Recovery",
            Category::DataProtection => "Data Protection",
            Category::MalwareProtection => "Malware Protection",
            Category::AssetManagement => "Asset Management",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .find(|c| c.as_str() == s.trim())
            .copied()
            .ok_or_else(|| s.to_string())
    }
}

/// A metric definition as authored. Nothing here is validated yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricDefinition {
    #[serde(default, deserialize_with = "scalar_text")]
    pub metric_id: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub category: Option<String>,
    pub weight: Option<Value>,
    /// `[slo_min, slo]`
    pub slo: Option<Value>,
    pub indicator: Option<Value>,
    #[serde(rename = "type", default, deserialize_with = "scalar_text")]
    pub metric_type: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "scalar_text")]
    pub how: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Framework name -> control references, in whatever shape the author
    /// wrote them. Documentation only.
    #[serde(default)]
    pub references: Value,
    #[serde(default, deserialize_with = "query_list")]
    pub query: Option<Vec<String>>,

    /// File stem the definition was loaded from.
    #[serde(skip)]
    pub source: Option<String>,
    /// Why the file could not be read. Such a definition is reported and
    /// never evaluated.
    #[serde(skip)]
    pub load_error: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn scalar_to_text(value: Value) -> std::result::Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Tagged(tagged) => scalar_to_text(tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => Err("expected a single value".to_string()),
    }
}

/// Text fields accept any scalar, so `title: 2024` is the string "2024".
fn scalar_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_to_text(Value::deserialize(deserializer)?).map_err(D::Error::custom)
}

/// One template or a list of them.
fn query_list<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Sequence(items) => items
            .into_iter()
            .filter_map(|item| scalar_to_text(item).transpose())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Some)
            .map_err(D::Error::custom),
        other => Ok(scalar_to_text(other).map_err(D::Error::custom)?.map(|q| vec![q])),
    }
}

impl MetricDefinition {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Placeholder for a file that failed to parse, so the failure shows up
    /// in the run report instead of the metric vanishing.
    pub fn unreadable(source: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            enabled: true,
            source,
            load_error: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Name used in logs: the metric id, else the file stem.
    pub fn label(&self) -> &str {
        self.metric_id
            .as_deref()
            .or(self.source.as_deref())
            .unwrap_or("<unnamed>")
    }

    pub fn matches_filter(&self, filter: &str) -> bool {
        self.metric_id.as_deref() == Some(filter) || self.source.as_deref() == Some(filter)
    }

    pub fn queries(&self) -> &[String] {
        self.query.as_deref().unwrap_or(&[])
    }
}

/// Load every `metric_*.yml` under `dir`, in file-name order.
///
/// A file that does not parse is kept as an [`MetricDefinition::unreadable`]
/// entry; the engine discards it with an alert.
pub fn load_metrics(dir: &Path) -> Result<Vec<MetricDefinition>> {
    if !dir.is_dir() {
        return Err(ScoreError::Config(format!(
            "metric directory {} does not exist",
            dir.display()
        )));
    }

    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("metric_") && n.ends_with(".yml"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut metrics = Vec::with_capacity(files.len());
    let mut unreadable = 0;
    for path in files {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned());
        let text = std::fs::read_to_string(&path)?;
        match MetricDefinition::from_yaml(&text) {
            Ok(mut metric) => {
                metric.source = stem;
                metrics.push(metric);
            }
            Err(e) => {
                error!(file = %path.display(), "Unreadable metric definition: {}", e);
                unreadable += 1;
                metrics.push(MetricDefinition::unreadable(
                    stem,
                    format!("{} could not be parsed: {}", path.display(), e),
                ));
            }
        }
    }

    info!(
        unreadable,
        "Loaded {} metric definitions from {}",
        metrics.len(),
        dir.display()
    );
    Ok(metrics)
}
